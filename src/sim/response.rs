//! How pieces react to balls, projectiles, the paddle, beams and statuses
//!
//! Every entry point takes the id of the piece being acted on and returns the
//! id of whatever occupies that cell afterwards. That is the same id when the
//! piece survived or changed in place, and a fresh generation when it was
//! replaced.

use std::collections::BTreeSet;

use glam::Vec2;
use rand::Rng;
use rand::seq::IndexedRandom;

use super::ball::{Ball, BallType, BeamSegment, Paddle};
use super::context::SimContext;
use super::events::GameEvent;
use super::items::ItemKind;
use super::geometry::Ray2;
use super::level::GameLevel;
use super::optics::{light_outcome, OpticShape};
use super::piece::*;
use super::projectile::{Collidee, Projectile, ProjectileKind};
use super::turret::{AiTickOutcome, Sight, TurretKind};
use crate::consts::*;

pub const FIRE_DAMAGE_PER_SECOND: f32 = 25.0;
/// Chance per second that a burning piece drips a fire glob
pub const FIRE_GLOB_CHANCE_PER_SECOND: f32 = 0.35;
pub const FIRE_GLOB_MIN_SIZE: f32 = 0.3 * PIECE_HEIGHT;
pub const FIRE_GLOB_MAX_SIZE: f32 = 0.6 * PIECE_HEIGHT;

pub const TURRET_DESTROYED_BOOST: f32 = 0.25;
pub const FINITE_REGEN_DESTROYED_BOOST: f32 = 0.3;
pub const INFINITE_REGEN_DESTROYED_BOOST: f32 = 0.2;

/// Damage a laser bolt deals to life-based pieces
pub const LASER_BULLET_DAMAGE: f32 = BALL_BASE_DAMAGE;

/// Outcome of one status tick on a piece
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusTickResult {
    /// What the cell holds afterwards
    pub piece: PieceId,
    /// The tick destroyed or replaced the piece
    pub destroyed: bool,
    /// Statuses that no longer apply to the cell
    pub removed: PieceStatus,
}

/// A cannon finished spinning and let go of its load
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CannonShot {
    pub cannon: PieceId,
    pub load: CannonLoad,
    pub origin: Vec2,
    pub dir: Vec2,
}

/// Which item, if any, a destroyed piece releases
enum ItemRoll {
    Nothing,
    FromLevelTable,
    Exactly(Option<ItemKind>),
}

fn breakable_stage(kind: &PieceKind) -> Option<BreakableStage> {
    match kind {
        PieceKind::Breakable(b) => Some(b.stage),
        PieceKind::Triangle(TriangleBlock {
            behaviour: TriangleBehaviour::Breakable(stage),
            ..
        }) => Some(*stage),
        _ => None,
    }
}

fn begin_spin<R: Rng>(cannon: &mut CannonBlock, rng: &mut R) {
    let sign = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
    cannon.spin_speed = sign * rng.random_range(CANNON_MIN_SPIN_SPEED..=CANNON_MAX_SPIN_SPEED);
    cannon.spin_remaining = rng.random_range(CANNON_MIN_SPIN_TIME..=CANNON_MAX_SPIN_TIME);
}

impl GameLevel {
    // -- destruction ---------------------------------------------------------

    /// Destroy a piece for the given reason.
    ///
    /// Not every piece goes: solid-like pieces only yield to collateral and
    /// Tesla destruction, Tesla blocks toggle, portals are permanent.
    pub fn destroy_piece(&mut self, ctx: &mut SimContext, id: PieceId, method: DestructionMethod) -> PieceId {
        let Some(piece) = self.piece(id) else {
            log::warn!("destroy on stale piece {:?}", id);
            return self.current_id(id).unwrap_or(id);
        };
        let yields_to_method = matches!(method, DestructionMethod::Collateral | DestructionMethod::Tesla);

        match &piece.kind {
            PieceKind::Empty | PieceKind::Portal(_) => id,
            PieceKind::Solid | PieceKind::Prism | PieceKind::OneWay(_) | PieceKind::NoEntry => {
                self.destroy_solid_like(ctx, id, method)
            }
            PieceKind::Triangle(t) => match t.behaviour {
                TriangleBehaviour::Breakable(_) => self.remove_piece(ctx, id, method, ItemRoll::FromLevelTable),
                TriangleBehaviour::Solid | TriangleBehaviour::Prism => self.destroy_solid_like(ctx, id, method),
            },
            PieceKind::Switch(_) => {
                if yields_to_method || method == DestructionMethod::IceShatter {
                    self.destroy_solid_like(ctx, id, method)
                } else {
                    self.press_switch(ctx, id);
                    id
                }
            }
            PieceKind::ItemDrop(_) => {
                if yields_to_method || method == DestructionMethod::IceShatter {
                    self.destroy_solid_like(ctx, id, method)
                } else {
                    self.drop_item(ctx, id);
                    id
                }
            }
            PieceKind::Breakable(_) => {
                if method == DestructionMethod::IceShatter {
                    ctx.emit(GameEvent::BlockIceShattered { piece: id });
                }
                self.remove_piece(ctx, id, method, ItemRoll::FromLevelTable)
            }
            PieceKind::Bomb => {
                if method == DestructionMethod::IceShatter {
                    // Shattered bombs are defused
                    ctx.emit(GameEvent::BlockIceShattered { piece: id });
                    self.remove_piece(ctx, id, method, ItemRoll::Nothing)
                } else {
                    log::debug!("bomb {:?} detonating ({:?})", id, method);
                    self.detonate_bomb(ctx, id, method)
                }
            }
            PieceKind::Ink { .. } => {
                if method == DestructionMethod::Regular {
                    ctx.emit(GameEvent::InkBlockSplattered { piece: id });
                }
                self.remove_piece(ctx, id, method, ItemRoll::Nothing)
            }
            PieceKind::Cannon(c) => {
                let breaks = c.fragile
                    && matches!(
                        method,
                        DestructionMethod::Rocket
                            | DestructionMethod::Mine
                            | DestructionMethod::Bomb
                            | DestructionMethod::Collateral
                            | DestructionMethod::Tesla
                            | DestructionMethod::SelfDestruction
                    );
                if breaks {
                    self.remove_piece(ctx, id, method, ItemRoll::Nothing)
                } else {
                    id
                }
            }
            PieceKind::Collateral { .. } => self.detonate_collateral(ctx, id, method),
            PieceKind::Tesla(_) => {
                self.toggle_tesla(ctx, id);
                id
            }
            PieceKind::Turret(_) => {
                ctx.add_boost(TURRET_DESTROYED_BOOST);
                self.remove_piece(ctx, id, method, ItemRoll::FromLevelTable)
            }
            PieceKind::AlwaysDrop { items, .. } => {
                let item = items.choose(ctx.rng()).copied();
                self.remove_piece(ctx, id, method, ItemRoll::Exactly(item))
            }
            PieceKind::Regen { life: Some(_) } => {
                ctx.add_boost(FINITE_REGEN_DESTROYED_BOOST);
                self.remove_piece(ctx, id, method, ItemRoll::FromLevelTable)
            }
            PieceKind::Regen { life: None } => {
                let destroys = matches!(
                    method,
                    DestructionMethod::IceShatter
                        | DestructionMethod::Collateral
                        | DestructionMethod::Tesla
                        | DestructionMethod::Rocket
                );
                if destroys {
                    ctx.add_boost(INFINITE_REGEN_DESTROYED_BOOST);
                    self.remove_piece(ctx, id, method, ItemRoll::FromLevelTable)
                } else {
                    ctx.emit(GameEvent::RegenBlockPreturbed { piece: id });
                    id
                }
            }
        }
    }

    /// Pieces a ball cannot break: only collateral and Tesla destroy them,
    /// shattering just knocks the ice off
    fn destroy_solid_like(&mut self, ctx: &mut SimContext, id: PieceId, method: DestructionMethod) -> PieceId {
        match method {
            DestructionMethod::Collateral | DestructionMethod::Tesla => {
                self.remove_piece(ctx, id, method, ItemRoll::Nothing)
            }
            DestructionMethod::IceShatter => {
                if self.remove_status(ctx, id, PieceStatus::ICE_CUBE) {
                    ctx.emit(GameEvent::BlockIceShattered { piece: id });
                }
                id
            }
            _ => id,
        }
    }

    /// Announce the destruction, release any item and leave an empty cell
    fn remove_piece(&mut self, ctx: &mut SimContext, id: PieceId, method: DestructionMethod, roll: ItemRoll) -> PieceId {
        let Some(piece) = self.piece(id) else {
            return self.current_id(id).unwrap_or(id);
        };
        let center = piece.center;
        ctx.emit(GameEvent::BlockDestroyed {
            piece: id,
            piece_type: piece.piece_type(),
            center,
            method,
        });
        match roll {
            ItemRoll::Nothing | ItemRoll::Exactly(None) => {}
            ItemRoll::FromLevelTable => {
                ctx.add_possible_item_drop(&self.drop_table, center);
            }
            ItemRoll::Exactly(Some(item)) => ctx.add_item_drop(item, center),
        }
        self.piece_changed(ctx, id, Some(PieceKind::Empty), method)
    }

    /// Destroy a bomb that belongs to someone else's chain
    pub(super) fn remove_chained_bomb(&mut self, ctx: &mut SimContext, id: PieceId) -> PieceId {
        self.remove_piece(ctx, id, DestructionMethod::Bomb, ItemRoll::Nothing)
    }

    /// Last step of a bomb chain: the origin bomb itself
    pub(super) fn remove_origin_bomb(&mut self, ctx: &mut SimContext, id: PieceId, method: DestructionMethod) -> PieceId {
        self.remove_piece(ctx, id, method, ItemRoll::FromLevelTable)
    }

    /// The block leaves the grid and lives on as a falling hazard
    fn detonate_collateral(&mut self, ctx: &mut SimContext, id: PieceId, method: DestructionMethod) -> PieceId {
        let Some(center) = self.piece(id).map(|p| p.center) else {
            return id;
        };
        let projectile_id = ctx.next_projectile_id();
        let block = Projectile::collateral(projectile_id, center, ctx.rng());
        ctx.spawn_projectile(block);
        log::debug!("collateral {:?} detonated as projectile {}", id, projectile_id);
        self.remove_piece(ctx, id, method, ItemRoll::Nothing)
    }

    // -- switches, tesla, item drops -----------------------------------------

    /// Flip a Tesla block, adding or removing arcs to its active partners.
    /// Returns false when the block is fixed or toggled too recently.
    pub fn toggle_tesla(&mut self, ctx: &mut SimContext, id: PieceId) -> bool {
        let now = ctx.now();
        let Some(PieceKind::Tesla(tesla)) = self.piece_mut(id).map(|p| &mut p.kind) else {
            return false;
        };
        if !tesla.changable {
            return false;
        }
        if tesla
            .last_toggle
            .is_some_and(|last| now - last < TESLA_MIN_TIME_BETWEEN_TOGGLINGS)
        {
            return false;
        }
        tesla.last_toggle = Some(now);
        tesla.toggle_life = TOGGLE_LIFE;
        tesla.active = !tesla.active;
        let active = tesla.active;
        let connections = tesla.connections.clone();
        log::debug!("tesla {:?} now {}", id, if active { "on" } else { "off" });

        for other in connections {
            let other_active = matches!(
                self.piece(other).map(|p| &p.kind),
                Some(PieceKind::Tesla(o)) if o.active
            );
            if !other_active {
                continue;
            }
            if active {
                self.add_tesla_lightning_barrier(ctx, id, other);
            } else {
                self.remove_tesla_lightning_barrier(ctx, id, other);
            }
        }
        true
    }

    /// Press a switch: fire its trigger unless it is still resetting
    pub fn press_switch(&mut self, ctx: &mut SimContext, id: PieceId) -> bool {
        let now = ctx.now();
        let Some(PieceKind::Switch(switch)) = self.piece_mut(id).map(|p| &mut p.kind) else {
            return false;
        };
        if switch.is_on(now) {
            return false;
        }
        switch.last_press = Some(now);
        switch.toggle_life = TOGGLE_LIFE;
        let target = switch.target;
        ctx.emit(GameEvent::SwitchBlockActivated { piece: id });
        self.activate_triggerable_level_piece(ctx, target);
        true
    }

    /// Release the block's current item and pick the next one
    pub fn drop_item(&mut self, ctx: &mut SimContext, id: PieceId) -> bool {
        let now = ctx.now();
        let Some(piece) = self.piece_mut(id) else {
            return false;
        };
        let frozen = piece.is_frozen();
        let center = piece.center;
        let PieceKind::ItemDrop(block) = &mut piece.kind else {
            return false;
        };
        if frozen {
            ctx.emit(GameEvent::ItemDropBlockLocked { piece: id });
            return false;
        }
        if block.last_drop.is_some_and(|last| now - last < ITEM_DROP_DISABLE_TIME) {
            return false;
        }
        block.last_drop = Some(now);
        block.damage = 0.0;
        let item = block.next_item;
        let next = block.allowed.choose(ctx.rng()).copied().unwrap_or(item);
        block.next_item = next;

        ctx.add_item_drop(item, center);
        if next != item {
            ctx.emit(GameEvent::ItemDropBlockItemChange { piece: id, item: next });
        }
        true
    }

    /// A switch (or anything else) fired this piece's trigger id
    pub fn trigger_piece(&mut self, ctx: &mut SimContext, id: PieceId) -> PieceId {
        let Some(piece) = self.piece(id) else {
            return self.current_id(id).unwrap_or(id);
        };
        match &piece.kind {
            PieceKind::Tesla(_) => {
                self.toggle_tesla(ctx, id);
                id
            }
            PieceKind::ItemDrop(_) => {
                self.drop_item(ctx, id);
                id
            }
            PieceKind::Switch(_) | PieceKind::Empty | PieceKind::Portal(_) => id,
            _ => self.destroy_piece(ctx, id, DestructionMethod::NotApplicable),
        }
    }

    // -- ice and fire --------------------------------------------------------

    fn cancel_ice_with_fire(&mut self, ctx: &mut SimContext, id: PieceId) {
        if self.remove_status(ctx, id, PieceStatus::ICE_CUBE) {
            ctx.emit(GameEvent::BlockIceCancelledWithFire { piece: id });
        }
    }

    /// Ice and fire balls against a piece that can be frozen.
    ///
    /// Returns `Some` when the ball's element used up the hit: ice froze the
    /// piece, fire melted the ice, or a plain hit shattered it.
    fn ice_response(&mut self, ctx: &mut SimContext, id: PieceId, ball: &Ball) -> Option<PieceId> {
        let piece = self.piece(id)?;
        if piece.is_frozen() {
            if ball.is_type(BallType::FIRE) {
                self.cancel_ice_with_fire(ctx, id);
                return Some(id);
            }
            return Some(self.destroy_piece(ctx, id, DestructionMethod::IceShatter));
        }
        if ball.is_type(BallType::ICE) && piece.can_have_status(PieceStatus::ICE_CUBE) {
            if piece.is_on_fire() {
                self.remove_status(ctx, id, PieceStatus::ON_FIRE);
            } else {
                self.add_status(ctx, id, PieceStatus::ICE_CUBE);
            }
            return Some(id);
        }
        None
    }

    fn ignite(&mut self, ctx: &mut SimContext, id: PieceId) -> bool {
        if self.piece(id).is_some_and(|p| p.is_frozen()) {
            self.cancel_ice_with_fire(ctx, id);
            return false;
        }
        self.add_status(ctx, id, PieceStatus::ON_FIRE)
    }

    // -- damage helpers ------------------------------------------------------

    /// Knock a breakable down `steps` stages, destroying it past green
    pub fn diminish_breakable(&mut self, ctx: &mut SimContext, id: PieceId, steps: u32, method: DestructionMethod) -> PieceId {
        let mut current = id;
        for _ in 0..steps {
            let Some(piece) = self.piece_mut(current) else {
                break;
            };
            let Some(stage) = breakable_stage(&piece.kind) else {
                return current;
            };
            let Some(next) = stage.diminished() else {
                return self.destroy_piece(ctx, current, method);
            };
            match &mut piece.kind {
                PieceKind::Breakable(b) => {
                    b.stage = next;
                    b.life = BREAKABLE_STAGE_LIFE;
                }
                PieceKind::Triangle(t) => {
                    t.behaviour = TriangleBehaviour::Breakable(next);
                    t.life = BREAKABLE_STAGE_LIFE;
                }
                _ => return current,
            }
            piece.colour = next.colour();
            current = self.piece_changed(ctx, current, None, method);
        }
        current
    }

    fn damage_turret(&mut self, ctx: &mut SimContext, id: PieceId, damage: f32, method: DestructionMethod) -> PieceId {
        let Some(PieceKind::Turret(turret)) = self.piece_mut(id).map(|p| &mut p.kind) else {
            return id;
        };
        turret.life -= damage;
        if turret.life <= 0.0 {
            return self.destroy_piece(ctx, id, method);
        }
        id
    }

    fn damage_regen(&mut self, ctx: &mut SimContext, id: PieceId, damage: f32, method: DestructionMethod) -> PieceId {
        let Some(PieceKind::Regen { life }) = self.piece_mut(id).map(|p| &mut p.kind) else {
            return id;
        };
        let Some(life) = life else {
            ctx.emit(GameEvent::RegenBlockPreturbed { piece: id });
            return id;
        };
        *life -= damage;
        let remaining = *life;
        ctx.emit(GameEvent::RegenBlockLifeChanged {
            piece: id,
            life_percent: (remaining / REGEN_MAX_LIFE * 100.0).max(0.0),
        });
        if remaining <= 0.0 {
            return self.destroy_piece(ctx, id, method);
        }
        id
    }

    /// Continuous damage from beams, shields and fire
    fn apply_damage_over_time(&mut self, ctx: &mut SimContext, id: PieceId, damage: f32, method: DestructionMethod) -> PieceId {
        let Some(piece) = self.piece_mut(id) else {
            return self.current_id(id).unwrap_or(id);
        };
        if piece.is_frozen() {
            return id;
        }
        match &mut piece.kind {
            PieceKind::Breakable(_) => self.burn_breakable(ctx, id, damage, method),
            PieceKind::Triangle(t) if matches!(t.behaviour, TriangleBehaviour::Breakable(_)) => {
                self.burn_breakable(ctx, id, damage, method)
            }
            PieceKind::Bomb => self.destroy_piece(ctx, id, method),
            PieceKind::Ink { life } | PieceKind::Collateral { life } | PieceKind::AlwaysDrop { life, .. } => {
                *life -= damage;
                if *life <= 0.0 {
                    return self.destroy_piece(ctx, id, method);
                }
                id
            }
            PieceKind::Tesla(tesla) => {
                tesla.toggle_life -= damage;
                if tesla.toggle_life <= 0.0 {
                    tesla.toggle_life = TOGGLE_LIFE;
                    self.toggle_tesla(ctx, id);
                }
                id
            }
            PieceKind::Switch(switch) => {
                switch.toggle_life -= damage;
                if switch.toggle_life <= 0.0 {
                    switch.toggle_life = TOGGLE_LIFE;
                    self.press_switch(ctx, id);
                }
                id
            }
            PieceKind::ItemDrop(block) => {
                block.damage += damage;
                if block.damage >= DAMAGE_UNTIL_ITEM_DROP {
                    block.damage = 0.0;
                    self.drop_item(ctx, id);
                }
                id
            }
            PieceKind::Turret(_) => self.damage_turret(ctx, id, damage, method),
            PieceKind::Regen { life: Some(_) } => self.damage_regen(ctx, id, damage, method),
            _ => id,
        }
    }

    fn burn_breakable(&mut self, ctx: &mut SimContext, id: PieceId, damage: f32, method: DestructionMethod) -> PieceId {
        let Some(piece) = self.piece_mut(id) else {
            return id;
        };
        let life = match &mut piece.kind {
            PieceKind::Breakable(b) => &mut b.life,
            PieceKind::Triangle(t) => &mut t.life,
            _ => return id,
        };
        *life -= damage;
        if *life <= 0.0 {
            return self.diminish_breakable(ctx, id, 1, method);
        }
        id
    }

    // -- ball ----------------------------------------------------------------

    /// A ball hit a piece. The caller has already resolved the bounce.
    pub fn ball_collision_occurred(&mut self, ctx: &mut SimContext, id: PieceId, ball: &mut Ball) -> PieceId {
        let Some(piece) = self.piece(id) else {
            return self.current_id(id).unwrap_or(id);
        };
        let bounded = !piece.is_no_bounds_piece_type();
        if bounded {
            ctx.emit(GameEvent::BallBlockCollision { ball: ball.id, piece: id });
        }

        let result = match &piece.kind {
            PieceKind::Empty => id,
            PieceKind::Portal(_) => return self.teleport_ball(ctx, id, ball),
            PieceKind::Cannon(_) => return self.capture_ball(ctx, id, ball),
            PieceKind::Solid | PieceKind::Prism | PieceKind::OneWay(_) | PieceKind::NoEntry => {
                self.ice_response(ctx, id, ball).unwrap_or(id)
            }
            PieceKind::Triangle(t) => match t.behaviour {
                TriangleBehaviour::Breakable(_) => self.breakable_ball_hit(ctx, id, ball),
                _ => self.ice_response(ctx, id, ball).unwrap_or(id),
            },
            PieceKind::Breakable(_) => self.breakable_ball_hit(ctx, id, ball),
            // Smashed through before the ink can splatter
            PieceKind::Ink { .. } if piece.ball_blasts_through(ball) => {
                self.remove_piece(ctx, id, DestructionMethod::Regular, ItemRoll::Nothing)
            }
            PieceKind::Bomb | PieceKind::Ink { .. } | PieceKind::Collateral { .. } | PieceKind::AlwaysDrop { .. } => {
                match self.ice_response(ctx, id, ball) {
                    Some(result) => result,
                    None => self.destroy_piece(ctx, id, DestructionMethod::Regular),
                }
            }
            PieceKind::Tesla(_) => {
                self.toggle_tesla(ctx, id);
                id
            }
            PieceKind::ItemDrop(_) => self.ice_response(ctx, id, ball).unwrap_or_else(|| {
                self.drop_item(ctx, id);
                id
            }),
            PieceKind::Switch(_) => self.ice_response(ctx, id, ball).unwrap_or_else(|| {
                self.press_switch(ctx, id);
                id
            }),
            PieceKind::Turret(turret) => {
                let damage = if ball.is_type(BallType::UBER) {
                    turret.ball_damage() * 2.0
                } else {
                    turret.ball_damage()
                };
                match self.ice_response(ctx, id, ball) {
                    Some(result) => result,
                    None => {
                        if ball.is_type(BallType::FIRE) {
                            self.ignite(ctx, id);
                        }
                        self.damage_turret(ctx, id, damage, DestructionMethod::Regular)
                    }
                }
            }
            PieceKind::Regen { life } => {
                let finite = life.is_some();
                match self.ice_response(ctx, id, ball) {
                    Some(result) => result,
                    None => {
                        if finite && ball.is_type(BallType::FIRE) {
                            self.ignite(ctx, id);
                        }
                        self.damage_regen(ctx, id, ball.collision_damage(), DestructionMethod::Regular)
                    }
                }
            }
        };
        if bounded {
            ball.set_last_piece_collided_with(Some(id));
        }
        result
    }

    fn breakable_ball_hit(&mut self, ctx: &mut SimContext, id: PieceId, ball: &Ball) -> PieceId {
        let now = ctx.now();
        let Some(piece) = self.piece_mut(id) else {
            return id;
        };
        let last_hit = match &mut piece.kind {
            PieceKind::Breakable(b) => &mut b.last_ball_hit,
            PieceKind::Triangle(t) => &mut t.last_ball_hit,
            _ => return id,
        };
        if ball.is_last_piece_collided_with(id)
            && last_hit.is_some_and(|t| now - t < ALLOWABLE_TIME_BETWEEN_BALL_COLLISIONS)
        {
            return id;
        }
        *last_hit = Some(now);

        if let Some(result) = self.ice_response(ctx, id, ball) {
            return result;
        }
        let stage = self.piece(id).and_then(|p| breakable_stage(&p.kind));
        if ball.is_type(BallType::FIRE) && stage != Some(BreakableStage::Green) {
            self.ignite(ctx, id);
            return id;
        }
        let steps = if ball.is_type(BallType::UBER) { 2 } else { 1 };
        self.diminish_breakable(ctx, id, steps, DestructionMethod::Regular)
    }

    fn teleport_ball(&mut self, ctx: &mut SimContext, id: PieceId, ball: &mut Ball) -> PieceId {
        let now = ctx.now();
        let Some(PieceKind::Portal(portal)) = self.piece(id).map(|p| &p.kind) else {
            return id;
        };
        let Some(sibling) = portal.sibling else {
            return id;
        };
        let cooling_down = portal
            .last_ball_use
            .is_some_and(|t| now - t < PORTAL_TIME_BETWEEN_BALL_USES);
        if ball.is_last_piece_collided_with(id) || cooling_down {
            return id;
        }
        let Some(destination) = self.piece(sibling).map(|p| p.center) else {
            return id;
        };

        ball.set_last_piece_collided_with(Some(sibling));
        ctx.emit(GameEvent::BallPortalBlockTeleport { ball: ball.id, portal: id });
        ball.center = destination;
        if let Some(PieceKind::Portal(other)) = self.piece_mut(sibling).map(|p| &mut p.kind) {
            other.last_ball_use = Some(now);
        }
        id
    }

    fn capture_ball(&mut self, ctx: &mut SimContext, id: PieceId, ball: &mut Ball) -> PieceId {
        if ball.is_loaded_in_cannon() || ball.is_last_piece_collided_with(id) {
            return id;
        }
        let Some(piece) = self.piece_mut(id) else {
            return id;
        };
        let center = piece.center;
        let PieceKind::Cannon(cannon) = &mut piece.kind else {
            return id;
        };
        if cannon.loaded.is_some() || cannon.spent {
            return id;
        }
        cannon.loaded = Some(CannonLoad::Ball(ball.id));
        begin_spin(cannon, ctx.rng());

        ball.cannon = Some(id);
        ball.center = center;
        ball.set_last_piece_collided_with(Some(id));
        ctx.emit(GameEvent::BallEnteredCannon { ball: ball.id, cannon: id });
        id
    }

    // -- paddle --------------------------------------------------------------

    pub fn paddle_collision_occurred(&mut self, ctx: &mut SimContext, id: PieceId) -> PieceId {
        let Some(piece) = self.piece(id) else {
            return self.current_id(id).unwrap_or(id);
        };
        match piece.kind {
            PieceKind::Switch(_) => {
                self.press_switch(ctx, id);
            }
            PieceKind::Tesla(_) => {
                self.toggle_tesla(ctx, id);
            }
            _ => {}
        }
        ctx.emit(GameEvent::PaddleBlockCollision { piece: id });
        id
    }

    /// Move the paddle through a bottom-row portal it just crossed.
    /// Returns true when it teleported.
    pub fn paddle_teleport(&mut self, ctx: &mut SimContext, paddle: &mut Paddle) -> bool {
        let (from, to) = (paddle.prev_center.x, paddle.center.x);
        if from == to {
            return false;
        }
        let crossed = (0..self.width).find_map(|w| {
            let piece = &self.pieces[w];
            let PieceKind::Portal(portal) = &piece.kind else {
                return None;
            };
            let line = piece.center.x;
            let crosses = (from - line).signum() != (to - line).signum() && to != line;
            if !crosses {
                return None;
            }
            let sibling = portal.sibling?;
            let destination = self.piece(sibling)?.center.x;
            Some((piece.id, destination + (to - line), portal.flips_paddle))
        });
        let Some((portal, x, flips)) = crossed else {
            return false;
        };
        paddle.center.x = x;
        paddle.prev_center = paddle.center;
        if flips {
            paddle.flip();
        }
        ctx.emit(GameEvent::PaddlePortalBlockTeleport { portal });
        true
    }

    // -- projectiles ---------------------------------------------------------

    /// A projectile hit a piece (or entered a portal or cannon)
    pub fn projectile_collision_occurred(&mut self, ctx: &mut SimContext, id: PieceId, projectile: &mut Projectile) -> PieceId {
        let Some(piece) = self.piece(id) else {
            return self.current_id(id).unwrap_or(id);
        };
        let kind = projectile.kind;
        ctx.emit(GameEvent::ProjectileBlockCollision {
            projectile: projectile.id,
            kind,
            piece: id,
        });
        projectile.set_last_thing_collided(Some(Collidee::Piece(id)));

        if kind == ProjectileKind::CollateralBlock {
            return self.destroy_piece(ctx, id, DestructionMethod::Collateral);
        }
        match &piece.kind {
            PieceKind::Portal(_) => return self.teleport_projectile(ctx, id, projectile),
            PieceKind::Cannon(_) if kind.is_rocket() || kind.is_mine() => {
                return self.capture_projectile(ctx, id, projectile);
            }
            _ => {}
        }

        match kind {
            ProjectileKind::PaddleRocket | ProjectileKind::RocketTurretBullet => {
                projectile.alive = false;
                self.rocket_explosion(ctx, projectile, id)
            }
            ProjectileKind::PaddleMine | ProjectileKind::MineTurretBullet => {
                if matches!(piece.kind, PieceKind::Turret(_)) {
                    projectile.alive = false;
                } else if projectile.mine_attached_to().is_none() {
                    projectile.land_mine(Some(id));
                    ctx.emit(GameEvent::MineLanded { projectile: projectile.id });
                }
                id
            }
            ProjectileKind::PaddleLaserBullet | ProjectileKind::BallLaserBullet | ProjectileKind::LaserTurretBullet => {
                self.laser_hit(ctx, id, projectile)
            }
            ProjectileKind::FireGlob => {
                projectile.alive = false;
                if matches!(piece.kind, PieceKind::Switch(_)) {
                    self.press_switch(ctx, id);
                } else {
                    self.ignite(ctx, id);
                }
                id
            }
            ProjectileKind::CollateralBlock | ProjectileKind::Portal => id,
        }
    }

    fn laser_hit(&mut self, ctx: &mut SimContext, id: PieceId, laser: &mut Projectile) -> PieceId {
        let Some(piece) = self.piece(id) else {
            return id;
        };
        if piece.is_light_reflector_refractor() {
            self.refract_laser(ctx, id, laser);
            return id;
        }
        laser.alive = false;
        let method = DestructionMethod::LaserProjectile;
        match &piece.kind {
            PieceKind::Breakable(_) => self.diminish_breakable(ctx, id, 1, method),
            PieceKind::Triangle(t) if matches!(t.behaviour, TriangleBehaviour::Breakable(_)) => {
                self.diminish_breakable(ctx, id, 1, method)
            }
            PieceKind::Bomb | PieceKind::Ink { .. } | PieceKind::AlwaysDrop { .. } | PieceKind::Collateral { .. } => {
                self.destroy_piece(ctx, id, method)
            }
            PieceKind::Tesla(_) => {
                self.toggle_tesla(ctx, id);
                id
            }
            PieceKind::Switch(_) => {
                self.press_switch(ctx, id);
                id
            }
            PieceKind::ItemDrop(_) => {
                self.drop_item(ctx, id);
                id
            }
            PieceKind::Turret(turret) => {
                let damage = turret.ball_damage() * 0.5;
                self.damage_turret(ctx, id, damage, method)
            }
            PieceKind::Regen { .. } => self.damage_regen(ctx, id, LASER_BULLET_DAMAGE, method),
            _ => id,
        }
    }

    /// Send a laser through prism or ice optics, spawning any split beams
    fn refract_laser(&mut self, ctx: &mut SimContext, id: PieceId, laser: &mut Projectile) {
        let Some(piece) = self.piece(id) else {
            return;
        };
        let shape = if piece.is_frozen() {
            OpticShape::IceCube
        } else {
            match &piece.kind {
                PieceKind::Prism => OpticShape::Diamond,
                PieceKind::Triangle(t) => OpticShape::Triangle(t.orientation),
                _ => return,
            }
        };
        let outcome = light_outcome(shape, piece.center, laser.position, laser.dir);
        let scale = outcome.split_scale();

        for beam in &outcome.children {
            let child_id = ctx.next_projectile_id();
            let mut child = laser.split_child(child_id, beam.position, beam.dir, scale);
            child.set_last_thing_collided(Some(Collidee::Piece(id)));
            ctx.spawn_projectile(child);
        }
        if let Some(ray) = outcome.redirected {
            laser.position = ray.position;
            laser.redirect(ray.dir);
            if !outcome.children.is_empty() {
                laser.width *= scale;
                laser.height *= scale;
            }
        }
    }

    fn teleport_projectile(&mut self, ctx: &mut SimContext, id: PieceId, projectile: &mut Projectile) -> PieceId {
        let Some(piece) = self.piece(id) else {
            return id;
        };
        let PieceKind::Portal(portal) = &piece.kind else {
            return id;
        };
        let Some(destination) = portal.sibling.and_then(|s| self.piece(s)) else {
            return id;
        };
        let offset = projectile.position + projectile.dir * projectile.half_height() - piece.center;
        projectile.position = destination.center + offset;
        projectile.set_last_thing_collided(Some(Collidee::Piece(destination.id)));
        ctx.emit(GameEvent::ProjectilePortalBlockTeleport {
            projectile: projectile.id,
            portal: id,
        });
        id
    }

    fn capture_projectile(&mut self, ctx: &mut SimContext, id: PieceId, projectile: &mut Projectile) -> PieceId {
        if projectile.is_loaded_in_cannon() {
            return id;
        }
        let Some(piece) = self.piece_mut(id) else {
            return id;
        };
        let center = piece.center;
        let PieceKind::Cannon(cannon) = &mut piece.kind else {
            return id;
        };
        if cannon.loaded.is_some() || cannon.spent {
            return id;
        }
        cannon.loaded = Some(CannonLoad::Projectile(projectile.id));
        begin_spin(cannon, ctx.rng());

        projectile.cannon = Some(id);
        projectile.position = center;
        ctx.emit(GameEvent::ProjectileEnteredCannon {
            projectile: projectile.id,
            cannon: id,
        });
        id
    }

    // -- continuous damage ---------------------------------------------------

    pub fn tick_beam_collision(&mut self, ctx: &mut SimContext, id: PieceId, dt: f32, beam: &BeamSegment) -> PieceId {
        self.apply_damage_over_time(ctx, id, beam.damage_per_second * dt, DestructionMethod::LaserBeam)
    }

    pub fn tick_paddle_shield_collision(&mut self, ctx: &mut SimContext, id: PieceId, dt: f32, paddle: &Paddle) -> PieceId {
        self.apply_damage_over_time(ctx, id, paddle.shield_damage_per_second * dt, DestructionMethod::PaddleShield)
    }

    /// Per-tick status effects: fire eats life and drips fire globs
    pub fn status_tick(&mut self, ctx: &mut SimContext, id: PieceId, dt: f32) -> StatusTickResult {
        let Some(piece) = self.piece(id) else {
            return StatusTickResult {
                piece: self.current_id(id).unwrap_or(id),
                destroyed: true,
                removed: PieceStatus::NORMAL,
            };
        };
        let statuses = piece.status;
        let center = piece.center;

        let mut result = id;
        if statuses.contains(PieceStatus::ON_FIRE) {
            if ctx.rng().random_bool((FIRE_GLOB_CHANCE_PER_SECOND * dt).clamp(0.0, 1.0) as f64) {
                let size = ctx.rng().random_range(FIRE_GLOB_MIN_SIZE..=FIRE_GLOB_MAX_SIZE);
                let glob_id = ctx.next_projectile_id();
                let glob = Projectile::fire_glob(glob_id, center - Vec2::new(0.0, HALF_PIECE_HEIGHT), size, id);
                ctx.spawn_projectile(glob);
            }
            result = self.apply_damage_over_time(ctx, id, FIRE_DAMAGE_PER_SECOND * dt, DestructionMethod::Fire);
        }

        let destroyed = !self.is_live(id);
        let removed = if destroyed {
            statuses
        } else {
            let now = self.piece(id).map_or(PieceStatus::NORMAL, |p| p.status);
            let mut gone = PieceStatus::NORMAL;
            for s in statuses.iter().filter(|s| !now.contains(*s)) {
                gone.insert(s);
            }
            gone
        };
        StatusTickResult {
            piece: result,
            destroyed,
            removed,
        }
    }

    // -- per-tick pieces -----------------------------------------------------

    /// Regenerate regen blocks and spin loaded cannons, returning the shots
    /// of cannons that finished spinning
    pub fn tick_pieces(&mut self, ctx: &mut SimContext, dt: f32) -> Vec<CannonShot> {
        let mut shots = Vec::new();
        let mut spent = Vec::new();
        for id in self.ticking_pieces.iter().copied().collect::<Vec<_>>() {
            let Some(piece) = self.piece_mut(id) else {
                continue;
            };
            let center = piece.center;
            match &mut piece.kind {
                PieceKind::Regen { life: Some(life) } => {
                    if *life < REGEN_MAX_LIFE {
                        *life = (*life + REGEN_LIFE_PER_SECOND * dt).min(REGEN_MAX_LIFE);
                        ctx.emit(GameEvent::RegenBlockLifeChanged {
                            piece: id,
                            life_percent: *life / REGEN_MAX_LIFE * 100.0,
                        });
                    }
                }
                PieceKind::Cannon(cannon) => {
                    let Some(load) = cannon.loaded else {
                        continue;
                    };
                    cannon.rotation_deg = crate::normalize_degrees(cannon.rotation_deg + cannon.spin_speed * dt);
                    cannon.spin_remaining -= dt;
                    if cannon.spin_remaining > 0.0 {
                        continue;
                    }
                    cannon.rotation_deg = match cannon.angle {
                        CannonAngle::Free => cannon.rotation_deg,
                        CannonAngle::Fixed(angle) => angle,
                        CannonAngle::Range(a, b) => ctx.rng().random_range(a.min(b)..=a.max(b)),
                    };
                    cannon.loaded = None;
                    cannon.spin_speed = 0.0;
                    let dir = cannon.fire_dir();
                    shots.push(CannonShot {
                        cannon: id,
                        load,
                        origin: center + dir * CANNON_BARREL_LENGTH,
                        dir,
                    });
                    ctx.emit(match load {
                        CannonLoad::Ball(ball) => GameEvent::BallFiredFromCannon { ball, cannon: id },
                        CannonLoad::Projectile(projectile) => GameEvent::ProjectileFiredFromCannon { projectile, cannon: id },
                    });
                    if cannon.fragile {
                        cannon.spent = true;
                        spent.push(id);
                    }
                }
                _ => {}
            }
        }
        for id in spent {
            self.destroy_piece(ctx, id, DestructionMethod::SelfDestruction);
        }
        shots
    }

    // -- turret ai -----------------------------------------------------------

    /// Line of sight from a turret to the paddle along `dir`
    fn turret_sight(&self, turret: PieceId, center: Vec2, dir: Vec2, barrel_extent: f32, paddle: &Paddle) -> Sight {
        let ray = Ray2::new(center, dir);
        let Some(paddle_t) = paddle.bounds().ray_collision(&ray) else {
            return Sight::default();
        };
        let ignore = BTreeSet::from([turret]);
        let blocked = |tolerance: f32| {
            self.first_collider(&ray, &ignore, tolerance)
                .is_some_and(|(_, t)| t < paddle_t)
        };
        if !blocked(barrel_extent * 1.05) {
            return Sight {
                can_see: true,
                can_fire: true,
            };
        }
        Sight {
            can_see: !blocked(0.0),
            can_fire: false,
        }
    }

    /// Advance every turret's AI; turrets idle while frozen or with no ball in play
    pub fn tick_ai(&mut self, ctx: &mut SimContext, dt: f32, paddle: &Paddle, ball_in_play: bool) {
        for id in self.ai_pieces() {
            let Some(piece) = self.piece(id) else {
                continue;
            };
            let PieceKind::Turret(turret) = &piece.kind else {
                continue;
            };
            let mut ai = turret.ai.clone();
            let center = piece.center;
            let outcome = if piece.is_frozen() || !ball_in_play {
                AiTickOutcome {
                    fire: None,
                    state_change: ai.go_idle(),
                }
            } else {
                let extent = ai.kind().barrel_extent();
                ai.tick(
                    dt,
                    center,
                    paddle.center,
                    |dir| self.turret_sight(id, center, dir, extent, paddle),
                    ctx.rng(),
                )
            };
            let kind = ai.kind();
            if let Some(PieceKind::Turret(turret)) = self.piece_mut(id).map(|p| &mut p.kind) {
                turret.ai = ai;
            }

            if let Some((old, new)) = outcome.state_change {
                log::debug!("turret {:?}: {:?} -> {:?}", id, old, new);
                ctx.emit(GameEvent::TurretAiStateChanged { piece: id, old, new });
            }
            if let Some(order) = outcome.fire {
                let projectile_id = ctx.next_projectile_id();
                let origin = center + order.offset;
                let mut shot = match kind {
                    TurretKind::Laser => Projectile::laser(projectile_id, ProjectileKind::LaserTurretBullet, origin, order.dir),
                    TurretKind::Rocket => {
                        Projectile::rocket(projectile_id, ProjectileKind::RocketTurretBullet, origin, order.dir, 1.0)
                    }
                    TurretKind::Mine => Projectile::mine(projectile_id, ProjectileKind::MineTurretBullet, origin, order.dir, 1.0),
                };
                shot.set_last_thing_collided(Some(Collidee::Piece(id)));
                ctx.spawn_projectile(shot);
                ctx.emit(GameEvent::TurretFired {
                    piece: id,
                    projectile: projectile_id,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::events::EventRecorder;
    use crate::sim::turret::TurretAi;

    fn red() -> PieceKind {
        PieceKind::Breakable(BreakableBlock::new(BreakableStage::Red))
    }

    fn ball() -> Ball {
        Ball::new(1, Vec2::ZERO, Vec2::Y, BALL_START_SPEED)
    }

    fn recorded(ctx: &mut SimContext) -> EventRecorder {
        let recorder = EventRecorder::new();
        ctx.register_listener(Box::new(recorder.clone()));
        recorder
    }

    fn stage_at(level: &GameLevel, w: usize, h: usize) -> Option<BreakableStage> {
        level.piece_at(w, h).and_then(|p| breakable_stage(&p.kind))
    }

    #[test]
    fn test_breakable_ladder_takes_four_hits() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| red());
        let mut ctx = SimContext::new(1);
        let mut b = ball();
        let mut id = level.id_at(0, 0).unwrap();
        let expected = [
            Some(BreakableStage::Orange),
            Some(BreakableStage::Yellow),
            Some(BreakableStage::Green),
            None,
        ];
        for stage in expected {
            ctx.advance_clock(0.1);
            id = level.ball_collision_occurred(&mut ctx, id, &mut b);
            assert_eq!(stage_at(&level, 0, 0), stage);
        }
        assert!(level.piece_at(0, 0).unwrap().is_empty());
        assert_eq!(level.pieces_left(), 0);
    }

    #[test]
    fn test_uber_ball_skips_a_stage() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| red());
        let mut ctx = SimContext::new(1);
        let mut uber = ball().with_type(BallType::UBER);
        let id = level.id_at(0, 0).unwrap();
        level.ball_collision_occurred(&mut ctx, id, &mut uber);
        assert_eq!(stage_at(&level, 0, 0), Some(BreakableStage::Yellow));
    }

    #[test]
    fn test_ink_splatters_unless_uber_blasts_through() {
        let mut level = GameLevel::from_kinds(2, 1, |_, _| PieceKind::Ink { life: INK_LIFE });
        let mut ctx = SimContext::new(1);
        let recorder = recorded(&mut ctx);
        let splats = |r: &EventRecorder| r.count(|e| matches!(e, GameEvent::InkBlockSplattered { .. }));

        let mut uber = ball().with_type(BallType::UBER);
        let first = level.id_at(0, 0).unwrap();
        level.ball_collision_occurred(&mut ctx, first, &mut uber);
        assert!(level.piece_at(0, 0).unwrap().is_empty());
        assert_eq!(splats(&recorder), 0);

        let mut b = ball();
        let second = level.id_at(1, 0).unwrap();
        level.ball_collision_occurred(&mut ctx, second, &mut b);
        assert!(level.piece_at(1, 0).unwrap().is_empty());
        assert_eq!(splats(&recorder), 1);
    }

    #[test]
    fn test_repeat_hit_inside_window_is_ignored() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| red());
        let mut ctx = SimContext::new(1);
        let mut b = ball();
        let id = level.id_at(0, 0).unwrap();
        level.ball_collision_occurred(&mut ctx, id, &mut b);
        level.ball_collision_occurred(&mut ctx, id, &mut b);
        assert_eq!(stage_at(&level, 0, 0), Some(BreakableStage::Orange));
    }

    #[test]
    fn test_fire_ball_ignites_instead_of_diminishing() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| red());
        let mut ctx = SimContext::new(1);
        let mut fire = ball().with_type(BallType::FIRE);
        let id = level.id_at(0, 0).unwrap();
        level.ball_collision_occurred(&mut ctx, id, &mut fire);
        let piece = level.piece(id).unwrap();
        assert!(piece.is_on_fire());
        assert_eq!(stage_at(&level, 0, 0), Some(BreakableStage::Red));
        assert_eq!(level.status_pieces(), vec![id]);
    }

    #[test]
    fn test_ice_then_plain_ball_shatters_breakable() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| red());
        let mut ctx = SimContext::new(1);
        let recorder = recorded(&mut ctx);
        let id = level.id_at(0, 0).unwrap();
        let mut ice = ball().with_type(BallType::ICE);
        level.ball_collision_occurred(&mut ctx, id, &mut ice);
        assert!(level.piece(id).unwrap().is_frozen());

        ctx.advance_clock(0.1);
        let mut plain = Ball::new(2, Vec2::ZERO, Vec2::Y, BALL_START_SPEED);
        level.ball_collision_occurred(&mut ctx, id, &mut plain);
        assert!(level.piece_at(0, 0).unwrap().is_empty());
        assert_eq!(recorder.count(|e| matches!(e, GameEvent::BlockIceShattered { .. })), 1);
        assert!(level.status_pieces().is_empty());
    }

    #[test]
    fn test_solid_only_loses_its_ice() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| PieceKind::Solid);
        let mut ctx = SimContext::new(1);
        let id = level.id_at(0, 0).unwrap();
        let mut ice = ball().with_type(BallType::ICE);
        level.ball_collision_occurred(&mut ctx, id, &mut ice);
        assert!(level.piece(id).unwrap().is_frozen());
        let mut fire = ball().with_type(BallType::FIRE);
        level.ball_collision_occurred(&mut ctx, id, &mut fire);
        assert!(!level.piece(id).unwrap().is_frozen());
        assert_eq!(level.destroy_piece(&mut ctx, id, DestructionMethod::Regular), id);
        assert_ne!(level.destroy_piece(&mut ctx, id, DestructionMethod::Collateral), id);
    }

    fn portal(name: &str, sibling: PieceId) -> PieceKind {
        PieceKind::Portal(PortalBlock {
            name: name.to_string(),
            sibling: Some(sibling),
            colour_index: 0,
            flips_paddle: false,
            last_ball_use: None,
        })
    }

    fn portal_level() -> GameLevel {
        GameLevel::from_kinds(3, 1, |w, _| match w {
            0 => portal("a", PieceId::new(2, 0)),
            2 => portal("b", PieceId::new(0, 0)),
            _ => PieceKind::Empty,
        })
    }

    #[test]
    fn test_portal_does_not_bounce_ball_back() {
        let mut level = portal_level();
        let mut ctx = SimContext::new(1);
        let recorder = recorded(&mut ctx);
        let a = level.id_at(0, 0).unwrap();
        let b = level.id_at(2, 0).unwrap();
        let mut ball = ball();

        level.ball_collision_occurred(&mut ctx, a, &mut ball);
        assert_eq!(ball.center, level.piece(b).unwrap().center);
        assert!(ball.is_last_piece_collided_with(b));

        // Drifting straight back into the exit portal
        ctx.advance_clock(SIM_DT);
        level.ball_collision_occurred(&mut ctx, b, &mut ball);
        assert_eq!(ball.center, level.piece(b).unwrap().center);

        // Even with the last-piece guard gone the exit is still cooling down
        ball.set_last_piece_collided_with(None);
        level.ball_collision_occurred(&mut ctx, b, &mut ball);
        assert_eq!(ball.center, level.piece(b).unwrap().center);
        assert_eq!(
            recorder.count(|e| matches!(e, GameEvent::BallPortalBlockTeleport { .. })),
            1
        );

        ctx.advance_clock(PORTAL_TIME_BETWEEN_BALL_USES as f32);
        level.ball_collision_occurred(&mut ctx, b, &mut ball);
        assert_eq!(ball.center, level.piece(a).unwrap().center);
    }

    #[test]
    fn test_projectile_portal_offset() {
        let mut level = portal_level();
        let mut ctx = SimContext::new(1);
        let a = level.id_at(0, 0).unwrap();
        let b = level.id_at(2, 0).unwrap();
        let entry = level.piece(a).unwrap().center;
        let mut laser = Projectile::laser(9, ProjectileKind::PaddleLaserBullet, entry - Vec2::new(0.0, 0.2), Vec2::Y);
        level.projectile_collision_occurred(&mut ctx, a, &mut laser);
        let expected = level.piece(b).unwrap().center + Vec2::new(0.0, laser.half_height() - 0.2);
        assert!((laser.position - expected).length() < 1e-5);
        assert!(laser.is_last_thing_collided_with(Collidee::Piece(b)));
        assert!(laser.alive);
    }

    fn tesla(name: &str, changable: bool, active: bool, connections: Vec<PieceId>) -> PieceKind {
        PieceKind::Tesla(TeslaBlock {
            name: name.to_string(),
            active,
            changable,
            connections,
            toggle_life: TOGGLE_LIFE,
            last_toggle: None,
        })
    }

    #[test]
    fn test_tesla_toggle_debounce_and_arcs() {
        let mut level = GameLevel::from_kinds(3, 1, |w, _| match w {
            0 => tesla("a", true, false, vec![PieceId::new(2, 0)]),
            2 => tesla("b", false, true, vec![PieceId::new(0, 0)]),
            _ => PieceKind::Empty,
        });
        let mut ctx = SimContext::new(1);
        let a = level.id_at(0, 0).unwrap();
        let b = level.id_at(2, 0).unwrap();
        assert!(!level.tesla_arc_exists(a, b));

        assert!(level.toggle_tesla(&mut ctx, a));
        assert!(level.tesla_arc_exists(a, b));
        assert!(level.tesla_arc_exists(b, a));

        ctx.advance_clock(0.05);
        assert!(!level.toggle_tesla(&mut ctx, a));
        assert!(level.tesla_arc_exists(a, b));

        ctx.advance_clock(0.1);
        assert!(level.toggle_tesla(&mut ctx, a));
        assert!(!level.tesla_arc_exists(a, b));
        assert!(!level.tesla_arc_exists(b, a));

        // Fixed blocks never toggle
        assert!(!level.toggle_tesla(&mut ctx, b));
    }

    #[test]
    fn test_switch_triggers_and_resets() {
        let level = GameLevel::from_kinds(3, 1, |w, _| match w {
            0 => PieceKind::Switch(SwitchBlock {
                target: 7,
                toggle_life: TOGGLE_LIFE,
                last_press: None,
            }),
            _ => PieceKind::Bomb,
        });
        // Only the far bomb answers to trigger 7
        let far = level.id_at(2, 0).unwrap();
        let mut pieces: Vec<LevelPiece> = level.pieces().cloned().collect();
        pieces[far.slot()].trigger_id = Some(7);
        let mut level = GameLevel::new("switch", 3, 1, pieces).unwrap();
        let mut ctx = SimContext::new(1);
        let recorder = recorded(&mut ctx);
        let switch = level.id_at(0, 0).unwrap();
        assert_eq!(level.triggerable_pieces(7), &[far]);

        let mut b = ball();
        level.ball_collision_occurred(&mut ctx, switch, &mut b);
        assert!(level.piece_at(2, 0).unwrap().is_empty());
        assert!(level.piece_at(1, 0).unwrap().is_empty());
        assert!(level.triggerable_pieces(7).is_empty());

        ctx.advance_clock(1.0);
        assert!(!level.press_switch(&mut ctx, switch));
        ctx.advance_clock(SWITCH_RESET_TIME as f32);
        assert!(level.press_switch(&mut ctx, switch));
        assert_eq!(recorder.count(|e| matches!(e, GameEvent::SwitchBlockActivated { .. })), 2);
    }

    #[test]
    fn test_item_drop_block_debounces() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| {
            PieceKind::ItemDrop(ItemDropBlock {
                allowed: vec![ItemKind::OneUp],
                next_item: ItemKind::OneUp,
                damage: 0.0,
                last_drop: None,
            })
        });
        let mut ctx = SimContext::new(1);
        let id = level.id_at(0, 0).unwrap();
        let mut b = ball();
        level.ball_collision_occurred(&mut ctx, id, &mut b);
        level.ball_collision_occurred(&mut ctx, id, &mut b);
        assert_eq!(ctx.take_dropped_items().len(), 1);
        ctx.advance_clock(ITEM_DROP_DISABLE_TIME as f32 + 0.01);
        level.ball_collision_occurred(&mut ctx, id, &mut b);
        assert_eq!(ctx.take_dropped_items().len(), 1);
    }

    #[test]
    fn test_always_drop_releases_its_item() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| PieceKind::AlwaysDrop {
            items: vec![ItemKind::FireBall],
            life: ALWAYS_DROP_LIFE,
        });
        let mut ctx = SimContext::new(1);
        let id = level.id_at(0, 0).unwrap();
        level.ball_collision_occurred(&mut ctx, id, &mut ball());
        let dropped = ctx.take_dropped_items();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].item, ItemKind::FireBall);
        assert!(level.is_complete());
    }

    #[test]
    fn test_collateral_detonates_into_projectile() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| PieceKind::Collateral { life: COLLATERAL_LIFE });
        let mut ctx = SimContext::new(1);
        let id = level.id_at(0, 0).unwrap();
        level.trigger_piece(&mut ctx, id);
        assert!(level.piece_at(0, 0).unwrap().is_empty());
        let spawned = ctx.take_spawned_projectiles();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].kind, ProjectileKind::CollateralBlock);
    }

    #[test]
    fn test_cannon_captures_and_fires_fixed_angle() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| PieceKind::Cannon(CannonBlock::new(true, CannonAngle::Fixed(45.0))));
        let mut ctx = SimContext::new(3);
        let id = level.id_at(0, 0).unwrap();
        let mut b = ball();
        level.ball_collision_occurred(&mut ctx, id, &mut b);
        assert_eq!(b.cannon, Some(id));

        let mut shots = Vec::new();
        for _ in 0..((CANNON_MAX_SPIN_TIME / SIM_DT) as usize + 2) {
            shots.extend(level.tick_pieces(&mut ctx, SIM_DT));
        }
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].load, CannonLoad::Ball(b.id));
        assert!((shots[0].dir - crate::direction_from_degrees(45.0)).length() < 1e-5);
        // Fragile cannons break after one shot
        assert!(level.piece_at(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_rocket_loads_into_cannon() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| PieceKind::Cannon(CannonBlock::new(false, CannonAngle::Free)));
        let mut ctx = SimContext::new(3);
        let id = level.id_at(0, 0).unwrap();
        let mut rocket = Projectile::rocket(4, ProjectileKind::PaddleRocket, Vec2::ZERO, Vec2::Y, 1.0);
        level.projectile_collision_occurred(&mut ctx, id, &mut rocket);
        assert_eq!(rocket.cannon, Some(id));
        assert!(rocket.alive);
    }

    #[test]
    fn test_beam_wears_down_stage_by_stage() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| red());
        let mut ctx = SimContext::new(1);
        let id = level.id_at(0, 0).unwrap();
        let beam = BeamSegment::new(Vec2::ZERO, Vec2::Y, 10.0);
        let steps = (BREAKABLE_STAGE_LIFE / (beam.damage_per_second * SIM_DT)).ceil() as usize + 1;
        for _ in 0..steps {
            level.tick_beam_collision(&mut ctx, id, SIM_DT, &beam);
        }
        assert_eq!(stage_at(&level, 0, 0), Some(BreakableStage::Orange));
    }

    #[test]
    fn test_fire_burns_green_block_away() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| PieceKind::Breakable(BreakableBlock::new(BreakableStage::Green)));
        let mut ctx = SimContext::new(1);
        let id = level.id_at(0, 0).unwrap();
        assert!(level.add_status(&mut ctx, id, PieceStatus::ON_FIRE));
        let mut last = None;
        for _ in 0..((BREAKABLE_STAGE_LIFE / FIRE_DAMAGE_PER_SECOND / SIM_DT) as usize + 2) {
            let result = level.status_tick(&mut ctx, id, SIM_DT);
            if result.destroyed {
                last = Some(result);
                break;
            }
        }
        let result = last.expect("fire should finish the block");
        assert!(result.removed.contains(PieceStatus::ON_FIRE));
        assert!(level.piece_at(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_laser_on_prism_redirects_and_splits() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| PieceKind::Prism);
        let mut ctx = SimContext::new(1);
        let id = level.id_at(0, 0).unwrap();
        let center = level.piece(id).unwrap().center;
        // Head on into the lower-left face
        let face = crate::sim::geometry::LineSeg2::new(
            center + Vec2::new(-HALF_PIECE_WIDTH, 0.0),
            center + Vec2::new(0.0, -HALF_PIECE_HEIGHT),
        );
        let n = crate::sim::bounds::outward_normal(&face, center);
        let mut laser = Projectile::laser(1, ProjectileKind::PaddleLaserBullet, face.midpoint() + n * 0.05, -n);
        level.projectile_collision_occurred(&mut ctx, id, &mut laser);
        assert!(laser.alive);
        let children = ctx.take_spawned_projectiles();
        assert_eq!(children.len(), 2);
        for child in &children {
            assert!(child.is_last_thing_collided_with(Collidee::Piece(id)));
        }
        assert!(level.piece(id).is_some());
    }

    #[test]
    fn test_paddle_teleports_through_bottom_portal() {
        let mut level = GameLevel::from_kinds(5, 2, |w, h| match (w, h) {
            (1, 0) => portal("a", PieceId::new(4, 0)),
            (4, 0) => portal("b", PieceId::new(1, 0)),
            _ => PieceKind::Empty,
        });
        let mut ctx = SimContext::new(1);
        let a_x = level.piece_at(1, 0).unwrap().center.x;
        let b_x = level.piece_at(4, 0).unwrap().center.x;
        let mut paddle = Paddle::new(Vec2::new(a_x - 0.2, HALF_PIECE_HEIGHT));
        paddle.move_to_x(a_x + 0.1);
        assert!(level.paddle_teleport(&mut ctx, &mut paddle));
        assert!((paddle.center.x - (b_x + 0.1)).abs() < 1e-5);
        assert!(!level.paddle_teleport(&mut ctx, &mut paddle));
    }

    #[test]
    fn test_turret_finds_and_fires_at_paddle() {
        let mut ctx = SimContext::new(21);
        let ai = TurretAi::new(TurretKind::Laser, 1.0, ctx.rng());
        let mut level = GameLevel::from_kinds(3, 8, |w, h| {
            if (w, h) == (1, 7) {
                PieceKind::Turret(TurretBlock::new(ai.clone()))
            } else {
                PieceKind::Empty
            }
        });
        let recorder = recorded(&mut ctx);
        let paddle = Paddle::new(Vec2::new(level.world_size().x * 0.5, HALF_PIECE_HEIGHT));
        for _ in 0..(20.0 / SIM_DT) as usize {
            ctx.advance_clock(SIM_DT);
            level.tick_ai(&mut ctx, SIM_DT, &paddle, true);
        }
        assert!(recorder.count(|e| matches!(e, GameEvent::TurretFired { .. })) > 0);
        assert!(
            ctx.take_spawned_projectiles()
                .iter()
                .all(|p| p.kind == ProjectileKind::LaserTurretBullet)
        );

        level.tick_ai(&mut ctx, SIM_DT, &paddle, false);
        let turret = level.id_at(1, 7).unwrap();
        let PieceKind::Turret(t) = &level.piece(turret).unwrap().kind else {
            panic!("turret replaced");
        };
        assert_eq!(t.ai.state(), crate::sim::turret::TurretAiState::Idle);
    }

    #[test]
    fn test_turret_dies_to_ball_hits() {
        let mut ctx = SimContext::new(2);
        let ai = TurretAi::new(TurretKind::Rocket, 1.0, ctx.rng());
        let mut level = GameLevel::from_kinds(1, 1, |_, _| PieceKind::Turret(TurretBlock::new(ai.clone())));
        let id = level.id_at(0, 0).unwrap();
        let hits = TurretKind::Rocket.ball_hits_to_destroy().ceil() as usize + 1;
        let mut b = ball();
        for _ in 0..hits {
            level.ball_collision_occurred(&mut ctx, id, &mut b);
        }
        assert!(level.piece_at(0, 0).unwrap().is_empty());
        assert!(level.ai_pieces().is_empty());
        assert!((ctx.boost_meter() - TURRET_DESTROYED_BOOST).abs() < 1e-6);
    }

    #[test]
    fn test_infinite_regen_shrugs_off_balls() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| PieceKind::Regen { life: None });
        let mut ctx = SimContext::new(1);
        let recorder = recorded(&mut ctx);
        let id = level.id_at(0, 0).unwrap();
        level.ball_collision_occurred(&mut ctx, id, &mut ball());
        assert!(level.is_live(id));
        assert_eq!(recorder.count(|e| matches!(e, GameEvent::RegenBlockPreturbed { .. })), 1);
        level.destroy_piece(&mut ctx, id, DestructionMethod::Rocket);
        assert!(!level.is_live(id));
    }
}
