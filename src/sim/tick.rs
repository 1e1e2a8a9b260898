//! Fixed timestep simulation tick
//!
//! Advances the paddle, balls and projectiles against the level, then lets the
//! level run its own per-tick behaviour (turret AI, cannons, regen, statuses).

use std::collections::BTreeSet;

use glam::Vec2;
use rand::Rng;

use super::ball::{Ball, BeamSegment};
use super::events::GameEvent;
use super::geometry::{Aabb2, LineSeg2, Ray2, reflect};
use super::level::{BALL_DEATH_Y, SAFETY_NET_Y};
use super::piece::{CannonLoad, PieceId, PieceKind};
use super::projectile::{Collidee, MineState, Projectile, ProjectileDetail, ProjectileKind};
use super::response::CannonShot;
use super::state::{GamePhase, Simulation};
use crate::consts::*;
use crate::rotate_degrees;

/// Deflection off the very edge of the paddle, degrees from its face normal
pub const PADDLE_MAX_BOUNCE_DEG: f32 = 60.0;
/// Serve direction spread, degrees either side of the paddle normal
pub const SERVE_SPREAD_DEG: f32 = 15.0;
/// Projectiles this far outside the level are discarded
const OUT_OF_LEVEL_MARGIN: f32 = 2.0 * PIECE_WIDTH;

/// Input commands for a single tick (deterministic)
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    /// Target paddle x (from mouse/touch position)
    pub target_x: Option<f32>,
    /// Launch the waiting ball
    pub launch: bool,
    /// Fire a laser bullet from the paddle
    pub fire_laser: bool,
    /// Fire a rocket from the paddle
    pub fire_rocket: bool,
    /// Throw a mine from the paddle
    pub fire_mine: bool,
    /// Hold the paddle shield up
    pub shield: bool,
    /// Hold the paddle laser beam on
    pub beam: bool,
}

impl TickInput {
    fn clear_one_shots(&mut self) {
        self.launch = false;
        self.fire_laser = false;
        self.fire_rocket = false;
        self.fire_mine = false;
    }
}

impl Simulation {
    /// Run as many fixed ticks as `frame_dt` covers, carrying the remainder.
    /// One-shot inputs apply to the first tick only. Returns the ticks run.
    pub fn advance(&mut self, frame_dt: f32, input: &TickInput) -> u32 {
        self.accumulator += frame_dt.min(0.1);
        let mut input = input.clone();
        let mut substeps = 0;
        while self.accumulator >= SIM_DT && substeps < MAX_SUBSTEPS {
            self.tick(SIM_DT, &input);
            self.accumulator -= SIM_DT;
            substeps += 1;
            input.clear_one_shots();
        }
        substeps
    }

    /// Advance the simulation by one fixed timestep
    pub fn tick(&mut self, dt: f32, input: &TickInput) {
        if self.phase == GamePhase::Complete {
            return;
        }
        self.time_ticks += 1;
        self.ctx.advance_clock(dt);

        // Paddle first: balls bounce off where it is now
        self.move_paddle(input, dt);
        self.tick_paddle_contacts(input, dt);
        self.fire_paddle_weapons(input);

        match self.phase {
            GamePhase::Serve => {
                let center = self.attached_ball_position();
                for ball in &mut self.balls {
                    ball.center = center;
                }
                if input.launch {
                    self.launch();
                }
            }
            GamePhase::Playing => self.tick_balls(dt),
            GamePhase::Complete => {}
        }

        self.tick_projectiles(dt);

        let in_play = self.phase == GamePhase::Playing;
        self.level.tick_ai(&mut self.ctx, dt, &self.paddle, in_play);

        for shot in self.level.tick_pieces(&mut self.ctx, dt) {
            self.release_from_cannon(&shot);
        }

        for id in self.level.status_pieces() {
            let result = self.level.status_tick(&mut self.ctx, id, dt);
            if result.destroyed {
                log::debug!("piece {:?} burnt away", id);
            }
        }

        // Anything spawned mid-tick joins now, in id order
        self.projectiles.extend(self.ctx.take_spawned_projectiles());
        self.dropped_items.extend(self.ctx.take_dropped_items());

        if self.level.is_complete() {
            self.phase = GamePhase::Complete;
            log::info!("level '{}' complete, score {}", self.level.name(), self.ctx.score());
            self.ctx.emit(GameEvent::LevelCompleted);
        }
    }

    fn launch(&mut self) {
        let spread = self.ctx.rng().random_range(-SERVE_SPREAD_DEG..=SERVE_SPREAD_DEG);
        let dir = rotate_degrees(self.paddle.up, spread);
        let speed = self.ball_speed;
        for ball in &mut self.balls {
            ball.set_velocity(dir, speed);
        }
        self.phase = GamePhase::Playing;
    }

    // -- paddle --------------------------------------------------------------

    fn move_paddle(&mut self, input: &TickInput, dt: f32) {
        let Some(target) = input.target_x else {
            return;
        };
        let max_step = PADDLE_SPEED * dt;
        let step = (target - self.paddle.center.x).clamp(-max_step, max_step);
        let (lo, hi) = self.level.paddle_limits(&self.paddle);
        self.paddle.move_to_x((self.paddle.center.x + step).clamp(lo, hi));
        self.level.paddle_teleport(&mut self.ctx, &mut self.paddle);
    }

    /// New piece contacts, shield damage and the beam
    fn tick_paddle_contacts(&mut self, input: &TickInput, dt: f32) {
        let aabb = self.paddle.aabb();
        let touching: BTreeSet<PieceId> = self
            .level
            .collision_candidates_aabb(&aabb)
            .into_iter()
            .filter(|id| self.level.piece(*id).is_some_and(|p| p.bounds.collides_with_aabb(&aabb)))
            .collect();
        for &id in touching.difference(&self.paddle_contacts) {
            self.level.paddle_collision_occurred(&mut self.ctx, id);
        }
        self.paddle_contacts = touching;

        self.paddle.shield_active = input.shield;
        if input.shield {
            let shield = self.paddle.shield_bounds();
            for id in self.level.collision_candidates_circle(shield.center, shield.radius) {
                let inside = self
                    .level
                    .piece(id)
                    .is_some_and(|p| !p.bounds.is_empty() && shield.overlaps_aabb(&p.aabb()));
                if inside {
                    self.level.tick_paddle_shield_collision(&mut self.ctx, id, dt, &self.paddle);
                }
            }
        }

        self.beam = None;
        if input.beam {
            let origin = self.paddle.center + self.paddle.up * self.paddle.half_height;
            let ray = Ray2::new(origin, self.paddle.up);
            let hit = self.level.first_collider(&ray, &BTreeSet::new(), BEAM_RADIUS);
            let length = hit.map_or(self.level.world_size().y, |(_, t)| t);
            let beam = BeamSegment::new(origin, self.paddle.up, length);
            if let Some((id, _)) = hit {
                self.level.tick_beam_collision(&mut self.ctx, id, dt, &beam);
            }
            self.beam = Some(beam);
        }
    }

    fn fire_paddle_weapons(&mut self, input: &TickInput) {
        let up = self.paddle.up;
        let origin = self.paddle.center + up * (self.paddle.half_height + HALF_PIECE_HEIGHT);
        let mut shots = Vec::new();
        if input.fire_laser {
            let id = self.ctx.next_projectile_id();
            shots.push(Projectile::laser(id, ProjectileKind::PaddleLaserBullet, origin, up));
        }
        if input.fire_rocket {
            let id = self.ctx.next_projectile_id();
            shots.push(Projectile::rocket(id, ProjectileKind::PaddleRocket, origin, up, 1.0));
        }
        if input.fire_mine {
            let id = self.ctx.next_projectile_id();
            shots.push(Projectile::mine(id, ProjectileKind::PaddleMine, origin, up, 1.0));
        }
        for mut shot in shots {
            shot.set_last_thing_collided(Some(Collidee::Paddle));
            self.ctx.spawn_projectile(shot);
        }
    }

    // -- balls ---------------------------------------------------------------

    fn tick_balls(&mut self, dt: f32) {
        let mut balls = std::mem::take(&mut self.balls);
        for ball in &mut balls {
            if let Some(cannon) = ball.cannon {
                if self.level.is_live(cannon) {
                    continue;
                }
                // Cannon went away with the ball still inside
                ball.cannon = None;
            }
            self.move_ball(ball, dt);
        }

        let (alive, dead): (Vec<Ball>, Vec<Ball>) = balls.into_iter().partition(|b| b.center.y >= BALL_DEATH_Y);
        for ball in &dead {
            self.portal_exits.remove(&ball.id);
            self.ctx.emit(GameEvent::BallDied { ball: ball.id });
        }
        self.balls = alive;

        if self.balls.is_empty() {
            self.balls_lost += 1;
            log::info!("ball lost ({} so far)", self.balls_lost);
            self.ctx.reset_multiplier();
            self.spawn_ball_attached();
            self.phase = GamePhase::Serve;
        }
    }

    fn move_ball(&mut self, ball: &mut Ball, dt: f32) {
        let start = ball.center;
        ball.center += ball.velocity() * dt;
        self.bounce_off_walls(ball);

        let hits_net = self
            .level
            .safety_net_bounds()
            .is_some_and(|net| ball.dir.y < 0.0 && net.collide_swept(&ball.bounds(), ball.velocity(), dt).is_some());
        if hits_net {
            ball.dir = reflect(ball.dir, Vec2::Y);
            ball.center.y = ball.center.y.max(SAFETY_NET_Y + ball.radius);
            self.level.destroy_safety_net(&mut self.ctx);
        }

        let arc = self.level.tesla_lightning_bounds().collide_circle(&ball.bounds());
        if arc.hit && ball.dir.dot(arc.normal) < 0.0 {
            ball.dir = reflect(ball.dir, arc.normal).normalize_or(ball.dir);
            ball.center += arc.normal * arc.penetration;
        }

        self.leave_trigger_area(ball);
        self.collide_ball_with_pieces(ball, start, dt);
        self.portal_projectile_teleport(ball);
        self.bounce_off_paddle(ball);
    }

    fn bounce_off_walls(&self, ball: &mut Ball) {
        let world = self.level.world_size();
        if ball.center.x < ball.radius {
            ball.center.x = ball.radius;
            ball.dir.x = ball.dir.x.abs();
        } else if ball.center.x > world.x - ball.radius {
            ball.center.x = world.x - ball.radius;
            ball.dir.x = -ball.dir.x.abs();
        }
        if ball.center.y > world.y - ball.radius {
            ball.center.y = world.y - ball.radius;
            ball.dir.y = -ball.dir.y.abs();
        }
    }

    /// Forget a portal or cannon once the ball is clear of it, so it can be
    /// used again
    fn leave_trigger_area(&self, ball: &mut Ball) {
        if let Some(last) = ball.last_piece_collided_with()
            && let Some(piece) = self.level.piece(last)
            && matches!(piece.kind, PieceKind::Portal(_) | PieceKind::Cannon(_))
            && !ball.bounds().overlaps_aabb(&piece.trigger_area())
        {
            ball.set_last_piece_collided_with(None);
        }
    }

    /// Resolve at most one bounce against the nearest pieces
    fn collide_ball_with_pieces(&mut self, ball: &mut Ball, start: Vec2, dt: f32) {
        let travel = LineSeg2::new(start, ball.center);
        for id in self.level.ball_collision_candidates(ball, dt) {
            let Some(piece) = self.level.piece(id) else {
                continue;
            };
            match piece.kind {
                PieceKind::Portal(_) | PieceKind::Cannon(_) => {
                    let area = piece.trigger_area();
                    if !area.contains(ball.center) && !area.intersects_segment(&travel) {
                        continue;
                    }
                    let before = ball.center;
                    self.level.ball_collision_occurred(&mut self.ctx, id, ball);
                    if ball.center != before || ball.is_loaded_in_cannon() {
                        break;
                    }
                }
                _ => {
                    if piece.is_no_bounds_piece_type() || piece.ball_passes_through(ball) {
                        continue;
                    }
                    let Some(hit) = piece.bounds.collide_swept(&ball.bounds(), ball.velocity(), dt) else {
                        continue;
                    };
                    // Already separating from this surface
                    if ball.dir.dot(hit.normal) >= 0.0 {
                        continue;
                    }
                    if piece.ball_blasts_through(ball) {
                        self.level.ball_collision_occurred(&mut self.ctx, id, ball);
                        continue;
                    }
                    let since = hit.time_since_collision;
                    ball.center -= ball.velocity() * since;
                    ball.dir = reflect(ball.dir, hit.normal).normalize_or(ball.dir);
                    ball.center += ball.velocity() * since;
                    self.level.ball_collision_occurred(&mut self.ctx, id, ball);
                    break;
                }
            }
        }
    }

    fn portal_projectile_teleport(&mut self, ball: &mut Ball) {
        let circle = ball.bounds();
        let entered = self.projectiles.iter().find_map(|p| match p.detail {
            ProjectileDetail::Portal { sibling, .. } if p.alive && circle.overlaps_aabb(&p.aabb()) => Some((p.id, sibling)),
            _ => None,
        });
        let Some((entry, sibling)) = entered else {
            self.portal_exits.remove(&ball.id);
            return;
        };
        if self.portal_exits.get(&ball.id) == Some(&entry) {
            return;
        }
        let Some(exit) = self.projectiles.iter().find(|p| p.id == sibling && p.alive).map(|p| p.position) else {
            return;
        };
        ball.center = exit;
        self.portal_exits.insert(ball.id, sibling);
        log::debug!("ball {} through portal projectile {} -> {}", ball.id, entry, sibling);
    }

    fn bounce_off_paddle(&mut self, ball: &mut Ball) {
        if ball.dir.dot(self.paddle.up) >= 0.0 {
            return;
        }
        let hit = self.paddle.bounds().collide_circle(&ball.bounds());
        if !hit.hit {
            return;
        }
        // Further from the middle, steeper the bounce
        let offset = ((ball.center.x - self.paddle.center.x) / self.paddle.half_width).clamp(-1.0, 1.0);
        let angle = -offset * PADDLE_MAX_BOUNCE_DEG * self.paddle.up.y.signum();
        ball.dir = rotate_degrees(self.paddle.up, angle);
        ball.center += hit.normal * hit.penetration;
        ball.set_last_piece_collided_with(None);
        self.ctx.reset_multiplier();
        self.ctx.emit(GameEvent::BallPaddleCollision { ball: ball.id });
    }

    // -- projectiles ---------------------------------------------------------

    fn tick_projectiles(&mut self, dt: f32) {
        let mut projectiles = std::mem::take(&mut self.projectiles);
        let level_area = Aabb2::new(Vec2::ZERO, self.level.world_size()).expanded(OUT_OF_LEVEL_MARGIN);
        for projectile in &mut projectiles {
            if !projectile.alive {
                continue;
            }
            if let Some(cannon) = projectile.cannon {
                if self.level.is_live(cannon) {
                    continue;
                }
                projectile.cannon = None;
            }
            if let Some(anchor) = projectile.mine_attached_to()
                && !self.level.is_live(anchor)
            {
                projectile.detach_mine();
            }
            if projectile.tick(dt) {
                self.expire(projectile);
                continue;
            }
            if !level_area.contains(projectile.position) {
                projectile.alive = false;
                continue;
            }
            self.projectile_piece_hits(projectile, dt);
            if projectile.alive {
                self.projectile_paddle_hit(projectile);
            }
            if projectile.alive {
                self.mine_proximity(projectile);
            }
        }

        for projectile in projectiles.iter().filter(|p| !p.alive) {
            self.ctx.emit(GameEvent::ProjectileRemoved {
                projectile: projectile.id,
                kind: projectile.kind,
            });
        }
        projectiles.retain(|p| p.alive);
        self.projectiles = projectiles;
    }

    /// A mine countdown ran out or a portal closed
    fn expire(&mut self, projectile: &mut Projectile) {
        projectile.alive = false;
        if !projectile.kind.is_mine() {
            return;
        }
        let center = projectile
            .mine_attached_to()
            .filter(|id| self.level.is_live(*id))
            .or_else(|| self.level.piece_at_point(projectile.position));
        match center {
            Some(id) => {
                self.level.mine_explosion(&mut self.ctx, projectile, id);
            }
            None => self.ctx.emit(GameEvent::MineExploded {
                projectile: projectile.id,
                position: projectile.position,
                size_factor: projectile.size_factor(),
            }),
        }
        if projectile.kind.is_from_turret() && projectile.explosion_bounds().overlaps_aabb(&self.paddle.aabb()) {
            self.ctx.emit(GameEvent::PaddleHitByProjectile {
                projectile: projectile.id,
                kind: projectile.kind,
            });
        }
    }

    fn projectile_piece_hits(&mut self, projectile: &mut Projectile, dt: f32) {
        match projectile.detail {
            ProjectileDetail::Portal { .. } => return,
            ProjectileDetail::Collateral { .. } if !projectile.is_collateral_damaging() => return,
            ProjectileDetail::Mine { state, .. } if state != MineState::Flying => return,
            _ => {}
        }
        let bounds = projectile.bounds();
        // Collateral falls straight down its column
        let footprint = Aabb2::from_center(
            projectile.position,
            Vec2::new(projectile.half_width(), projectile.half_height()) * 0.9,
        );

        for id in self.level.projectile_collision_candidates(projectile, dt) {
            let Some(piece) = self.level.piece(id) else {
                continue;
            };
            if piece.is_empty() {
                continue;
            }
            let kind = projectile.kind;
            let hit = if kind == ProjectileKind::CollateralBlock {
                footprint.overlaps(&piece.aabb())
            } else if projectile.is_last_thing_collided_with(Collidee::Piece(id)) {
                false
            } else {
                match piece.kind {
                    PieceKind::Portal(_) => piece.trigger_area().contains(projectile.position),
                    PieceKind::Cannon(_) if kind.is_rocket() || kind.is_mine() => {
                        piece.trigger_area().contains(projectile.position)
                    }
                    _ if kind.is_laser() && piece.is_light_reflector_refractor() => piece.bounds.collides_with_lines(&bounds),
                    _ => !piece.projectile_passes_through(projectile) && piece.bounds.collides_with_lines(&bounds),
                }
            };
            if !hit {
                continue;
            }

            let before = projectile.position;
            self.level.projectile_collision_occurred(&mut self.ctx, id, projectile);
            let stopped = !projectile.alive
                || projectile.is_loaded_in_cannon()
                || projectile.position != before
                || projectile.mine_state().is_some_and(|s| s != MineState::Flying);
            if stopped {
                break;
            }
        }
    }

    fn projectile_paddle_hit(&mut self, projectile: &mut Projectile) {
        let dangerous = projectile.kind.is_from_turret()
            || projectile.is_collateral_damaging()
            || projectile.kind == ProjectileKind::FireGlob;
        if !dangerous || projectile.is_last_thing_collided_with(Collidee::Paddle) {
            return;
        }
        let paddle = self.paddle.aabb();
        if !paddle.contains(projectile.position) && !projectile.bounds().collides_with_aabb(&paddle) {
            return;
        }
        projectile.alive = false;
        projectile.set_last_thing_collided(Some(Collidee::Paddle));
        if self.paddle.shield_active {
            log::debug!("shield absorbed projectile {}", projectile.id);
            return;
        }
        self.ctx.emit(GameEvent::PaddleHitByProjectile {
            projectile: projectile.id,
            kind: projectile.kind,
        });
    }

    /// An armed mine starts counting down once it sits on a piece or
    /// something comes close
    fn mine_proximity(&mut self, projectile: &mut Projectile) {
        if projectile.mine_state() != Some(MineState::Armed) {
            return;
        }
        let zone = projectile.proximity_bounds();
        let tripped = projectile.mine_attached_to().is_some()
            || self.balls.iter().any(|b| zone.overlaps_circle(&b.bounds()))
            || zone.overlaps_aabb(&self.paddle.aabb());
        if tripped {
            projectile.begin_proximity_countdown(self.ctx.rng());
        }
    }

    // -- cannons -------------------------------------------------------------

    fn release_from_cannon(&mut self, shot: &CannonShot) {
        match shot.load {
            CannonLoad::Ball(id) => {
                if let Some(ball) = self.balls.iter_mut().find(|b| b.id == id) {
                    ball.cannon = None;
                    ball.center = shot.origin;
                    ball.dir = shot.dir;
                    ball.set_last_piece_collided_with(Some(shot.cannon));
                }
            }
            CannonLoad::Projectile(id) => {
                if let Some(projectile) = self.projectiles.iter_mut().find(|p| p.id == id) {
                    projectile.cannon = None;
                    projectile.position = shot.origin;
                    projectile.redirect(shot.dir);
                    projectile.set_last_thing_collided(Some(Collidee::Piece(shot.cannon)));
                }
            }
        }
    }
}
