//! Free-moving projectiles
//!
//! Projectiles move on their own every tick and hand their hits to the level
//! (`GameLevel::projectile_collision_occurred`) or to the explosion routines.

use glam::Vec2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::geometry::{Aabb2, BoundingLines, Circle2};
use super::piece::PieceId;
use crate::consts::*;
use crate::{degrees_of, rotate_degrees};

/// Laser bolts travel at a constant speed
pub const LASER_BULLET_SPEED: f32 = 22.0;
pub const LASER_BULLET_WIDTH: f32 = 0.3;
pub const LASER_BULLET_HEIGHT: f32 = 1.2;

pub const ROCKET_START_SPEED: f32 = 4.0;
pub const ROCKET_ACCELERATION: f32 = 12.0;
pub const ROCKET_MAX_SPEED: f32 = 16.0;
pub const ROCKET_WIDTH: f32 = 0.8;
pub const ROCKET_HEIGHT: f32 = 1.5;

pub const MINE_SIZE: f32 = 0.8;
pub const MINE_ACCELERATION: f32 = 80.0;
pub const MINE_MAX_SPEED: f32 = 13.0;
pub const MINE_EXPLOSION_RADIUS: f32 = 0.9 * PIECE_HEIGHT;
pub const MINE_PROXIMITY_RADIUS: f32 = 1.33 * PIECE_WIDTH;
pub const MINE_MIN_COUNTDOWN: f32 = 1.75;
pub const MINE_MAX_COUNTDOWN: f32 = 3.75;

pub const COLLATERAL_WARNING_MIN: f32 = 3.0;
pub const COLLATERAL_WARNING_MAX: f32 = 6.0;
pub const COLLATERAL_FALL_SPEED: f32 = 3.0;
pub const COLLATERAL_ROTATION_SPEED: f32 = 280.0;

pub const FIRE_GLOB_FALL_SPEED: f32 = 4.0;

/// Seconds a pair of portal projectiles stays open
pub const PORTAL_PROJECTILE_LIFETIME: f32 = 8.0;

/// Every kind of projectile in the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectileKind {
    PaddleLaserBullet,
    BallLaserBullet,
    LaserTurretBullet,
    PaddleRocket,
    RocketTurretBullet,
    PaddleMine,
    MineTurretBullet,
    CollateralBlock,
    FireGlob,
    Portal,
}

impl ProjectileKind {
    pub fn is_laser(self) -> bool {
        matches!(
            self,
            ProjectileKind::PaddleLaserBullet | ProjectileKind::BallLaserBullet | ProjectileKind::LaserTurretBullet
        )
    }

    pub fn is_rocket(self) -> bool {
        matches!(self, ProjectileKind::PaddleRocket | ProjectileKind::RocketTurretBullet)
    }

    pub fn is_mine(self) -> bool {
        matches!(self, ProjectileKind::PaddleMine | ProjectileKind::MineTurretBullet)
    }

    /// Lasers are the only projectiles optics act on
    pub fn is_refractable_or_reflectable(self) -> bool {
        self.is_laser()
    }

    pub fn is_from_turret(self) -> bool {
        matches!(
            self,
            ProjectileKind::LaserTurretBullet | ProjectileKind::RocketTurretBullet | ProjectileKind::MineTurretBullet
        )
    }
}

/// What a projectile last touched, so it is not hit twice in a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collidee {
    Piece(PieceId),
    Projectile(u32),
    Paddle,
}

/// Mine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MineState {
    /// Travelling, not yet able to explode
    Flying,
    /// Landed on something; explodes when anything comes within proximity
    Armed,
    /// Proximity tripped; explodes when the countdown reaches zero
    Countdown { remaining: f32 },
}

/// Collateral block lifecycle after detonation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CollateralState {
    Warning { remaining: f32 },
    Damage,
}

/// Kind-specific projectile state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProjectileDetail {
    Laser,
    Rocket {
        size_factor: f32,
    },
    Mine {
        state: MineState,
        size_factor: f32,
        /// Piece the mine landed on; the mine drops again when it is gone
        attached_to: Option<PieceId>,
    },
    Collateral {
        state: CollateralState,
        rotation_deg: f32,
    },
    FireGlob,
    Portal {
        /// Id of the paired portal projectile
        sibling: u32,
        remaining: f32,
    },
}

/// A projectile entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projectile {
    pub id: u32,
    pub kind: ProjectileKind,
    pub position: Vec2,
    /// Unit direction of travel
    pub dir: Vec2,
    pub speed: f32,
    pub width: f32,
    pub height: f32,
    pub detail: ProjectileDetail,
    /// Cannon currently holding this projectile
    pub cannon: Option<PieceId>,
    /// Cleared when the projectile has been consumed
    pub alive: bool,
    last_thing_collided: Option<Collidee>,
}

impl Projectile {
    fn base(id: u32, kind: ProjectileKind, position: Vec2, dir: Vec2, speed: f32, size: Vec2, detail: ProjectileDetail) -> Self {
        Self {
            id,
            kind,
            position,
            dir: dir.normalize_or(Vec2::Y),
            speed,
            width: size.x,
            height: size.y,
            detail,
            cannon: None,
            alive: true,
            last_thing_collided: None,
        }
    }

    pub fn laser(id: u32, kind: ProjectileKind, position: Vec2, dir: Vec2) -> Self {
        debug_assert!(kind.is_laser());
        Self::base(
            id,
            kind,
            position,
            dir,
            LASER_BULLET_SPEED,
            Vec2::new(LASER_BULLET_WIDTH, LASER_BULLET_HEIGHT),
            ProjectileDetail::Laser,
        )
    }

    pub fn rocket(id: u32, kind: ProjectileKind, position: Vec2, dir: Vec2, size_factor: f32) -> Self {
        debug_assert!(kind.is_rocket());
        Self::base(
            id,
            kind,
            position,
            dir,
            ROCKET_START_SPEED,
            Vec2::new(ROCKET_WIDTH, ROCKET_HEIGHT) * size_factor,
            ProjectileDetail::Rocket { size_factor },
        )
    }

    pub fn mine(id: u32, kind: ProjectileKind, position: Vec2, dir: Vec2, size_factor: f32) -> Self {
        debug_assert!(kind.is_mine());
        Self::base(
            id,
            kind,
            position,
            dir,
            0.0,
            Vec2::splat(MINE_SIZE * size_factor),
            ProjectileDetail::Mine {
                state: MineState::Flying,
                size_factor,
                attached_to: None,
            },
        )
    }

    /// A detonated collateral block, starting its warning phase
    pub fn collateral<R: Rng>(id: u32, position: Vec2, rng: &mut R) -> Self {
        let warning = rng.random_range(COLLATERAL_WARNING_MIN..=COLLATERAL_WARNING_MAX);
        Self::base(
            id,
            ProjectileKind::CollateralBlock,
            position,
            Vec2::NEG_Y,
            0.0,
            Vec2::new(PIECE_WIDTH, PIECE_HEIGHT),
            ProjectileDetail::Collateral {
                state: CollateralState::Warning { remaining: warning },
                rotation_deg: 0.0,
            },
        )
    }

    pub fn fire_glob(id: u32, position: Vec2, size: f32, spawned_by: PieceId) -> Self {
        let mut glob = Self::base(
            id,
            ProjectileKind::FireGlob,
            position,
            Vec2::NEG_Y,
            FIRE_GLOB_FALL_SPEED,
            Vec2::splat(size),
            ProjectileDetail::FireGlob,
        );
        glob.last_thing_collided = Some(Collidee::Piece(spawned_by));
        glob
    }

    /// One end of a portal pair; both ends are created together
    pub fn portal_pair(id_a: u32, id_b: u32, pos_a: Vec2, pos_b: Vec2) -> (Self, Self) {
        let size = Vec2::new(PIECE_WIDTH, PIECE_HEIGHT) * 0.75;
        let make = |id, pos, sibling| {
            Self::base(
                id,
                ProjectileKind::Portal,
                pos,
                Vec2::Y,
                0.0,
                size,
                ProjectileDetail::Portal {
                    sibling,
                    remaining: PORTAL_PROJECTILE_LIFETIME,
                },
            )
        };
        (make(id_a, pos_a, id_b), make(id_b, pos_b, id_a))
    }

    pub fn velocity(&self) -> Vec2 {
        self.dir * self.speed
    }

    pub fn set_velocity(&mut self, dir: Vec2, speed: f32) {
        self.dir = dir.normalize_or(self.dir);
        self.speed = speed;
    }

    pub fn half_width(&self) -> f32 {
        self.width * 0.5
    }

    pub fn half_height(&self) -> f32 {
        self.height * 0.5
    }

    /// Blast scale for rockets and mines, 1.0 for everything else
    pub fn size_factor(&self) -> f32 {
        match self.detail {
            ProjectileDetail::Rocket { size_factor } | ProjectileDetail::Mine { size_factor, .. } => size_factor,
            _ => 1.0,
        }
    }

    pub fn mine_state(&self) -> Option<MineState> {
        match self.detail {
            ProjectileDetail::Mine { state, .. } => Some(state),
            _ => None,
        }
    }

    pub fn is_collateral_damaging(&self) -> bool {
        matches!(
            self.detail,
            ProjectileDetail::Collateral {
                state: CollateralState::Damage,
                ..
            }
        )
    }

    pub fn last_thing_collided(&self) -> Option<Collidee> {
        self.last_thing_collided
    }

    pub fn is_last_thing_collided_with(&self, c: Collidee) -> bool {
        self.last_thing_collided == Some(c)
    }

    pub fn set_last_thing_collided(&mut self, c: Option<Collidee>) {
        self.last_thing_collided = c;
    }

    pub fn is_loaded_in_cannon(&self) -> bool {
        self.cannon.is_some()
    }

    /// Facing angle in degrees, counter-clockwise from +y
    pub fn rotation_deg(&self) -> f32 {
        match self.detail {
            ProjectileDetail::Collateral { rotation_deg, .. } => rotation_deg,
            _ => degrees_of(self.dir) - 90.0,
        }
    }

    pub fn aabb(&self) -> Aabb2 {
        let hw = self.half_width();
        let hh = self.half_height();
        // Rotated box, conservatively bounded by its circumscribed square
        let r = (hw * hw + hh * hh).sqrt();
        Aabb2::from_center(self.position, Vec2::splat(r))
    }

    /// Oriented rectangle around the projectile
    pub fn bounds(&self) -> BoundingLines {
        let mut lines = BoundingLines::rectangle(self.position, Vec2::new(self.half_width(), self.half_height()));
        let rot = self.rotation_deg();
        if rot.abs() > f32::EPSILON {
            lines.rotate(rot, self.position);
        }
        lines
    }

    pub fn proximity_bounds(&self) -> Circle2 {
        Circle2::new(self.position, MINE_PROXIMITY_RADIUS * self.size_factor())
    }

    pub fn explosion_bounds(&self) -> Circle2 {
        Circle2::new(self.position, MINE_EXPLOSION_RADIUS * self.size_factor())
    }

    /// Land a flying mine on a piece (or the paddle / floor when `None`)
    pub fn land_mine(&mut self, on: Option<PieceId>) {
        if let ProjectileDetail::Mine { state, attached_to, .. } = &mut self.detail
            && *state == MineState::Flying
        {
            *state = MineState::Armed;
            *attached_to = on;
            self.speed = 0.0;
        }
    }

    /// The piece a mine is stuck to vanished; let it fall
    pub fn detach_mine(&mut self) {
        if let ProjectileDetail::Mine { state, attached_to, .. } = &mut self.detail {
            *state = MineState::Flying;
            *attached_to = None;
            self.dir = Vec2::NEG_Y;
        }
    }

    pub fn mine_attached_to(&self) -> Option<PieceId> {
        match self.detail {
            ProjectileDetail::Mine { attached_to, .. } => attached_to,
            _ => None,
        }
    }

    /// Start the proximity countdown of an armed mine
    pub fn begin_proximity_countdown<R: Rng>(&mut self, rng: &mut R) {
        if let ProjectileDetail::Mine { state, .. } = &mut self.detail
            && *state == MineState::Armed
        {
            *state = MineState::Countdown {
                remaining: rng.random_range(MINE_MIN_COUNTDOWN..=MINE_MAX_COUNTDOWN),
            };
        }
    }

    /// Advance motion and internal timers.
    ///
    /// Returns true when the projectile has run its course by itself (a mine
    /// countdown expired, a portal closed).
    pub fn tick(&mut self, dt: f32) -> bool {
        if self.is_loaded_in_cannon() {
            return false;
        }
        let mut expired = false;
        match &mut self.detail {
            ProjectileDetail::Laser | ProjectileDetail::FireGlob => {}
            ProjectileDetail::Rocket { .. } => {
                self.speed = (self.speed + ROCKET_ACCELERATION * dt).min(ROCKET_MAX_SPEED);
            }
            ProjectileDetail::Mine { state, .. } => match state {
                MineState::Flying => {
                    self.speed = (self.speed + MINE_ACCELERATION * dt).min(MINE_MAX_SPEED);
                }
                MineState::Armed => {}
                MineState::Countdown { remaining } => {
                    *remaining -= dt;
                    expired = *remaining <= 0.0;
                }
            },
            ProjectileDetail::Collateral { state, rotation_deg } => match state {
                CollateralState::Warning { remaining } => {
                    *remaining -= dt;
                    if *remaining <= 0.0 {
                        *state = CollateralState::Damage;
                        self.dir = Vec2::NEG_Y;
                        self.speed = COLLATERAL_FALL_SPEED;
                    }
                }
                CollateralState::Damage => {
                    *rotation_deg = (*rotation_deg + COLLATERAL_ROTATION_SPEED * dt) % 360.0;
                }
            },
            ProjectileDetail::Portal { remaining, .. } => {
                *remaining -= dt;
                expired = *remaining <= 0.0;
            }
        }
        self.position += self.velocity() * dt;
        expired
    }

    /// Redirect the projectile, keeping its speed
    pub fn redirect(&mut self, dir: Vec2) {
        self.dir = dir.normalize_or(self.dir);
    }

    /// Child projectile for optics splits: same kind, new id and direction
    pub fn split_child(&self, id: u32, position: Vec2, dir: Vec2, scale: f32) -> Self {
        let mut child = self.clone();
        child.id = id;
        child.position = position;
        child.dir = dir.normalize_or(self.dir);
        child.width *= scale;
        child.height *= scale;
        child.last_thing_collided = self.last_thing_collided;
        child
    }

    /// Right-hand perpendicular of the travel direction
    pub fn right_dir(&self) -> Vec2 {
        rotate_degrees(self.dir, -90.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    #[test]
    fn test_rocket_accelerates_to_cap() {
        let mut rocket = Projectile::rocket(1, ProjectileKind::PaddleRocket, Vec2::ZERO, Vec2::Y, 1.0);
        for _ in 0..600 {
            rocket.tick(SIM_DT);
        }
        assert!((rocket.speed - ROCKET_MAX_SPEED).abs() < 1e-4);
        assert!(rocket.position.y > 0.0);
    }

    #[test]
    fn test_mine_lifecycle() {
        let mut rng = Pcg32::seed_from_u64(3);
        let mut mine = Projectile::mine(2, ProjectileKind::PaddleMine, Vec2::ZERO, Vec2::Y, 1.0);
        mine.tick(0.1);
        assert!(mine.speed > 0.0);

        mine.land_mine(None);
        assert_eq!(mine.mine_state(), Some(MineState::Armed));
        assert_eq!(mine.speed, 0.0);

        mine.begin_proximity_countdown(&mut rng);
        let mut exploded = false;
        for _ in 0..((MINE_MAX_COUNTDOWN / 0.05) as usize + 2) {
            if mine.tick(0.05) {
                exploded = true;
                break;
            }
        }
        assert!(exploded);
    }

    #[test]
    fn test_collateral_warning_then_falls() {
        let mut rng = Pcg32::seed_from_u64(11);
        let mut block = Projectile::collateral(3, Vec2::new(1.0, 5.0), &mut rng);
        assert!(!block.is_collateral_damaging());
        block.tick(COLLATERAL_WARNING_MAX + 0.01);
        assert!(block.is_collateral_damaging());
        let y = block.position.y;
        block.tick(0.5);
        assert!(block.position.y < y);
        assert!(block.rotation_deg() > 0.0);
    }

    #[test]
    fn test_fire_glob_ignores_spawner() {
        let spawner = PieceId::new(4, 1);
        let glob = Projectile::fire_glob(5, Vec2::ZERO, 0.4, spawner);
        assert!(glob.is_last_thing_collided_with(Collidee::Piece(spawner)));
    }
}
