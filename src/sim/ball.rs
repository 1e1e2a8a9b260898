//! Balls, the paddle and beam segments
//!
//! These are the moving bodies the level pieces react to. They are owned by
//! the simulation driver and handed to the level by mutable reference.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::geometry::{Aabb2, BoundingLines, Circle2, Ray2};
use super::piece::PieceId;
use crate::consts::*;

/// Ball modifier flags; several may be active at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BallType(u16);

impl BallType {
    pub const NORMAL: BallType = BallType(0);
    pub const UBER: BallType = BallType(1);
    pub const ICE: BallType = BallType(1 << 1);
    pub const FIRE: BallType = BallType(1 << 2);
    pub const GHOST: BallType = BallType(1 << 3);
    pub const INVISI: BallType = BallType(1 << 4);

    pub fn contains(self, other: BallType) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BallType) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: BallType) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for BallType {
    type Output = BallType;

    fn bitor(self, rhs: BallType) -> BallType {
        BallType(self.0 | rhs.0)
    }
}

/// A ball entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ball {
    pub id: u32,
    pub center: Vec2,
    /// Unit direction of travel
    pub dir: Vec2,
    pub speed: f32,
    pub radius: f32,
    pub ball_type: BallType,
    /// Cannon currently holding this ball
    pub cannon: Option<PieceId>,
    last_piece: Option<PieceId>,
}

impl Ball {
    pub fn new(id: u32, center: Vec2, dir: Vec2, speed: f32) -> Self {
        Self {
            id,
            center,
            dir: dir.normalize_or(Vec2::Y),
            speed,
            radius: BALL_RADIUS,
            ball_type: BallType::NORMAL,
            cannon: None,
            last_piece: None,
        }
    }

    pub fn with_type(mut self, ball_type: BallType) -> Self {
        self.ball_type = ball_type;
        self
    }

    pub fn velocity(&self) -> Vec2 {
        self.dir * self.speed
    }

    pub fn set_velocity(&mut self, dir: Vec2, speed: f32) {
        self.dir = dir.normalize_or(self.dir);
        self.speed = speed;
    }

    pub fn bounds(&self) -> Circle2 {
        Circle2::new(self.center, self.radius)
    }

    pub fn is_type(&self, t: BallType) -> bool {
        self.ball_type.contains(t)
    }

    /// Uber ball without fire or ice
    pub fn is_pure_uber(&self) -> bool {
        self.is_type(BallType::UBER) && !self.is_type(BallType::FIRE) && !self.is_type(BallType::ICE)
    }

    /// Damage dealt to life-based pieces on impact
    pub fn collision_damage(&self) -> f32 {
        if self.is_type(BallType::UBER) {
            BALL_BASE_DAMAGE * 2.0
        } else {
            BALL_BASE_DAMAGE
        }
    }

    pub fn last_piece_collided_with(&self) -> Option<PieceId> {
        self.last_piece
    }

    pub fn is_last_piece_collided_with(&self, id: PieceId) -> bool {
        self.last_piece == Some(id)
    }

    pub fn set_last_piece_collided_with(&mut self, id: Option<PieceId>) {
        self.last_piece = id;
    }

    pub fn is_loaded_in_cannon(&self) -> bool {
        self.cannon.is_some()
    }
}

/// The player paddle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paddle {
    pub center: Vec2,
    /// Centre before the most recent move, used for teleport line crossing
    pub prev_center: Vec2,
    pub half_width: f32,
    pub half_height: f32,
    pub shield_active: bool,
    pub shield_damage_per_second: f32,
    /// Upside down after passing through a flipping portal
    pub flipped: bool,
    /// Bounce direction applied to balls (away from the paddle face)
    pub up: Vec2,
}

impl Paddle {
    pub fn new(center: Vec2) -> Self {
        Self {
            center,
            prev_center: center,
            half_width: PADDLE_HALF_WIDTH,
            half_height: PADDLE_HALF_HEIGHT,
            shield_active: false,
            shield_damage_per_second: PADDLE_SHIELD_DAMAGE_PER_SECOND,
            flipped: false,
            up: Vec2::Y,
        }
    }

    pub fn aabb(&self) -> Aabb2 {
        Aabb2::from_center(self.center, Vec2::new(self.half_width, self.half_height))
    }

    pub fn bounds(&self) -> BoundingLines {
        BoundingLines::rectangle(self.center, Vec2::new(self.half_width, self.half_height))
    }

    pub fn shield_bounds(&self) -> Circle2 {
        Circle2::new(self.center, PADDLE_SHIELD_RADIUS)
    }

    /// Move horizontally, remembering where the paddle was
    pub fn move_to_x(&mut self, x: f32) {
        self.prev_center = self.center;
        self.center.x = x;
    }

    pub fn flip(&mut self) {
        self.flipped = !self.flipped;
        self.up = -self.up;
    }
}

/// One straight segment of a continuous laser beam
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamSegment {
    pub origin: Vec2,
    pub dir: Vec2,
    pub length: f32,
    pub radius: f32,
    pub damage_per_second: f32,
}

impl BeamSegment {
    pub fn new(origin: Vec2, dir: Vec2, length: f32) -> Self {
        Self {
            origin,
            dir: dir.normalize_or(Vec2::Y),
            length,
            radius: BEAM_RADIUS,
            damage_per_second: BEAM_DAMAGE_PER_SECOND,
        }
    }

    pub fn ray(&self) -> Ray2 {
        Ray2::new(self.origin, self.dir)
    }

    pub fn end(&self) -> Vec2 {
        self.origin + self.dir * self.length
    }
}
