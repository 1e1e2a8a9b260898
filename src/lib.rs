//! Breakfield - simulation core of a grid-based brick-breaking arcade game
//!
//! Core modules:
//! - `sim`: Deterministic simulation (level grid, pieces, projectiles, events)
//! - `settings`: Data-driven simulation configuration

pub mod settings;
pub mod sim;

pub use settings::{Difficulty, Settings, SettingsError};

use glam::Vec2;

/// Simulation configuration constants
pub mod consts {
    /// Fixed simulation timestep (120 Hz)
    pub const SIM_DT: f32 = 1.0 / 120.0;
    /// Maximum substeps per frame to prevent spiral of death
    pub const MAX_SUBSTEPS: u32 = 8;

    /// Level piece dimensions in world units
    pub const PIECE_WIDTH: f32 = 2.5;
    pub const PIECE_HEIGHT: f32 = 1.0;
    pub const HALF_PIECE_WIDTH: f32 = PIECE_WIDTH / 2.0;
    pub const HALF_PIECE_HEIGHT: f32 = PIECE_HEIGHT / 2.0;

    /// Ball defaults
    pub const BALL_RADIUS: f32 = 0.25;
    pub const BALL_START_SPEED: f32 = 12.0;
    /// Base damage a ball deals to life-based pieces
    pub const BALL_BASE_DAMAGE: f32 = 12.5;

    /// Paddle defaults
    pub const PADDLE_HALF_WIDTH: f32 = 2.0;
    pub const PADDLE_HALF_HEIGHT: f32 = 0.25;
    pub const PADDLE_SPEED: f32 = 24.0;
    /// Radius of the paddle shield bubble
    pub const PADDLE_SHIELD_RADIUS: f32 = 2.6;
    pub const PADDLE_SHIELD_DAMAGE_PER_SECOND: f32 = 150.0;

    /// Laser beam defaults
    pub const BEAM_DAMAGE_PER_SECOND: f32 = 100.0;
    pub const BEAM_RADIUS: f32 = 0.2;
}

/// Normalized angle in degrees to [-180, 180)
#[inline]
pub fn normalize_degrees(mut angle: f32) -> f32 {
    while angle >= 180.0 {
        angle -= 360.0;
    }
    while angle < -180.0 {
        angle += 360.0;
    }
    angle
}

/// Unit vector for an angle in degrees, measured counter-clockwise from +x
#[inline]
pub fn direction_from_degrees(degrees: f32) -> Vec2 {
    let r = degrees.to_radians();
    Vec2::new(r.cos(), r.sin())
}

/// Angle of a vector in degrees, counter-clockwise from +x
#[inline]
pub fn degrees_of(v: Vec2) -> f32 {
    v.y.atan2(v.x).to_degrees()
}

/// Rotate a vector counter-clockwise by the given degrees
#[inline]
pub fn rotate_degrees(v: Vec2, degrees: f32) -> Vec2 {
    Vec2::from_angle(degrees.to_radians()).rotate(v)
}
