//! Simulation state
//!
//! Everything the driver in `tick.rs` advances: the level, the paddle, balls,
//! projectiles and the context that carries score, clock and events.

use std::collections::{BTreeMap, BTreeSet};

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::ball::{Ball, BeamSegment, Paddle};
use super::context::{DroppedItem, SimContext};
use super::level::GameLevel;
use super::piece::PieceId;
use super::projectile::Projectile;
use crate::Settings;
use crate::consts::*;

/// Height of the paddle centre; the paddle runs along the bottom row
pub const PADDLE_Y: f32 = HALF_PIECE_HEIGHT;

/// Game phase state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    /// Ball attached to paddle, waiting for launch input
    Serve,
    /// Active gameplay
    Playing,
    /// Every vital piece is gone
    Complete,
}

/// Complete simulation state
#[derive(Debug)]
pub struct Simulation {
    pub phase: GamePhase,
    pub level: GameLevel,
    pub ctx: SimContext,
    pub paddle: Paddle,
    /// Active balls (sorted by id for determinism)
    pub balls: Vec<Ball>,
    /// Live projectiles (sorted by id for determinism)
    pub projectiles: Vec<Projectile>,
    /// Paddle beam, when it was on during the last tick
    pub beam: Option<BeamSegment>,
    /// Items released so far, oldest first
    pub dropped_items: Vec<DroppedItem>,
    pub balls_lost: u32,
    /// Simulation tick counter
    pub time_ticks: u64,
    pub ball_speed: f32,
    pub(super) accumulator: f32,
    pub(super) next_ball_id: u32,
    /// Pieces the paddle was touching after the last tick
    pub(super) paddle_contacts: BTreeSet<PieceId>,
    /// Ball id -> portal projectile it last came out of
    pub(super) portal_exits: BTreeMap<u32, u32>,
}

impl Simulation {
    /// Start a level with one ball waiting on the paddle
    pub fn new(level: GameLevel, ctx: SimContext) -> Self {
        let paddle = Paddle::new(Vec2::new(level.default_paddle_x(), PADDLE_Y));
        let ball_speed = BALL_START_SPEED * ctx.difficulty.ball_speed_scale();
        let mut sim = Self {
            phase: GamePhase::Serve,
            level,
            ctx,
            paddle,
            balls: Vec::new(),
            projectiles: Vec::new(),
            beam: None,
            dropped_items: Vec::new(),
            balls_lost: 0,
            time_ticks: 0,
            ball_speed,
            accumulator: 0.0,
            next_ball_id: 1,
            paddle_contacts: BTreeSet::new(),
            portal_exits: BTreeMap::new(),
        };
        sim.spawn_ball_attached();
        sim
    }

    /// Like `new`, applying the start-of-level options in `settings`
    pub fn with_settings(level: GameLevel, ctx: SimContext, settings: &Settings) -> Self {
        let mut sim = Self::new(level, ctx);
        if settings.ball_safety_net {
            sim.level.create_safety_net(&mut sim.ctx);
        }
        sim
    }

    pub fn next_ball_id(&mut self) -> u32 {
        let id = self.next_ball_id;
        self.next_ball_id += 1;
        id
    }

    /// Spawn a ball resting on the paddle face
    pub fn spawn_ball_attached(&mut self) {
        let id = self.next_ball_id();
        let center = self.attached_ball_position();
        self.balls.push(Ball::new(id, center, self.paddle.up, self.ball_speed));
    }

    pub(super) fn attached_ball_position(&self) -> Vec2 {
        self.paddle.center + self.paddle.up * (self.paddle.half_height + BALL_RADIUS)
    }

    pub fn is_complete(&self) -> bool {
        self.phase == GamePhase::Complete
    }

    pub fn score(&self) -> u64 {
        self.ctx.score()
    }

    /// Open a pair of portal projectiles; a ball entering one leaves through the other
    pub fn open_portal_pair(&mut self, a: Vec2, b: Vec2) -> (u32, u32) {
        let id_a = self.ctx.next_projectile_id();
        let id_b = self.ctx.next_projectile_id();
        let (first, second) = Projectile::portal_pair(id_a, id_b, a, b);
        self.ctx.spawn_projectile(first);
        self.ctx.spawn_projectile(second);
        (id_a, id_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::piece::PieceKind;

    #[test]
    fn test_new_simulation_serves_one_ball() {
        let level = GameLevel::from_kinds(4, 6, |_, _| PieceKind::Empty);
        let sim = Simulation::new(level, SimContext::new(1));
        assert_eq!(sim.phase, GamePhase::Serve);
        assert_eq!(sim.balls.len(), 1);
        assert!((sim.paddle.center.x - 5.0).abs() < 1e-5);
        assert!(sim.balls[0].center.y > sim.paddle.center.y);
    }

    #[test]
    fn test_settings_create_safety_net() {
        let level = GameLevel::from_kinds(4, 6, |_, _| PieceKind::Empty);
        let settings = Settings {
            ball_safety_net: true,
            ..Default::default()
        };
        let sim = Simulation::with_settings(level, SimContext::from_settings(&settings), &settings);
        assert!(sim.level.has_safety_net());
    }

    #[test]
    fn test_ball_ids_increase() {
        let level = GameLevel::from_kinds(2, 2, |_, _| PieceKind::Empty);
        let mut sim = Simulation::new(level, SimContext::new(1));
        let a = sim.next_ball_id();
        let b = sim.next_ball_id();
        assert!(b > a);
    }
}
