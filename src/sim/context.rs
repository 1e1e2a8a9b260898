//! Shared simulation context
//!
//! One `SimContext` is created per run and passed by `&mut` into every level
//! operation. It owns the event fan-out, the seeded random stream, the
//! simulation clock, scoring, and the queues of entities spawned mid-tick.

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use super::events::{EventListener, EventManager, GameEvent, ListenerId};
use super::items::{ItemDropTable, ItemKind};
use super::projectile::Projectile;
use crate::settings::{Difficulty, Settings};

/// Destroyed pieces needed per step of the score multiplier
pub const INTERIM_DESTROYED_PER_MULTIPLIER: u32 = 5;
pub const MAX_SCORE_MULTIPLIER: u32 = 4;
pub const MAX_BOOST_METER: f32 = 1.0;

/// An item released into the level this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DroppedItem {
    pub item: ItemKind,
    pub position: Vec2,
}

#[derive(Debug)]
pub struct SimContext {
    events: EventManager,
    rng: Pcg32,
    /// Accumulated simulation seconds; all debounce timers read this
    clock: f64,
    score: u64,
    interim_destroyed: u32,
    multiplier: u32,
    boost_meter: f32,
    pub item_drop_probability: f32,
    pub difficulty: Difficulty,
    next_projectile_id: u32,
    spawned_projectiles: Vec<Projectile>,
    dropped_items: Vec<DroppedItem>,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            events: EventManager::new(),
            rng: Pcg32::seed_from_u64(seed),
            clock: 0.0,
            score: 0,
            interim_destroyed: 0,
            multiplier: 1,
            boost_meter: 0.0,
            item_drop_probability: Settings::default().item_drop_probability,
            difficulty: Difficulty::Normal,
            next_projectile_id: 1,
            spawned_projectiles: Vec::new(),
            dropped_items: Vec::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut ctx = Self::new(settings.seed);
        ctx.item_drop_probability = settings.item_drop_probability;
        ctx.difficulty = settings.difficulty;
        ctx
    }

    // -- events --------------------------------------------------------------

    pub fn register_listener(&mut self, listener: Box<dyn EventListener>) -> ListenerId {
        self.events.register(listener)
    }

    pub fn unregister_listener(&mut self, id: ListenerId) -> bool {
        self.events.unregister(id)
    }

    pub fn emit(&mut self, event: GameEvent) {
        self.events.broadcast(&event);
    }

    // -- randomness and time -------------------------------------------------

    pub fn rng(&mut self) -> &mut Pcg32 {
        &mut self.rng
    }

    pub fn now(&self) -> f64 {
        self.clock
    }

    pub fn advance_clock(&mut self, dt: f32) {
        self.clock += dt as f64;
    }

    // -- scoring -------------------------------------------------------------

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn interim_destroyed(&self) -> u32 {
        self.interim_destroyed
    }

    /// Award points scaled by the current multiplier
    pub fn award_points(&mut self, base: u32, position: Vec2) {
        if base == 0 {
            return;
        }
        let amount = base as u64 * self.multiplier as u64;
        self.score += amount;
        self.emit(GameEvent::PointAwarded {
            base,
            multiplier: self.multiplier,
            position,
        });
        self.emit(GameEvent::ScoreChanged {
            amount,
            total: self.score,
        });
    }

    pub fn increment_interim_destroyed(&mut self) {
        self.interim_destroyed += 1;
        let multiplier = (1 + self.interim_destroyed / INTERIM_DESTROYED_PER_MULTIPLIER).min(MAX_SCORE_MULTIPLIER);
        self.set_multiplier(multiplier);
    }

    /// Rocket destruction halves the multiplier
    pub fn halve_multiplier(&mut self) {
        let multiplier = (self.multiplier / 2).max(1);
        self.interim_destroyed = (multiplier - 1) * INTERIM_DESTROYED_PER_MULTIPLIER;
        self.set_multiplier(multiplier);
    }

    /// Ball returned to the paddle; the combo is over
    pub fn reset_multiplier(&mut self) {
        self.interim_destroyed = 0;
        self.set_multiplier(1);
    }

    fn set_multiplier(&mut self, multiplier: u32) {
        if multiplier != self.multiplier {
            self.multiplier = multiplier;
            self.emit(GameEvent::ScoreMultiplierChanged { multiplier });
        }
    }

    pub fn boost_meter(&self) -> f32 {
        self.boost_meter
    }

    pub fn add_boost(&mut self, amount: f32) {
        let value = (self.boost_meter + amount).clamp(0.0, MAX_BOOST_METER);
        if value != self.boost_meter {
            self.boost_meter = value;
            self.emit(GameEvent::BoostMeterChanged { value });
        }
    }

    // -- spawning ------------------------------------------------------------

    pub fn next_projectile_id(&mut self) -> u32 {
        let id = self.next_projectile_id;
        self.next_projectile_id += 1;
        id
    }

    /// Queue a projectile; the driver adopts it at the end of the step
    pub fn spawn_projectile(&mut self, projectile: Projectile) {
        self.emit(GameEvent::ProjectileSpawned {
            projectile: projectile.id,
            kind: projectile.kind,
        });
        self.spawned_projectiles.push(projectile);
    }

    pub fn take_spawned_projectiles(&mut self) -> Vec<Projectile> {
        std::mem::take(&mut self.spawned_projectiles)
    }

    /// Roll for a random drop from the level's table
    pub fn add_possible_item_drop(&mut self, table: &ItemDropTable, position: Vec2) -> Option<ItemKind> {
        if table.is_empty() || !self.rng.random_bool(self.item_drop_probability.clamp(0.0, 1.0) as f64) {
            return None;
        }
        let item = table.sample(&mut self.rng)?;
        self.add_item_drop(item, position);
        Some(item)
    }

    /// Drop a specific item
    pub fn add_item_drop(&mut self, item: ItemKind, position: Vec2) {
        self.emit(GameEvent::ItemSpawned { item, position });
        self.dropped_items.push(DroppedItem { item, position });
    }

    pub fn dropped_items(&self) -> &[DroppedItem] {
        &self.dropped_items
    }

    pub fn take_dropped_items(&mut self) -> Vec<DroppedItem> {
        std::mem::take(&mut self.dropped_items)
    }
}
