//! Turret AI: the seek / track / search state machine and barrel cycle
//!
//! The AI is a plain state struct. Line of sight is answered by the level
//! through the `sight` callback so the AI itself never touches the grid.

use glam::Vec2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::consts::BALL_BASE_DAMAGE;
use crate::{degrees_of, direction_from_degrees, normalize_degrees, rotate_degrees};

/// Turret flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurretKind {
    Laser,
    Rocket,
    Mine,
}

/// Tuning for one turret flavour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurretParams {
    pub max_rotation_speed: f32,
    pub rotation_accel: f32,
    /// Seconds a barrel spends recoiling after a shot
    pub recoil_time: f32,
    /// Seconds before a fired barrel is ready again
    pub reload_time: f32,
    pub min_seek_time: f32,
    pub max_seek_time: f32,
    pub min_searches: u32,
    pub max_searches: u32,
    /// Offset of a barrel tip from the turret centre, in the turret's frame
    pub barrel_offset: Vec2,
}

impl TurretKind {
    pub fn params(self) -> TurretParams {
        match self {
            TurretKind::Laser => {
                let reload = 1.0 / (2.0 * 1.75);
                TurretParams {
                    max_rotation_speed: 200.0,
                    rotation_accel: 400.0,
                    recoil_time: reload / 4.0,
                    reload_time: reload,
                    min_seek_time: 80.0 / 200.0,
                    max_seek_time: 110.0 / 200.0,
                    min_searches: 3,
                    max_searches: 7,
                    barrel_offset: Vec2::new(0.78, 0.13),
                }
            }
            TurretKind::Rocket => TurretParams {
                max_rotation_speed: 180.0,
                rotation_accel: 350.0,
                recoil_time: 0.02 / 0.5,
                reload_time: (0.7 + 0.28) / 0.5,
                min_seek_time: 90.0 / 180.0,
                max_seek_time: 120.0 / 180.0,
                min_searches: 2,
                max_searches: 5,
                barrel_offset: Vec2::new(0.52, 0.0),
            },
            TurretKind::Mine => TurretParams {
                max_rotation_speed: 150.0,
                rotation_accel: 300.0,
                recoil_time: 0.02 / 0.33,
                reload_time: (0.7 + 0.28) / 0.33,
                min_seek_time: 90.0 / 150.0,
                max_seek_time: 120.0 / 150.0,
                min_searches: 3,
                max_searches: 6,
                barrel_offset: Vec2::new(0.52, 0.0),
            },
        }
    }

    pub fn max_life(self) -> f32 {
        self.ball_hits_to_destroy() * BALL_BASE_DAMAGE
    }

    pub fn ball_hits_to_destroy(self) -> f32 {
        match self {
            TurretKind::Laser => 6.0,
            TurretKind::Rocket | TurretKind::Mine => 5.0,
        }
    }

    /// Half thickness of the barrel pair, used as line-of-sight tolerance
    pub fn barrel_extent(self) -> f32 {
        match self {
            TurretKind::Laser => 0.28,
            TurretKind::Rocket => 0.21,
            TurretKind::Mine => 0.21,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurretAiState {
    Idle,
    Seeking,
    TargetFound,
    TargetLost,
}

/// Barrel animation cycle.
///
/// Laser turrets alternate two barrels through all four phases; rocket and
/// mine turrets use a single barrel going `OneForward -> OneFiring -> Reloading`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BarrelState {
    OneForward,
    OneFiring { remaining: f32 },
    TwoForward,
    TwoFiring { remaining: f32 },
    Reloading { remaining: f32 },
}

/// What the level reports about the paddle along the current aim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sight {
    pub can_see: bool,
    pub can_fire: bool,
}

/// A shot requested by the AI this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireOrder {
    /// Barrel tip offset from the turret centre, world frame
    pub offset: Vec2,
    pub dir: Vec2,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiTickOutcome {
    pub fire: Option<FireOrder>,
    pub state_change: Option<(TurretAiState, TurretAiState)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurretAi {
    kind: TurretKind,
    state: TurretAiState,
    barrel: BarrelState,
    /// Aim, counter-clockwise from +x
    rotation_deg: f32,
    rotation_speed: f32,
    rotation_accel: f32,
    search_time: f32,
    next_seek_time: f32,
    searches_done: u32,
    searches_total: u32,
    /// Difficulty multiplier on rotation and fire rate
    scale: f32,
}

impl TurretAi {
    pub fn new<R: Rng>(kind: TurretKind, scale: f32, rng: &mut R) -> Self {
        let params = kind.params();
        let accel_sign = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
        Self {
            kind,
            state: TurretAiState::Seeking,
            barrel: BarrelState::OneForward,
            rotation_deg: rng.random_range(0.0..360.0),
            rotation_speed: 0.0,
            rotation_accel: accel_sign * params.rotation_accel,
            search_time: 0.0,
            next_seek_time: params.min_seek_time,
            searches_done: 0,
            searches_total: params.min_searches,
            scale: scale.max(0.1),
        }
    }

    pub fn kind(&self) -> TurretKind {
        self.kind
    }

    pub fn state(&self) -> TurretAiState {
        self.state
    }

    pub fn barrel_state(&self) -> BarrelState {
        self.barrel
    }

    pub fn rotation_deg(&self) -> f32 {
        self.rotation_deg
    }

    pub fn set_rotation_deg(&mut self, deg: f32) {
        self.rotation_deg = deg;
    }

    pub fn fire_dir(&self) -> Vec2 {
        direction_from_degrees(self.rotation_deg)
    }

    /// Drop back to idle (ball not in play or frozen)
    pub fn go_idle(&mut self) -> Option<(TurretAiState, TurretAiState)> {
        self.set_state(TurretAiState::Idle)
    }

    fn set_state(&mut self, new: TurretAiState) -> Option<(TurretAiState, TurretAiState)> {
        let old = self.state;
        if old == new {
            return None;
        }
        self.state = new;
        if new == TurretAiState::TargetLost {
            self.search_time = 0.0;
            self.searches_done = 0;
        }
        Some((old, new))
    }

    fn randomise_search<R: Rng>(&mut self, rng: &mut R) {
        let params = self.kind.params();
        self.next_seek_time = rng.random_range(params.min_seek_time..=params.max_seek_time);
        self.searches_total = rng.random_range(params.min_searches..=params.max_searches);
    }

    fn update_speed(&mut self, dt: f32) {
        let max = self.kind.params().max_rotation_speed * self.scale;
        self.rotation_speed = (self.rotation_speed + self.rotation_accel * self.scale * dt).clamp(-max, max);
    }

    /// One AI step.
    ///
    /// `paddle` is the paddle centre; `sight` answers line of sight for a fire
    /// direction.
    pub fn tick<R: Rng, F: FnMut(Vec2) -> Sight>(
        &mut self,
        dt: f32,
        turret_center: Vec2,
        paddle: Vec2,
        mut sight: F,
        rng: &mut R,
    ) -> AiTickOutcome {
        let mut outcome = AiTickOutcome::default();

        let can_fire = match self.state {
            TurretAiState::Idle => {
                let change = self.set_state(TurretAiState::Seeking);
                merge_change(&mut outcome, change);
                self.seek(dt, &mut sight, &mut outcome)
            }
            TurretAiState::Seeking => self.seek(dt, &mut sight, &mut outcome),
            TurretAiState::TargetFound => {
                let fire_dir = self.fire_dir();
                let to_paddle = (paddle - turret_center).normalize_or_zero();
                let cross = fire_dir.perp_dot(to_paddle);
                if cross.abs() > f32::EPSILON {
                    let required = fire_dir.dot(to_paddle).clamp(-1.0, 1.0).acos().to_degrees();
                    // Brake before turning the other way
                    if self.rotation_speed != 0.0 && self.rotation_speed.signum() != cross.signum() {
                        self.rotation_speed = 0.0;
                    }
                    self.rotation_accel = cross.signum() * self.kind.params().rotation_accel;
                    self.update_speed(dt);
                    let mut amount = self.rotation_speed * dt;
                    if amount.abs() > required {
                        amount = amount.signum() * required;
                    }
                    self.rotation_deg = normalize_degrees(self.rotation_deg + amount);
                }
                let view = sight(self.fire_dir());
                if view.can_see {
                    view.can_fire
                } else {
                    let change = self.set_state(TurretAiState::TargetLost);
                    merge_change(&mut outcome, change);
                    self.randomise_search(rng);
                    false
                }
            }
            TurretAiState::TargetLost => {
                self.search_time += dt;
                if self.search_time > self.next_seek_time {
                    self.searches_done += 1;
                    if self.searches_done >= self.searches_total {
                        let change = self.set_state(TurretAiState::Seeking);
                        merge_change(&mut outcome, change);
                    } else {
                        // Sweep back the other way, wider after the first pass
                        self.rotation_accel = -self.rotation_accel.signum() * self.kind.params().rotation_accel;
                        self.search_time = 0.0;
                        if self.searches_done == 1 {
                            self.next_seek_time *= 2.0;
                        }
                    }
                    false
                } else {
                    self.seek(dt, &mut sight, &mut outcome)
                }
            }
        };

        outcome.fire = self.update_barrels(dt, can_fire);
        outcome
    }

    fn seek<F: FnMut(Vec2) -> Sight>(&mut self, dt: f32, sight: &mut F, outcome: &mut AiTickOutcome) -> bool {
        self.update_speed(dt);
        self.rotation_deg = normalize_degrees(self.rotation_deg + self.rotation_speed * dt);
        let view = sight(self.fire_dir());
        if view.can_see {
            let change = self.set_state(TurretAiState::TargetFound);
            merge_change(outcome, change);
            return view.can_fire;
        }
        false
    }

    fn barrel_order(&self, barrel_two: bool) -> FireOrder {
        let mut offset = self.kind.params().barrel_offset;
        if barrel_two {
            offset.y = -offset.y;
        }
        FireOrder {
            offset: rotate_degrees(offset, self.rotation_deg),
            dir: self.fire_dir(),
        }
    }

    fn update_barrels(&mut self, dt: f32, can_fire: bool) -> Option<FireOrder> {
        let params = self.kind.params();
        let two_barrels = self.kind == TurretKind::Laser;
        // Lasers fire each barrel once per reload; single barrels recoil then reload
        let recoil = if two_barrels { params.reload_time } else { params.recoil_time } / self.scale;
        match &mut self.barrel {
            BarrelState::OneForward => {
                if can_fire {
                    self.barrel = BarrelState::OneFiring { remaining: recoil };
                    return Some(self.barrel_order(false));
                }
            }
            BarrelState::OneFiring { remaining } => {
                *remaining -= dt;
                if *remaining <= 0.0 {
                    self.barrel = if two_barrels {
                        BarrelState::TwoForward
                    } else {
                        BarrelState::Reloading {
                            remaining: params.reload_time / self.scale,
                        }
                    };
                }
            }
            BarrelState::TwoForward => {
                if can_fire {
                    self.barrel = BarrelState::TwoFiring { remaining: recoil };
                    return Some(self.barrel_order(true));
                }
            }
            BarrelState::TwoFiring { remaining } => {
                *remaining -= dt;
                if *remaining <= 0.0 {
                    self.barrel = BarrelState::OneForward;
                }
            }
            BarrelState::Reloading { remaining } => {
                *remaining -= dt;
                if *remaining <= 0.0 {
                    self.barrel = BarrelState::OneForward;
                }
            }
        }
        None
    }

    /// Bearing from the turret to a point, for tests and tooling
    pub fn bearing_to(center: Vec2, target: Vec2) -> f32 {
        degrees_of(target - center)
    }
}

/// Keep the first old state and the latest new state of this tick
fn merge_change(outcome: &mut AiTickOutcome, change: Option<(TurretAiState, TurretAiState)>) {
    if let Some((old, new)) = change {
        let first = outcome.state_change.map_or(old, |(o, _)| o);
        outcome.state_change = Some((first, new));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    #[test]
    fn test_idle_turret_starts_seeking() {
        let mut rng = Pcg32::seed_from_u64(1);
        let mut ai = TurretAi::new(TurretKind::Laser, 1.0, &mut rng);
        ai.go_idle();
        let out = ai.tick(0.01, Vec2::ZERO, Vec2::new(0.0, -10.0), |_| Sight::default(), &mut rng);
        assert_eq!(ai.state(), TurretAiState::Seeking);
        assert_eq!(out.state_change, Some((TurretAiState::Idle, TurretAiState::Seeking)));
        assert!(out.fire.is_none());
    }

    #[test]
    fn test_seeing_paddle_fires_alternating_barrels() {
        let mut rng = Pcg32::seed_from_u64(2);
        let mut ai = TurretAi::new(TurretKind::Laser, 1.0, &mut rng);
        let clear = |_| Sight {
            can_see: true,
            can_fire: true,
        };
        let first = ai.tick(0.01, Vec2::ZERO, Vec2::new(0.0, -10.0), clear, &mut rng);
        assert_eq!(ai.state(), TurretAiState::TargetFound);
        let shot_one = first.fire.expect("first barrel fires");

        let mut shot_two = None;
        for _ in 0..200 {
            if let Some(f) = ai.tick(0.01, Vec2::ZERO, Vec2::new(0.0, -10.0), clear, &mut rng).fire {
                shot_two = Some(f);
                break;
            }
        }
        let shot_two = shot_two.expect("second barrel fires");
        // Barrels sit either side of the aim line
        assert!(shot_one.offset.perp_dot(shot_one.dir).signum() != shot_two.offset.perp_dot(shot_two.dir).signum());
    }

    #[test]
    fn test_tracking_turns_toward_paddle() {
        let mut rng = Pcg32::seed_from_u64(3);
        let mut ai = TurretAi::new(TurretKind::Rocket, 1.0, &mut rng);
        ai.set_rotation_deg(0.0);
        let visible = |_| Sight {
            can_see: true,
            can_fire: false,
        };
        ai.tick(0.01, Vec2::ZERO, Vec2::new(0.0, -10.0), visible, &mut rng);
        for _ in 0..400 {
            ai.tick(0.01, Vec2::ZERO, Vec2::new(0.0, -10.0), visible, &mut rng);
        }
        let target = TurretAi::bearing_to(Vec2::ZERO, Vec2::new(0.0, -10.0));
        assert!(normalize_degrees(ai.rotation_deg() - target).abs() < 2.0);
    }

    #[test]
    fn test_lost_target_eventually_seeks_again() {
        let mut rng = Pcg32::seed_from_u64(4);
        let mut ai = TurretAi::new(TurretKind::Mine, 1.0, &mut rng);
        let visible = |_| Sight {
            can_see: true,
            can_fire: false,
        };
        ai.tick(0.01, Vec2::ZERO, Vec2::new(0.0, -10.0), visible, &mut rng);
        assert_eq!(ai.state(), TurretAiState::TargetFound);
        ai.tick(0.01, Vec2::ZERO, Vec2::new(0.0, -10.0), |_| Sight::default(), &mut rng);
        assert_eq!(ai.state(), TurretAiState::TargetLost);
        for _ in 0..2000 {
            ai.tick(0.01, Vec2::ZERO, Vec2::new(0.0, -10.0), |_| Sight::default(), &mut rng);
        }
        assert_eq!(ai.state(), TurretAiState::Seeking);
    }

    #[test]
    fn test_single_barrel_reloads() {
        let mut rng = Pcg32::seed_from_u64(5);
        let mut ai = TurretAi::new(TurretKind::Rocket, 1.0, &mut rng);
        let clear = |_| Sight {
            can_see: true,
            can_fire: true,
        };
        assert!(ai.tick(0.01, Vec2::ZERO, Vec2::ZERO, clear, &mut rng).fire.is_some());
        assert!(ai.tick(0.01, Vec2::ZERO, Vec2::ZERO, clear, &mut rng).fire.is_none());
        let mut fired_again = false;
        for _ in 0..600 {
            if ai.tick(0.01, Vec2::ZERO, Vec2::ZERO, clear, &mut rng).fire.is_some() {
                fired_again = true;
                break;
            }
        }
        assert!(fired_again);
    }
}
