//! Game events and the listener fan-out
//!
//! The simulation never talks to rendering or audio directly. Every
//! noteworthy occurrence becomes a `GameEvent` that the `EventManager`
//! delivers, synchronously and in registration order, to every listener.

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::items::ItemKind;
use super::piece::{DestructionMethod, PieceId, PieceStatus, PieceType};
use super::projectile::ProjectileKind;
use super::turret::TurretAiState;

/// Everything the simulation reports to the outside world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    BlockDestroyed {
        piece: PieceId,
        piece_type: PieceType,
        center: Vec2,
        method: DestructionMethod,
    },
    LevelPieceChanged {
        before: PieceId,
        before_type: PieceType,
        after: PieceId,
        after_type: PieceType,
    },
    LevelPieceStatusAdded {
        piece: PieceId,
        status: PieceStatus,
    },
    LevelPieceStatusRemoved {
        piece: PieceId,
        status: PieceStatus,
    },
    BallBlockCollision {
        ball: u32,
        piece: PieceId,
    },
    ProjectileBlockCollision {
        projectile: u32,
        kind: ProjectileKind,
        piece: PieceId,
    },
    PaddleBlockCollision {
        piece: PieceId,
    },
    BallPaddleCollision {
        ball: u32,
    },
    BallDied {
        ball: u32,
    },
    BallPortalBlockTeleport {
        ball: u32,
        portal: PieceId,
    },
    ProjectilePortalBlockTeleport {
        projectile: u32,
        portal: PieceId,
    },
    PaddlePortalBlockTeleport {
        portal: PieceId,
    },
    BallEnteredCannon {
        ball: u32,
        cannon: PieceId,
    },
    BallFiredFromCannon {
        ball: u32,
        cannon: PieceId,
    },
    ProjectileEnteredCannon {
        projectile: u32,
        cannon: PieceId,
    },
    ProjectileFiredFromCannon {
        projectile: u32,
        cannon: PieceId,
    },
    BallSafetyNetCreated,
    BallSafetyNetDestroyed,
    InkBlockSplattered {
        piece: PieceId,
    },
    BlockIceShattered {
        piece: PieceId,
    },
    BlockIceCancelledWithFire {
        piece: PieceId,
    },
    SwitchBlockActivated {
        piece: PieceId,
    },
    TeslaLightningBarrierSpawned {
        first: PieceId,
        second: PieceId,
    },
    TeslaLightningBarrierRemoved {
        first: PieceId,
        second: PieceId,
    },
    ItemDropBlockItemChange {
        piece: PieceId,
        item: ItemKind,
    },
    ItemDropBlockLocked {
        piece: PieceId,
    },
    ItemSpawned {
        item: ItemKind,
        position: Vec2,
    },
    RegenBlockLifeChanged {
        piece: PieceId,
        life_percent: f32,
    },
    RegenBlockPreturbed {
        piece: PieceId,
    },
    TurretAiStateChanged {
        piece: PieceId,
        old: TurretAiState,
        new: TurretAiState,
    },
    TurretFired {
        piece: PieceId,
        projectile: u32,
    },
    ProjectileSpawned {
        projectile: u32,
        kind: ProjectileKind,
    },
    ProjectileRemoved {
        projectile: u32,
        kind: ProjectileKind,
    },
    RocketExploded {
        projectile: u32,
        position: Vec2,
        size_factor: f32,
    },
    MineExploded {
        projectile: u32,
        position: Vec2,
        size_factor: f32,
    },
    MineLanded {
        projectile: u32,
    },
    PaddleHitByProjectile {
        projectile: u32,
        kind: ProjectileKind,
    },
    PointAwarded {
        base: u32,
        multiplier: u32,
        position: Vec2,
    },
    ScoreChanged {
        amount: u64,
        total: u64,
    },
    ScoreMultiplierChanged {
        multiplier: u32,
    },
    BoostMeterChanged {
        value: f32,
    },
    LevelCompleted,
}

/// Receives every event broadcast by the simulation
pub trait EventListener {
    fn on_event(&mut self, event: &GameEvent);
}

/// Handle returned on registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u32);

/// Ordered list of listeners with synchronous fan-out
#[derive(Default)]
pub struct EventManager {
    listeners: Vec<(ListenerId, Box<dyn EventListener>)>,
    next_id: u32,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Box<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver an event to every listener in registration order
    pub fn broadcast(&mut self, event: &GameEvent) {
        for (_, listener) in &mut self.listeners {
            listener.on_event(event);
        }
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Records every event into a shared buffer; clones share the buffer
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Rc<RefCell<Vec<GameEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GameEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&GameEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EventListener for EventRecorder {
    fn on_event(&mut self, event: &GameEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

/// Forwards every event to the `log` facade at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl EventListener for LogListener {
    fn on_event(&mut self, event: &GameEvent) {
        log::debug!("event: {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagger {
        tag: u32,
        log: Rc<RefCell<Vec<u32>>>,
    }

    impl EventListener for Tagger {
        fn on_event(&mut self, _event: &GameEvent) {
            self.log.borrow_mut().push(self.tag);
        }
    }

    #[test]
    fn test_broadcast_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut manager = EventManager::new();
        for tag in 0..3 {
            manager.register(Box::new(Tagger { tag, log: log.clone() }));
        }
        manager.broadcast(&GameEvent::LevelCompleted);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unregister() {
        let mut manager = EventManager::new();
        let recorder = EventRecorder::new();
        let id = manager.register(Box::new(recorder.clone()));
        manager.broadcast(&GameEvent::BallSafetyNetCreated);
        assert!(manager.unregister(id));
        assert!(!manager.unregister(id));
        manager.broadcast(&GameEvent::BallSafetyNetDestroyed);
        assert_eq!(recorder.events(), vec![GameEvent::BallSafetyNetCreated]);
    }
}
