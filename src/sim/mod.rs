//! Deterministic simulation module
//!
//! All gameplay logic lives here. This module must be pure and deterministic:
//! - Fixed timestep only
//! - Seeded RNG only (owned by `SimContext`)
//! - Stable iteration order (row-major pieces, projectiles and balls by id)
//! - No rendering or platform dependencies; listeners see everything through `GameEvent`

pub mod ball;
pub mod bounds;
pub mod context;
pub mod events;
pub mod explosion;
pub mod geometry;
pub mod items;
pub mod level;
pub mod loader;
pub mod optics;
pub mod piece;
pub mod projectile;
pub mod response;
pub mod state;
pub mod tick;
pub mod turret;

pub use ball::{Ball, BallType, BeamSegment, Paddle};
pub use context::{DroppedItem, SimContext};
pub use events::{EventListener, EventManager, EventRecorder, GameEvent, ListenerId, LogListener};
pub use explosion::ExplosionKind;
pub use geometry::{Aabb2, BoundingLines, Circle2, CollisionResult, LineSeg2, Ray2, reflect};
pub use items::{ItemDropTable, ItemKind};
pub use level::GameLevel;
pub use loader::{LevelLoadError, load_level_file, parse_level};
pub use piece::{DestructionMethod, LevelPiece, PieceId, PieceKind, PieceStatus, PieceType};
pub use projectile::{Projectile, ProjectileKind};
pub use response::{CannonShot, StatusTickResult};
pub use state::{GamePhase, Simulation};
pub use tick::TickInput;
pub use turret::{TurretAiState, TurretKind};
