//! Level pieces: the typed cells of the level grid
//!
//! A `LevelPiece` is a grid cell with position, bounds, status and a
//! `PieceKind` payload carrying the per-type state. Pure capability queries
//! live here; everything that mutates the level lives on `GameLevel`.

use glam::{Vec2, Vec4};
use serde::{Deserialize, Serialize};

use super::ball::{Ball, BallType};
use super::geometry::{Aabb2, BoundingLines};
use super::items::ItemKind;
use super::projectile::{Collidee, Projectile, ProjectileKind};
use super::turret::{TurretAi, TurretKind};
use crate::consts::*;

/// Life of one breakable stage against beams and shields
pub const BREAKABLE_STAGE_LIFE: f32 = 100.0;
pub const INK_LIFE: f32 = 80.0;
pub const COLLATERAL_LIFE: f32 = 100.0;
pub const ALWAYS_DROP_LIFE: f32 = 100.0;
pub const REGEN_MAX_LIFE: f32 = 100.0;
pub const REGEN_LIFE_PER_SECOND: f32 = 6.0;
/// Beam or shield damage needed to toggle a Tesla block or press a switch
pub const TOGGLE_LIFE: f32 = 150.0;
/// Beam or shield damage needed before an item drop block drops
pub const DAMAGE_UNTIL_ITEM_DROP: f32 = 150.0;

pub const TESLA_MIN_TIME_BETWEEN_TOGGLINGS: f64 = 0.1;
pub const SWITCH_RESET_TIME: f64 = 4.0;
pub const ITEM_DROP_DISABLE_TIME: f64 = 1.4;
pub const PORTAL_TIME_BETWEEN_BALL_USES: f64 = 0.65;
/// Repeat hits from the same ball inside this window are ignored by breakables
pub const ALLOWABLE_TIME_BETWEEN_BALL_COLLISIONS: f64 = 0.01;

pub const CANNON_MIN_SPIN_TIME: f32 = 1.0;
pub const CANNON_MAX_SPIN_TIME: f32 = 2.5;
pub const CANNON_MIN_SPIN_SPEED: f32 = 150.0;
pub const CANNON_MAX_SPIN_SPEED: f32 = 450.0;
pub const CANNON_BARREL_LENGTH: f32 = 1.2;

/// Portal trigger area relative to a full piece
pub const PORTAL_SIZE_SCALE: f32 = 0.75;
pub const PORTAL_COLOURS: [Vec4; 8] = [
    Vec4::new(0.58, 0.0, 0.83, 1.0),
    Vec4::new(0.0, 0.75, 1.0, 1.0),
    Vec4::new(1.0, 0.41, 0.71, 1.0),
    Vec4::new(0.5, 1.0, 0.0, 1.0),
    Vec4::new(1.0, 0.84, 0.0, 1.0),
    Vec4::new(0.0, 1.0, 0.5, 1.0),
    Vec4::new(1.0, 0.27, 0.0, 1.0),
    Vec4::new(0.53, 0.81, 0.92, 1.0),
];

pub const POINTS_BREAKABLE_HIT: u32 = 10;
pub const POINTS_BREAKABLE_DESTROYED: u32 = 100;
pub const POINTS_BOMB_DESTROYED: u32 = 150;
pub const POINTS_SOLID_DESTROYED: u32 = 450;
pub const POINTS_INK_DESTROYED: u32 = 500;
pub const POINTS_PRISM_DESTROYED: u32 = 300;
pub const POINTS_COLLATERAL_DESTROYED: u32 = 150;
pub const POINTS_ITEM_DROP_DESTROYED: u32 = 500;
pub const POINTS_ONE_WAY_DESTROYED: u32 = 500;
pub const POINTS_NO_ENTRY_DESTROYED: u32 = 700;
pub const POINTS_REGEN_DESTROYED: u32 = 500;
pub const POINTS_ALWAYS_DROP_DESTROYED: u32 = 100;
pub const POINTS_LASER_TURRET_DESTROYED: u32 = 1250;
pub const POINTS_ROCKET_TURRET_DESTROYED: u32 = 1500;
pub const POINTS_MINE_TURRET_DESTROYED: u32 = 1500;
pub const POINTS_SOLID_TRIANGLE_DESTROYED: u32 = 400;
pub const POINTS_PRISM_TRIANGLE_DESTROYED: u32 = 250;

/// Stable handle into the level's piece arena.
///
/// The generation changes every time the slot is given a new piece, so a
/// handle to a replaced piece never resolves to its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PieceId {
    slot: u32,
    generation: u32,
}

impl PieceId {
    pub fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub fn slot(self) -> usize {
        self.slot as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Handle for the next piece placed in the same slot
    pub fn next_generation(self) -> Self {
        Self {
            slot: self.slot,
            generation: self.generation.wrapping_add(1),
        }
    }
}

/// Piece type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceType {
    Solid,
    Breakable,
    Bomb,
    Empty,
    Ink,
    Portal,
    Cannon,
    FragileCannon,
    Collateral,
    Tesla,
    ItemDrop,
    Switch,
    OneWay,
    NoEntry,
    LaserTurret,
    RocketTurret,
    MineTurret,
    AlwaysDrop,
    Regen,
    BreakableTriangle,
    SolidTriangle,
    PrismTriangle,
    Prism,
}

impl PieceType {
    pub fn is_turret(self) -> bool {
        matches!(self, PieceType::LaserTurret | PieceType::RocketTurret | PieceType::MineTurret)
    }

    pub fn is_triangle(self) -> bool {
        matches!(
            self,
            PieceType::BreakableTriangle | PieceType::SolidTriangle | PieceType::PrismTriangle
        )
    }
}

/// Status bitmask; fire and ice never coexist on one piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PieceStatus(u8);

impl PieceStatus {
    pub const NORMAL: PieceStatus = PieceStatus(0);
    pub const ON_FIRE: PieceStatus = PieceStatus(1);
    pub const ICE_CUBE: PieceStatus = PieceStatus(1 << 1);

    pub fn contains(self, other: PieceStatus) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PieceStatus) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PieceStatus) {
        self.0 &= !other.0;
    }

    pub fn is_normal(self) -> bool {
        self.0 == 0
    }

    /// Individual status bits set in this mask
    pub fn iter(self) -> impl Iterator<Item = PieceStatus> {
        [PieceStatus::ON_FIRE, PieceStatus::ICE_CUBE]
            .into_iter()
            .filter(move |s| self.contains(*s))
    }
}

impl std::ops::BitOr for PieceStatus {
    type Output = PieceStatus;

    fn bitor(self, rhs: PieceStatus) -> PieceStatus {
        PieceStatus(self.0 | rhs.0)
    }
}

/// Why a piece was destroyed; scoring and effects depend on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestructionMethod {
    Regular,
    Rocket,
    LaserBeam,
    Collateral,
    Tesla,
    IceShatter,
    Bomb,
    Mine,
    PaddleShield,
    SelfDestruction,
    LaserProjectile,
    BasicProjectile,
    Fire,
    NotApplicable,
}

/// Breakable colour ladder, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BreakableStage {
    Green,
    Yellow,
    Orange,
    Red,
}

impl BreakableStage {
    pub fn colour(self) -> Vec4 {
        match self {
            BreakableStage::Green => Vec4::new(0.0, 1.0, 0.0, 1.0),
            BreakableStage::Yellow => Vec4::new(1.0, 1.0, 0.0, 1.0),
            BreakableStage::Orange => Vec4::new(1.0, 0.5, 0.0, 1.0),
            BreakableStage::Red => Vec4::new(1.0, 0.0, 0.0, 1.0),
        }
    }

    /// Next stage down; `None` means the block is gone
    pub fn diminished(self) -> Option<BreakableStage> {
        match self {
            BreakableStage::Green => None,
            BreakableStage::Yellow => Some(BreakableStage::Green),
            BreakableStage::Orange => Some(BreakableStage::Yellow),
            BreakableStage::Red => Some(BreakableStage::Orange),
        }
    }

    pub fn from_letter(c: char) -> Option<BreakableStage> {
        match c {
            'G' => Some(BreakableStage::Green),
            'Y' => Some(BreakableStage::Yellow),
            'O' => Some(BreakableStage::Orange),
            'R' => Some(BreakableStage::Red),
            _ => None,
        }
    }
}

/// One side of a grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Bottom,
    Right,
    Top,
}

impl Side {
    pub fn normal(self) -> Vec2 {
        match self {
            Side::Left => Vec2::NEG_X,
            Side::Bottom => Vec2::NEG_Y,
            Side::Right => Vec2::X,
            Side::Top => Vec2::Y,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Bottom => Side::Top,
            Side::Right => Side::Left,
            Side::Top => Side::Bottom,
        }
    }
}

/// Direction a one-way block lets things through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OneWayDir {
    Up,
    Down,
    Left,
    Right,
}

impl OneWayDir {
    pub fn vector(self) -> Vec2 {
        match self {
            OneWayDir::Up => Vec2::Y,
            OneWayDir::Down => Vec2::NEG_Y,
            OneWayDir::Left => Vec2::NEG_X,
            OneWayDir::Right => Vec2::X,
        }
    }

    /// Whether something travelling along `dir` passes through
    pub fn allows(self, dir: Vec2) -> bool {
        dir.dot(self.vector()) > 0.0
    }
}

/// Corner holding a triangle's right angle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriangleOrientation {
    UpperLeft,
    UpperRight,
    LowerLeft,
    LowerRight,
}

impl TriangleOrientation {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "ul" => Some(TriangleOrientation::UpperLeft),
            "ur" => Some(TriangleOrientation::UpperRight),
            "ll" => Some(TriangleOrientation::LowerLeft),
            "lr" => Some(TriangleOrientation::LowerRight),
            _ => None,
        }
    }

    /// The two cell sides the legs lie on (vertical leg first)
    pub fn leg_sides(self) -> [Side; 2] {
        match self {
            TriangleOrientation::UpperLeft => [Side::Left, Side::Top],
            TriangleOrientation::UpperRight => [Side::Right, Side::Top],
            TriangleOrientation::LowerLeft => [Side::Left, Side::Bottom],
            TriangleOrientation::LowerRight => [Side::Right, Side::Bottom],
        }
    }

    pub fn has_leg_on(self, side: Side) -> bool {
        self.leg_sides().contains(&side)
    }

    /// Sign of the right-angle corner relative to the cell centre
    pub fn corner_sign(self) -> Vec2 {
        match self {
            TriangleOrientation::UpperLeft => Vec2::new(-1.0, 1.0),
            TriangleOrientation::UpperRight => Vec2::new(1.0, 1.0),
            TriangleOrientation::LowerLeft => Vec2::new(-1.0, -1.0),
            TriangleOrientation::LowerRight => Vec2::new(1.0, -1.0),
        }
    }
}

/// What a triangle piece behaves like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriangleBehaviour {
    Breakable(BreakableStage),
    Solid,
    Prism,
}

/// Fire angle setting of a cannon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CannonAngle {
    /// Fires wherever the spin stops
    Free,
    Fixed(f32),
    Range(f32, f32),
}

/// What a cannon is currently holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CannonLoad {
    Ball(u32),
    Projectile(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakableBlock {
    pub stage: BreakableStage,
    /// Remaining life of the current stage against beams, shields and fire
    pub life: f32,
    pub last_ball_hit: Option<f64>,
}

impl BreakableBlock {
    pub fn new(stage: BreakableStage) -> Self {
        Self {
            stage,
            life: BREAKABLE_STAGE_LIFE,
            last_ball_hit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalBlock {
    pub name: String,
    pub sibling: Option<PieceId>,
    pub colour_index: usize,
    pub flips_paddle: bool,
    /// Simulation time a ball last came out of this portal
    pub last_ball_use: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CannonBlock {
    pub fragile: bool,
    pub angle: CannonAngle,
    /// Barrel angle, counter-clockwise from +x
    pub rotation_deg: f32,
    pub spin_speed: f32,
    pub spin_remaining: f32,
    pub loaded: Option<CannonLoad>,
    /// A fragile cannon that has fired is finished
    pub spent: bool,
}

impl CannonBlock {
    pub fn new(fragile: bool, angle: CannonAngle) -> Self {
        let rotation_deg = match angle {
            CannonAngle::Free => 90.0,
            CannonAngle::Fixed(a) => a,
            CannonAngle::Range(a, b) => (a + b) * 0.5,
        };
        Self {
            fragile,
            angle,
            rotation_deg,
            spin_speed: 0.0,
            spin_remaining: 0.0,
            loaded: None,
            spent: false,
        }
    }

    pub fn fire_dir(&self) -> Vec2 {
        crate::direction_from_degrees(self.rotation_deg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeslaBlock {
    pub name: String,
    pub active: bool,
    pub changable: bool,
    /// Tesla blocks this one can arc to
    pub connections: Vec<PieceId>,
    pub toggle_life: f32,
    pub last_toggle: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDropBlock {
    pub allowed: Vec<ItemKind>,
    pub next_item: ItemKind,
    pub damage: f32,
    pub last_drop: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchBlock {
    /// Trigger id this switch activates
    pub target: i32,
    pub toggle_life: f32,
    pub last_press: Option<f64>,
}

impl SwitchBlock {
    pub fn is_on(&self, now: f64) -> bool {
        self.last_press.is_some_and(|t| now - t < SWITCH_RESET_TIME)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurretBlock {
    pub life: f32,
    pub ai: TurretAi,
}

impl TurretBlock {
    pub fn new(ai: TurretAi) -> Self {
        Self {
            life: ai.kind().max_life(),
            ai,
        }
    }

    pub fn kind(&self) -> TurretKind {
        self.ai.kind()
    }

    /// Damage a ball deals: a fixed share of the turret's full life
    pub fn ball_damage(&self) -> f32 {
        self.kind().max_life() / self.kind().ball_hits_to_destroy()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangleBlock {
    pub behaviour: TriangleBehaviour,
    pub orientation: TriangleOrientation,
    pub life: f32,
    pub last_ball_hit: Option<f64>,
}

impl TriangleBlock {
    pub fn new(behaviour: TriangleBehaviour, orientation: TriangleOrientation) -> Self {
        Self {
            behaviour,
            orientation,
            life: BREAKABLE_STAGE_LIFE,
            last_ball_hit: None,
        }
    }
}

/// Per-type payload of a piece
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PieceKind {
    Empty,
    Solid,
    Breakable(BreakableBlock),
    Bomb,
    Ink { life: f32 },
    Prism,
    Portal(PortalBlock),
    Cannon(CannonBlock),
    Collateral { life: f32 },
    Tesla(TeslaBlock),
    ItemDrop(ItemDropBlock),
    Switch(SwitchBlock),
    OneWay(OneWayDir),
    NoEntry,
    Turret(TurretBlock),
    AlwaysDrop { items: Vec<ItemKind>, life: f32 },
    /// `None` life means infinite
    Regen { life: Option<f32> },
    Triangle(TriangleBlock),
}

/// One cell of the level grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelPiece {
    pub id: PieceId,
    pub w: usize,
    pub h: usize,
    pub center: Vec2,
    pub bounds: BoundingLines,
    pub status: PieceStatus,
    pub colour: Vec4,
    /// Trigger id this piece answers to
    pub trigger_id: Option<i32>,
    pub kind: PieceKind,
}

/// World-space centre of grid cell (w, h)
pub fn cell_center(w: usize, h: usize) -> Vec2 {
    Vec2::new((w as f32 + 0.5) * PIECE_WIDTH, (h as f32 + 0.5) * PIECE_HEIGHT)
}

impl LevelPiece {
    pub fn new(w: usize, h: usize, kind: PieceKind) -> Self {
        let colour = default_colour(&kind);
        Self {
            id: PieceId::new(0, 0),
            w,
            h,
            center: cell_center(w, h),
            bounds: BoundingLines::default(),
            status: PieceStatus::NORMAL,
            colour,
            trigger_id: None,
            kind,
        }
    }

    pub fn empty(w: usize, h: usize) -> Self {
        Self::new(w, h, PieceKind::Empty)
    }

    /// Fresh piece occupying the same cell
    pub fn replacement(&self, kind: PieceKind) -> Self {
        Self::new(self.w, self.h, kind)
    }

    pub fn piece_type(&self) -> PieceType {
        match &self.kind {
            PieceKind::Empty => PieceType::Empty,
            PieceKind::Solid => PieceType::Solid,
            PieceKind::Breakable(_) => PieceType::Breakable,
            PieceKind::Bomb => PieceType::Bomb,
            PieceKind::Ink { .. } => PieceType::Ink,
            PieceKind::Prism => PieceType::Prism,
            PieceKind::Portal(_) => PieceType::Portal,
            PieceKind::Cannon(c) if c.fragile => PieceType::FragileCannon,
            PieceKind::Cannon(_) => PieceType::Cannon,
            PieceKind::Collateral { .. } => PieceType::Collateral,
            PieceKind::Tesla(_) => PieceType::Tesla,
            PieceKind::ItemDrop(_) => PieceType::ItemDrop,
            PieceKind::Switch(_) => PieceType::Switch,
            PieceKind::OneWay(_) => PieceType::OneWay,
            PieceKind::NoEntry => PieceType::NoEntry,
            PieceKind::Turret(t) => match t.kind() {
                TurretKind::Laser => PieceType::LaserTurret,
                TurretKind::Rocket => PieceType::RocketTurret,
                TurretKind::Mine => PieceType::MineTurret,
            },
            PieceKind::AlwaysDrop { .. } => PieceType::AlwaysDrop,
            PieceKind::Regen { .. } => PieceType::Regen,
            PieceKind::Triangle(t) => match t.behaviour {
                TriangleBehaviour::Breakable(_) => PieceType::BreakableTriangle,
                TriangleBehaviour::Solid => PieceType::SolidTriangle,
                TriangleBehaviour::Prism => PieceType::PrismTriangle,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, PieceKind::Empty)
    }

    pub fn has_status(&self, status: PieceStatus) -> bool {
        self.status.contains(status)
    }

    pub fn is_frozen(&self) -> bool {
        self.has_status(PieceStatus::ICE_CUBE)
    }

    pub fn is_on_fire(&self) -> bool {
        self.has_status(PieceStatus::ON_FIRE)
    }

    /// Cell rectangle in world space
    pub fn aabb(&self) -> Aabb2 {
        Aabb2::from_center(self.center, Vec2::new(HALF_PIECE_WIDTH, HALF_PIECE_HEIGHT))
    }

    /// Area that teleports or captures things entering it (portals, cannons)
    pub fn trigger_area(&self) -> Aabb2 {
        match self.kind {
            PieceKind::Portal(_) => Aabb2::from_center(
                self.center,
                Vec2::new(HALF_PIECE_HEIGHT, HALF_PIECE_HEIGHT) * PORTAL_SIZE_SCALE,
            ),
            _ => Aabb2::from_center(self.center, Vec2::splat(HALF_PIECE_HEIGHT * 0.8)),
        }
    }

    pub fn triangle_orientation(&self) -> Option<TriangleOrientation> {
        match &self.kind {
            PieceKind::Triangle(t) => Some(t.orientation),
            _ => None,
        }
    }

    // -- capability queries --------------------------------------------------

    /// Pieces that never have collision bounds
    pub fn is_no_bounds_piece_type(&self) -> bool {
        matches!(self.kind, PieceKind::Empty | PieceKind::Portal(_) | PieceKind::Cannon(_))
    }

    pub fn ball_bounces_off_when_hit(&self) -> bool {
        !self.is_no_bounds_piece_type()
    }

    /// Counted in `pieces_left`; the level ends when all are gone
    pub fn must_be_destroyed_to_end_level(&self) -> bool {
        match &self.kind {
            PieceKind::Breakable(_) | PieceKind::Bomb | PieceKind::AlwaysDrop { .. } | PieceKind::Turret(_) => true,
            PieceKind::Regen { life } => life.is_some(),
            PieceKind::Triangle(t) => matches!(t.behaviour, TriangleBehaviour::Breakable(_)),
            _ => false,
        }
    }

    pub fn can_be_destroyed_by_ball(&self) -> bool {
        match &self.kind {
            PieceKind::Breakable(_)
            | PieceKind::Bomb
            | PieceKind::Ink { .. }
            | PieceKind::Collateral { .. }
            | PieceKind::AlwaysDrop { .. }
            | PieceKind::Turret(_) => true,
            PieceKind::Regen { life } => life.is_some(),
            PieceKind::Triangle(t) => matches!(t.behaviour, TriangleBehaviour::Breakable(_)),
            _ => false,
        }
    }

    /// Hitting this piece may change it or other pieces beyond itself
    pub fn can_change_self_or_other_pieces_when_hit(&self) -> bool {
        matches!(
            self.kind,
            PieceKind::Bomb
                | PieceKind::Collateral { .. }
                | PieceKind::Tesla(_)
                | PieceKind::Switch(_)
                | PieceKind::Ink { .. }
                | PieceKind::Portal(_)
        )
    }

    /// Whether an uber ball smashes straight through without bouncing
    pub fn ball_blasts_through(&self, ball: &Ball) -> bool {
        if !ball.is_pure_uber() || self.is_frozen() {
            return false;
        }
        match &self.kind {
            PieceKind::Empty | PieceKind::Bomb | PieceKind::Ink { .. } | PieceKind::Collateral { .. } => true,
            // Uber takes two stages per hit
            PieceKind::Breakable(b) => b.stage <= BreakableStage::Yellow,
            PieceKind::Triangle(t) => {
                matches!(t.behaviour, TriangleBehaviour::Breakable(s) if s <= BreakableStage::Yellow)
            }
            PieceKind::AlwaysDrop { .. } => true,
            PieceKind::Regen { life } => life.is_some_and(|l| l <= ball.collision_damage()),
            PieceKind::Turret(t) => t.life <= t.ball_damage() * 2.0,
            _ => false,
        }
    }

    /// Whether the ball keeps going without a bounce: ghost and one-way passage
    pub fn ball_passes_through(&self, ball: &Ball) -> bool {
        if ball.is_type(BallType::GHOST) && self.ghostball_passes_through() {
            return true;
        }
        match &self.kind {
            PieceKind::OneWay(dir) => !self.is_frozen() && dir.allows(ball.dir),
            _ => false,
        }
    }

    pub fn ghostball_passes_through(&self) -> bool {
        self.is_empty() || (self.can_be_destroyed_by_ball() && !self.is_frozen())
    }

    /// Whether the projectile continues through this piece
    pub fn projectile_passes_through(&self, projectile: &Projectile) -> bool {
        let kind = projectile.kind;
        if kind == ProjectileKind::CollateralBlock {
            return true;
        }
        if kind.is_laser() && self.is_frozen() {
            return true;
        }
        match &self.kind {
            PieceKind::Empty | PieceKind::Portal(_) | PieceKind::NoEntry => true,
            PieceKind::Prism => kind.is_laser(),
            PieceKind::Triangle(t) => t.behaviour == TriangleBehaviour::Prism && kind.is_laser(),
            PieceKind::Cannon(_) => kind.is_rocket() || kind.is_mine(),
            PieceKind::OneWay(dir) => dir.allows(projectile.dir),
            PieceKind::Turret(t) => match t.kind() {
                TurretKind::Laser => kind == ProjectileKind::LaserTurretBullet,
                TurretKind::Rocket => kind == ProjectileKind::RocketTurretBullet,
                TurretKind::Mine => kind == ProjectileKind::MineTurretBullet,
            },
            PieceKind::Regen { .. } => {
                kind == ProjectileKind::FireGlob && projectile.is_last_thing_collided_with(Collidee::Piece(self.id))
            }
            _ => false,
        }
    }

    pub fn is_light_reflector_refractor(&self) -> bool {
        self.is_frozen()
            || matches!(self.kind, PieceKind::Prism)
            || matches!(&self.kind, PieceKind::Triangle(t) if t.behaviour == TriangleBehaviour::Prism)
    }

    /// Explosions do not propagate through this piece
    pub fn is_explosion_stopped(&self) -> bool {
        match &self.kind {
            PieceKind::Solid
            | PieceKind::Tesla(_)
            | PieceKind::Switch(_)
            | PieceKind::OneWay(_)
            | PieceKind::NoEntry
            | PieceKind::ItemDrop(_) => true,
            PieceKind::Cannon(c) => !c.fragile,
            PieceKind::Regen { life } => life.is_none(),
            PieceKind::Triangle(t) => t.behaviour == TriangleBehaviour::Solid,
            _ => false,
        }
    }

    /// Whether the given status may be applied to this piece
    pub fn can_have_status(&self, status: PieceStatus) -> bool {
        if status == PieceStatus::ON_FIRE {
            return match &self.kind {
                PieceKind::Breakable(_)
                | PieceKind::AlwaysDrop { .. }
                | PieceKind::Turret(_)
                | PieceKind::Ink { .. }
                | PieceKind::Collateral { .. } => true,
                PieceKind::Regen { life } => life.is_some(),
                PieceKind::Triangle(t) => matches!(t.behaviour, TriangleBehaviour::Breakable(_)),
                _ => false,
            };
        }
        if status == PieceStatus::ICE_CUBE {
            return !matches!(
                self.kind,
                PieceKind::Empty | PieceKind::Portal(_) | PieceKind::Cannon(_) | PieceKind::Tesla(_) | PieceKind::Prism
            ) && !matches!(&self.kind, PieceKind::Triangle(t) if t.behaviour == TriangleBehaviour::Prism);
        }
        false
    }

    /// Points for this piece turning into `after`
    pub fn points_on_change(&self, after: &LevelPiece) -> u32 {
        let destroyed = after.is_empty();
        match &self.kind {
            PieceKind::Breakable(_) => {
                if destroyed {
                    POINTS_BREAKABLE_DESTROYED
                } else {
                    POINTS_BREAKABLE_HIT
                }
            }
            PieceKind::Triangle(t) => match t.behaviour {
                TriangleBehaviour::Breakable(_) if destroyed => POINTS_BREAKABLE_DESTROYED,
                TriangleBehaviour::Breakable(_) => POINTS_BREAKABLE_HIT,
                TriangleBehaviour::Solid if destroyed => POINTS_SOLID_TRIANGLE_DESTROYED,
                TriangleBehaviour::Prism if destroyed => POINTS_PRISM_TRIANGLE_DESTROYED,
                _ => 0,
            },
            _ if !destroyed => 0,
            PieceKind::Bomb => POINTS_BOMB_DESTROYED,
            PieceKind::Solid => POINTS_SOLID_DESTROYED,
            PieceKind::Ink { .. } => POINTS_INK_DESTROYED,
            PieceKind::Prism => POINTS_PRISM_DESTROYED,
            PieceKind::Collateral { .. } => POINTS_COLLATERAL_DESTROYED,
            PieceKind::ItemDrop(_) => POINTS_ITEM_DROP_DESTROYED,
            PieceKind::OneWay(_) => POINTS_ONE_WAY_DESTROYED,
            PieceKind::NoEntry => POINTS_NO_ENTRY_DESTROYED,
            PieceKind::Regen { .. } => POINTS_REGEN_DESTROYED,
            PieceKind::AlwaysDrop { .. } => POINTS_ALWAYS_DROP_DESTROYED,
            PieceKind::Turret(t) => match t.kind() {
                TurretKind::Laser => POINTS_LASER_TURRET_DESTROYED,
                TurretKind::Rocket => POINTS_ROCKET_TURRET_DESTROYED,
                TurretKind::Mine => POINTS_MINE_TURRET_DESTROYED,
            },
            PieceKind::Empty
            | PieceKind::Portal(_)
            | PieceKind::Cannon(_)
            | PieceKind::Tesla(_)
            | PieceKind::Switch(_) => 0,
        }
    }

    /// Whether the paddle is stopped by this piece when moving along `dir_x`
    pub fn bounds_paddle(&self, dir_x: f32) -> bool {
        match &self.kind {
            PieceKind::Empty | PieceKind::Portal(_) => false,
            PieceKind::OneWay(d) => !d.allows(Vec2::new(dir_x, 0.0)),
            _ => true,
        }
    }
}

/// Default render colour for a piece payload
pub fn default_colour(kind: &PieceKind) -> Vec4 {
    match kind {
        PieceKind::Empty => Vec4::ZERO,
        PieceKind::Breakable(b) => b.stage.colour(),
        PieceKind::Triangle(t) => match t.behaviour {
            TriangleBehaviour::Breakable(s) => s.colour(),
            TriangleBehaviour::Solid => Vec4::new(0.5, 0.5, 0.5, 1.0),
            TriangleBehaviour::Prism => Vec4::new(0.8, 0.9, 1.0, 0.6),
        },
        PieceKind::Portal(p) => PORTAL_COLOURS[p.colour_index % PORTAL_COLOURS.len()],
        PieceKind::Prism => Vec4::new(0.8, 0.9, 1.0, 0.6),
        PieceKind::Ink { .. } => Vec4::new(0.17, 0.0, 0.35, 1.0),
        PieceKind::Bomb => Vec4::new(0.2, 0.2, 0.2, 1.0),
        PieceKind::Collateral { .. } => Vec4::new(0.9, 0.9, 0.9, 1.0),
        PieceKind::Regen { .. } => Vec4::new(0.0, 0.6, 0.8, 1.0),
        _ => Vec4::new(0.5, 0.5, 0.5, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakable(stage: BreakableStage) -> LevelPiece {
        LevelPiece::new(0, 0, PieceKind::Breakable(BreakableBlock::new(stage)))
    }

    #[test]
    fn test_breakable_ladder() {
        let mut stage = Some(BreakableStage::Red);
        let mut steps = 0;
        while let Some(s) = stage {
            stage = s.diminished();
            steps += 1;
        }
        assert_eq!(steps, 4);
    }

    #[test]
    fn test_cell_center_row_zero_is_bottom() {
        let c = cell_center(0, 0);
        assert!((c - Vec2::new(HALF_PIECE_WIDTH, HALF_PIECE_HEIGHT)).length() < 1e-6);
        assert!(cell_center(0, 3).y > c.y);
    }

    #[test]
    fn test_vitality_table() {
        assert!(breakable(BreakableStage::Green).must_be_destroyed_to_end_level());
        assert!(!LevelPiece::new(0, 0, PieceKind::Solid).must_be_destroyed_to_end_level());
        assert!(LevelPiece::new(0, 0, PieceKind::Regen { life: Some(50.0) }).must_be_destroyed_to_end_level());
        assert!(!LevelPiece::new(0, 0, PieceKind::Regen { life: None }).must_be_destroyed_to_end_level());
    }

    #[test]
    fn test_frozen_piece_reflects_and_lets_lasers_pass() {
        let mut piece = breakable(BreakableStage::Red);
        assert!(!piece.is_light_reflector_refractor());
        piece.status.insert(PieceStatus::ICE_CUBE);
        assert!(piece.is_light_reflector_refractor());
        let laser = Projectile::laser(1, ProjectileKind::PaddleLaserBullet, Vec2::ZERO, Vec2::Y);
        assert!(piece.projectile_passes_through(&laser));
    }

    #[test]
    fn test_uber_blast_through() {
        let uber = Ball::new(0, Vec2::ZERO, Vec2::Y, 10.0).with_type(BallType::UBER);
        assert!(breakable(BreakableStage::Yellow).ball_blasts_through(&uber));
        assert!(!breakable(BreakableStage::Red).ball_blasts_through(&uber));
        let normal = Ball::new(0, Vec2::ZERO, Vec2::Y, 10.0);
        assert!(!breakable(BreakableStage::Green).ball_blasts_through(&normal));
    }

    #[test]
    fn test_points_on_change() {
        let red = breakable(BreakableStage::Red);
        let orange = breakable(BreakableStage::Orange);
        let empty = LevelPiece::empty(0, 0);
        assert_eq!(red.points_on_change(&orange), POINTS_BREAKABLE_HIT);
        assert_eq!(orange.points_on_change(&empty), POINTS_BREAKABLE_DESTROYED);
        assert_eq!(LevelPiece::new(0, 0, PieceKind::Solid).points_on_change(&empty), POINTS_SOLID_DESTROYED);
        assert_eq!(LevelPiece::new(0, 0, PieceKind::Bomb).points_on_change(&orange), 0);
    }

    #[test]
    fn test_one_way_passage() {
        let piece = LevelPiece::new(0, 0, PieceKind::OneWay(OneWayDir::Up));
        let up = Projectile::laser(1, ProjectileKind::PaddleLaserBullet, Vec2::ZERO, Vec2::Y);
        let down = Projectile::laser(2, ProjectileKind::LaserTurretBullet, Vec2::ZERO, Vec2::NEG_Y);
        assert!(piece.projectile_passes_through(&up));
        assert!(!piece.projectile_passes_through(&down));
        assert!(piece.bounds_paddle(1.0));
    }
}
