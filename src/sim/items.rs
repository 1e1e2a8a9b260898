//! Droppable items and the level's weighted drop table

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// How an item affects the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemDisposition {
    PowerUp,
    PowerNeutral,
    PowerDown,
}

/// Every item a block can drop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemKind {
    SlowBall,
    FastBall,
    UberBall,
    InvisiBall,
    GhostBall,
    LaserBulletPaddle,
    LaserBeamPaddle,
    RocketPaddle,
    MinePaddle,
    ShieldPaddle,
    PaddleGrow,
    PaddleShrink,
    BallGrow,
    BallShrink,
    MultiBall3,
    MultiBall5,
    FireBall,
    IceBall,
    StickyPaddle,
    Poison,
    Blackout,
    UpsideDown,
    OneUp,
    Random,
}

impl ItemKind {
    pub const ALL: [ItemKind; 24] = [
        ItemKind::SlowBall,
        ItemKind::FastBall,
        ItemKind::UberBall,
        ItemKind::InvisiBall,
        ItemKind::GhostBall,
        ItemKind::LaserBulletPaddle,
        ItemKind::LaserBeamPaddle,
        ItemKind::RocketPaddle,
        ItemKind::MinePaddle,
        ItemKind::ShieldPaddle,
        ItemKind::PaddleGrow,
        ItemKind::PaddleShrink,
        ItemKind::BallGrow,
        ItemKind::BallShrink,
        ItemKind::MultiBall3,
        ItemKind::MultiBall5,
        ItemKind::FireBall,
        ItemKind::IceBall,
        ItemKind::StickyPaddle,
        ItemKind::Poison,
        ItemKind::Blackout,
        ItemKind::UpsideDown,
        ItemKind::OneUp,
        ItemKind::Random,
    ];

    /// Name used in level files
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::SlowBall => "slowball",
            ItemKind::FastBall => "fastball",
            ItemKind::UberBall => "uberball",
            ItemKind::InvisiBall => "invisiball",
            ItemKind::GhostBall => "ghostball",
            ItemKind::LaserBulletPaddle => "laserbulletpaddle",
            ItemKind::LaserBeamPaddle => "laserbeampaddle",
            ItemKind::RocketPaddle => "rocketpaddle",
            ItemKind::MinePaddle => "minepaddle",
            ItemKind::ShieldPaddle => "shieldpaddle",
            ItemKind::PaddleGrow => "paddlegrow",
            ItemKind::PaddleShrink => "paddleshrink",
            ItemKind::BallGrow => "ballgrow",
            ItemKind::BallShrink => "ballshrink",
            ItemKind::MultiBall3 => "multiball3",
            ItemKind::MultiBall5 => "multiball5",
            ItemKind::FireBall => "fireball",
            ItemKind::IceBall => "iceball",
            ItemKind::StickyPaddle => "stickypaddle",
            ItemKind::Poison => "poison",
            ItemKind::Blackout => "blackout",
            ItemKind::UpsideDown => "upsidedown",
            ItemKind::OneUp => "oneup",
            ItemKind::Random => "random",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let lower = s.to_lowercase();
        Self::ALL.iter().copied().find(|k| k.as_str() == lower)
    }

    pub fn disposition(&self) -> ItemDisposition {
        match self {
            ItemKind::UberBall
            | ItemKind::GhostBall
            | ItemKind::LaserBulletPaddle
            | ItemKind::LaserBeamPaddle
            | ItemKind::RocketPaddle
            | ItemKind::MinePaddle
            | ItemKind::ShieldPaddle
            | ItemKind::PaddleGrow
            | ItemKind::MultiBall3
            | ItemKind::MultiBall5
            | ItemKind::FireBall
            | ItemKind::IceBall
            | ItemKind::StickyPaddle
            | ItemKind::OneUp
            | ItemKind::SlowBall => ItemDisposition::PowerUp,
            ItemKind::BallGrow | ItemKind::BallShrink | ItemKind::InvisiBall | ItemKind::Random => {
                ItemDisposition::PowerNeutral
            }
            ItemKind::FastBall
            | ItemKind::PaddleShrink
            | ItemKind::Poison
            | ItemKind::Blackout
            | ItemKind::UpsideDown => ItemDisposition::PowerDown,
        }
    }

    /// Items named by a keyword set (`all`, `powerups`, `powerneutrals`, `powerdowns`)
    pub fn keyword_set(keyword: &str) -> Option<Vec<ItemKind>> {
        let filter: fn(&ItemKind) -> bool = match keyword.to_lowercase().as_str() {
            "all" => |_| true,
            "powerups" => |k| k.disposition() == ItemDisposition::PowerUp,
            "powerneutrals" => |k| k.disposition() == ItemDisposition::PowerNeutral,
            "powerdowns" => |k| k.disposition() == ItemDisposition::PowerDown,
            _ => return None,
        };
        Some(Self::ALL.iter().copied().filter(filter).collect())
    }
}

/// Weighted table used when a destroyed block rolls for an item drop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDropTable {
    weights: Vec<(ItemKind, u32)>,
}

impl ItemDropTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the weight for an item; zero removes it
    pub fn set_weight(&mut self, item: ItemKind, weight: u32) {
        self.weights.retain(|(k, _)| *k != item);
        if weight > 0 {
            self.weights.push((item, weight));
            self.weights.sort_by_key(|(k, _)| *k);
        }
    }

    pub fn weight(&self, item: ItemKind) -> u32 {
        self.weights
            .iter()
            .find(|(k, _)| *k == item)
            .map_or(0, |(_, w)| *w)
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total_weight(&self) -> u32 {
        self.weights.iter().map(|(_, w)| w).sum()
    }

    /// Sample an item proportionally to its weight
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Option<ItemKind> {
        self.weights
            .choose_weighted(rng, |(_, weight)| *weight)
            .ok()
            .map(|(item, _)| *item)
    }
}
