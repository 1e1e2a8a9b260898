//! Rocket and mine blasts, and bomb chain reactions

use std::collections::BTreeSet;

use super::context::SimContext;
use super::events::GameEvent;
use super::level::GameLevel;
use super::piece::{DestructionMethod, PieceId, PieceKind};
use super::projectile::Projectile;

/// Which blast shape to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplosionKind {
    Rocket,
    Mine,
}

impl ExplosionKind {
    fn method(self) -> DestructionMethod {
        match self {
            ExplosionKind::Rocket => DestructionMethod::Rocket,
            ExplosionKind::Mine => DestructionMethod::Mine,
        }
    }
}

impl GameLevel {
    /// Cells a blast centred on `center` reaches, excluding the centre.
    ///
    /// Cardinal neighbours are always hit; rings further out are only reached
    /// past inner pieces that do not stop explosions.
    pub fn explosion_affected_pieces(&self, kind: ExplosionKind, size_factor: f32, center: PieceId) -> Vec<PieceId> {
        let (w, h) = self.cell_of_slot(center.slot());
        let at = |dw: i32, dh: i32| self.offset_id(w, h, dw, dh);
        let passable = |dw: i32, dh: i32| {
            at(dw, dh).is_some_and(|id| !self.pieces[id.slot()].is_explosion_stopped())
        };

        let mut out: Vec<PieceId> = Vec::new();
        let mut add = |id: Option<PieceId>| {
            if let Some(id) = id
                && !out.contains(&id)
            {
                out.push(id);
            }
        };

        let cardinals = [(-1, 0), (0, -1), (1, 0), (0, 1)];
        let diagonals = [(-1, 1), (1, 1), (1, -1), (-1, -1)];

        for (dw, dh) in cardinals {
            add(at(dw, dh));
        }

        let (diagonal_reach, ring_two) = match kind {
            ExplosionKind::Rocket => (true, size_factor > 1.0),
            ExplosionKind::Mine => (size_factor > 1.0, size_factor >= 1.4),
        };
        if diagonal_reach {
            for (dw, dh) in diagonals {
                add(at(dw, dh));
            }
        }
        if ring_two {
            for (dw, dh) in cardinals {
                if passable(dw, dh) {
                    add(at(dw * 2, dh * 2));
                }
            }
        }

        // A unit rocket stops at the eight surrounding cells
        if kind == ExplosionKind::Rocket && size_factor > 1.0 {
            for (dw, dh) in diagonals {
                if passable(dw, dh) {
                    add(at(dw * 2, dh * 2));
                }
            }
            for (dw, dh) in cardinals {
                if passable(dw, dh) && passable(dw * 2, dh * 2) {
                    add(at(dw * 3, dh * 3));
                }
            }
            // Knight-move cells, reached past the cardinal next to them
            for (dw, dh) in cardinals {
                if !passable(dw, dh) {
                    continue;
                }
                let (sw, sh) = (dh, dw);
                add(at(dw * 2 + sw, dh * 2 + sh));
                add(at(dw * 2 - sw, dh * 2 - sh));
            }
        }
        out
    }

    /// Blast `affected` cells around `center`, restarting the sweep whenever a
    /// destruction reshapes the level
    fn blast(&mut self, ctx: &mut SimContext, kind: ExplosionKind, size_factor: f32, center: PieceId) {
        let method = kind.method();
        log::debug!("{:?} explosion at {:?} (size {:.2})", kind, center, size_factor);
        let mut ignore: BTreeSet<PieceId> = BTreeSet::new();
        if let Some(id) = self.current_id(center) {
            ignore.insert(id);
        }
        loop {
            let mut restart = false;
            for id in self.explosion_affected_pieces(kind, size_factor, center) {
                if ignore.contains(&id) || !self.is_live(id) {
                    continue;
                }
                let reshapes = self.pieces[id.slot()].can_change_self_or_other_pieces_when_hit();
                let result = self.destroy_piece(ctx, id, method);
                ignore.insert(id);
                ignore.insert(result);
                if reshapes || result != id {
                    restart = true;
                    break;
                }
            }
            if !restart {
                break;
            }
        }
    }

    /// A rocket struck `hit`: destroy it and everything in the blast.
    /// Returns what `hit` became.
    pub fn rocket_explosion(&mut self, ctx: &mut SimContext, rocket: &Projectile, hit: PieceId) -> PieceId {
        let size_factor = rocket.size_factor();
        let position = self.piece(hit).map_or(rocket.position, |p| p.center);
        ctx.emit(GameEvent::RocketExploded {
            projectile: rocket.id,
            position,
            size_factor,
        });
        ctx.halve_multiplier();
        let result = self.destroy_piece(ctx, hit, DestructionMethod::Rocket);
        self.blast(ctx, ExplosionKind::Rocket, size_factor, hit);
        self.current_id(hit).unwrap_or(result)
    }

    /// A mine went off over `center`. Returns what `center` became.
    pub fn mine_explosion(&mut self, ctx: &mut SimContext, mine: &Projectile, center: PieceId) -> PieceId {
        let size_factor = mine.size_factor();
        ctx.emit(GameEvent::MineExploded {
            projectile: mine.id,
            position: mine.position,
            size_factor,
        });
        let result = self.destroy_piece(ctx, center, DestructionMethod::Mine);
        self.blast(ctx, ExplosionKind::Mine, size_factor, center);
        self.current_id(center).unwrap_or(result)
    }

    /// Bomb chain: every bomb reachable through neighbouring bombs goes off,
    /// taking ball-destroyable neighbours with it. The origin bomb goes last.
    pub(super) fn detonate_bomb(&mut self, ctx: &mut SimContext, origin: PieceId, method: DestructionMethod) -> PieceId {
        let is_bomb = |level: &GameLevel, id: PieceId| matches!(level.pieces[id.slot()].kind, PieceKind::Bomb);

        let mut seen: BTreeSet<PieceId> = BTreeSet::new();
        seen.insert(origin);
        let mut bombs = vec![origin];
        let mut others = Vec::new();
        let mut frontier = vec![origin];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for bomb in frontier {
                for id in self.neighbour_ids(bomb) {
                    if !seen.insert(id) {
                        continue;
                    }
                    if is_bomb(self, id) {
                        bombs.push(id);
                        next.push(id);
                    } else {
                        others.push(id);
                    }
                }
            }
            frontier = next;
        }

        for id in others {
            if self.is_live(id) && self.pieces[id.slot()].can_be_destroyed_by_ball() {
                self.destroy_piece(ctx, id, DestructionMethod::Bomb);
            }
        }

        for &bomb in bombs.iter().skip(1) {
            if self.is_live(bomb) {
                self.remove_chained_bomb(ctx, bomb);
            }
        }
        self.remove_origin_bomb(ctx, origin, method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::events::EventRecorder;
    use crate::sim::piece::{BreakableBlock, BreakableStage};
    use crate::sim::projectile::ProjectileKind;
    use glam::Vec2;

    fn red() -> PieceKind {
        PieceKind::Breakable(BreakableBlock::new(BreakableStage::Red))
    }

    fn set(ids: Vec<PieceId>) -> BTreeSet<PieceId> {
        ids.into_iter().collect()
    }

    #[test]
    fn test_rocket_unit_blast_is_eight_neighbours() {
        let level = GameLevel::from_kinds(7, 7, |_, _| red());
        let center = level.id_at(3, 3).unwrap();
        let got = level.explosion_affected_pieces(ExplosionKind::Rocket, 1.0, center);
        let expected: BTreeSet<PieceId> = level
            .pieces()
            .filter(|p| p.id != center && p.w.abs_diff(3) <= 1 && p.h.abs_diff(3) <= 1)
            .map(|p| p.id)
            .collect();
        assert_eq!(got.len(), 8);
        assert_eq!(set(got), expected);
    }

    #[test]
    fn test_stopper_blocks_outer_ring() {
        // 5 wide, 5 tall; solid directly above the centre
        let level = GameLevel::from_kinds(5, 5, |w, h| if (w, h) == (2, 3) { PieceKind::Solid } else { red() });
        let center = level.id_at(2, 2).unwrap();
        let got = set(level.explosion_affected_pieces(ExplosionKind::Rocket, 1.5, center));
        assert!(got.contains(&level.id_at(2, 3).unwrap()));
        assert!(!got.contains(&level.id_at(2, 4).unwrap()));
        assert!(got.contains(&level.id_at(2, 0).unwrap()));

        let unit = set(level.explosion_affected_pieces(ExplosionKind::Rocket, 1.0, center));
        assert!(!unit.contains(&level.id_at(2, 4).unwrap()));
        assert!(!unit.contains(&level.id_at(2, 0).unwrap()));
    }

    #[test]
    fn test_mine_blast_scales() {
        let level = GameLevel::from_kinds(5, 5, |_, _| red());
        let center = level.id_at(2, 2).unwrap();
        assert_eq!(level.explosion_affected_pieces(ExplosionKind::Mine, 1.0, center).len(), 4);
        assert_eq!(level.explosion_affected_pieces(ExplosionKind::Mine, 1.2, center).len(), 8);
        assert_eq!(level.explosion_affected_pieces(ExplosionKind::Mine, 1.4, center).len(), 12);
    }

    #[test]
    fn test_big_rocket_reaches_further() {
        let level = GameLevel::from_kinds(7, 7, |_, _| red());
        let center = level.id_at(3, 3).unwrap();
        let unit = level.explosion_affected_pieces(ExplosionKind::Rocket, 1.0, center).len();
        let big = set(level.explosion_affected_pieces(ExplosionKind::Rocket, 1.5, center));
        assert!(big.len() > unit);
        assert!(big.contains(&level.id_at(3, 6).unwrap()));
        assert!(big.contains(&level.id_at(4, 5).unwrap()));
    }

    #[test]
    fn test_rocket_explosion_clears_blast() {
        let mut level = GameLevel::from_kinds(3, 3, |_, _| red());
        let mut ctx = SimContext::new(5);
        let rocket = Projectile::rocket(1, ProjectileKind::PaddleRocket, Vec2::ZERO, Vec2::Y, 1.0);
        let hit = level.id_at(1, 1).unwrap();
        level.rocket_explosion(&mut ctx, &rocket, hit);
        assert!(level.pieces().all(|p| p.is_empty()));
        assert_eq!(level.pieces_left(), 0);
    }

    #[test]
    fn test_bomb_chain_destroys_every_bomb_once() {
        let mut level = GameLevel::from_kinds(3, 3, |_, _| PieceKind::Bomb);
        let mut ctx = SimContext::new(5);
        let recorder = EventRecorder::new();
        ctx.register_listener(Box::new(recorder.clone()));
        let origin = level.id_at(0, 0).unwrap();
        level.destroy_piece(&mut ctx, origin, DestructionMethod::Regular);
        assert!(level.pieces().all(|p| p.is_empty()));
        assert_eq!(recorder.count(|e| matches!(e, GameEvent::BlockDestroyed { .. })), 9);
        assert_eq!(level.pieces_left(), 0);
    }

    #[test]
    fn test_centre_bomb_chains_to_all_eight_neighbours() {
        let mut level = GameLevel::from_kinds(3, 3, |_, _| PieceKind::Bomb);
        let mut ctx = SimContext::new(5);
        let recorder = EventRecorder::new();
        ctx.register_listener(Box::new(recorder.clone()));
        let origin = level.id_at(1, 1).unwrap();
        let result = level.destroy_piece(&mut ctx, origin, DestructionMethod::Regular);
        assert!(level.pieces().all(|p| p.is_empty()));
        assert!(level.piece(result).is_some_and(|p| p.is_empty()));
        assert_eq!(recorder.count(|e| matches!(e, GameEvent::BlockDestroyed { .. })), 9);
        assert_eq!(level.pieces_left(), 0);
    }

    #[test]
    fn test_bomb_spares_solid_blocks() {
        let mut level = GameLevel::from_kinds(3, 1, |w, _| match w {
            0 => red(),
            1 => PieceKind::Bomb,
            _ => PieceKind::Solid,
        });
        let mut ctx = SimContext::new(5);
        let bomb = level.id_at(1, 0).unwrap();
        level.destroy_piece(&mut ctx, bomb, DestructionMethod::Regular);
        assert!(level.piece_at(0, 0).unwrap().is_empty());
        assert!(level.piece_at(1, 0).unwrap().is_empty());
        assert!(matches!(level.piece_at(2, 0).unwrap().kind, PieceKind::Solid));
    }
}
