//! The game level: a grid of pieces and everything indexed over it
//!
//! Pieces live in a flat arena, slot `h * width + w`, row 0 at the bottom.
//! Replacing a piece bumps the slot's generation so stale `PieceId`s stop
//! resolving. Piece behaviour on hits lives in `response`, explosions in
//! `explosion`; this file owns the grid, its indices and spatial queries.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use glam::Vec2;

use super::ball::{Ball, Paddle};
use super::bounds::{compute_bounds, Neighbours};
use super::context::SimContext;
use super::events::GameEvent;
use super::geometry::{Aabb2, BoundingLines, LineSeg2, Ray2};
use super::items::ItemDropTable;
use super::piece::{cell_center, DestructionMethod, LevelPiece, PieceId, PieceKind, PieceStatus};
use super::projectile::Projectile;
use crate::consts::*;

/// Height of the ball safety net, the bottom edge of the level
pub const SAFETY_NET_Y: f32 = 0.0;
/// Balls below this are lost
pub const BALL_DEATH_Y: f32 = -PIECE_HEIGHT;
/// Tesla lightning collides this far either side of the arc
pub const TESLA_ARC_HALF_THICKNESS: f32 = 0.25 * PIECE_HEIGHT;

/// Score milestones for the five stars
pub type StarMilestones = [u64; 5];

#[derive(Debug, Clone)]
pub struct GameLevel {
    pub(super) name: String,
    pub(super) boss_name: Option<String>,
    pub(super) width: usize,
    pub(super) height: usize,
    pub(super) pieces: Vec<LevelPiece>,
    pub(super) pieces_left: usize,
    pub(super) star_milestones: StarMilestones,
    pub(super) drop_table: ItemDropTable,
    pub(super) paddle_start_x: Option<f32>,
    /// Trigger id -> pieces answering to it
    pub(super) triggers: BTreeMap<i32, Vec<PieceId>>,
    pub(super) ai_pieces: BTreeSet<PieceId>,
    pub(super) status_pieces: BTreeSet<PieceId>,
    /// Pieces with per-tick behaviour (regen, cannons)
    pub(super) ticking_pieces: BTreeSet<PieceId>,
    pub(super) tesla_arcs: BTreeMap<(PieceId, PieceId), LineSeg2>,
    pub(super) tesla_bounds: BoundingLines,
    pub(super) safety_net: Option<BoundingLines>,
}

impl GameLevel {
    /// Build a level from pieces in slot order.
    ///
    /// Piece references inside payloads (portal siblings, tesla connections)
    /// must use generation 0 ids.
    pub fn new(name: impl Into<String>, width: usize, height: usize, pieces: Vec<LevelPiece>) -> Option<Self> {
        if width == 0 || height == 0 || pieces.len() != width * height {
            return None;
        }
        Some(Self::build(name.into(), width, height, pieces))
    }

    fn build(name: String, width: usize, height: usize, pieces: Vec<LevelPiece>) -> Self {
        let mut level = Self {
            name,
            boss_name: None,
            width,
            height,
            pieces,
            pieces_left: 0,
            star_milestones: [0; 5],
            drop_table: ItemDropTable::new(),
            paddle_start_x: None,
            triggers: BTreeMap::new(),
            ai_pieces: BTreeSet::new(),
            status_pieces: BTreeSet::new(),
            ticking_pieces: BTreeSet::new(),
            tesla_arcs: BTreeMap::new(),
            tesla_bounds: BoundingLines::default(),
            safety_net: None,
        };
        for slot in 0..level.pieces.len() {
            let (w, h) = (slot % width, slot / width);
            let piece = &mut level.pieces[slot];
            piece.id = PieceId::new(slot as u32, 0);
            piece.w = w;
            piece.h = h;
            piece.center = cell_center(w, h);
            let id = piece.id;
            if piece.must_be_destroyed_to_end_level() {
                level.pieces_left += 1;
            }
            level.register_piece(id);
        }
        level.update_all_bounds();
        level.build_initial_tesla_arcs();
        level
    }

    /// Level whose cells come from a closure over (w, h)
    pub fn from_kinds(width: usize, height: usize, mut kind_at: impl FnMut(usize, usize) -> PieceKind) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let pieces = (0..width * height)
            .map(|slot| {
                let (w, h) = (slot % width, slot / width);
                LevelPiece::new(w, h, kind_at(w, h))
            })
            .collect();
        Self::build(String::new(), width, height, pieces)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn boss_name(&self) -> Option<&str> {
        self.boss_name.as_deref()
    }

    pub fn is_boss_level(&self) -> bool {
        self.boss_name.is_some()
    }

    pub fn set_boss_name(&mut self, name: Option<String>) {
        self.boss_name = name;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Size of the level in world units
    pub fn world_size(&self) -> Vec2 {
        Vec2::new(self.width as f32 * PIECE_WIDTH, self.height as f32 * PIECE_HEIGHT)
    }

    pub fn star_milestones(&self) -> &StarMilestones {
        &self.star_milestones
    }

    pub fn set_star_milestones(&mut self, milestones: StarMilestones) {
        self.star_milestones = milestones;
    }

    /// Stars earned for a score
    pub fn stars_for_score(&self, score: u64) -> usize {
        self.star_milestones.iter().filter(|&&m| score >= m).count()
    }

    pub fn drop_table(&self) -> &ItemDropTable {
        &self.drop_table
    }

    pub fn set_drop_table(&mut self, table: ItemDropTable) {
        self.drop_table = table;
    }

    pub fn paddle_start_x(&self) -> Option<f32> {
        self.paddle_start_x
    }

    pub fn set_paddle_start_x(&mut self, x: Option<f32>) {
        self.paddle_start_x = x;
    }

    /// Vital pieces still standing
    pub fn pieces_left(&self) -> usize {
        self.pieces_left
    }

    pub fn is_complete(&self) -> bool {
        self.pieces_left == 0
    }

    // -- arena access --------------------------------------------------------

    pub fn is_live(&self, id: PieceId) -> bool {
        self.pieces.get(id.slot()).is_some_and(|p| p.id == id)
    }

    pub fn piece(&self, id: PieceId) -> Option<&LevelPiece> {
        self.pieces.get(id.slot()).filter(|p| p.id == id)
    }

    pub(super) fn piece_mut(&mut self, id: PieceId) -> Option<&mut LevelPiece> {
        self.pieces.get_mut(id.slot()).filter(|p| p.id == id)
    }

    pub fn piece_at(&self, w: usize, h: usize) -> Option<&LevelPiece> {
        if w >= self.width || h >= self.height {
            return None;
        }
        self.pieces.get(h * self.width + w)
    }

    pub fn id_at(&self, w: usize, h: usize) -> Option<PieceId> {
        self.piece_at(w, h).map(|p| p.id)
    }

    /// Current occupant of the cell a (possibly stale) id refers to
    pub fn current_id(&self, id: PieceId) -> Option<PieceId> {
        self.pieces.get(id.slot()).map(|p| p.id)
    }

    pub fn pieces(&self) -> impl Iterator<Item = &LevelPiece> {
        self.pieces.iter()
    }

    /// Piece at (w + dw, h + dh), if inside the level
    pub fn offset_id(&self, w: usize, h: usize, dw: i32, dh: i32) -> Option<PieceId> {
        let nw = w as i64 + dw as i64;
        let nh = h as i64 + dh as i64;
        if nw < 0 || nh < 0 {
            return None;
        }
        self.id_at(nw as usize, nh as usize)
    }

    /// Grid cell containing a world point
    pub fn cell_of(&self, p: Vec2) -> Option<(usize, usize)> {
        if p.x < 0.0 || p.y < 0.0 {
            return None;
        }
        let w = (p.x / PIECE_WIDTH) as usize;
        let h = (p.y / PIECE_HEIGHT) as usize;
        (w < self.width && h < self.height).then_some((w, h))
    }

    pub fn piece_at_point(&self, p: Vec2) -> Option<PieceId> {
        let (w, h) = self.cell_of(p)?;
        self.id_at(w, h)
    }

    /// The eight neighbours of a cell, left, bottom, right, top then the diagonals
    pub fn neighbour_ids(&self, id: PieceId) -> Vec<PieceId> {
        let (w, h) = self.cell_of_slot(id.slot());
        [(-1, 0), (0, -1), (1, 0), (0, 1), (-1, 1), (1, 1), (1, -1), (-1, -1)]
            .into_iter()
            .filter_map(|(dw, dh)| self.offset_id(w, h, dw, dh))
            .collect()
    }

    pub(super) fn cell_of_slot(&self, slot: usize) -> (usize, usize) {
        (slot % self.width, slot / self.width)
    }

    fn neighbours(&self, w: usize, h: usize) -> Neighbours<'_> {
        let at = |dw: i32, dh: i32| self.offset_id(w, h, dw, dh).and_then(|id| self.piece(id));
        Neighbours {
            left: at(-1, 0),
            bottom: at(0, -1),
            right: at(1, 0),
            top: at(0, 1),
            top_left: at(-1, 1),
            top_right: at(1, 1),
            bottom_right: at(1, -1),
            bottom_left: at(-1, -1),
        }
    }

    // -- bounds --------------------------------------------------------------

    pub(super) fn update_piece_bounds(&mut self, slot: usize) {
        let (w, h) = self.cell_of_slot(slot);
        let bounds = compute_bounds(&self.pieces[slot], &self.neighbours(w, h));
        self.pieces[slot].bounds = bounds;
    }

    /// Recompute bounds of a cell and all eight cells around it
    pub(super) fn update_bounds_around(&mut self, slot: usize) {
        let (w, h) = self.cell_of_slot(slot);
        for dh in -1..=1 {
            for dw in -1..=1 {
                if let Some(id) = self.offset_id(w, h, dw, dh) {
                    self.update_piece_bounds(id.slot());
                }
            }
        }
    }

    fn update_all_bounds(&mut self) {
        for slot in 0..self.pieces.len() {
            self.update_piece_bounds(slot);
        }
    }

    // -- bookkeeping ---------------------------------------------------------

    fn register_piece(&mut self, id: PieceId) {
        let piece = &self.pieces[id.slot()];
        if let Some(trigger) = piece.trigger_id {
            self.triggers.entry(trigger).or_default().push(id);
        }
        if matches!(piece.kind, PieceKind::Turret(_)) {
            self.ai_pieces.insert(id);
        }
        if !piece.status.is_normal() {
            self.status_pieces.insert(id);
        }
        if matches!(piece.kind, PieceKind::Cannon(_) | PieceKind::Regen { life: Some(_) }) {
            self.ticking_pieces.insert(id);
        }
    }

    fn unregister_piece(&mut self, old: &LevelPiece) {
        if let Some(trigger) = old.trigger_id
            && let Some(ids) = self.triggers.get_mut(&trigger)
        {
            ids.retain(|id| *id != old.id);
            if ids.is_empty() {
                self.triggers.remove(&trigger);
            }
        }
        self.ai_pieces.remove(&old.id);
        self.status_pieces.remove(&old.id);
        self.ticking_pieces.remove(&old.id);
    }

    /// Record that a piece changed.
    ///
    /// `after` of `None` means the piece was modified in place. Otherwise the
    /// slot gets a new piece with a fresh generation; points for the change
    /// are awarded before any counters move.
    pub fn piece_changed(
        &mut self,
        ctx: &mut SimContext,
        before: PieceId,
        after: Option<PieceKind>,
        method: DestructionMethod,
    ) -> PieceId {
        let Some(old) = self.piece(before) else {
            log::warn!("piece_changed on stale piece {:?}", before);
            return self.current_id(before).unwrap_or(before);
        };
        let Some(kind) = after else {
            let (center, ty) = (old.center, old.piece_type());
            ctx.award_points(old.points_on_change(old), center);
            ctx.emit(GameEvent::LevelPieceChanged {
                before,
                before_type: ty,
                after: before,
                after_type: ty,
            });
            return before;
        };

        let mut replacement = old.replacement(kind);
        replacement.id = before.next_generation();
        let new_id = replacement.id;
        ctx.award_points(old.points_on_change(&replacement), old.center);
        ctx.emit(GameEvent::LevelPieceChanged {
            before,
            before_type: old.piece_type(),
            after: new_id,
            after_type: replacement.piece_type(),
        });
        for status in old.status.iter() {
            ctx.emit(GameEvent::LevelPieceStatusRemoved { piece: before, status });
        }
        log::trace!(
            "piece {:?} {:?} -> {:?} ({:?})",
            before,
            old.piece_type(),
            replacement.piece_type(),
            method
        );

        let vitality = (old.must_be_destroyed_to_end_level(), replacement.must_be_destroyed_to_end_level());
        let destroyed = !old.is_empty() && replacement.is_empty();
        match vitality {
            (true, false) => self.pieces_left = self.pieces_left.saturating_sub(1),
            (false, true) => self.pieces_left += 1,
            _ => {}
        }

        let slot = before.slot();
        let old = std::mem::replace(&mut self.pieces[slot], replacement);
        self.unregister_piece(&old);
        self.register_piece(new_id);
        self.update_bounds_around(slot);

        if destroyed {
            ctx.increment_interim_destroyed();
        }
        new_id
    }

    // -- status --------------------------------------------------------------

    pub fn add_status(&mut self, ctx: &mut SimContext, id: PieceId, status: PieceStatus) -> bool {
        let Some(piece) = self.piece_mut(id) else {
            return false;
        };
        if !piece.can_have_status(status) || piece.has_status(status) {
            return false;
        }
        piece.status.insert(status);
        self.status_pieces.insert(id);
        ctx.emit(GameEvent::LevelPieceStatusAdded { piece: id, status });
        if status == PieceStatus::ICE_CUBE {
            self.update_bounds_around(id.slot());
        }
        true
    }

    pub fn remove_status(&mut self, ctx: &mut SimContext, id: PieceId, status: PieceStatus) -> bool {
        let Some(piece) = self.piece_mut(id) else {
            return false;
        };
        if !piece.has_status(status) {
            return false;
        }
        piece.status.remove(status);
        if piece.status.is_normal() {
            self.status_pieces.remove(&id);
        }
        ctx.emit(GameEvent::LevelPieceStatusRemoved { piece: id, status });
        if status == PieceStatus::ICE_CUBE {
            self.update_bounds_around(id.slot());
        }
        true
    }

    pub fn remove_all_status(&mut self, ctx: &mut SimContext, id: PieceId) {
        let Some(piece) = self.piece(id) else {
            return;
        };
        for status in piece.status.iter().collect::<Vec<_>>() {
            self.remove_status(ctx, id, status);
        }
    }

    /// Pieces currently carrying a status, in id order
    pub fn status_pieces(&self) -> Vec<PieceId> {
        self.status_pieces.iter().copied().collect()
    }

    // -- collision candidates ------------------------------------------------

    /// Grid index ranges overlapped by a world rectangle
    fn index_range(&self, aabb: &Aabb2) -> Option<(RangeInclusive<usize>, RangeInclusive<usize>)> {
        let w_lo = (aabb.min.x / PIECE_WIDTH).floor();
        let w_hi = (aabb.max.x / PIECE_WIDTH).floor();
        let h_lo = (aabb.min.y / PIECE_HEIGHT).floor();
        let h_hi = (aabb.max.y / PIECE_HEIGHT).floor();
        if w_hi < 0.0 || h_hi < 0.0 || w_lo >= self.width as f32 || h_lo >= self.height as f32 {
            return None;
        }
        let clamp_w = |v: f32| (v.max(0.0) as usize).min(self.width - 1);
        let clamp_h = |v: f32| (v.max(0.0) as usize).min(self.height - 1);
        Some((clamp_w(w_lo)..=clamp_w(w_hi), clamp_h(h_lo)..=clamp_h(h_hi)))
    }

    /// Pieces whose cells overlap a rectangle, row-major
    pub fn collision_candidates_aabb(&self, aabb: &Aabb2) -> Vec<PieceId> {
        let Some((ws, hs)) = self.index_range(aabb) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for h in hs {
            for w in ws.clone() {
                out.push(self.pieces[h * self.width + w].id);
            }
        }
        out
    }

    /// Squared distance from a point to the nearest boundary point of a piece
    pub fn boundary_distance_sq(&self, id: PieceId, p: Vec2) -> f32 {
        let piece = &self.pieces[id.slot()];
        piece
            .bounds
            .closest_distance_sq(p)
            .unwrap_or_else(|| piece.aabb().distance_sq(p))
    }

    /// Pieces near a circle, nearest boundary first
    pub fn collision_candidates_circle(&self, center: Vec2, radius: f32) -> Vec<PieceId> {
        let area = Aabb2::from_center(center, Vec2::splat(radius.max(0.0)));
        let mut ids = self.collision_candidates_aabb(&area);
        ids.sort_by(|a, b| {
            self.boundary_distance_sq(*a, center)
                .total_cmp(&self.boundary_distance_sq(*b, center))
        });
        ids
    }

    /// Pieces a ball could touch this step, nearest first
    pub fn ball_collision_candidates(&self, ball: &Ball, dt: f32) -> Vec<PieceId> {
        self.collision_candidates_circle(ball.center, ball.radius + ball.speed * dt)
    }

    /// Pieces a projectile could touch this step, nearest first
    pub fn projectile_collision_candidates(&self, projectile: &Projectile, dt: f32) -> Vec<PieceId> {
        let area = projectile.aabb().expanded(projectile.speed * dt);
        let mut ids = self.collision_candidates_aabb(&area);
        ids.sort_by(|a, b| {
            self.boundary_distance_sq(*a, projectile.position)
                .total_cmp(&self.boundary_distance_sq(*b, projectile.position))
        });
        ids
    }

    // -- ray queries ---------------------------------------------------------

    /// Walk the ray in half-piece steps, visiting each nearby piece once.
    /// The visitor returns false to stop the walk.
    fn march(&self, ray: &Ray2, reach: f32, mut visit: impl FnMut(f32, PieceId) -> bool) {
        let step = PIECE_WIDTH.min(PIECE_HEIGHT) * 0.5;
        let max_t = self.world_size().length() + ray.origin.length() + PIECE_WIDTH;
        let mut seen = BTreeSet::new();
        let mut t = 0.0;
        while t <= max_t {
            let around = Aabb2::from_center(ray.point_at(t), Vec2::splat(step + reach));
            for id in self.collision_candidates_aabb(&around) {
                if seen.insert(id) && !visit(t, id) {
                    return;
                }
            }
            t += step;
        }
    }

    /// Nearest piece whose bounds the ray crosses, with the ray parameter
    pub fn first_collider(&self, ray: &Ray2, ignore: &BTreeSet<PieceId>, tolerance: f32) -> Option<(PieceId, f32)> {
        let margin = PIECE_WIDTH.min(PIECE_HEIGHT) + tolerance;
        let mut best: Option<(PieceId, f32)> = None;
        self.march(ray, tolerance, |t, id| {
            if let Some((_, best_t)) = best
                && t > best_t + margin
            {
                return false;
            }
            if ignore.contains(&id) {
                return true;
            }
            let piece = &self.pieces[id.slot()];
            if let Some(hit) = piece.bounds.ray_collision_with_tolerance(ray, tolerance)
                && best.is_none_or(|(_, best_t)| hit < best_t)
            {
                best = Some((id, hit));
            }
            true
        });
        best
    }

    /// Every piece the ray crosses, nearest first
    pub fn colliders(&self, ray: &Ray2, ignore: &BTreeSet<PieceId>, tolerance: f32) -> Vec<(PieceId, f32)> {
        let mut hits = Vec::new();
        self.march(ray, tolerance, |_, id| {
            if !ignore.contains(&id)
                && let Some(hit) = self.pieces[id.slot()].bounds.ray_collision_with_tolerance(ray, tolerance)
            {
                hits.push((id, hit));
            }
            true
        });
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    /// First crossed piece in walk order, without ranking later candidates
    pub fn collider_fast(&self, ray: &Ray2, ignore: &BTreeSet<PieceId>) -> Option<PieceId> {
        let mut found = None;
        self.march(ray, 0.0, |_, id| {
            if !ignore.contains(&id) && self.pieces[id.slot()].bounds.ray_collision(ray).is_some() {
                found = Some(id);
                return false;
            }
            true
        });
        found
    }

    // -- paddle --------------------------------------------------------------

    /// Left limit for the paddle, scanning row 0 leftwards from a column
    pub fn paddle_min_bound(&self, start_col: usize) -> f32 {
        let start = start_col.min(self.width - 1);
        (0..=start)
            .rev()
            .map(|col| &self.pieces[col])
            .find(|p| p.bounds_paddle(-1.0))
            .map_or(0.0, |p| p.center.x + HALF_PIECE_WIDTH)
    }

    /// Right limit for the paddle, scanning row 0 rightwards from a column
    pub fn paddle_max_bound(&self, start_col: usize) -> f32 {
        let start = start_col.min(self.width - 1);
        (start..self.width)
            .map(|col| &self.pieces[col])
            .find(|p| p.bounds_paddle(1.0))
            .map_or(self.world_size().x, |p| p.center.x - HALF_PIECE_WIDTH)
    }

    /// Horizontal range the paddle centre may occupy
    pub fn paddle_limits(&self, paddle: &Paddle) -> (f32, f32) {
        let col = ((paddle.center.x / PIECE_WIDTH).max(0.0) as usize).min(self.width - 1);
        let lo = self.paddle_min_bound(col) + paddle.half_width;
        let hi = self.paddle_max_bound(col) - paddle.half_width;
        if lo > hi {
            let mid = (lo + hi) * 0.5;
            (mid, mid)
        } else {
            (lo, hi)
        }
    }

    /// Default paddle x: the explicit start position or the level middle
    pub fn default_paddle_x(&self) -> f32 {
        self.paddle_start_x.unwrap_or(self.world_size().x * 0.5)
    }

    // -- triggers ------------------------------------------------------------

    pub fn triggerable_pieces(&self, trigger_id: i32) -> &[PieceId] {
        self.triggers.get(&trigger_id).map_or(&[], |ids| ids.as_slice())
    }

    /// Trigger every piece registered under an id; false if there were none
    pub fn activate_triggerable_level_piece(&mut self, ctx: &mut SimContext, trigger_id: i32) -> bool {
        let ids = self.triggerable_pieces(trigger_id).to_vec();
        if ids.is_empty() {
            log::debug!("trigger {} has no pieces", trigger_id);
            return false;
        }
        for id in ids {
            if self.is_live(id) {
                self.trigger_piece(ctx, id);
            }
        }
        true
    }

    // -- ai ------------------------------------------------------------------

    pub fn ai_pieces(&self) -> Vec<PieceId> {
        self.ai_pieces.iter().copied().collect()
    }

    // -- tesla lightning -----------------------------------------------------

    pub fn tesla_arc_exists(&self, a: PieceId, b: PieceId) -> bool {
        self.tesla_arcs.contains_key(&(a, b)) || self.tesla_arcs.contains_key(&(b, a))
    }

    pub fn tesla_arcs(&self) -> impl Iterator<Item = (PieceId, PieceId, &LineSeg2)> {
        self.tesla_arcs.iter().map(|((a, b), seg)| (*a, *b, seg))
    }

    /// Collision lines of every live arc
    pub fn tesla_lightning_bounds(&self) -> &BoundingLines {
        &self.tesla_bounds
    }

    fn arc_between(&self, a: PieceId, b: PieceId) -> Option<LineSeg2> {
        Some(LineSeg2::new(self.piece(a)?.center, self.piece(b)?.center))
    }

    fn rebuild_tesla_bounds(&mut self) {
        let mut bounds = BoundingLines::default();
        for seg in self.tesla_arcs.values() {
            let along = (seg.p2 - seg.p1).normalize_or_zero();
            let perp = along.perp();
            let offset = perp * TESLA_ARC_HALF_THICKNESS;
            bounds.push(seg.translated(offset), perp);
            bounds.push(seg.translated(-offset), -perp);
        }
        self.tesla_bounds = bounds;
    }

    fn build_initial_tesla_arcs(&mut self) {
        let mut pairs = Vec::new();
        for piece in &self.pieces {
            if let PieceKind::Tesla(t) = &piece.kind
                && t.active
            {
                for &other in &t.connections {
                    let other_active = matches!(
                        self.piece(other).map(|p| &p.kind),
                        Some(PieceKind::Tesla(o)) if o.active
                    );
                    if other_active {
                        pairs.push((piece.id.min(other), piece.id.max(other)));
                    }
                }
            }
        }
        for (a, b) in pairs {
            if !self.tesla_arc_exists(a, b)
                && let Some(seg) = self.arc_between(a, b)
            {
                self.tesla_arcs.insert((a, b), seg);
            }
        }
        self.rebuild_tesla_bounds();
    }

    /// Spawn an arc between two tesla blocks, frying whatever lies across it
    pub fn add_tesla_lightning_barrier(&mut self, ctx: &mut SimContext, a: PieceId, b: PieceId) -> bool {
        if self.tesla_arc_exists(a, b) {
            return false;
        }
        let Some(seg) = self.arc_between(a, b) else {
            return false;
        };
        self.tesla_arcs.insert((a.min(b), a.max(b)), seg);
        self.rebuild_tesla_bounds();
        ctx.emit(GameEvent::TeslaLightningBarrierSpawned { first: a, second: b });

        for id in self.pieces_across(&seg) {
            if self.is_live(id) {
                self.destroy_piece(ctx, id, DestructionMethod::Tesla);
            }
        }
        true
    }

    pub fn remove_tesla_lightning_barrier(&mut self, ctx: &mut SimContext, a: PieceId, b: PieceId) -> bool {
        let removed = self.tesla_arcs.remove(&(a, b)).or_else(|| self.tesla_arcs.remove(&(b, a)));
        if removed.is_none() {
            return false;
        }
        self.rebuild_tesla_bounds();
        ctx.emit(GameEvent::TeslaLightningBarrierRemoved { first: a, second: b });
        true
    }

    /// Non-tesla pieces whose cells the segment passes through, in walk order
    fn pieces_across(&self, seg: &LineSeg2) -> Vec<PieceId> {
        let len = seg.length();
        let mut out = Vec::new();
        if len <= 0.0 {
            return out;
        }
        let ray = Ray2::new(seg.p1, seg.p2 - seg.p1);
        self.march(&ray, 0.0, |t, id| {
            if t > len + PIECE_WIDTH {
                return false;
            }
            let piece = &self.pieces[id.slot()];
            let crossing = !piece.is_no_bounds_piece_type()
                && !matches!(piece.kind, PieceKind::Tesla(_))
                && piece.aabb().expanded(-1e-3).intersects_segment(seg);
            if crossing {
                out.push(id);
            }
            true
        });
        out
    }

    // -- safety net ----------------------------------------------------------

    pub fn has_safety_net(&self) -> bool {
        self.safety_net.is_some()
    }

    pub fn safety_net_bounds(&self) -> Option<&BoundingLines> {
        self.safety_net.as_ref()
    }

    pub fn create_safety_net(&mut self, ctx: &mut SimContext) -> bool {
        if self.safety_net.is_some() {
            return false;
        }
        let mut net = BoundingLines::default();
        net.push(
            LineSeg2::new(Vec2::new(0.0, SAFETY_NET_Y), Vec2::new(self.world_size().x, SAFETY_NET_Y)),
            Vec2::Y,
        );
        self.safety_net = Some(net);
        ctx.emit(GameEvent::BallSafetyNetCreated);
        true
    }

    pub fn destroy_safety_net(&mut self, ctx: &mut SimContext) -> bool {
        if self.safety_net.take().is_none() {
            return false;
        }
        ctx.emit(GameEvent::BallSafetyNetDestroyed);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::events::EventRecorder;
    use crate::sim::piece::{BreakableBlock, BreakableStage, OneWayDir, TeslaBlock};
    use proptest::prelude::*;

    fn red() -> PieceKind {
        PieceKind::Breakable(BreakableBlock::new(BreakableStage::Red))
    }

    fn tesla(connections: Vec<PieceId>) -> PieceKind {
        PieceKind::Tesla(TeslaBlock {
            name: String::new(),
            active: false,
            changable: true,
            connections,
            toggle_life: crate::sim::piece::TOGGLE_LIFE,
            last_toggle: None,
        })
    }

    #[test]
    fn test_stale_ids_do_not_resolve() {
        let mut level = GameLevel::from_kinds(3, 3, |_, _| red());
        let mut ctx = SimContext::new(1);
        let id = level.id_at(1, 1).unwrap();
        let new_id = level.piece_changed(&mut ctx, id, Some(PieceKind::Empty), DestructionMethod::Regular);
        assert_ne!(id, new_id);
        assert!(!level.is_live(id));
        assert!(level.is_live(new_id));
        assert_eq!(level.current_id(id), Some(new_id));
        assert!(level.piece(id).is_none());
    }

    #[test]
    fn test_piece_changed_counts_and_scores() {
        let mut level = GameLevel::from_kinds(3, 1, |w, _| if w == 1 { red() } else { PieceKind::Solid });
        let mut ctx = SimContext::new(1);
        assert_eq!(level.pieces_left(), 1);
        let id = level.id_at(1, 0).unwrap();
        level.piece_changed(&mut ctx, id, Some(PieceKind::Empty), DestructionMethod::Regular);
        assert_eq!(level.pieces_left(), 0);
        assert!(level.is_complete());
        assert_eq!(ctx.interim_destroyed(), 1);
        assert_eq!(ctx.score(), crate::sim::piece::POINTS_BREAKABLE_DESTROYED as u64);
    }

    #[test]
    fn test_piece_changed_updates_all_eight_neighbours() {
        // The prism in the bottom-right corner depends on its top-left diagonal
        let mut level = GameLevel::from_kinds(3, 3, |w, h| if (w, h) == (2, 0) { PieceKind::Prism } else { PieceKind::Solid });
        let mut ctx = SimContext::new(1);
        let bottom_right = level.id_at(2, 0).unwrap();
        assert_eq!(level.piece(bottom_right).unwrap().bounds.num_lines(), 3);
        let center = level.id_at(1, 1).unwrap();
        level.piece_changed(&mut ctx, center, Some(PieceKind::Empty), DestructionMethod::Collateral);
        // Orthogonal neighbours gain the face that now borders the hole
        let left = level.piece(level.id_at(0, 1).unwrap()).unwrap();
        assert!(left.bounds.normals().contains(&Vec2::X));
        assert_eq!(level.piece(bottom_right).unwrap().bounds.num_lines(), 4);
        for piece in level.pieces() {
            let (w, h) = (piece.w, piece.h);
            assert_eq!(piece.bounds, compute_bounds(piece, &level.neighbours(w, h)));
        }
    }

    #[test]
    fn test_in_place_change_keeps_id() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| red());
        let mut ctx = SimContext::new(1);
        let id = level.id_at(0, 0).unwrap();
        assert_eq!(level.piece_changed(&mut ctx, id, None, DestructionMethod::Regular), id);
        assert_eq!(ctx.score(), crate::sim::piece::POINTS_BREAKABLE_HIT as u64);
    }

    #[test]
    fn test_frozen_neighbour_exposes_faces() {
        let mut level = GameLevel::from_kinds(2, 1, |_, _| PieceKind::Solid);
        let mut ctx = SimContext::new(1);
        let left = level.id_at(0, 0).unwrap();
        let right = level.id_at(1, 0).unwrap();
        assert!(!level.piece(left).unwrap().bounds.normals().contains(&Vec2::X));
        assert!(level.add_status(&mut ctx, right, PieceStatus::ICE_CUBE));
        assert!(level.piece(left).unwrap().bounds.normals().contains(&Vec2::X));
        assert_eq!(level.status_pieces(), vec![right]);
        assert!(level.remove_status(&mut ctx, right, PieceStatus::ICE_CUBE));
        assert!(level.status_pieces().is_empty());
    }

    #[test]
    fn test_first_collider_finds_nearest() {
        let mut level = GameLevel::from_kinds(5, 1, |w, _| if w >= 3 { PieceKind::Solid } else { PieceKind::Empty });
        let ray = Ray2::new(Vec2::new(0.5, 0.5), Vec2::X);
        let (id, t) = level.first_collider(&ray, &BTreeSet::new(), 0.0).unwrap();
        assert_eq!(id, level.id_at(3, 0).unwrap());
        assert!((t - (3.0 * PIECE_WIDTH - 0.5)).abs() < 1e-4);

        let mut ignore = BTreeSet::new();
        ignore.insert(id);
        // Behind the ignored block its neighbour only has its outer face
        let (behind, t) = level.first_collider(&ray, &ignore, 0.0).unwrap();
        assert_eq!(behind, level.id_at(4, 0).unwrap());
        assert!((t - (5.0 * PIECE_WIDTH - 0.5)).abs() < 1e-4);
        assert_eq!(level.colliders(&ray, &BTreeSet::new(), 0.0).len(), 2);
        assert_eq!(level.collider_fast(&ray, &BTreeSet::new()), Some(id));

        let mut ctx = SimContext::new(1);
        level.piece_changed(&mut ctx, id, Some(PieceKind::Empty), DestructionMethod::Collateral);
        let (next, _) = level.first_collider(&ray, &BTreeSet::new(), 0.0).unwrap();
        assert_eq!(next, level.id_at(4, 0).unwrap());
    }

    #[test]
    fn test_paddle_bounds_scan_row_zero() {
        let level = GameLevel::from_kinds(6, 2, |w, h| match (w, h) {
            (0, 0) => PieceKind::Solid,
            (4, 0) => PieceKind::OneWay(OneWayDir::Right),
            (5, 0) => PieceKind::Solid,
            _ => PieceKind::Empty,
        });
        assert_eq!(level.paddle_min_bound(2), PIECE_WIDTH);
        // The one-way block lets the paddle through moving right
        assert_eq!(level.paddle_max_bound(2), 5.0 * PIECE_WIDTH);
        let open = GameLevel::from_kinds(4, 1, |_, _| PieceKind::Empty);
        assert_eq!(open.paddle_min_bound(1), 0.0);
        assert_eq!(open.paddle_max_bound(1), 4.0 * PIECE_WIDTH);
    }

    #[test]
    fn test_tesla_arc_lifecycle() {
        let a = PieceId::new(0, 0);
        let c = PieceId::new(4, 0);
        let mut level = GameLevel::from_kinds(5, 1, |w, _| match w {
            0 => tesla(vec![c]),
            4 => tesla(vec![a]),
            2 => red(),
            _ => PieceKind::Empty,
        });
        let mut ctx = SimContext::new(1);
        let recorder = EventRecorder::new();
        ctx.register_listener(Box::new(recorder.clone()));

        assert!(level.add_tesla_lightning_barrier(&mut ctx, a, c));
        assert!(level.tesla_arc_exists(c, a));
        assert!(!level.add_tesla_lightning_barrier(&mut ctx, c, a));
        assert!(level.piece_at(2, 0).unwrap().is_empty());
        assert_eq!(level.tesla_lightning_bounds().num_lines(), 2);
        assert_eq!(
            recorder.count(|e| matches!(e, GameEvent::TeslaLightningBarrierSpawned { .. })),
            1
        );

        assert!(level.remove_tesla_lightning_barrier(&mut ctx, c, a));
        assert!(!level.tesla_arc_exists(a, c));
        assert!(level.tesla_lightning_bounds().is_empty());
    }

    #[test]
    fn test_safety_net_once() {
        let mut level = GameLevel::from_kinds(2, 2, |_, _| PieceKind::Empty);
        let mut ctx = SimContext::new(1);
        assert!(level.create_safety_net(&mut ctx));
        assert!(!level.create_safety_net(&mut ctx));
        assert!(level.destroy_safety_net(&mut ctx));
        assert!(!level.has_safety_net());
    }

    #[test]
    fn test_stars_for_score() {
        let mut level = GameLevel::from_kinds(1, 1, |_, _| PieceKind::Empty);
        level.set_star_milestones([100, 200, 300, 400, 500]);
        assert_eq!(level.stars_for_score(0), 0);
        assert_eq!(level.stars_for_score(250), 2);
        assert_eq!(level.stars_for_score(9000), 5);
    }

    proptest! {
        #[test]
        fn prop_circle_candidates_are_exact_and_sorted(
            x in -5.0f32..20.0,
            y in -5.0f32..12.0,
            r in 0.0f32..4.0,
        ) {
            let level = GameLevel::from_kinds(6, 8, |w, h| if (w + h) % 3 == 0 { PieceKind::Solid } else { PieceKind::Empty });
            let center = Vec2::new(x, y);
            let got = level.collision_candidates_circle(center, r);

            let mut expected = BTreeSet::new();
            for piece in level.pieces() {
                let lo_w = ((x - r) / PIECE_WIDTH).floor();
                let hi_w = ((x + r) / PIECE_WIDTH).floor();
                let lo_h = ((y - r) / PIECE_HEIGHT).floor();
                let hi_h = ((y + r) / PIECE_HEIGHT).floor();
                let (w, h) = (piece.w as f32, piece.h as f32);
                if w >= lo_w && w <= hi_w && h >= lo_h && h <= hi_h {
                    expected.insert(piece.id);
                }
            }
            let got_set: BTreeSet<PieceId> = got.iter().copied().collect();
            prop_assert_eq!(got_set, expected);
            prop_assert_eq!(got.len(), got.iter().collect::<BTreeSet<_>>().len());
            for pair in got.windows(2) {
                prop_assert!(level.boundary_distance_sq(pair[0], center) <= level.boundary_distance_sq(pair[1], center));
            }
        }

        #[test]
        fn prop_grid_stays_consistent(destroy in proptest::collection::vec((0usize..5, 0usize..4), 0..20)) {
            let mut level = GameLevel::from_kinds(5, 4, |w, h| if (w * h) % 2 == 0 { red() } else { PieceKind::Solid });
            let mut ctx = SimContext::new(3);
            for (w, h) in destroy {
                let id = level.id_at(w, h).unwrap();
                level.piece_changed(&mut ctx, id, Some(PieceKind::Empty), DestructionMethod::Collateral);
            }
            let mut vital = 0;
            for (slot, piece) in level.pieces().enumerate() {
                prop_assert_eq!(piece.id.slot(), slot);
                prop_assert_eq!((piece.w, piece.h), (slot % 5, slot / 5));
                prop_assert_eq!(piece.center, cell_center(piece.w, piece.h));
                prop_assert_eq!(&piece.bounds, &compute_bounds(piece, &level.neighbours(piece.w, piece.h)));
                if piece.must_be_destroyed_to_end_level() {
                    vital += 1;
                }
            }
            prop_assert_eq!(level.pieces_left(), vital);
        }
    }
}
