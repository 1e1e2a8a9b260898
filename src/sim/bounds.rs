//! Collision bounds of a piece, derived from its eight neighbours
//!
//! A side of a piece only gets a boundary line when something could actually
//! reach it: shared edges with solid-like neighbours are dropped.

use glam::Vec2;

use super::geometry::{BoundingLines, LineSeg2};
use super::piece::{LevelPiece, PieceKind, Side, TriangleOrientation};
use crate::consts::*;

/// Snapshot of the pieces around a cell; `None` past the level edge
#[derive(Debug, Clone, Copy, Default)]
pub struct Neighbours<'a> {
    pub left: Option<&'a LevelPiece>,
    pub bottom: Option<&'a LevelPiece>,
    pub right: Option<&'a LevelPiece>,
    pub top: Option<&'a LevelPiece>,
    pub top_left: Option<&'a LevelPiece>,
    pub top_right: Option<&'a LevelPiece>,
    pub bottom_right: Option<&'a LevelPiece>,
    pub bottom_left: Option<&'a LevelPiece>,
}

impl<'a> Neighbours<'a> {
    pub fn side(&self, side: Side) -> Option<&'a LevelPiece> {
        match side {
            Side::Left => self.left,
            Side::Bottom => self.bottom,
            Side::Right => self.right,
            Side::Top => self.top,
        }
    }

    /// Diagonal neighbour between two sides
    pub fn corner(&self, vertical: Side, horizontal: Side) -> Option<&'a LevelPiece> {
        match (vertical, horizontal) {
            (Side::Left, Side::Top) => self.top_left,
            (Side::Right, Side::Top) => self.top_right,
            (Side::Right, Side::Bottom) => self.bottom_right,
            (Side::Left, Side::Bottom) => self.bottom_left,
            _ => None,
        }
    }
}

/// Whether `neighbour`, sitting on `side` of a piece, seals that side off
fn covers(neighbour: Option<&LevelPiece>, side: Side) -> bool {
    let Some(n) = neighbour else {
        return false;
    };
    if n.is_frozen() {
        return false;
    }
    match &n.kind {
        PieceKind::Solid
        | PieceKind::Breakable(_)
        | PieceKind::Bomb
        | PieceKind::Ink { .. }
        | PieceKind::Collateral { .. }
        | PieceKind::Tesla(_)
        | PieceKind::ItemDrop(_)
        | PieceKind::Switch(_)
        | PieceKind::Turret(_)
        | PieceKind::AlwaysDrop { .. }
        | PieceKind::Regen { .. } => true,
        PieceKind::Triangle(t) => t.orientation.has_leg_on(side.opposite()),
        PieceKind::Empty
        | PieceKind::Prism
        | PieceKind::Portal(_)
        | PieceKind::Cannon(_)
        | PieceKind::OneWay(_)
        | PieceKind::NoEntry => false,
    }
}

fn side_line(center: Vec2, side: Side) -> LineSeg2 {
    let tl = center + Vec2::new(-HALF_PIECE_WIDTH, HALF_PIECE_HEIGHT);
    let tr = center + Vec2::new(HALF_PIECE_WIDTH, HALF_PIECE_HEIGHT);
    let bl = center + Vec2::new(-HALF_PIECE_WIDTH, -HALF_PIECE_HEIGHT);
    let br = center + Vec2::new(HALF_PIECE_WIDTH, -HALF_PIECE_HEIGHT);
    match side {
        Side::Left => LineSeg2::new(tl, bl),
        Side::Bottom => LineSeg2::new(bl, br),
        Side::Right => LineSeg2::new(br, tr),
        Side::Top => LineSeg2::new(tr, tl),
    }
}

/// Diamond vertices: left, bottom, right, top
pub fn diamond_vertices(center: Vec2) -> [Vec2; 4] {
    [
        center + Vec2::new(-HALF_PIECE_WIDTH, 0.0),
        center + Vec2::new(0.0, -HALF_PIECE_HEIGHT),
        center + Vec2::new(HALF_PIECE_WIDTH, 0.0),
        center + Vec2::new(0.0, HALF_PIECE_HEIGHT),
    ]
}

/// Triangle vertices: right-angle corner, end of the vertical leg, end of the horizontal leg
pub fn triangle_vertices(center: Vec2, orientation: TriangleOrientation) -> [Vec2; 3] {
    let s = orientation.corner_sign();
    [
        center + Vec2::new(s.x * HALF_PIECE_WIDTH, s.y * HALF_PIECE_HEIGHT),
        center + Vec2::new(s.x * HALF_PIECE_WIDTH, -s.y * HALF_PIECE_HEIGHT),
        center + Vec2::new(-s.x * HALF_PIECE_WIDTH, s.y * HALF_PIECE_HEIGHT),
    ]
}

/// Outward normal of a segment, chosen to point away from `inside`
pub fn outward_normal(seg: &LineSeg2, inside: Vec2) -> Vec2 {
    let d = seg.p2 - seg.p1;
    let n = Vec2::new(d.y, -d.x).normalize_or_zero();
    if n.dot(seg.midpoint() - inside) < 0.0 { -n } else { n }
}

fn rectangle_bounds(piece: &LevelPiece, n: &Neighbours) -> BoundingLines {
    let mut bounds = BoundingLines::default();
    for side in [Side::Left, Side::Bottom, Side::Right, Side::Top] {
        if !covers(n.side(side), side) {
            bounds.push(side_line(piece.center, side), side.normal());
        }
    }
    bounds
}

fn diamond_bounds(piece: &LevelPiece, n: &Neighbours) -> BoundingLines {
    let v = diamond_vertices(piece.center);
    // Each face sits in one quadrant of the cell
    let faces = [
        (v[0], v[1], Side::Left, Side::Bottom),
        (v[1], v[2], Side::Right, Side::Bottom),
        (v[2], v[3], Side::Right, Side::Top),
        (v[3], v[0], Side::Left, Side::Top),
    ];
    let mut bounds = BoundingLines::default();
    for (a, b, vertical, horizontal) in faces {
        let sealed = covers(n.side(vertical), vertical)
            && covers(n.side(horizontal), horizontal)
            && covers(n.corner(vertical, horizontal), vertical);
        if sealed {
            continue;
        }
        let seg = LineSeg2::new(a, b);
        bounds.push(seg, outward_normal(&seg, piece.center));
    }
    bounds
}

fn triangle_bounds(piece: &LevelPiece, orientation: TriangleOrientation, n: &Neighbours) -> BoundingLines {
    let [corner, vertical_end, horizontal_end] = triangle_vertices(piece.center, orientation);
    let [vertical_side, horizontal_side] = orientation.leg_sides();
    let mut bounds = BoundingLines::default();
    if !covers(n.side(vertical_side), vertical_side) {
        bounds.push(LineSeg2::new(corner, vertical_end), vertical_side.normal());
    }
    if !covers(n.side(horizontal_side), horizontal_side) {
        bounds.push(LineSeg2::new(horizontal_end, corner), horizontal_side.normal());
    }
    let hyp = LineSeg2::new(vertical_end, horizontal_end);
    let centroid = (corner + vertical_end + horizontal_end) / 3.0;
    bounds.push(hyp, outward_normal(&hyp, centroid));
    bounds
}

/// Bounds of `piece` given its current neighbours
pub fn compute_bounds(piece: &LevelPiece, n: &Neighbours) -> BoundingLines {
    if piece.is_no_bounds_piece_type() {
        return BoundingLines::default();
    }
    // Ice encases the whole cell whatever the shape underneath
    if piece.is_frozen() {
        return rectangle_bounds(piece, n);
    }
    match &piece.kind {
        PieceKind::Prism => diamond_bounds(piece, n),
        PieceKind::Triangle(t) => triangle_bounds(piece, t.orientation, n),
        _ => rectangle_bounds(piece, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::piece::{TriangleBehaviour, TriangleBlock};

    fn solid(w: usize, h: usize) -> LevelPiece {
        LevelPiece::new(w, h, PieceKind::Solid)
    }

    #[test]
    fn test_isolated_block_has_four_sides() {
        let piece = solid(1, 1);
        let bounds = compute_bounds(&piece, &Neighbours::default());
        assert_eq!(bounds.num_lines(), 4);
    }

    #[test]
    fn test_shared_edge_is_suppressed() {
        let piece = solid(1, 1);
        let left = solid(0, 1);
        let empty_top = LevelPiece::empty(1, 2);
        let n = Neighbours {
            left: Some(&left),
            top: Some(&empty_top),
            ..Default::default()
        };
        let bounds = compute_bounds(&piece, &n);
        assert_eq!(bounds.num_lines(), 3);
        assert!(!bounds.normals().contains(&Vec2::NEG_X));
    }

    #[test]
    fn test_frozen_neighbour_does_not_cover() {
        let piece = solid(1, 1);
        let mut left = solid(0, 1);
        left.status.insert(crate::sim::piece::PieceStatus::ICE_CUBE);
        let n = Neighbours {
            left: Some(&left),
            ..Default::default()
        };
        assert_eq!(compute_bounds(&piece, &n).num_lines(), 4);
    }

    #[test]
    fn test_empty_has_no_bounds() {
        assert!(compute_bounds(&LevelPiece::empty(0, 0), &Neighbours::default()).is_empty());
    }

    #[test]
    fn test_triangle_hypotenuse_always_present() {
        let tri = LevelPiece::new(
            1,
            1,
            PieceKind::Triangle(TriangleBlock::new(TriangleBehaviour::Solid, TriangleOrientation::LowerLeft)),
        );
        let left = solid(0, 1);
        let bottom = solid(1, 0);
        let n = Neighbours {
            left: Some(&left),
            bottom: Some(&bottom),
            ..Default::default()
        };
        let bounds = compute_bounds(&tri, &n);
        assert_eq!(bounds.num_lines(), 1);
        // Hypotenuse of a lower-left triangle faces up and right
        let normal = bounds.normals()[0];
        assert!(normal.x > 0.0 && normal.y > 0.0);
    }

    #[test]
    fn test_triangle_leg_covers_neighbour() {
        // Lower-right triangle to the left has its vertical leg against us
        let tri = LevelPiece::new(
            0,
            1,
            PieceKind::Triangle(TriangleBlock::new(TriangleBehaviour::Solid, TriangleOrientation::LowerRight)),
        );
        let piece = solid(1, 1);
        let n = Neighbours {
            left: Some(&tri),
            ..Default::default()
        };
        assert_eq!(compute_bounds(&piece, &n).num_lines(), 3);
    }

    #[test]
    fn test_prism_diamond() {
        let prism = LevelPiece::new(1, 1, PieceKind::Prism);
        let bounds = compute_bounds(&prism, &Neighbours::default());
        assert_eq!(bounds.num_lines(), 4);
        for (line, normal) in bounds.iter() {
            assert!(normal.dot(line.midpoint() - prism.center) > 0.0);
        }
    }
}
