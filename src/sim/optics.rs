//! Laser optics for prisms, prism triangles and ice cubes
//!
//! These are pure functions: given the shape a laser met and the laser's
//! path, work out where the laser goes next and which split beams are born.
//! Faces here carry optics normals, which differ from the collision normals
//! on a triangle's hypotenuse (optics uses the 45 degree diagonal).

use glam::Vec2;

use super::bounds::{diamond_vertices, outward_normal, triangle_vertices};
use super::geometry::{reflect, BoundingLines, LineSeg2, Ray2};
use super::piece::TriangleOrientation;
use crate::consts::*;

/// Incidence at or below this angle splits the beam instead of reflecting
pub const SPLIT_INCIDENCE_DEGREES: f32 = 15.0;
pub const MIN_SPLIT_SCALE: f32 = 0.5;
/// Hits this close to a diamond vertex count as vertex hits
const VERTEX_TOLERANCE: f32 = 0.15;
/// Pushes exit points just outside the surface they leave
const EXIT_NUDGE: f32 = 0.01;

/// Optical shape a laser can interact with
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpticShape {
    Diamond,
    Triangle(TriangleOrientation),
    IceCube,
}

/// A position and direction for a beam leaving a shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightRay {
    pub position: Vec2,
    pub dir: Vec2,
}

impl LightRay {
    fn new(position: Vec2, dir: Vec2) -> Self {
        Self {
            position,
            dir: dir.normalize_or_zero(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightOutcome {
    /// New path for the incoming laser; `None` leaves it as it was
    pub redirected: Option<LightRay>,
    /// Split beams to spawn
    pub children: Vec<LightRay>,
}

impl LightOutcome {
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Size factor applied to every beam after a split
    pub fn split_scale(&self) -> f32 {
        split_scale(1 + self.children.len())
    }
}

/// Beams shrink as they split, never below half size
pub fn split_scale(beams: usize) -> f32 {
    if beams <= 1 {
        return 1.0;
    }
    (1.0 / (beams as f32).sqrt()).max(MIN_SPLIT_SCALE)
}

#[derive(Debug, Clone, Copy)]
struct Face {
    seg: LineSeg2,
    normal: Vec2,
}

fn faces(shape: OpticShape, center: Vec2) -> Vec<Face> {
    match shape {
        OpticShape::Diamond => {
            let v = diamond_vertices(center);
            (0..4)
                .map(|i| {
                    let seg = LineSeg2::new(v[i], v[(i + 1) % 4]);
                    Face {
                        seg,
                        normal: outward_normal(&seg, center),
                    }
                })
                .collect()
        }
        OpticShape::Triangle(orientation) => {
            let [corner, vertical_end, horizontal_end] = triangle_vertices(center, orientation);
            let [vertical_side, horizontal_side] = orientation.leg_sides();
            vec![
                Face {
                    seg: LineSeg2::new(corner, vertical_end),
                    normal: vertical_side.normal(),
                },
                Face {
                    seg: LineSeg2::new(horizontal_end, corner),
                    normal: horizontal_side.normal(),
                },
                Face {
                    seg: LineSeg2::new(vertical_end, horizontal_end),
                    normal: -orientation.corner_sign().normalize(),
                },
            ]
        }
        OpticShape::IceCube => {
            BoundingLines::rectangle(center, Vec2::new(HALF_PIECE_WIDTH, HALF_PIECE_HEIGHT))
                .iter()
                .map(|(seg, normal)| Face { seg: *seg, normal: *normal })
                .collect()
        }
    }
}

/// Angle in degrees between the reversed travel direction and a face normal
fn incidence_degrees(dir: Vec2, normal: Vec2) -> f32 {
    (-dir).dot(normal).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Face the laser enters through, with the entry point
fn entry_face(faces: &[Face], position: Vec2, dir: Vec2) -> Option<(usize, Vec2)> {
    // Start well behind the laser so a laser already inside still finds its entry
    let ray = Ray2::new(position - dir * PIECE_WIDTH, dir);
    faces
        .iter()
        .enumerate()
        .filter(|(_, f)| f.normal.dot(ray.dir) < 0.0)
        .filter_map(|(i, f)| ray.intersect_segment(&f.seg).map(|t| (i, t)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, t)| (i, ray.point_at(t)))
}

fn reflected(face: &Face, hit: Vec2, dir: Vec2) -> LightRay {
    LightRay::new(hit + face.normal * EXIT_NUDGE, reflect(dir, face.normal))
}

fn diamond_outcome(center: Vec2, position: Vec2, dir: Vec2) -> LightOutcome {
    let faces = faces(OpticShape::Diamond, center);
    let Some((index, hit)) = entry_face(&faces, position, dir) else {
        return LightOutcome::unchanged();
    };
    let face = faces[index];

    for vertex in [face.seg.p1, face.seg.p2] {
        if (hit - vertex).length() > VERTEX_TOLERANCE {
            continue;
        }
        let axis = (center - vertex).normalize_or_zero();
        if dir.angle_to(axis).abs().to_degrees() <= SPLIT_INCIDENCE_DEGREES {
            // Straight through the diamond, fanning out of the two far faces
            let opposite = center * 2.0 - vertex;
            let far: Vec<LightRay> = faces
                .iter()
                .filter(|f| f.seg.p1.distance(opposite) < EXIT_NUDGE || f.seg.p2.distance(opposite) < EXIT_NUDGE)
                .map(|f| LightRay::new(f.seg.midpoint() + f.normal * EXIT_NUDGE, f.normal))
                .collect();
            return LightOutcome {
                redirected: Some(LightRay::new(opposite + dir * EXIT_NUDGE, dir)),
                children: far,
            };
        }
    }

    let angle = incidence_degrees(dir, face.normal);
    if angle <= SPLIT_INCIDENCE_DEGREES {
        let sides = [(index + 1) % 4, (index + 3) % 4];
        return LightOutcome {
            redirected: Some(LightRay::new(center, dir)),
            children: sides
                .iter()
                .map(|&i| LightRay::new(faces[i].seg.midpoint() + faces[i].normal * EXIT_NUDGE, faces[i].normal))
                .collect(),
        };
    }
    if angle < 90.0 {
        return LightOutcome {
            redirected: Some(reflected(&face, hit, dir)),
            children: Vec::new(),
        };
    }
    LightOutcome::unchanged()
}

fn triangle_outcome(orientation: TriangleOrientation, center: Vec2, position: Vec2, dir: Vec2) -> LightOutcome {
    let faces = faces(OpticShape::Triangle(orientation), center);
    let path = LineSeg2::new(position - dir * PIECE_WIDTH, position + dir * PIECE_WIDTH);
    let crossed = faces.iter().filter(|f| f.seg.intersects(&path)).count();
    if crossed == 0 || crossed > 2 {
        return LightOutcome::unchanged();
    }
    let Some((index, hit)) = entry_face(&faces, position, dir) else {
        return LightOutcome::unchanged();
    };
    let face = faces[index];
    let exit = |f: &Face| LightRay::new(f.seg.midpoint() + f.normal * EXIT_NUDGE, f.normal);

    if incidence_degrees(dir, face.normal) <= SPLIT_INCIDENCE_DEGREES {
        return match index {
            0 | 1 => LightOutcome {
                redirected: Some(exit(&faces[1 - index])),
                children: vec![exit(&faces[2])],
            },
            _ => LightOutcome {
                redirected: Some(exit(&faces[0])),
                children: vec![exit(&faces[1])],
            },
        };
    }
    LightOutcome {
        redirected: Some(reflected(&face, hit, dir)),
        children: Vec::new(),
    }
}

fn ice_outcome(center: Vec2, position: Vec2, dir: Vec2) -> LightOutcome {
    let faces = faces(OpticShape::IceCube, center);
    let Some((index, hit)) = entry_face(&faces, position, dir) else {
        return LightOutcome::unchanged();
    };
    LightOutcome {
        redirected: None,
        children: vec![reflected(&faces[index], hit, dir)],
    }
}

/// What happens to a laser at `position` travelling along `dir` when it
/// meets `shape` centred on `center`
pub fn light_outcome(shape: OpticShape, center: Vec2, position: Vec2, dir: Vec2) -> LightOutcome {
    let dir = dir.normalize_or_zero();
    if dir == Vec2::ZERO {
        return LightOutcome::unchanged();
    }
    match shape {
        OpticShape::Diamond => diamond_outcome(center, position, dir),
        OpticShape::Triangle(orientation) => triangle_outcome(orientation, center, position, dir),
        OpticShape::IceCube => ice_outcome(center, position, dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower_left_face_normal() -> Vec2 {
        let seg = LineSeg2::new(Vec2::new(-HALF_PIECE_WIDTH, 0.0), Vec2::new(0.0, -HALF_PIECE_HEIGHT));
        outward_normal(&seg, Vec2::ZERO)
    }

    #[test]
    fn test_split_scale() {
        assert_eq!(split_scale(1), 1.0);
        assert!((split_scale(3) - 1.0 / 3.0_f32.sqrt()).abs() < 1e-6);
        assert_eq!(split_scale(9), MIN_SPLIT_SCALE);
    }

    #[test]
    fn test_diamond_head_on_splits_in_three() {
        let n = lower_left_face_normal();
        let mid = Vec2::new(-HALF_PIECE_WIDTH * 0.5, -HALF_PIECE_HEIGHT * 0.5);
        let outcome = light_outcome(OpticShape::Diamond, Vec2::ZERO, mid + n * 0.05, -n);
        assert_eq!(outcome.children.len(), 2);
        let through = outcome.redirected.unwrap();
        assert!((through.dir + n).length() < 1e-4);
        assert!((outcome.split_scale() - 1.0 / 3.0_f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_diamond_oblique_reflects() {
        // Straight down onto the upper-right face
        let outcome = light_outcome(
            OpticShape::Diamond,
            Vec2::ZERO,
            Vec2::new(HALF_PIECE_WIDTH * 0.5, 1.0),
            Vec2::NEG_Y,
        );
        assert!(outcome.children.is_empty());
        let r = outcome.redirected.unwrap();
        assert!(r.dir.y > 0.0);
        assert!(r.dir.x > 0.0);
    }

    #[test]
    fn test_triangle_hypotenuse_head_on() {
        let orientation = TriangleOrientation::LowerLeft;
        // Optics normal of the hypotenuse points up-right; come in against it
        let n = -orientation.corner_sign().normalize();
        let outcome = light_outcome(OpticShape::Triangle(orientation), Vec2::ZERO, n * 0.8, -n);
        let r = outcome.redirected.unwrap();
        assert_eq!(r.dir, Vec2::NEG_X);
        assert_eq!(outcome.children.len(), 1);
        assert_eq!(outcome.children[0].dir, Vec2::NEG_Y);
    }

    #[test]
    fn test_triangle_leg_head_on_exits_other_leg() {
        let orientation = TriangleOrientation::LowerLeft;
        let outcome = light_outcome(
            OpticShape::Triangle(orientation),
            Vec2::ZERO,
            Vec2::new(-HALF_PIECE_WIDTH - 0.05, -HALF_PIECE_HEIGHT * 0.5),
            Vec2::X,
        );
        let r = outcome.redirected.unwrap();
        assert_eq!(r.dir, Vec2::NEG_Y);
        assert_eq!(outcome.children.len(), 1);
    }

    #[test]
    fn test_ice_passes_and_reflects_child() {
        let outcome = light_outcome(
            OpticShape::IceCube,
            Vec2::ZERO,
            Vec2::new(0.0, -HALF_PIECE_HEIGHT - 0.05),
            Vec2::new(0.3, 1.0),
        );
        assert!(outcome.redirected.is_none());
        assert_eq!(outcome.children.len(), 1);
        assert!(outcome.children[0].dir.y < 0.0);
    }

    #[test]
    fn test_missing_the_shape_is_unchanged() {
        let outcome = light_outcome(OpticShape::Diamond, Vec2::ZERO, Vec2::new(10.0, 10.0), Vec2::X);
        assert_eq!(outcome, LightOutcome::unchanged());
    }
}
