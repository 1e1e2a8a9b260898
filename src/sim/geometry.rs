//! Line-segment geometry for level boundaries
//!
//! Every level piece exposes its collidable surface as a `BoundingLines`
//! polygon: a list of segments, each with an outward facing normal. Balls,
//! projectiles, beams and the paddle are all tested against these.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::rotate_degrees;

/// Tolerance used for parallel and degenerate checks
pub const EPSILON: f32 = 1e-5;

/// A 2D line segment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSeg2 {
    pub p1: Vec2,
    pub p2: Vec2,
}

impl LineSeg2 {
    pub fn new(p1: Vec2, p2: Vec2) -> Self {
        Self { p1, p2 }
    }

    pub fn length(&self) -> f32 {
        (self.p2 - self.p1).length()
    }

    pub fn midpoint(&self) -> Vec2 {
        (self.p1 + self.p2) * 0.5
    }

    /// Parameter in [0, 1] of the closest point on the segment to `p`
    pub fn closest_param(&self, p: Vec2) -> f32 {
        let e = self.p2 - self.p1;
        let len_sq = e.length_squared();
        if len_sq < EPSILON {
            return 0.0;
        }
        ((p - self.p1).dot(e) / len_sq).clamp(0.0, 1.0)
    }

    /// Closest point on the segment to `p`
    pub fn closest_point(&self, p: Vec2) -> Vec2 {
        self.p1 + (self.p2 - self.p1) * self.closest_param(p)
    }

    pub fn distance_sq(&self, p: Vec2) -> f32 {
        (p - self.closest_point(p)).length_squared()
    }

    pub fn translated(&self, offset: Vec2) -> Self {
        Self::new(self.p1 + offset, self.p2 + offset)
    }

    pub fn rotated(&self, degrees: f32, about: Vec2) -> Self {
        Self::new(
            about + rotate_degrees(self.p1 - about, degrees),
            about + rotate_degrees(self.p2 - about, degrees),
        )
    }

    /// Whether this segment crosses another segment
    pub fn intersects(&self, other: &LineSeg2) -> bool {
        let d = self.p2 - self.p1;
        let e = other.p2 - other.p1;
        let denom = d.perp_dot(e);
        let w = other.p1 - self.p1;
        if denom.abs() < EPSILON {
            // Parallel: only collinear overlap counts
            if w.perp_dot(d).abs() > EPSILON {
                return false;
            }
            let len_sq = d.length_squared();
            if len_sq < EPSILON {
                return other.distance_sq(self.p1) < EPSILON;
            }
            let t0 = w.dot(d) / len_sq;
            let t1 = (other.p2 - self.p1).dot(d) / len_sq;
            return t0.max(t1) >= 0.0 && t0.min(t1) <= 1.0;
        }
        let t = w.perp_dot(e) / denom;
        let u = w.perp_dot(d) / denom;
        (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)
    }
}

/// A ray with unit direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray2 {
    pub origin: Vec2,
    pub dir: Vec2,
}

impl Ray2 {
    pub fn new(origin: Vec2, dir: Vec2) -> Self {
        Self {
            origin,
            dir: dir.normalize_or_zero(),
        }
    }

    pub fn point_at(&self, t: f32) -> Vec2 {
        self.origin + self.dir * t
    }

    /// Ray parameter where the ray crosses the segment
    pub fn intersect_segment(&self, seg: &LineSeg2) -> Option<f32> {
        let e = seg.p2 - seg.p1;
        let denom = self.dir.perp_dot(e);
        if denom.abs() < EPSILON {
            return None;
        }
        let w = seg.p1 - self.origin;
        let t = w.perp_dot(e) / denom;
        let u = w.perp_dot(self.dir) / denom;
        if t >= 0.0 && (0.0..=1.0).contains(&u) {
            Some(t)
        } else {
            None
        }
    }

    /// Smallest distance between the ray and a segment, with the ray parameter
    /// where that distance is reached
    pub fn distance_to_segment(&self, seg: &LineSeg2) -> (f32, f32) {
        if let Some(t) = self.intersect_segment(seg) {
            return (0.0, t);
        }
        let mut best = (seg.distance_sq(self.origin).sqrt(), 0.0);
        for p in [seg.p1, seg.p2] {
            let t = (p - self.origin).dot(self.dir).max(0.0);
            let d = (p - self.point_at(t)).length();
            if d < best.0 {
                best = (d, t);
            }
        }
        best
    }

    /// Ray parameter of the entry point into an axis aligned box
    pub fn intersect_aabb(&self, aabb: &Aabb2) -> Option<f32> {
        let mut t_min = 0.0_f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..2 {
            let o = self.origin[axis];
            let d = self.dir[axis];
            let (lo, hi) = (aabb.min[axis], aabb.max[axis]);
            if d.abs() < EPSILON {
                if o < lo || o > hi {
                    return None;
                }
            } else {
                let mut t1 = (lo - o) / d;
                let mut t2 = (hi - o) / d;
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }
                t_min = t_min.max(t1);
                t_max = t_max.min(t2);
                if t_min > t_max {
                    return None;
                }
            }
        }
        Some(t_min)
    }

    /// Ray parameter of the first point inside a circle
    pub fn intersect_circle(&self, circle: &Circle2) -> Option<f32> {
        let m = self.origin - circle.center;
        let b = m.dot(self.dir);
        let c = m.length_squared() - circle.radius * circle.radius;
        if c > 0.0 && b > 0.0 {
            return None;
        }
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }
        Some((-b - disc.sqrt()).max(0.0))
    }
}

/// A circle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle2 {
    pub center: Vec2,
    pub radius: f32,
}

impl Circle2 {
    pub fn new(center: Vec2, radius: f32) -> Self {
        Self { center, radius }
    }

    pub fn overlaps_circle(&self, other: &Circle2) -> bool {
        let r = self.radius + other.radius;
        self.center.distance_squared(other.center) <= r * r
    }

    pub fn overlaps_aabb(&self, aabb: &Aabb2) -> bool {
        aabb.distance_sq(self.center) <= self.radius * self.radius
    }
}

/// Axis aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb2 {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb2 {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center(center: Vec2, half_extents: Vec2) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec2 {
        (self.max - self.min) * 0.5
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn overlaps(&self, other: &Aabb2) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn expanded(&self, amount: f32) -> Self {
        Self::new(self.min - Vec2::splat(amount), self.max + Vec2::splat(amount))
    }

    pub fn union(&self, other: &Aabb2) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn closest_point(&self, p: Vec2) -> Vec2 {
        p.clamp(self.min, self.max)
    }

    pub fn distance_sq(&self, p: Vec2) -> f32 {
        (p - self.closest_point(p)).length_squared()
    }

    /// Whether a segment passes through (or lies inside) the box
    pub fn intersects_segment(&self, seg: &LineSeg2) -> bool {
        if self.contains(seg.p1) || self.contains(seg.p2) {
            return true;
        }
        let len = seg.length();
        if len < EPSILON {
            return false;
        }
        Ray2::new(seg.p1, seg.p2 - seg.p1)
            .intersect_aabb(self)
            .is_some_and(|t| t <= len)
    }
}

/// Result of a collision check
#[derive(Debug, Clone)]
pub struct CollisionResult {
    /// Whether a collision occurred
    pub hit: bool,
    /// Collision point on the boundary (if hit)
    pub point: Vec2,
    /// Surface normal at collision (pointing toward the colliding body, for reflection)
    pub normal: Vec2,
    /// Penetration depth (for position correction)
    pub penetration: f32,
}

impl CollisionResult {
    pub fn miss() -> Self {
        Self {
            hit: false,
            point: Vec2::ZERO,
            normal: Vec2::ZERO,
            penetration: 0.0,
        }
    }
}

/// Result of a swept circle test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweptCollision {
    pub normal: Vec2,
    /// Index of the boundary line that was struck
    pub line_index: usize,
    /// How long ago (in seconds, within the tested step) the contact began
    pub time_since_collision: f32,
}

/// Reflect velocity off a surface with given normal
#[inline]
pub fn reflect(vel: Vec2, normal: Vec2) -> Vec2 {
    vel - 2.0 * vel.dot(normal) * normal
}

/// Polygonal boundary built from line segments and their outward normals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingLines {
    lines: Vec<LineSeg2>,
    normals: Vec<Vec2>,
}

impl BoundingLines {
    pub fn new(lines: Vec<LineSeg2>, normals: Vec<Vec2>) -> Self {
        debug_assert_eq!(lines.len(), normals.len());
        Self { lines, normals }
    }

    /// Closed axis aligned rectangle with all four sides
    pub fn rectangle(center: Vec2, half_extents: Vec2) -> Self {
        let (hw, hh) = (half_extents.x, half_extents.y);
        let tl = center + Vec2::new(-hw, hh);
        let tr = center + Vec2::new(hw, hh);
        let bl = center + Vec2::new(-hw, -hh);
        let br = center + Vec2::new(hw, -hh);
        Self::new(
            vec![
                LineSeg2::new(tl, bl),
                LineSeg2::new(bl, br),
                LineSeg2::new(br, tr),
                LineSeg2::new(tr, tl),
            ],
            vec![Vec2::NEG_X, Vec2::NEG_Y, Vec2::X, Vec2::Y],
        )
    }

    pub fn push(&mut self, line: LineSeg2, normal: Vec2) {
        self.lines.push(line);
        self.normals.push(normal);
    }

    pub fn append(&mut self, other: &BoundingLines) {
        self.lines.extend_from_slice(&other.lines);
        self.normals.extend_from_slice(&other.normals);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.normals.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[LineSeg2] {
        &self.lines
    }

    pub fn normals(&self) -> &[Vec2] {
        &self.normals
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LineSeg2, &Vec2)> {
        self.lines.iter().zip(self.normals.iter())
    }

    /// Static circle test, returns the deepest contact
    pub fn collide_circle(&self, circle: &Circle2) -> CollisionResult {
        let mut best = CollisionResult::miss();
        for (line, normal) in self.iter() {
            let param = line.closest_param(circle.center);
            let closest = line.p1 + (line.p2 - line.p1) * param;
            let offset = circle.center - closest;
            let dist = offset.length();
            if dist >= circle.radius {
                continue;
            }
            let penetration = circle.radius - dist;
            if best.hit && penetration <= best.penetration {
                continue;
            }
            // Corners push out radially, faces push out along the face normal
            let at_end = param <= EPSILON || param >= 1.0 - EPSILON;
            let n = if at_end && dist > EPSILON {
                offset / dist
            } else {
                *normal
            };
            best = CollisionResult {
                hit: true,
                point: closest,
                normal: n,
                penetration,
            };
        }
        best
    }

    /// Swept circle test over the last `dt` seconds of motion
    ///
    /// Sub-steps from the previous position so thin boundaries are not tunnelled.
    pub fn collide_swept(&self, circle: &Circle2, velocity: Vec2, dt: f32) -> Option<SweptCollision> {
        if self.is_empty() {
            return None;
        }
        let travel = velocity * dt;
        let step_len = (circle.radius * 0.25).max(EPSILON);
        let steps = ((travel.length() / step_len).ceil() as usize).clamp(1, 32);
        let start = circle.center - travel;
        for i in 0..=steps {
            let frac = i as f32 / steps as f32;
            let step_circle = Circle2::new(start + travel * frac, circle.radius);
            let mut hit_index = None;
            let mut deepest = -1.0;
            for (idx, line) in self.lines.iter().enumerate() {
                let d = line.distance_sq(step_circle.center).sqrt();
                if d < step_circle.radius && step_circle.radius - d > deepest {
                    deepest = step_circle.radius - d;
                    hit_index = Some(idx);
                }
            }
            if let Some(idx) = hit_index {
                let result = self.collide_circle(&step_circle);
                let normal = if result.hit { result.normal } else { self.normals[idx] };
                return Some(SweptCollision {
                    normal,
                    line_index: idx,
                    time_since_collision: dt * (1.0 - frac),
                });
            }
        }
        None
    }

    /// Smallest ray parameter at which the ray crosses any boundary line
    pub fn ray_collision(&self, ray: &Ray2) -> Option<f32> {
        self.lines
            .iter()
            .filter_map(|l| ray.intersect_segment(l))
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Like `ray_collision`, but lines within `tolerance` of the ray also count
    pub fn ray_collision_with_tolerance(&self, ray: &Ray2, tolerance: f32) -> Option<f32> {
        if tolerance <= 0.0 {
            return self.ray_collision(ray);
        }
        self.lines
            .iter()
            .filter_map(|l| {
                let (dist, t) = ray.distance_to_segment(l);
                (dist <= tolerance).then_some(t)
            })
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Index and ray parameter of the nearest line the ray crosses
    pub fn ray_collision_line(&self, ray: &Ray2) -> Option<(usize, f32)> {
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(i, l)| ray.intersect_segment(l).map(|t| (i, t)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn collides_with_lines(&self, other: &BoundingLines) -> bool {
        self.lines
            .iter()
            .any(|a| other.lines.iter().any(|b| a.intersects(b)))
    }

    pub fn collides_with_aabb(&self, aabb: &Aabb2) -> bool {
        self.lines.iter().any(|l| aabb.intersects_segment(l))
    }

    pub fn collides_with_segment(&self, seg: &LineSeg2) -> bool {
        self.lines.iter().any(|l| l.intersects(seg))
    }

    /// Squared distance from a point to the nearest boundary line
    pub fn closest_distance_sq(&self, p: Vec2) -> Option<f32> {
        self.lines
            .iter()
            .map(|l| l.distance_sq(p))
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn aabb(&self) -> Option<Aabb2> {
        let first = self.lines.first()?;
        let mut aabb = Aabb2::new(first.p1, first.p2);
        for l in &self.lines[1..] {
            aabb = aabb.union(&Aabb2::new(l.p1, l.p2));
        }
        Some(aabb)
    }

    pub fn rotate(&mut self, degrees: f32, about: Vec2) {
        for line in &mut self.lines {
            *line = line.rotated(degrees, about);
        }
        for n in &mut self.normals {
            *n = rotate_degrees(*n, degrees);
        }
    }

    pub fn translate(&mut self, offset: Vec2) {
        for line in &mut self.lines {
            *line = line.translated(offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_segment_hit() {
        let ray = Ray2::new(Vec2::ZERO, Vec2::X);
        let seg = LineSeg2::new(Vec2::new(5.0, -1.0), Vec2::new(5.0, 1.0));
        let t = ray.intersect_segment(&seg).unwrap();
        assert!((t - 5.0).abs() < 1e-5);

        let behind = LineSeg2::new(Vec2::new(-5.0, -1.0), Vec2::new(-5.0, 1.0));
        assert!(ray.intersect_segment(&behind).is_none());
    }

    #[test]
    fn test_ray_aabb() {
        let aabb = Aabb2::from_center(Vec2::new(10.0, 0.0), Vec2::new(1.0, 1.0));
        let ray = Ray2::new(Vec2::ZERO, Vec2::X);
        assert!((ray.intersect_aabb(&aabb).unwrap() - 9.0).abs() < 1e-5);
        let miss = Ray2::new(Vec2::new(0.0, 5.0), Vec2::X);
        assert!(miss.intersect_aabb(&aabb).is_none());
    }

    #[test]
    fn test_circle_collision_normal() {
        let bounds = BoundingLines::rectangle(Vec2::ZERO, Vec2::new(1.25, 0.5));
        let ball = Circle2::new(Vec2::new(0.0, 0.7), 0.25);
        let result = bounds.collide_circle(&ball);
        assert!(result.hit);
        assert!((result.normal - Vec2::Y).length() < 1e-5);
        assert!((result.penetration - 0.05).abs() < 1e-4);

        let far = Circle2::new(Vec2::new(0.0, 2.0), 0.25);
        assert!(!bounds.collide_circle(&far).hit);
    }

    #[test]
    fn test_swept_collision_prevents_tunnelling() {
        let mut bounds = BoundingLines::default();
        bounds.push(LineSeg2::new(Vec2::new(-2.0, 0.0), Vec2::new(2.0, 0.0)), Vec2::Y);
        // Ball ends well below the line, having started above it
        let ball = Circle2::new(Vec2::new(0.0, -2.0), 0.1);
        let hit = bounds.collide_swept(&ball, Vec2::new(0.0, -40.0), 0.1);
        let hit = hit.expect("should detect crossing");
        assert_eq!(hit.line_index, 0);
        assert!(hit.time_since_collision > 0.0);
    }

    #[test]
    fn test_segments_intersect() {
        let a = LineSeg2::new(Vec2::new(-1.0, 0.0), Vec2::new(1.0, 0.0));
        let b = LineSeg2::new(Vec2::new(0.0, -1.0), Vec2::new(0.0, 1.0));
        let c = LineSeg2::new(Vec2::new(2.0, -1.0), Vec2::new(2.0, 1.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_rotate_bounds() {
        let mut bounds = BoundingLines::rectangle(Vec2::ZERO, Vec2::new(1.0, 0.5));
        bounds.rotate(90.0, Vec2::ZERO);
        let aabb = bounds.aabb().unwrap();
        assert!((aabb.half_extents() - Vec2::new(0.5, 1.0)).length() < 1e-4);
    }

    #[test]
    fn test_reflect() {
        let v = Vec2::new(1.0, -1.0);
        let r = reflect(v, Vec2::Y);
        assert!((r - Vec2::new(1.0, 1.0)).length() < 1e-6);
    }

    #[test]
    fn test_ray_tolerance() {
        let mut bounds = BoundingLines::default();
        bounds.push(LineSeg2::new(Vec2::new(5.0, 0.3), Vec2::new(5.0, 1.0)), Vec2::NEG_X);
        let ray = Ray2::new(Vec2::ZERO, Vec2::X);
        assert!(bounds.ray_collision(&ray).is_none());
        let t = bounds.ray_collision_with_tolerance(&ray, 0.35).unwrap();
        assert!((t - 5.0).abs() < 1e-4);
    }
}
