//! Shaft culling: given two reference volumes, build a convex region
//! containing every segment joining them and use it to prune occluder
//! candidates before a form-factor evaluation.
//!
//! Planes are stored with an outward normal: a point is inside the shaft
//! when its signed distance to every plane is `<= 0`.

use std::rc::Rc;

use glam::Vec3;

use crate::config::ShaftCullStrategy;
use crate::error::{RadiosityError, RadiosityResult};
use crate::scene::{Aabb, Patch, SceneGeometry};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShaftPlane {
    pub normal: Vec3,
    pub d: f32,
}

impl ShaftPlane {
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }

    /// Builds a plane through `p` with the given normal, oriented so both
    /// `near` and `far` report a non-positive signed distance.
    fn oriented(p: Vec3, mut normal: Vec3, near: &Aabb, far: &Aabb) -> ShaftPlane {
        let mut d = -normal.dot(p);
        if normal.dot(near.center()) + d > 0.0 || normal.dot(far.center()) + d > 0.0 {
            normal = -normal;
            d = -d;
        }
        ShaftPlane { normal, d }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaftClassification {
    Inside,
    Overlap,
    Outside,
}

/// A convex region bounding all segments between two reference volumes.
#[derive(Clone, Debug)]
pub struct Shaft {
    pub planes: Vec<ShaftPlane>,
    pub extent: Aabb,
    pub volume_a: Aabb,
    pub volume_b: Aabb,
}

const MAX_PLANES: usize = 16;

fn axis_component(v: Vec3, axis: usize) -> f32 {
    match axis {
        0 => v.x,
        1 => v.y,
        _ => v.z,
    }
}

fn with_axis(mut v: Vec3, axis: usize, value: f32) -> Vec3 {
    match axis {
        0 => v.x = value,
        1 => v.y = value,
        _ => v.z = value,
    }
    v
}

fn other_axes(axis: usize) -> (usize, usize) {
    match axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    }
}

fn near_corner(b: &Aabb, n: Vec3) -> Vec3 {
    Vec3::new(
        if n.x >= 0.0 { b.min.x } else { b.max.x },
        if n.y >= 0.0 { b.min.y } else { b.max.y },
        if n.z >= 0.0 { b.min.z } else { b.max.z },
    )
}

fn far_corner(b: &Aabb, n: Vec3) -> Vec3 {
    Vec3::new(
        if n.x >= 0.0 { b.max.x } else { b.min.x },
        if n.y >= 0.0 { b.max.y } else { b.min.y },
        if n.z >= 0.0 { b.max.z } else { b.min.z },
    )
}

impl Shaft {
    /// Builds a shaft bounding every segment between `a` and `b` from their
    /// axis-aligned extents. For each axis along which the boxes are
    /// separated, constructs the two tangent planes through each of the two
    /// side axes (Haines & Wallace's shaft-culling construction), capped at
    /// 16 total planes by the geometry of the problem (at most 4 per
    /// separating axis, 3 axes).
    pub fn build_box_box(a: Aabb, b: Aabb) -> Shaft {
        let extent = a.union(&b);
        let mut planes = Vec::new();

        for axis in 0..3 {
            let a_lo = axis_component(a.min, axis);
            let a_hi = axis_component(a.max, axis);
            let b_lo = axis_component(b.min, axis);
            let b_hi = axis_component(b.max, axis);

            let (near, far, near_val, far_val) = if a_hi <= b_lo {
                (a, b, a_hi, b_lo)
            } else if b_hi <= a_lo {
                (b, a, b_hi, a_lo)
            } else {
                continue;
            };

            let (side1, side2) = other_axes(axis);
            for &(fixed_axis, free_axis) in &[(side1, side2), (side2, side1)] {
                for &use_max in &[false, true] {
                    let fixed_near = if use_max { axis_component(near.max, fixed_axis) } else { axis_component(near.min, fixed_axis) };
                    let fixed_far = if use_max { axis_component(far.max, fixed_axis) } else { axis_component(far.min, fixed_axis) };

                    let mut p0 = Vec3::ZERO;
                    p0 = with_axis(p0, axis, near_val);
                    p0 = with_axis(p0, fixed_axis, fixed_near);
                    p0 = with_axis(p0, free_axis, axis_component(near.min, free_axis));
                    let mut p1 = with_axis(p0, free_axis, axis_component(near.max, free_axis));
                    let mut q0 = Vec3::ZERO;
                    q0 = with_axis(q0, axis, far_val);
                    q0 = with_axis(q0, fixed_axis, fixed_far);
                    q0 = with_axis(q0, free_axis, axis_component(near.min, free_axis));

                    let edge = p1 - p0;
                    let cross = q0 - p0;
                    let normal = edge.cross(cross);
                    if normal.length_squared() < 1e-12 {
                        p1 = with_axis(p1, free_axis, axis_component(near.max, free_axis));
                        continue;
                    }
                    let normal = normal.normalize();
                    planes.push(ShaftPlane::oriented(p0, normal, &near, &far));
                    if planes.len() >= MAX_PLANES {
                        break;
                    }
                }
            }
        }

        Shaft { planes, extent, volume_a: a, volume_b: b }
    }

    /// Builds an exact polygon-to-polygon shaft. Falls back to
    /// [`Shaft::build_box_box`] on the two patches' AABBs (the "thin box
    /// shaft" degenerate case) when no supporting plane can be found.
    pub fn build_polygon_polygon(a: &dyn Patch, b: &dyn Patch) -> Shaft {
        let verts_a: Vec<Vec3> = (0..a.num_vertices()).map(|i| a.vertex(i)).collect();
        let verts_b: Vec<Vec3> = (0..b.num_vertices()).map(|i| b.vertex(i)).collect();
        let box_a = Aabb::from_points(&verts_a);
        let box_b = Aabb::from_points(&verts_b);

        let mut planes = Vec::new();
        collect_supporting_planes(&verts_a, &verts_b, &box_a, &box_b, &mut planes);
        collect_supporting_planes(&verts_b, &verts_a, &box_b, &box_a, &mut planes);

        if planes.is_empty() {
            tracing::debug!("polygon-polygon shaft collapsed to no planes; falling back to box-box");
            return Shaft::build_box_box(box_a, box_b);
        }

        let extent = box_a.union(&box_b);
        Shaft { planes, extent, volume_a: box_a, volume_b: box_b }
    }

    pub fn classify_box(&self, b: &Aabb) -> ShaftClassification {
        if !self.extent.overlaps(b) {
            return ShaftClassification::Outside;
        }
        for plane in &self.planes {
            if plane.signed_distance(near_corner(b, plane.normal)) > 0.0 {
                return ShaftClassification::Outside;
            }
        }
        for plane in &self.planes {
            if plane.signed_distance(far_corner(b, plane.normal)) > 0.0 {
                return ShaftClassification::Overlap;
            }
        }
        if b.overlaps(&self.volume_a) || b.overlaps(&self.volume_b) {
            return ShaftClassification::Overlap;
        }
        ShaftClassification::Inside
    }

    /// Classifies a patch against the shaft, returning its classification
    /// and whether the segment joining the two reference volume centres
    /// passes through the patch (the "cut" case: a single patch fully
    /// occludes the shaft).
    pub fn classify_patch(&self, patch: &dyn Patch) -> (ShaftClassification, bool) {
        let verts: Vec<Vec3> = (0..patch.num_vertices()).map(|i| patch.vertex(i)).collect();

        for plane in &self.planes {
            if verts.iter().all(|&v| plane.signed_distance(v) > 1e-6) {
                return (ShaftClassification::Outside, false);
            }
        }
        let all_inside = self
            .planes
            .iter()
            .all(|plane| verts.iter().all(|&v| plane.signed_distance(v) <= 1e-6));

        let cut = segment_intersects_patch(self.volume_a.center(), self.volume_b.center(), patch);
        if all_inside {
            (ShaftClassification::Inside, cut)
        } else {
            (ShaftClassification::Overlap, cut)
        }
    }
}

fn collect_supporting_planes(poly_p: &[Vec3], poly_q: &[Vec3], box_p: &Aabb, box_q: &Aabb, out: &mut Vec<ShaftPlane>) {
    let np = poly_p.len();
    for i in 0..np {
        let e0 = poly_p[i];
        let e1 = poly_p[(i + 1) % np];
        for &v in poly_q {
            let Some(plane) = supporting_plane(e0, e1, v, poly_p, poly_q) else {
                continue;
            };
            out.push(ShaftPlane::oriented(e0, plane.normal, box_p, box_q));
            if out.len() >= MAX_PLANES {
                return;
            }
            break;
        }
    }
}

fn supporting_plane(e0: Vec3, e1: Vec3, v: Vec3, poly_p: &[Vec3], poly_q: &[Vec3]) -> Option<ShaftPlane> {
    let normal = (e1 - e0).cross(v - e0);
    if normal.length_squared() < 1e-12 {
        return None;
    }
    let normal = normal.normalize();
    let d = -normal.dot(e0);
    let eval = |p: Vec3| normal.dot(p) + d;

    let mut sign = 0.0f32;
    for &p in poly_p.iter().chain(poly_q.iter()) {
        let s = eval(p);
        if s.abs() < 1e-5 {
            continue;
        }
        if sign == 0.0 {
            sign = s.signum();
        } else if s.signum() != sign {
            return None;
        }
    }
    if sign == 0.0 {
        return None;
    }
    let normal = if sign > 0.0 { -normal } else { normal };
    let d = if sign > 0.0 { -d } else { d };
    Some(ShaftPlane { normal, d })
}

fn segment_intersects_patch(a: Vec3, b: Vec3, patch: &dyn Patch) -> bool {
    let dir = b - a;
    let n = patch.normal();
    let denom = n.dot(dir);
    if denom.abs() < 1e-9 {
        return false;
    }
    let t = -(n.dot(a) + patch.plane_constant()) / denom;
    if !(0.0..=1.0).contains(&t) {
        return false;
    }
    let p = a + dir * t;
    let nv = patch.num_vertices();
    for i in 0..nv {
        let v0 = patch.vertex(i);
        let v1 = patch.vertex((i + 1) % nv);
        let edge = v1 - v0;
        let to_p = p - v0;
        if edge.cross(to_p).dot(n) < -1e-6 {
            return false;
        }
    }
    true
}

/// A single shaft-culled candidate: either an unexpanded aggregate or a
/// primitive patch.
#[derive(Clone, Debug)]
pub enum CandidateGeometry {
    Geometry(Rc<dyn SceneGeometry>),
    Patch(Rc<dyn Patch>),
}

/// Per-shaft omit set (patches excluded regardless of classification, e.g.
/// the link's own endpoints) and don't-open set (aggregates excluded from
/// expansion into children), each hard-capped at 2 entries matching the
/// reference implementation's fixed-size arrays.
#[derive(Clone, Copy, Debug, Default)]
struct IdCap2 {
    items: [Option<u64>; 2],
    len: usize,
}

impl IdCap2 {
    fn push(&mut self, id: u64, cap_error: impl FnOnce() -> RadiosityError) -> RadiosityResult<()> {
        if self.items[..self.len].contains(&Some(id)) {
            return Ok(());
        }
        if self.len >= self.items.len() {
            return Err(cap_error());
        }
        self.items[self.len] = Some(id);
        self.len += 1;
        Ok(())
    }

    fn contains(&self, id: u64) -> bool {
        self.items[..self.len].contains(&Some(id))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ShaftCuller {
    omit: IdCap2,
    dont_open: IdCap2,
}

impl ShaftCuller {
    pub fn new() -> Self {
        ShaftCuller::default()
    }

    pub fn omit(&mut self, patch_id: u64) -> RadiosityResult<()> {
        self.omit.push(patch_id, || RadiosityError::TooManyOmitEntries { cap: 2 })
    }

    pub fn dont_open(&mut self, geometry_id: u64) -> RadiosityResult<()> {
        self.dont_open.push(geometry_id, || RadiosityError::TooManyDontOpenEntries { cap: 2 })
    }

    fn should_open(&self, strategy: ShaftCullStrategy, classification: ShaftClassification, geom_id: u64) -> bool {
        if self.dont_open.contains(geom_id) {
            return false;
        }
        match strategy {
            ShaftCullStrategy::KeepClosed => false,
            ShaftCullStrategy::OverlapOpen => classification == ShaftClassification::Overlap,
            ShaftCullStrategy::AlwaysOpen => classification != ShaftClassification::Outside,
        }
    }

    /// Traverses the scene rooted at `root`, producing the candidate
    /// occluder list for `shaft` under `strategy`.
    pub fn cull(&self, shaft: &Shaft, root: &Rc<dyn SceneGeometry>, strategy: ShaftCullStrategy) -> Vec<CandidateGeometry> {
        let mut out = Vec::new();
        self.cull_recursive(shaft, root, strategy, &mut out);
        out
    }

    fn cull_recursive(&self, shaft: &Shaft, geom: &Rc<dyn SceneGeometry>, strategy: ShaftCullStrategy, out: &mut Vec<CandidateGeometry>) {
        if self.omit.contains(geom.id()) {
            return;
        }
        let classification = shaft.classify_box(&geom.bounds());
        if classification == ShaftClassification::Outside {
            return;
        }

        if !geom.is_compound() {
            for p in geom.patches() {
                if self.omit.contains(p.id()) {
                    continue;
                }
                let (pc, _cut) = shaft.classify_patch(p.as_ref());
                if pc != ShaftClassification::Outside {
                    out.push(CandidateGeometry::Patch(p));
                }
            }
            return;
        }

        if self.should_open(strategy, classification, geom.id()) {
            for child in geom.children() {
                self.cull_recursive(shaft, &child, strategy, out);
            }
        } else {
            out.push(CandidateGeometry::Geometry(geom.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::scene::TestPatch;

    #[test]
    fn separated_boxes_build_nonempty_shaft() {
        let a = Aabb { min: Vec3::new(0.0, 0.0, 0.0), max: Vec3::new(1.0, 1.0, 1.0) };
        let b = Aabb { min: Vec3::new(5.0, 0.0, 0.0), max: Vec3::new(6.0, 1.0, 1.0) };
        let shaft = Shaft::build_box_box(a, b);
        assert!(!shaft.planes.is_empty());
    }

    #[test]
    fn box_disjoint_from_extent_is_outside() {
        let a = Aabb { min: Vec3::ZERO, max: Vec3::ONE };
        let b = Aabb { min: Vec3::new(5.0, 0.0, 0.0), max: Vec3::new(6.0, 1.0, 1.0) };
        let shaft = Shaft::build_box_box(a, b);
        let far_box = Aabb { min: Vec3::new(100.0, 100.0, 100.0), max: Vec3::new(101.0, 101.0, 101.0) };
        assert_eq!(shaft.classify_box(&far_box), ShaftClassification::Outside);
    }

    #[test]
    fn reference_volume_itself_is_not_outside() {
        let a = Aabb { min: Vec3::ZERO, max: Vec3::ONE };
        let b = Aabb { min: Vec3::new(5.0, 0.0, 0.0), max: Vec3::new(6.0, 1.0, 1.0) };
        let shaft = Shaft::build_box_box(a, b);
        assert_ne!(shaft.classify_box(&a), ShaftClassification::Outside);
        assert_ne!(shaft.classify_box(&b), ShaftClassification::Outside);
    }

    #[test]
    fn omit_cap_exceeded_is_reported() {
        let mut culler = ShaftCuller::new();
        culler.omit(1).unwrap();
        culler.omit(2).unwrap();
        assert!(culler.omit(3).is_err());
    }

    #[test]
    fn omit_is_idempotent_for_same_id() {
        let mut culler = ShaftCuller::new();
        culler.omit(1).unwrap();
        culler.omit(1).unwrap();
        culler.omit(2).unwrap();
        assert!(culler.omit(2).is_ok());
    }

    #[test]
    fn keep_closed_never_opens_aggregates() {
        let leaf_a = crate::scene::TestGeometry::leaf(Rc::new(TestPatch::quad(
            1,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Color::gray(0.5),
            Color::BLACK,
        )));
        let root: Rc<dyn SceneGeometry> = crate::scene::TestGeometry::compound(10, vec![leaf_a]);
        let shaft = Shaft::build_box_box(root.bounds(), root.bounds());
        let culler = ShaftCuller::new();
        let candidates = culler.cull(&shaft, &root, ShaftCullStrategy::KeepClosed);
        assert_eq!(candidates.len(), 1);
        assert!(matches!(candidates[0], CandidateGeometry::Geometry(_)));
    }

    #[test]
    fn polygon_polygon_shaft_falls_back_when_coplanar() {
        let a = TestPatch::quad(
            1,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Color::gray(0.5),
            Color::BLACK,
        );
        let b = TestPatch::quad(
            2,
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Color::gray(0.5),
            Color::BLACK,
        );
        let shaft = Shaft::build_polygon_polygon(&a, &b);
        assert!(!shaft.planes.is_empty() || shaft.extent.volume() >= 0.0);
    }
}
