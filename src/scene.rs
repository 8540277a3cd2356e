//! Scene abstraction: the contract the core consumes, plus a minimal
//! in-crate implementation used only by tests and benches.
//!
//! The core never mutates scene geometry. Patches and aggregate geometries
//! are identified by a caller-assigned `u64` (`id()`); the solver keeps its
//! own mapping from those ids to element ids rather than requiring the
//! scene to carry a reserved "radiance data" slot, which keeps the trait
//! object-safe.

use std::rc::Rc;

use glam::Vec3;

use crate::color::Color;

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb { min: Vec3::splat(f32::MAX), max: Vec3::splat(f32::MIN) };

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut b = Aabb::EMPTY;
        for &p in points {
            b.min = b.min.min(p);
            b.max = b.max.max(p);
        }
        b
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb { min: self.min.min(other.min), max: self.max.max(other.max) }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn volume(&self) -> f32 {
        let e = self.extent();
        (e.x.max(0.0) + f32::EPSILON) * (e.y.max(0.0) + f32::EPSILON) * (e.z.max(0.0) + f32::EPSILON)
    }

    pub fn largest_axis_length(&self) -> f32 {
        let e = self.extent();
        e.x.max(e.y).max(e.z)
    }

    pub fn corners(&self) -> [Vec3; 8] {
        [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ]
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y && p.z >= self.min.z && p.z <= self.max.z
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

impl Ray {
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }

    /// Intersects the ray against `bounds` within `[t_min, t_max]`, returning
    /// the clipped `(t_min, t_max)` on hit.
    pub fn intersect_aabb(&self, bounds: &Aabb, t_min: f32, t_max: f32) -> Option<(f32, f32)> {
        let mut tmin = t_min;
        let mut tmax = t_max;
        for axis in 0..3 {
            let (o, d, lo, hi) = match axis {
                0 => (self.origin.x, self.dir.x, bounds.min.x, bounds.max.x),
                1 => (self.origin.y, self.dir.y, bounds.min.y, bounds.max.y),
                _ => (self.origin.z, self.dir.z, bounds.min.z, bounds.max.z),
            };
            if d.abs() < 1e-12 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (lo - o) * inv;
            let mut t1 = (hi - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            tmin = tmin.max(t0);
            tmax = tmax.min(t1);
            if tmin > tmax {
                return None;
            }
        }
        Some((tmin, tmax))
    }
}

/// A planar convex polygon with 3 or 4 vertices: the unit of emission,
/// reflection and occlusion in the scene.
pub trait Patch: std::fmt::Debug {
    /// Caller-assigned stable identity, used as a key into the solver's own
    /// patch-to-element map (stands in for the reference implementation's
    /// `radiance_data` pointer slot).
    fn id(&self) -> u64;
    fn num_vertices(&self) -> usize;
    fn vertex(&self, i: usize) -> Vec3;
    fn normal(&self) -> Vec3;
    fn plane_constant(&self) -> f32;
    fn area(&self) -> f32;
    fn midpoint(&self) -> Vec3;
    /// Maps a point in the patch's own `(u, v)` reference domain (unit
    /// triangle or unit square) to a world-space point on the patch.
    fn uniform_point(&self, u: f32, v: f32) -> Vec3;
    fn diffuse_reflectance(&self) -> Color;
    /// Self-emitted radiance (already divided by pi from exitance).
    fn self_emitted_radiance(&self) -> Color;
    fn is_light_source(&self) -> bool {
        !self.self_emitted_radiance().is_black()
    }
    fn direct_potential(&self) -> f32 {
        0.0
    }
}

/// A node in the scene's geometry tree: either an aggregate (inner node)
/// with children, or a primitive leaf exposing a patch list.
pub trait SceneGeometry: std::fmt::Debug {
    fn id(&self) -> u64;
    fn is_compound(&self) -> bool;
    fn children(&self) -> Vec<Rc<dyn SceneGeometry>>;
    fn patches(&self) -> Vec<Rc<dyn Patch>>;
    fn bounds(&self) -> Aabb;
}

#[derive(Clone, Copy, Debug)]
pub struct Hit {
    pub patch_id: u64,
    pub t: f32,
}

/// Ray query collaborator: real ray-patch intersection plus the
/// shadow-cache hint the form-factor kernel consults before doing a full
/// test.
pub trait RayCaster {
    fn patch_intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<Hit>;
    fn patch_list_intersect(&self, patches: &[Rc<dyn Patch>], ray: &Ray, t_min: f32, t_max: f32) -> Option<Hit>;
}

/// Whole-scene statistics the refinement oracle scales its thresholds by.
#[derive(Clone, Copy, Debug)]
pub struct SceneStats {
    pub total_area: f32,
    pub max_self_emitted_radiance: Color,
    pub max_self_emitted_power: Color,
    pub max_direct_potential: f32,
    pub max_direct_importance: f32,
}

// ---------------------------------------------------------------------
// Minimal in-crate test scene, used only by unit/integration tests.
// ---------------------------------------------------------------------

/// A plain, non-polymorphic quad or triangle patch for tests.
#[derive(Clone, Debug)]
pub struct TestPatch {
    pub id: u64,
    pub vertices: Vec<Vec3>,
    pub normal: Vec3,
    pub reflectance: Color,
    pub emittance: Color,
    pub direct_potential: f32,
}

impl TestPatch {
    pub fn quad(id: u64, v0: Vec3, v1: Vec3, v2: Vec3, v3: Vec3, reflectance: Color, emittance: Color) -> Self {
        let normal = (v1 - v0).cross(v2 - v0).normalize();
        TestPatch { id, vertices: vec![v0, v1, v2, v3], normal, reflectance, emittance, direct_potential: 0.0 }
    }

    pub fn triangle(id: u64, v0: Vec3, v1: Vec3, v2: Vec3, reflectance: Color, emittance: Color) -> Self {
        let normal = (v1 - v0).cross(v2 - v0).normalize();
        TestPatch { id, vertices: vec![v0, v1, v2], normal, reflectance, emittance, direct_potential: 0.0 }
    }

    fn plane_constant_impl(&self) -> f32 {
        -self.normal.dot(self.vertices[0])
    }
}

impl Patch for TestPatch {
    fn id(&self) -> u64 {
        self.id
    }

    fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    fn vertex(&self, i: usize) -> Vec3 {
        self.vertices[i]
    }

    fn normal(&self) -> Vec3 {
        self.normal
    }

    fn plane_constant(&self) -> f32 {
        self.plane_constant_impl()
    }

    fn area(&self) -> f32 {
        if self.vertices.len() == 3 {
            0.5 * (self.vertices[1] - self.vertices[0]).cross(self.vertices[2] - self.vertices[0]).length()
        } else {
            let a = 0.5 * (self.vertices[1] - self.vertices[0]).cross(self.vertices[2] - self.vertices[0]).length();
            let b = 0.5 * (self.vertices[2] - self.vertices[0]).cross(self.vertices[3] - self.vertices[0]).length();
            a + b
        }
    }

    fn midpoint(&self) -> Vec3 {
        let sum: Vec3 = self.vertices.iter().copied().sum();
        sum / self.vertices.len() as f32
    }

    fn uniform_point(&self, u: f32, v: f32) -> Vec3 {
        if self.vertices.len() == 3 {
            let w = 1.0 - u - v;
            self.vertices[0] * w + self.vertices[1] * u + self.vertices[2] * v
        } else {
            let bottom = self.vertices[0] * (1.0 - u) + self.vertices[1] * u;
            let top = self.vertices[3] * (1.0 - u) + self.vertices[2] * u;
            bottom * (1.0 - v) + top * v
        }
    }

    fn diffuse_reflectance(&self) -> Color {
        self.reflectance
    }

    fn self_emitted_radiance(&self) -> Color {
        self.emittance
    }

    fn direct_potential(&self) -> f32 {
        self.direct_potential
    }
}

/// A primitive (leaf) geometry wrapping a single patch, or a compound node
/// aggregating children. Used only for tests.
#[derive(Debug)]
pub enum TestGeometry {
    Primitive { id: u64, patch: Rc<TestPatch> },
    Compound { id: u64, children: Vec<Rc<TestGeometry>> },
}

impl TestGeometry {
    pub fn leaf(patch: Rc<TestPatch>) -> Rc<TestGeometry> {
        let id = patch.id;
        Rc::new(TestGeometry::Primitive { id, patch })
    }

    pub fn compound(id: u64, children: Vec<Rc<TestGeometry>>) -> Rc<TestGeometry> {
        Rc::new(TestGeometry::Compound { id, children })
    }
}

impl SceneGeometry for TestGeometry {
    fn id(&self) -> u64 {
        match self {
            TestGeometry::Primitive { id, .. } => *id,
            TestGeometry::Compound { id, .. } => *id,
        }
    }

    fn is_compound(&self) -> bool {
        matches!(self, TestGeometry::Compound { .. })
    }

    fn children(&self) -> Vec<Rc<dyn SceneGeometry>> {
        match self {
            TestGeometry::Primitive { .. } => Vec::new(),
            TestGeometry::Compound { children, .. } => {
                children.iter().map(|c| c.clone() as Rc<dyn SceneGeometry>).collect()
            }
        }
    }

    fn patches(&self) -> Vec<Rc<dyn Patch>> {
        match self {
            TestGeometry::Primitive { patch, .. } => vec![patch.clone() as Rc<dyn Patch>],
            TestGeometry::Compound { .. } => Vec::new(),
        }
    }

    fn bounds(&self) -> Aabb {
        match self {
            TestGeometry::Primitive { patch, .. } => {
                let pts: Vec<Vec3> = (0..patch.num_vertices()).map(|i| patch.vertex(i)).collect();
                Aabb::from_points(&pts)
            }
            TestGeometry::Compound { children, .. } => {
                children.iter().map(|c| c.bounds()).fold(Aabb::EMPTY, |a, b| a.union(&b))
            }
        }
    }
}

/// A brute-force ray caster over a flat patch list, for tests only.
pub struct TestRayCaster {
    pub patches: Vec<Rc<dyn Patch>>,
}

impl TestRayCaster {
    fn intersect_one(patch: &dyn Patch, ray: &Ray, t_min: f32, t_max: f32) -> Option<f32> {
        let n = patch.normal();
        let denom = n.dot(ray.dir);
        if denom.abs() < 1e-9 {
            return None;
        }
        let t = -(n.dot(ray.origin) + patch.plane_constant()) / denom;
        if t < t_min || t > t_max {
            return None;
        }
        let p = ray.at(t);
        // Point-in-polygon via same-side test over the fan of triangles.
        let nv = patch.num_vertices();
        let mut inside = true;
        for i in 0..nv {
            let a = patch.vertex(i);
            let b = patch.vertex((i + 1) % nv);
            let edge = b - a;
            let to_p = p - a;
            if edge.cross(to_p).dot(n) < -1e-6 {
                inside = false;
                break;
            }
        }
        if inside {
            Some(t)
        } else {
            None
        }
    }
}

impl RayCaster for TestRayCaster {
    fn patch_intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<Hit> {
        self.patch_list_intersect(&self.patches, ray, t_min, t_max)
    }

    fn patch_list_intersect(&self, patches: &[Rc<dyn Patch>], ray: &Ray, t_min: f32, t_max: f32) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        for p in patches {
            if let Some(t) = Self::intersect_one(p.as_ref(), ray, t_min, t_max) {
                if best.map(|h| t < h.t).unwrap_or(true) {
                    best = Some(Hit { patch_id: p.id(), t });
                }
            }
        }
        best
    }
}
