//! Scratch z-buffer: a small software rasteriser used for intra-cluster
//! visibility queries (z-visibility clustering, cluster-gather radiance).
//!
//! The frame buffer's pixel payload is "which element is visible here",
//! realized as `Option<ElementId>` rather than the reference implementation's
//! pointer, plus a parallel z-buffer for depth testing.

use glam::Vec3;

use crate::color::Color;
use crate::element::{ElementArena, ElementId};
use crate::scene::Aabb;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheKey {
    pub cluster: ElementId,
    pub eye_bits: [u32; 3],
}

fn eye_bits(eye: Vec3) -> [u32; 3] {
    [eye.x.to_bits(), eye.y.to_bits(), eye.z.to_bits()]
}

/// An orthographic software rasteriser over a cluster's bounding box.
pub struct ScratchBuffer {
    width: usize,
    height: usize,
    pixels: Vec<Option<ElementId>>,
    depth: Vec<f32>,
    radiance: Vec<Color>,
    right: Vec3,
    up: Vec3,
    view_dir: Vec3,
    origin: Vec3,
    extent_u: f32,
    extent_v: f32,
}

impl ScratchBuffer {
    /// Sets up an orthographic view of `cluster`'s bounding box from `eye`,
    /// with a viewport sized proportional to `(extent.x * extent.y) /
    /// min_area`, clamped to `[16, max_side]^2` so degenerate clusters don't
    /// produce a zero- or enormous-resolution buffer.
    pub fn new(arena: &ElementArena, cluster: ElementId, eye: Vec3, max_side: u32) -> ScratchBuffer {
        let bounds = arena.bounds_of(cluster);
        let min_area = arena.get(cluster).minimum_area.max(1e-9);
        let view_dir = (bounds.center() - eye).normalize_or_zero();
        let view_dir = if view_dir.length_squared() < 1e-12 { Vec3::Z } else { view_dir };

        let mut up_hint = Vec3::Y;
        if up_hint.cross(view_dir).length_squared() < 1e-6 {
            up_hint = Vec3::X;
        }
        let right = view_dir.cross(up_hint).normalize_or_zero();
        let up = right.cross(view_dir).normalize_or_zero();

        let (extent_u, extent_v) = projected_extent(&bounds, right, up);
        let area_ratio = (extent_u * extent_v) / min_area;
        let side = (area_ratio.sqrt().ceil() as u32).clamp(16, max_side.max(16));

        ScratchBuffer {
            width: side as usize,
            height: side as usize,
            pixels: vec![None; (side * side) as usize],
            depth: vec![f32::MAX; (side * side) as usize],
            radiance: vec![Color::BLACK; (side * side) as usize],
            right,
            up,
            view_dir,
            origin: bounds.center() - right * (extent_u * 0.5) - up * (extent_v * 0.5),
            extent_u: extent_u.max(1e-6),
            extent_v: extent_v.max(1e-6),
        }
    }

    fn project(&self, p: Vec3) -> (f32, f32, f32) {
        let rel = p - self.origin;
        let u = rel.dot(self.right) / self.extent_u;
        let v = rel.dot(self.up) / self.extent_v;
        let z = rel.dot(self.view_dir);
        (u, v, z)
    }

    fn set_pixel(&mut self, x: usize, y: usize, z: f32, id: ElementId, radiance: Color) {
        let idx = y * self.width + x;
        if z < self.depth[idx] {
            self.depth[idx] = z;
            self.pixels[idx] = Some(id);
            self.radiance[idx] = radiance;
        }
    }

    /// Rasterises every surface element of `cluster` that faces `eye`,
    /// writing its id and current radiance into covered pixels.
    pub fn rasterize_cluster(&mut self, arena: &ElementArena, cluster: ElementId, eye: Vec3) {
        let mut ids = Vec::new();
        arena.for_each_surface_in_subtree(cluster, &mut |id| ids.push(id));
        for id in ids {
            let elem = arena.get(id);
            let Some(patch) = elem.patch() else { continue };
            let to_eye = (eye - patch.midpoint()).normalize_or_zero();
            if patch.normal().dot(to_eye) <= 0.0 {
                continue;
            }
            self.rasterize_polygon(arena, id);
        }
    }

    fn rasterize_polygon(&mut self, arena: &ElementArena, id: ElementId) {
        let world_verts = arena.vertices(id);
        let projected: Vec<(f32, f32, f32)> = world_verts.iter().map(|&p| self.project(p)).collect();
        if projected.is_empty() {
            return;
        }

        let u_min = projected.iter().map(|p| p.0).fold(f32::MAX, f32::min).clamp(0.0, 1.0);
        let u_max = projected.iter().map(|p| p.0).fold(f32::MIN, f32::max).clamp(0.0, 1.0);
        let v_min = projected.iter().map(|p| p.1).fold(f32::MAX, f32::min).clamp(0.0, 1.0);
        let v_max = projected.iter().map(|p| p.1).fold(f32::MIN, f32::max).clamp(0.0, 1.0);

        let x0 = (u_min * self.width as f32) as usize;
        let x1 = ((u_max * self.width as f32).ceil() as usize).min(self.width);
        let y0 = (v_min * self.height as f32) as usize;
        let y1 = ((v_max * self.height as f32).ceil() as usize).min(self.height);

        let radiance = arena.get(id).radiance.first().copied().unwrap_or(Color::BLACK);
        let avg_z = projected.iter().map(|p| p.2).sum::<f32>() / projected.len() as f32;

        for y in y0..y1 {
            for x in x0..x1 {
                let pu = (x as f32 + 0.5) / self.width as f32;
                let pv = (y as f32 + 0.5) / self.height as f32;
                if point_in_polygon_uv(&projected, pu, pv) {
                    self.set_pixel(x, y, avg_z, id, radiance);
                }
            }
        }
    }

    pub fn average_radiance(&self) -> Color {
        let mut sum = Color::BLACK;
        let mut count = 0usize;
        for (i, px) in self.pixels.iter().enumerate() {
            if px.is_some() {
                sum += self.radiance[i];
                count += 1;
            }
        }
        if count == 0 {
            Color::BLACK
        } else {
            sum * (1.0 / (self.width * self.height) as f32)
        }
    }

    pub fn non_background_pixels(&self) -> usize {
        self.pixels.iter().filter(|p| p.is_some()).count()
    }

    /// Accumulates one unit into each covered element's `scratch` counter.
    /// Callers must reset `scratch` to 0 after consuming it.
    pub fn pixels_per_element(&self, arena: &mut ElementArena) {
        for px in &self.pixels {
            if let Some(id) = px {
                arena.get_mut(*id).scratch += 1;
            }
        }
    }
}

fn projected_extent(bounds: &Aabb, right: Vec3, up: Vec3) -> (f32, f32) {
    let corners = bounds.corners();
    let mut u_min = f32::MAX;
    let mut u_max = f32::MIN;
    let mut v_min = f32::MAX;
    let mut v_max = f32::MIN;
    for c in corners {
        let u = c.dot(right);
        let v = c.dot(up);
        u_min = u_min.min(u);
        u_max = u_max.max(u);
        v_min = v_min.min(v);
        v_max = v_max.max(v);
    }
    ((u_max - u_min).max(1e-6), (v_max - v_min).max(1e-6))
}

fn point_in_polygon_uv(verts: &[(f32, f32, f32)], u: f32, v: f32) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (ui, vi, _) = verts[i];
        let (uj, vj, _) = verts[j];
        if (vi > v) != (vj > v) {
            let u_cross = (uj - ui) * (v - vi) / (vj - vi) + ui;
            if u < u_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// One-entry cache of the last (cluster, eye) rasterisation, keyed on exact
/// bit-equality of the eye position. Avoids re-rasterising an identical
/// query repeated across nearby links.
#[derive(Default)]
pub struct ScratchBufferCache {
    key: Option<CacheKey>,
}

impl ScratchBufferCache {
    pub fn new() -> Self {
        ScratchBufferCache::default()
    }

    pub fn hit(&self, cluster: ElementId, eye: Vec3) -> bool {
        self.key == Some(CacheKey { cluster, eye_bits: eye_bits(eye) })
    }

    pub fn store(&mut self, cluster: ElementId, eye: Vec3) {
        self.key = Some(CacheKey { cluster, eye_bits: eye_bits(eye) });
    }

    pub fn reset(&mut self) {
        self.key = None;
    }
}
