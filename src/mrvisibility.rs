//! Multi-resolution visibility: a ray-versus-aggregate query returning a
//! continuous transmittance in `[0, 1]` rather than a binary hit/miss,
//! treating occluders below a feature-size threshold as an equivalent
//! participating medium (Sillion & Drettakis).

use crate::config::Config;
use crate::element::{ElementArena, ElementId};
use crate::scene::{Ray, RayCaster, SceneStats};

const TRANSMITTANCE_EPSILON: f32 = 1e-4;

/// One-slot cache of the last occluder patch hit by an exact or
/// multi-resolution visibility test. Reset at solve start.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShadowCache {
    last_hit: Option<u64>,
}

impl ShadowCache {
    pub fn new() -> Self {
        ShadowCache::default()
    }

    pub fn last_hit(&self) -> Option<u64> {
        self.last_hit
    }

    pub fn remember(&mut self, patch_id: u64) {
        self.last_hit = Some(patch_id);
    }

    pub fn reset(&mut self) {
        self.last_hit = None;
    }
}

/// `minimum_feature_size = 2 * sqrt(total_scene_area * relative_min_element_area / pi)`.
pub fn minimum_feature_size(scene_stats: &SceneStats, config: &Config) -> f32 {
    2.0 * (scene_stats.total_area * config.relative_min_element_area / std::f32::consts::PI).sqrt()
}

/// Evaluates the transmittance of `ray` between `t_min` and `t_max` through
/// `candidates` (elements already shaft-culled for this link). Returns the
/// product of each candidate's factor, short-circuiting to 0 the moment any
/// factor drops below `TRANSMITTANCE_EPSILON`.
#[allow(clippy::too_many_arguments)]
pub fn transmittance(
    arena: &ElementArena,
    candidates: &[ElementId],
    ray: &Ray,
    t_min: f32,
    t_max: f32,
    source_size: f32,
    receiver_dist: f32,
    scene_stats: &SceneStats,
    config: &Config,
    caster: &dyn RayCaster,
    shadow_cache: &mut ShadowCache,
) -> f32 {
    let mut transmittance = 1.0f32;
    for &id in candidates {
        let factor = transmittance_through(arena, id, ray, t_min, t_max, source_size, receiver_dist, scene_stats, config, caster, shadow_cache);
        transmittance *= factor;
        if transmittance < TRANSMITTANCE_EPSILON {
            return 0.0;
        }
    }
    transmittance
}

#[allow(clippy::too_many_arguments)]
fn transmittance_through(
    arena: &ElementArena,
    id: ElementId,
    ray: &Ray,
    t_min: f32,
    t_max: f32,
    source_size: f32,
    receiver_dist: f32,
    scene_stats: &SceneStats,
    config: &Config,
    caster: &dyn RayCaster,
    shadow_cache: &mut ShadowCache,
) -> f32 {
    let bounds = arena.bounds_of(id);
    if ray.intersect_aabb(&bounds, t_min, t_max).is_none() {
        return 1.0;
    }

    let elem = arena.get(id);
    if !elem.is_cluster() {
        let patch = elem.patch().expect("surface element always has a patch");
        return match caster.patch_intersect(ray, t_min, t_max) {
            Some(_hit) => {
                shadow_cache.remember(patch.id());
                0.0
            }
            None => 1.0,
        };
    }

    let t_mid = 0.5 * (t_min + t_max);
    let fsize = if t_mid.abs() > 1e-9 {
        source_size + (receiver_dist / t_mid) * (elem.blocker_size - source_size)
    } else {
        elem.blocker_size
    };

    if fsize < minimum_feature_size(scene_stats, config) {
        let bounding_volume = bounds.volume().max(1e-9);
        let kappa = elem.area / (4.0 * bounding_volume);
        return (-kappa * (t_max - t_min)).exp();
    }

    let mut product = 1.0f32;
    for &child in &elem.irregular_children {
        let factor = transmittance_through(arena, child, ray, t_min, t_max, source_size, receiver_dist, scene_stats, config, caster, shadow_cache);
        product *= factor;
        if product < TRANSMITTANCE_EPSILON {
            return 0.0;
        }
    }
    product
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::config::Config;
    use crate::scene::{Aabb, Patch, Ray, TestGeometry, TestPatch, TestRayCaster};
    use glam::Vec3;
    use std::rc::Rc;

    #[test]
    fn minimum_feature_size_scales_with_area() {
        let stats = SceneStats {
            total_area: 100.0,
            max_self_emitted_radiance: Color::BLACK,
            max_self_emitted_power: Color::BLACK,
            max_direct_potential: 0.0,
            max_direct_importance: 0.0,
        };
        let config = Config::default();
        let small = minimum_feature_size(&stats, &config);
        let bigger_stats = SceneStats { total_area: 400.0, ..stats };
        let bigger = minimum_feature_size(&bigger_stats, &config);
        assert!(bigger > small);
    }

    #[test]
    fn ray_missing_every_candidate_has_full_transmittance() {
        let mut arena = ElementArena::new();
        let config = Config::default();
        let patch: Rc<dyn Patch> = Rc::new(TestPatch::quad(
            1,
            Vec3::new(10.0, 10.0, 10.0),
            Vec3::new(11.0, 10.0, 10.0),
            Vec3::new(11.0, 11.0, 10.0),
            Vec3::new(10.0, 11.0, 10.0),
            Color::gray(0.5),
            Color::BLACK,
        ));
        let id = arena.create_top_level(patch, &config).unwrap();
        let caster = TestRayCaster { patches: vec![] };
        let ray = Ray { origin: Vec3::new(0.0, 0.0, 0.0), dir: Vec3::new(0.0, 0.0, 1.0) };
        let stats = SceneStats {
            total_area: 1.0,
            max_self_emitted_radiance: Color::BLACK,
            max_self_emitted_power: Color::BLACK,
            max_direct_potential: 0.0,
            max_direct_importance: 0.0,
        };
        let mut cache = ShadowCache::new();
        let t = transmittance(&arena, &[id], &ray, 0.0, 1.0, 0.1, 1.0, &stats, &config, &caster, &mut cache);
        assert!((t - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hitting_a_surface_element_blocks_fully() {
        let mut arena = ElementArena::new();
        let config = Config::default();
        let patch: Rc<dyn Patch> = Rc::new(TestPatch::quad(
            1,
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
            Color::gray(0.5),
            Color::BLACK,
        ));
        let id = arena.create_top_level(patch.clone(), &config).unwrap();
        let caster = TestRayCaster { patches: vec![patch] };
        let ray = Ray { origin: Vec3::new(0.0, 0.0, 0.0), dir: Vec3::new(0.0, 0.0, 1.0) };
        let stats = SceneStats {
            total_area: 1.0,
            max_self_emitted_radiance: Color::BLACK,
            max_self_emitted_power: Color::BLACK,
            max_direct_potential: 0.0,
            max_direct_importance: 0.0,
        };
        let mut cache = ShadowCache::new();
        let t = transmittance(&arena, &[id], &ray, 0.0, 2.0, 0.1, 1.0, &stats, &config, &caster, &mut cache);
        assert_eq!(t, 0.0);
        assert_eq!(cache.last_hit(), Some(1));
    }

    #[test]
    fn dense_cluster_below_feature_size_attenuates_rather_than_blocks() {
        let mut arena = ElementArena::new();
        let config = Config::default();
        let p1 = TestPatch::quad(
            1,
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::new(0.001, 0.0, 5.0),
            Vec3::new(0.001, 0.001, 5.0),
            Vec3::new(0.0, 0.001, 5.0),
            Color::gray(0.5),
            Color::BLACK,
        );
        let leaf = TestGeometry::leaf(Rc::new(p1));
        let root: Rc<dyn crate::scene::SceneGeometry> = TestGeometry::compound(5, vec![leaf]);
        let cluster = arena.create_cluster_hierarchy(&root, &config).unwrap();
        let caster = TestRayCaster { patches: vec![] };
        let ray = Ray { origin: Vec3::new(0.0, 0.0, 0.0), dir: Vec3::new(0.0, 0.0, 1.0) };
        let stats = SceneStats {
            total_area: 1_000_000.0,
            max_self_emitted_radiance: Color::BLACK,
            max_self_emitted_power: Color::BLACK,
            max_direct_potential: 0.0,
            max_direct_importance: 0.0,
        };
        let mut cache = ShadowCache::new();
        let t = transmittance(&arena, &[cluster], &ray, 0.0, 10.0, 0.1, 5.0, &stats, &config, &caster, &mut cache);
        assert!(t >= 0.0 && t <= 1.0);
        let _ = Aabb::EMPTY;
    }
}
