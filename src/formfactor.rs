//! Form-factor kernel: fills a link's coupling coefficients, error estimate
//! and visibility fraction from its two endpoints' cubature nodes.

use glam::Vec3;

use crate::basis::eval_basis;
use crate::color::Color;
use crate::config::{ClusteringStrategy, Config};
use crate::cubature::{quad_rule, triangle_rule, CubatureDegree};
use crate::element::{ElementArena, ElementId};
use crate::mrvisibility::{self, ShadowCache};
use crate::scene::{Patch, Ray, RayCaster, SceneStats};

const MIN_NODE_DISTANCE: f32 = 1e-6;
const CLUSTER_PROJECTED_AREA_FACTOR: f32 = 0.25;

pub struct FormFactorOutput {
    pub k: Vec<f32>,
    pub delta_k: f32,
    pub n_receiver: u8,
    pub n_source: u8,
    pub visibility: u8,
}

impl FormFactorOutput {
    fn zero(n_receiver: u8, n_source: u8) -> FormFactorOutput {
        FormFactorOutput {
            k: vec![0.0; (n_receiver as usize * n_source as usize).max(1)],
            delta_k: 0.0,
            n_receiver,
            n_source,
            visibility: 0,
        }
    }
}

struct WeightedNode {
    pos: Vec3,
    weight: f32,
    normal: Option<Vec3>,
    u: f32,
    v: f32,
}

fn surface_nodes(arena: &ElementArena, id: ElementId, degree: CubatureDegree) -> Vec<WeightedNode> {
    let elem = arena.get(id);
    let patch = elem.patch().expect("surface_nodes requires a surface element");
    let is_triangle = patch.num_vertices() == 3;
    let rule = if is_triangle { triangle_rule(degree) } else { quad_rule(degree) };
    rule.nodes
        .iter()
        .map(|n| WeightedNode {
            pos: arena.world_point(id, n.u, n.v),
            weight: n.weight,
            normal: Some(patch.normal()),
            u: n.u,
            v: n.v,
        })
        .collect()
}

/// Fixed 9-point box rule for clusters: the 8 AABB corners plus centre,
/// equally weighted.
fn cluster_nodes(arena: &ElementArena, id: ElementId) -> Vec<WeightedNode> {
    let bounds = arena.bounds_of(id);
    let mut nodes: Vec<WeightedNode> = bounds
        .corners()
        .iter()
        .map(|&p| WeightedNode { pos: p, weight: 1.0 / 9.0, normal: None, u: 0.0, v: 0.0 })
        .collect();
    nodes.push(WeightedNode { pos: bounds.center(), weight: 1.0 / 9.0, normal: None, u: 0.0, v: 0.0 });
    nodes
}

fn nodes_for(arena: &ElementArena, id: ElementId, degree: CubatureDegree) -> Vec<WeightedNode> {
    if arena.get(id).is_cluster() {
        cluster_nodes(arena, id)
    } else {
        surface_nodes(arena, id, degree)
    }
}

/// Exact (binary) visibility test: ray-casts against the supplied
/// candidates (elements already shaft-culled for this link), consulting the
/// shadow cache's last occluder first.
fn exact_occluded(arena: &ElementArena, candidates: &[ElementId], ray: &Ray, t_min: f32, t_max: f32, caster: &dyn RayCaster, shadow_cache: &mut ShadowCache) -> bool {
    if let Some(last) = shadow_cache.last_hit() {
        for &id in candidates {
            if let Some(patch) = arena.get(id).patch() {
                if patch.id() == last && caster.patch_intersect(ray, t_min, t_max).is_some() {
                    return true;
                }
            }
        }
    }
    for &id in candidates {
        let mut patches: Vec<_> = Vec::new();
        arena.for_each_surface_in_subtree(id, &mut |surface| {
            if let Some(p) = arena.get(surface).patch() {
                patches.push(p.clone());
            }
        });
        if let Some(hit) = caster.patch_list_intersect(&patches, ray, t_min, t_max) {
            shadow_cache.remember(hit.patch_id);
            return true;
        }
    }
    false
}

/// Fills `K`, `ΔK`, `vis` for the link from `source` to `receiver`.
///
/// `candidates`: occluder elements already shaft-culled for this link; `None`
/// means no occluders exist at all (`vis` is trivially 1 for every node
/// pair).
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    arena: &ElementArena,
    receiver: ElementId,
    source: ElementId,
    config: &Config,
    candidates: Option<&[ElementId]>,
    scene_stats: &SceneStats,
    caster: &dyn RayCaster,
    shadow_cache: &mut ShadowCache,
) -> FormFactorOutput {
    let rcv = arena.get(receiver);
    let src = arena.get(source);
    let rcv_is_cluster = rcv.is_cluster();
    let src_is_cluster = src.is_cluster();
    let n_receiver = rcv.basis_size as u8;
    let n_source = src.basis_size as u8;

    if receiver == source {
        return FormFactorOutput::zero(n_receiver, n_source);
    }
    if (rcv_is_cluster || src_is_cluster) && arena.bounds_of(receiver).overlaps(&arena.bounds_of(source)) {
        let mut out = FormFactorOutput::zero(n_receiver, n_source);
        out.delta_k = 1.0;
        out.visibility = 128;
        return out;
    }

    assert!(rcv.area > 0.0, "receiver element has zero area");
    assert!(src.area > 0.0, "source element has zero area");

    let rcv_nodes = nodes_for(arena, receiver, config.receiver_cubature_degree);
    let src_nodes = nodes_for(arena, source, config.source_cubature_degree);

    let mut g = vec![vec![0.0f32; src_nodes.len()]; rcv_nodes.len()];
    let mut reached = 0usize;
    let mut max_unoccluded_kernel = 0.0f32;

    for (k, rn) in rcv_nodes.iter().enumerate() {
        for (l, sn) in src_nodes.iter().enumerate() {
            let delta = rn.pos - sn.pos;
            let dist2 = delta.length_squared();
            if dist2 < MIN_NODE_DISTANCE * MIN_NODE_DISTANCE {
                tracing::warn!("form factor nodes coincide; contributing zero energy for this pair");
                continue;
            }
            let dist = dist2.sqrt();
            let dir = delta / dist;

            let cos_source = match sn.normal {
                Some(n) => dir.dot(n),
                None => CLUSTER_PROJECTED_AREA_FACTOR,
            };
            if cos_source <= 0.0 {
                continue;
            }
            let cos_receiver = match rn.normal {
                Some(n) => (-dir).dot(n),
                None => CLUSTER_PROJECTED_AREA_FACTOR,
            };
            if cos_receiver <= 0.0 {
                continue;
            }

            let kernel = cos_source * cos_receiver / (std::f32::consts::PI * dist2);
            max_unoccluded_kernel = max_unoccluded_kernel.max(kernel);
            reached += 1;

            let ray = Ray { origin: sn.pos, dir };
            let v = if candidates.map(|c| c.is_empty()).unwrap_or(true) {
                1.0
            } else if config.prefer_exact_visibility(rcv_is_cluster, src_is_cluster) {
                if exact_occluded(arena, candidates.unwrap(), &ray, MIN_NODE_DISTANCE, dist - MIN_NODE_DISTANCE, caster, shadow_cache) {
                    0.0
                } else {
                    1.0
                }
            } else {
                mrvisibility::transmittance(
                    arena,
                    candidates.unwrap(),
                    &ray,
                    MIN_NODE_DISTANCE,
                    dist - MIN_NODE_DISTANCE,
                    src.blocker_size,
                    dist,
                    scene_stats,
                    config,
                    caster,
                    shadow_cache,
                )
            };

            g[k][l] = kernel * v;
        }
    }

    let total_pairs = rcv_nodes.len() * src_nodes.len();
    let mut visibility = if total_pairs == 0 { 0 } else { ((255 * reached) / total_pairs) as u8 };
    if reached == 0 {
        return FormFactorOutput { k: vec![0.0; (n_receiver as usize * n_source as usize).max(1)], delta_k: 0.0, n_receiver, n_source, visibility: 0 };
    }
    if candidates.map(|c| !c.is_empty()).unwrap_or(false) && config.prefer_exact_visibility(rcv_is_cluster, src_is_cluster) && visibility == 255 {
        visibility = 254;
    }

    let gk: Vec<f32> = (0..rcv_nodes.len())
        .map(|k| src.area * (0..src_nodes.len()).map(|l| src_nodes[l].weight * g[k][l]).sum::<f32>())
        .collect();

    let (k_values, mut delta_k) = if n_receiver <= 1 && n_source <= 1 {
        let k_scalar = rcv.area * (0..rcv_nodes.len()).map(|k| rcv_nodes[k].weight * gk[k]).sum::<f32>();
        let gmax = gk.iter().copied().fold(f32::MIN, f32::max);
        let gmin = gk.iter().copied().fold(f32::MAX, f32::min);
        (vec![k_scalar], gmax - gmin)
    } else {
        let mut k_matrix = vec![0.0f32; n_receiver as usize * n_source as usize];
        let rcv_domain = rcv.domain();
        let src_domain = src.domain();
        for alpha in 0..n_receiver as usize {
            let phi: Vec<f32> = rcv_nodes.iter().map(|n| eval_basis(rcv.basis_type, rcv_domain, alpha, n.u, n.v)).collect();
            for beta in 0..n_source as usize {
                let psi: Vec<f32> = src_nodes.iter().map(|n| eval_basis(src.basis_type, src_domain, beta, n.u, n.v)).collect();
                let mut sum = 0.0f32;
                for (k, rn) in rcv_nodes.iter().enumerate() {
                    let inner: f32 = (0..src_nodes.len()).map(|l| src_nodes[l].weight * g[k][l] * psi[l]).sum();
                    sum += rn.weight * phi[k] * (src.area * inner);
                }
                k_matrix[alpha * n_source as usize + beta] = rcv.area * sum;
            }
        }
        let source_radiance_mag = src.radiance.first().map(|c| c.abs_max_component()).unwrap_or(0.0);
        let gavg = gk.iter().sum::<f32>() / gk.len() as f32;
        let gmax = gk.iter().copied().fold(f32::MIN, f32::max);
        let gmin = gk.iter().copied().fold(f32::MAX, f32::min);
        let delta = if source_radiance_mag > 0.0 {
            (gmax - gmin) * source_radiance_mag
        } else {
            (gmax - gavg).max(gavg - gmin)
        };
        (k_matrix, delta)
    };

    if config.clustering_strategy == ClusteringStrategy::Isotropic && (rcv_is_cluster || src_is_cluster) {
        delta_k = max_unoccluded_kernel * src.area;
    }

    FormFactorOutput { k: k_values, delta_k, n_receiver, n_source, visibility }
}
