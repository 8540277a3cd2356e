//! The refinement oracle: decides whether a link's coupling is accurate
//! enough to transport energy over directly, or whether one of its two
//! endpoints needs to be replaced by its children and the interaction
//! re-evaluated recursively.
//!
//! Subdivision always widens the hierarchy one level at a time and
//! re-evaluates the oracle on every child pairing before storing anything,
//! so a link that ends up stored on an element's interaction list has
//! already passed the accuracy test at that exact resolution.

use std::f32::consts::PI;

use crate::cluster::{cluster_aware_radiance, radiance_toward_point};
use crate::color::Color;
use crate::config::{Config, ShaftCullMode, ShaftCullStrategy};
use crate::element::{ElementArena, ElementId};
use crate::formfactor;
use crate::link::{Link, LinkArena, LinkId};
use crate::mrvisibility::ShadowCache;
use crate::scene::{RayCaster, SceneStats};
use crate::shaft::{Shaft, ShaftClassification};

/// Outcome of evaluating one interaction. `Dropped` means the link passed in
/// no longer exists (either it carried no energy, or it was replaced by
/// finer children); `Accurate` means it was transported and re-stored on its
/// host element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefineOutcome {
    Accurate,
    Dropped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Receiver,
    Source,
    Neither,
}

/// Re-evaluates every link currently stored on `elem`'s interaction list,
/// after first recursing into its already-established children's lists.
/// This is the per-iteration entry point: elements keep whatever hierarchy
/// of links previous iterations converged on, and only re-refine where the
/// oracle says so given this iteration's radiance.
#[allow(clippy::too_many_arguments)]
pub fn refine_subtree(
    arena: &mut ElementArena,
    links: &mut LinkArena,
    elem: ElementId,
    config: &Config,
    scene_stats: &SceneStats,
    world_root: ElementId,
    caster: &dyn RayCaster,
    shadow_cache: &mut ShadowCache,
) {
    let irregular = arena.get(elem).irregular_children.clone();
    for child in irregular {
        refine_subtree(arena, links, child, config, scene_stats, world_root, caster, shadow_cache);
    }
    if let Some(regular) = arena.get(elem).regular_children {
        for child in regular {
            refine_subtree(arena, links, child, config, scene_stats, world_root, caster, shadow_cache);
        }
    }

    let interactions = std::mem::take(&mut arena.get_mut(elem).interactions);
    for link_id in interactions {
        let link = links.get(link_id).clone();
        let candidates = seed_candidates(arena, &link, config, world_root);
        refine_interaction(arena, links, link_id, &candidates, config, scene_stats, world_root, caster, shadow_cache, false);
    }
}

/// Creates the very first link for a freshly touched top-level element, with
/// `force_accurate` set so the oracle stores it without subdividing
/// (`lazy_linking`'s shallow first touch) or refines it immediately in full
/// (eager linking).
#[allow(clippy::too_many_arguments)]
pub fn seed_link(
    arena: &mut ElementArena,
    links: &mut LinkArena,
    receiver: ElementId,
    source: ElementId,
    config: &Config,
    scene_stats: &SceneStats,
    world_root: ElementId,
    caster: &dyn RayCaster,
    shadow_cache: &mut ShadowCache,
) {
    let rcv_is_cluster = arena.get(receiver).is_cluster();
    let src_is_cluster = arena.get(source).is_cluster();
    let shaft = build_shaft(arena, receiver, source, config);
    let candidates = match config.shaft_cull_mode {
        ShaftCullMode::Always => element_shaft_candidates_from(arena, &shaft, &[world_root], config.shaft_cull_strategy, &[receiver, source]),
        ShaftCullMode::ForRefinement => Vec::new(),
    };
    let out = formfactor::evaluate(arena, receiver, source, config, Some(&candidates), scene_stats, caster, shadow_cache);
    if out.visibility == 0 {
        return;
    }
    let link_id = links.new_link(receiver, source, rcv_is_cluster, src_is_cluster, out.k, out.delta_k, out.n_receiver, out.n_source, 1, out.visibility);
    refine_interaction(arena, links, link_id, &candidates, config, scene_stats, world_root, caster, shadow_cache, config.lazy_linking);
}

fn seed_candidates(arena: &ElementArena, link: &Link, config: &Config, world_root: ElementId) -> Vec<ElementId> {
    match config.shaft_cull_mode {
        ShaftCullMode::ForRefinement => Vec::new(),
        ShaftCullMode::Always => {
            let shaft = build_shaft(arena, link.receiver, link.source, config);
            element_shaft_candidates_from(arena, &shaft, &[world_root], config.shaft_cull_strategy, &[link.receiver, link.source])
        }
    }
}

/// Evaluates the link's accuracy, transporting and storing it if it passes,
/// or replacing it with finer children and recursing on each pairing
/// otherwise. `force_accurate` skips the error test entirely (first-touch
/// shallow linking).
#[allow(clippy::too_many_arguments)]
fn refine_interaction(
    arena: &mut ElementArena,
    links: &mut LinkArena,
    link_id: LinkId,
    candidates: &[ElementId],
    config: &Config,
    scene_stats: &SceneStats,
    world_root: ElementId,
    caster: &dyn RayCaster,
    shadow_cache: &mut ShadowCache,
    force_accurate: bool,
) -> RefineOutcome {
    let link = links.get(link_id).clone();
    if !link.carries_energy() {
        links.destroy(link_id, arena.get(link.receiver).is_cluster(), arena.get(link.source).is_cluster());
        return RefineOutcome::Dropped;
    }

    let must_expand_cluster = !config.clustered && (arena.get(link.receiver).is_cluster() || arena.get(link.source).is_cluster());
    let min_area = scene_stats.total_area * config.relative_min_element_area;
    let side = choose_subdivide_side(arena, &link, min_area);

    let accurate = force_accurate
        || (!must_expand_cluster && config.hierarchical && side != Side::Neither && {
            let threshold = link_error_threshold(arena, link.receiver, config, scene_stats);
            let error = approximation_error(arena, &link, config);
            error <= threshold
        })
        || (!config.hierarchical && !must_expand_cluster)
        || side == Side::Neither;

    if accurate {
        transport_link(arena, &link, config);
        store_on_host(arena, links, link_id, config);
        return RefineOutcome::Accurate;
    }

    subdivide_and_recurse(arena, links, &link, link_id, side, candidates, config, scene_stats, world_root, caster, shadow_cache);
    RefineOutcome::Dropped
}

#[allow(clippy::too_many_arguments)]
fn subdivide_and_recurse(
    arena: &mut ElementArena,
    links: &mut LinkArena,
    link: &Link,
    link_id: LinkId,
    side: Side,
    candidates: &[ElementId],
    config: &Config,
    scene_stats: &SceneStats,
    world_root: ElementId,
    caster: &dyn RayCaster,
    shadow_cache: &mut ShadowCache,
) {
    let rcv_children = match side {
        Side::Receiver => children_of(arena, link.receiver, config),
        _ => vec![link.receiver],
    };
    let src_children = match side {
        Side::Source => children_of(arena, link.source, config),
        _ => vec![link.source],
    };

    for &r_child in &rcv_children {
        for &s_child in &src_children {
            if r_child == s_child || !facing_ok(arena, r_child, s_child) {
                continue;
            }

            let shaft = build_shaft(arena, r_child, s_child, config);
            let child_candidates = element_shaft_candidates_from(arena, &shaft, candidates, config.shaft_cull_strategy, &[r_child, s_child]);

            let out = formfactor::evaluate(arena, r_child, s_child, config, Some(&child_candidates), scene_stats, caster, shadow_cache);
            if out.visibility == 0 {
                continue;
            }
            let rcv_is_cluster = arena.get(r_child).is_cluster();
            let src_is_cluster = arena.get(s_child).is_cluster();
            let child_link = links.new_link(r_child, s_child, rcv_is_cluster, src_is_cluster, out.k, out.delta_k, out.n_receiver, out.n_source, 1, out.visibility);
            refine_interaction(arena, links, child_link, &child_candidates, config, scene_stats, world_root, caster, shadow_cache, false);
        }
    }

    links.destroy(link_id, arena.get(link.receiver).is_cluster(), arena.get(link.source).is_cluster());
}

fn store_on_host(arena: &mut ElementArena, links: &mut LinkArena, link_id: LinkId, config: &Config) {
    let link = links.get(link_id).clone();
    let rcv_is_cluster = arena.get(link.receiver).is_cluster();
    let src_is_cluster = arena.get(link.source).is_cluster();
    let dup = links.duplicate_link(link_id, rcv_is_cluster, src_is_cluster);
    links.destroy(link_id, rcv_is_cluster, src_is_cluster);
    let host = if config.iteration_method.is_shooting() { link.source } else { link.receiver };
    arena.get_mut(host).interactions.push(dup);
}

/// Transports this link's energy from its source to its receiver. Does not
/// touch the link's storage; the caller decides whether to keep or destroy it.
fn transport_link(arena: &mut ElementArena, link: &Link, config: &Config) {
    let shooting = config.iteration_method.is_shooting();
    let n_s = (link.n_source as usize).min(arena.get(link.source).basis_size).max(1);
    let n_r = (link.n_receiver as usize).min(arena.get(link.receiver).basis_size).max(1);

    let source_coeffs: Vec<Color> = {
        let src = arena.get(link.source);
        let basis = if shooting { src.unshot_radiance.as_ref().unwrap_or(&src.radiance) } else { &src.radiance };
        (0..n_s).map(|i| basis.get(i).copied().unwrap_or(Color::BLACK)).collect()
    };

    if arena.get(link.receiver).is_cluster() {
        let mut amount = Color::BLACK;
        for (beta, &sc) in source_coeffs.iter().enumerate() {
            amount += sc * link.coefficient(0, beta);
        }
        let source_eye = arena.bounds_of(link.source).center();
        let source_dir = (source_eye - arena.bounds_of(link.receiver).center()).normalize_or_zero();
        let z_visibility = config.clustering_strategy == crate::config::ClusteringStrategy::ZVisibility;
        if z_visibility {
            crate::cluster::prepare_z_visibility(arena, link.receiver, source_eye, config.scratch_frame_buffer_size);
        }
        crate::cluster::distribute_gathered_radiance(arena, link.receiver, source_dir, amount, config.clustering_strategy);
        if z_visibility {
            crate::cluster::clear_scratch(arena, link.receiver);
        }
    } else {
        for alpha in 0..n_r {
            let mut amount = Color::BLACK;
            for (beta, &sc) in source_coeffs.iter().enumerate() {
                amount += sc * link.coefficient(alpha, beta);
            }
            arena.get_mut(link.receiver).received_radiance[alpha] += amount;
        }
        let rcv = arena.get_mut(link.receiver);
        rcv.used_basis = rcv.used_basis.max(n_r);
    }

    if config.importance_driven {
        let k_scalar = link.coefficient(0, 0);
        if shooting {
            let add = k_scalar * arena.get(link.source).rd.max_component() * arena.get(link.source).unshot_potential;
            arena.get_mut(link.receiver).received_potential += add;
        } else {
            let add = k_scalar * arena.get(link.receiver).rd.max_component() * arena.get(link.receiver).potential;
            arena.get_mut(link.source).received_potential += add;
        }
    }
}

/// `max_self_emitted / (pi * receiver_area)` (power norm) or a direct
/// radiance comparison (radiance norm), scaled down by the receiver's share
/// of direct potential when importance-driven gathering is active.
fn link_error_threshold(arena: &ElementArena, receiver: ElementId, config: &Config, scene_stats: &SceneStats) -> f32 {
    let area = arena.get(receiver).area.max(1e-12);
    let mut threshold = match config.error_norm {
        crate::config::ErrorNorm::Power => scene_stats.max_self_emitted_power.abs_max_component() * config.relative_link_error_threshold / (PI * area),
        crate::config::ErrorNorm::Radiance => scene_stats.max_self_emitted_radiance.abs_max_component() * config.relative_link_error_threshold,
    };
    if config.importance_driven && !config.iteration_method.is_shooting() {
        let receiver_potential = arena.get(receiver).potential;
        let factor = 2.0 * receiver_potential / scene_stats.max_direct_potential.max(1e-12);
        if factor > 1e-6 {
            threshold /= factor;
        }
    }
    threshold
}

/// `‖receiver.Rd · ΔK · source_radiance‖`, with a source-cluster radiance
/// variation term added when the source is a non-isotropic light-source
/// cluster, and a dual potential-space error term on shooting links when
/// importance is tracked.
fn approximation_error(arena: &ElementArena, link: &Link, config: &Config) -> f32 {
    let rcv = arena.get(link.receiver);
    let src = arena.get(link.source);
    let source_radiance = cluster_aware_radiance(arena, link.source);

    let mut error = rcv.rd.product(source_radiance).abs_max_component() * link.delta_k;

    if src.is_cluster() && src.is_light_source && config.clustering_strategy != crate::config::ClusteringStrategy::Isotropic && link.delta_k > 0.0 {
        let rcv_center = arena.bounds_of(link.receiver).center();
        let toward_receiver = radiance_toward_point(arena, link.source, rcv_center);
        let variation = (toward_receiver - source_radiance.max_component()).abs();
        if variation > 0.0 {
            error = error.max(rcv.rd.max_component() * (link.delta_k / src.area.max(1e-12)) * variation * src.area);
        }
    }

    if config.iteration_method.is_shooting() && config.importance_driven {
        let potential_error = rcv.rd.max_component() * link.delta_k * src.unshot_potential;
        error = error.max(potential_error);
    }

    error
}

/// Picks the larger subdividable side, preferring the receiver on a tie and
/// never choosing a light source as the subdivided side (it is the one
/// whose emission should stay concentrated, not spread thin).
fn choose_subdivide_side(arena: &ElementArena, link: &Link, min_area: f32) -> Side {
    let rcv = arena.get(link.receiver);
    let src = arena.get(link.source);
    let rcv_subdividable = rcv.is_cluster() && !rcv.irregular_children.is_empty() || (!rcv.is_cluster() && rcv.area > min_area);
    let src_subdividable = !src.is_light_source && (src.is_cluster() && !src.irregular_children.is_empty() || (!src.is_cluster() && src.area > min_area));

    match (rcv_subdividable, src_subdividable) {
        (false, false) => Side::Neither,
        (true, false) => Side::Receiver,
        (false, true) => Side::Source,
        (true, true) => {
            if rcv.area >= src.area {
                Side::Receiver
            } else {
                Side::Source
            }
        }
    }
}

fn children_of(arena: &mut ElementArena, id: ElementId, config: &Config) -> Vec<ElementId> {
    if arena.get(id).is_cluster() {
        arena.get(id).irregular_children.clone()
    } else {
        arena.regular_subdivide(id, config).to_vec()
    }
}

/// Cheap rejection test: skips a pairing whose other side's bounds lie
/// entirely behind a surface endpoint's plane, before paying for a shaft
/// build and a form-factor evaluation that would come back zero anyway.
fn facing_ok(arena: &ElementArena, receiver: ElementId, source: ElementId) -> bool {
    if let Some(patch) = arena.get(receiver).patch() {
        if bounds_entirely_behind(arena.bounds_of(source), patch.normal(), patch.plane_constant()) {
            return false;
        }
    }
    if let Some(patch) = arena.get(source).patch() {
        if bounds_entirely_behind(arena.bounds_of(receiver), patch.normal(), patch.plane_constant()) {
            return false;
        }
    }
    true
}

fn bounds_entirely_behind(bounds: crate::scene::Aabb, normal: glam::Vec3, plane_constant: f32) -> bool {
    bounds.corners().iter().all(|&p| normal.dot(p) + plane_constant <= 1e-6)
}

fn build_shaft(arena: &ElementArena, receiver: ElementId, source: ElementId, config: &Config) -> Shaft {
    let rcv_is_cluster = arena.get(receiver).is_cluster();
    let src_is_cluster = arena.get(source).is_cluster();
    if config.prefer_exact_visibility(rcv_is_cluster, src_is_cluster) {
        let rp = arena.get(receiver).patch().expect("non-cluster element always has a patch");
        let sp = arena.get(source).patch().expect("non-cluster element always has a patch");
        Shaft::build_polygon_polygon(rp.as_ref(), sp.as_ref())
    } else {
        Shaft::build_box_box(arena.bounds_of(receiver), arena.bounds_of(source))
    }
}

/// Walks the element hierarchy starting from each of `roots`, the same way
/// [`crate::shaft::ShaftCuller`] walks scene geometry, narrowing a prior
/// candidate list down to the ones that still intersect `shaft`.
fn element_shaft_candidates_from(arena: &ElementArena, shaft: &Shaft, roots: &[ElementId], strategy: ShaftCullStrategy, omit: &[ElementId]) -> Vec<ElementId> {
    let mut out = Vec::new();
    for &root in roots {
        cull_recursive(arena, shaft, root, strategy, omit, &mut out);
    }
    out
}

fn cull_recursive(arena: &ElementArena, shaft: &Shaft, id: ElementId, strategy: ShaftCullStrategy, omit: &[ElementId], out: &mut Vec<ElementId>) {
    if omit.contains(&id) {
        return;
    }
    let classification = shaft.classify_box(&arena.bounds_of(id));
    if classification == ShaftClassification::Outside {
        return;
    }

    let elem = arena.get(id);
    if elem.is_leaf() {
        if let Some(patch) = elem.patch() {
            let (pc, _cut) = shaft.classify_patch(patch.as_ref());
            if pc != ShaftClassification::Outside {
                out.push(id);
            }
        } else {
            out.push(id);
        }
        return;
    }

    let should_open = match strategy {
        ShaftCullStrategy::KeepClosed => false,
        ShaftCullStrategy::OverlapOpen => classification == ShaftClassification::Overlap,
        ShaftCullStrategy::AlwaysOpen => classification != ShaftClassification::Outside,
    };

    if should_open {
        for &c in &elem.irregular_children {
            cull_recursive(arena, shaft, c, strategy, omit, out);
        }
        if let Some(children) = elem.regular_children {
            for c in children {
                cull_recursive(arena, shaft, c, strategy, omit, out);
            }
        }
    } else {
        out.push(id);
    }
}
