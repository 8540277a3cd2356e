//! Clustering strategies: how a cluster's effective source radiance and a
//! receiving cluster's per-leaf projected area are approximated depending on
//! `ClusteringStrategy`.

use glam::Vec3;

use crate::color::Color;
use crate::config::ClusteringStrategy;
use crate::element::{ElementArena, ElementId};
use crate::scratchbuffer::ScratchBuffer;

/// Radiance used by the refinement oracle for a source element: the plain
/// area-weighted mean for an ordinary element, or the brightest leaf's
/// radiance for a light-source cluster (averaging would under-estimate the
/// refinement error a small, bright member needs).
pub fn cluster_aware_radiance(arena: &ElementArena, id: ElementId) -> Color {
    let elem = arena.get(id);
    if !elem.is_cluster() || !elem.is_light_source {
        return elem.radiance.first().copied().unwrap_or(Color::BLACK);
    }
    let mut max_radiance = Color::BLACK;
    arena.for_each_surface_in_subtree(id, &mut |leaf| {
        let r = arena.get(leaf).radiance.first().copied().unwrap_or(Color::BLACK);
        if r.max_component() > max_radiance.max_component() {
            max_radiance = r;
        }
    });
    max_radiance
}

/// Weighted-average radiance magnitude of `cluster` as seen from `point`,
/// using the `Oriented` strategy's per-leaf facing weight. Used by the
/// refinement oracle's source-cluster radiance variation term, which needs
/// a cheap per-vertex radiance sample rather than a full gather.
pub fn radiance_toward_point(arena: &ElementArena, cluster: ElementId, point: Vec3) -> f32 {
    let dir = (point - arena.bounds_of(cluster).center()).normalize_or_zero();
    let mut weighted = Color::BLACK;
    let mut total = 0.0f32;
    arena.for_each_surface_in_subtree(cluster, &mut |leaf| {
        let w = leaf_weight(arena, leaf, ClusteringStrategy::Oriented, dir);
        let r = arena.get(leaf).radiance.first().copied().unwrap_or(Color::BLACK);
        weighted += r * w;
        total += w;
    });
    if total > 0.0 {
        (weighted * (1.0 / total)).max_component()
    } else {
        cluster_aware_radiance(arena, cluster).max_component()
    }
}

fn leaf_weight(arena: &ElementArena, leaf: ElementId, strategy: ClusteringStrategy, source_dir: Vec3) -> f32 {
    let elem = arena.get(leaf);
    match strategy {
        ClusteringStrategy::Isotropic => elem.area,
        ClusteringStrategy::Oriented => {
            let patch = elem.patch().expect("leaf of a receiver cluster is always a surface element");
            elem.area * patch.normal().dot(-source_dir).max(0.0)
        }
        ClusteringStrategy::ZVisibility => elem.scratch.max(0) as f32,
    }
}

/// Total effective receiving area of `cluster` toward `source_dir`, used to
/// normalize the per-leaf weights computed by [`leaf_weight`].
pub fn receiver_cluster_area(arena: &ElementArena, cluster: ElementId, strategy: ClusteringStrategy, source_dir: Vec3) -> f32 {
    let mut total = 0.0f32;
    arena.for_each_surface_in_subtree(cluster, &mut |leaf| {
        total += leaf_weight(arena, leaf, strategy, source_dir);
    });
    total
}

/// Rasterises `cluster` from the source's direction and stores per-leaf
/// pixel counts into each leaf's `scratch` field, required before
/// [`leaf_weight`]/[`receiver_cluster_area`] can use `ZVisibility`. Callers
/// must call [`clear_scratch`] afterwards.
pub fn prepare_z_visibility(arena: &mut ElementArena, cluster: ElementId, eye: Vec3, max_side: u32) {
    let mut buffer = ScratchBuffer::new(arena, cluster, eye, max_side);
    buffer.rasterize_cluster(arena, cluster, eye);
    buffer.pixels_per_element(arena);
}

pub fn clear_scratch(arena: &mut ElementArena, cluster: ElementId) {
    let mut leaves = Vec::new();
    arena.for_each_surface_in_subtree(cluster, &mut |leaf| leaves.push(leaf));
    for leaf in leaves {
        arena.get_mut(leaf).scratch = 0;
    }
}

/// Distributes `amount` of gathered radiance arriving at `receiver_cluster`
/// from `source_dir` across its surface leaves, weighted by each leaf's
/// projected area under `strategy`. Falls back to an equal split when every
/// leaf's weight is zero (e.g. a `ZVisibility` query with an empty scratch
/// buffer).
pub fn distribute_gathered_radiance(arena: &mut ElementArena, receiver_cluster: ElementId, source_dir: Vec3, amount: Color, strategy: ClusteringStrategy) {
    let mut leaves = Vec::new();
    arena.for_each_surface_in_subtree(receiver_cluster, &mut |leaf| leaves.push(leaf));
    if leaves.is_empty() {
        return;
    }

    let weights: Vec<f32> = leaves.iter().map(|&leaf| leaf_weight(arena, leaf, strategy, source_dir)).collect();
    let total: f32 = weights.iter().sum();

    if total <= 0.0 {
        let share = amount * (1.0 / leaves.len() as f32);
        for &leaf in &leaves {
            arena.get_mut(leaf).received_radiance[0] += share;
        }
        return;
    }

    for (leaf, w) in leaves.iter().zip(weights.iter()) {
        let share = amount * (*w / total);
        arena.get_mut(*leaf).received_radiance[0] += share;
    }
}
