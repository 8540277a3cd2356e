//! Push-pull: reconciles the radiance received at every level of the
//! hierarchy after a gather/shoot pass, then updates each leaf's total
//! radiance from what it received.
//!
//! Bottom-up ("pull") aggregates what finer elements received up into their
//! parent, so a parent that never had a link of its own still reflects the
//! energy its children gathered. Top-down ("push") distributes what a
//! coarse element received down into its children, so energy gathered at a
//! cluster or at a regularly-subdivided parent still reaches the leaves that
//! actually carry a radiance to display or sample.

use crate::color::Color;
use crate::config::Config;
use crate::element::{project_coeffs, ElementArena, ElementId};

/// Runs one full push-pull pass rooted at `root`, finishing by updating
/// every leaf's radiance from its received radiance.
pub fn reconcile(arena: &mut ElementArena, root: ElementId, config: &Config) {
    pull(arena, root);
    push(arena, root);
    finalize_leaves(arena, root, config);
}

fn pull(arena: &mut ElementArena, id: ElementId) {
    let irregular = arena.get(id).irregular_children.clone();
    for &c in &irregular {
        pull(arena, c);
    }
    let regular = arena.get(id).regular_children;
    if let Some(children) = regular {
        for c in children {
            pull(arena, c);
        }
    }

    if arena.get(id).is_cluster() && !irregular.is_empty() {
        pull_cluster(arena, id, &irregular);
    } else if let Some(children) = regular {
        pull_regular(arena, id, children);
    }
}

/// Area-weighted average of each irregular child's received radiance,
/// unshot radiance and potential into the cluster itself.
fn pull_cluster(arena: &mut ElementArena, id: ElementId, children: &[ElementId]) {
    let mut area_sum = 0.0f32;
    let mut received = Color::BLACK;
    let mut unshot = Color::BLACK;
    let mut received_potential = 0.0f32;
    let mut unshot_potential = 0.0f32;
    let has_unshot = arena.get(id).unshot_radiance.is_some();

    for &c in children {
        let child = arena.get(c);
        area_sum += child.area;
        received += child.received_radiance[0] * child.area;
        if let Some(u) = &child.unshot_radiance {
            unshot += u[0] * child.area;
        }
        received_potential += child.received_potential * child.area;
        unshot_potential += child.unshot_potential * child.area;
    }

    if area_sum <= 0.0 {
        return;
    }
    let elem = arena.get_mut(id);
    elem.received_radiance[0] = received * (1.0 / area_sum);
    if has_unshot {
        if let Some(u) = elem.unshot_radiance.as_mut() {
            u[0] = unshot * (1.0 / area_sum);
        }
    }
    elem.received_potential = received_potential / area_sum;
    elem.unshot_potential = unshot_potential / area_sum;
}

/// Restricts each regular child's received/unshot coefficients back up into
/// the parent's basis, equally weighted (each child covers exactly 1/4 of
/// the parent's domain).
fn pull_regular(arena: &mut ElementArena, id: ElementId, children: [ElementId; 4]) {
    let basis_size = arena.get(id).basis_size;
    let mut received = vec![Color::BLACK; basis_size];
    let has_unshot = arena.get(id).unshot_radiance.is_some();
    let mut unshot = vec![Color::BLACK; basis_size];

    for c in children {
        let child = arena.get(c);
        for i in 0..basis_size.min(child.received_radiance.len()) {
            received[i] += child.received_radiance[i] * 0.25;
        }
        if let Some(u) = &child.unshot_radiance {
            for i in 0..basis_size.min(u.len()) {
                unshot[i] += u[i] * 0.25;
            }
        }
    }

    let elem = arena.get_mut(id);
    elem.received_radiance = received;
    if has_unshot {
        elem.unshot_radiance = Some(unshot);
    }
}

fn push(arena: &mut ElementArena, id: ElementId) {
    let irregular = arena.get(id).irregular_children.clone();
    let regular = arena.get(id).regular_children;

    if arena.get(id).is_cluster() && !irregular.is_empty() {
        let parent_received = arena.get(id).received_radiance[0];
        let parent_unshot = arena.get(id).unshot_radiance.as_ref().map(|u| u[0]);
        let parent_received_potential = arena.get(id).received_potential;
        let parent_unshot_potential = arena.get(id).unshot_potential;

        for &c in &irregular {
            let child = arena.get_mut(c);
            child.received_radiance[0] += parent_received;
            if let (Some(cu), Some(pu)) = (child.unshot_radiance.as_mut(), parent_unshot) {
                cu[0] += pu;
            }
            child.received_potential += parent_received_potential;
            child.unshot_potential += parent_unshot_potential;
        }
    } else if let Some(children) = regular {
        let basis_type = arena.get(id).basis_type;
        let domain = arena.get(id).domain();
        let parent_received: Vec<f32> = arena.get(id).received_radiance.iter().map(|c| c.max_component()).collect();
        let parent_received_colors = arena.get(id).received_radiance.clone();
        let parent_unshot_colors = arena.get(id).unshot_radiance.clone();
        let _ = parent_received;

        for child in children {
            let up = arena.get(child).up_transform.expect("regular child always has an up-transform");
            let projected = project_coeffs(basis_type, domain, &up, &parent_received_colors);
            let projected_unshot = parent_unshot_colors.as_ref().map(|u| project_coeffs(basis_type, domain, &up, u));

            let c = arena.get_mut(child);
            for i in 0..c.received_radiance.len().min(projected.len()) {
                c.received_radiance[i] += projected[i];
            }
            if let (Some(cu), Some(pu)) = (c.unshot_radiance.as_mut(), projected_unshot) {
                for i in 0..cu.len().min(pu.len()) {
                    cu[i] += pu[i];
                }
            }
        }
    }

    for &c in &irregular {
        push(arena, c);
    }
    if let Some(children) = regular {
        for c in children {
            push(arena, c);
        }
    }
}

/// Updates every surface leaf's total radiance from what it received this
/// pass (`Ed + Rd * received_radiance`, basis-wise), rolling the newly
/// reflected light into `unshot_radiance` when shooting, then clears the
/// accumulator for the next pass.
fn finalize_leaves(arena: &mut ElementArena, root: ElementId, config: &Config) {
    let mut leaves = Vec::new();
    arena.for_each_leaf(root, &mut |id| leaves.push(id));
    let shooting = config.iteration_method.is_shooting();

    for id in leaves {
        let elem = arena.get_mut(id);
        if elem.is_cluster() {
            continue;
        }
        for i in 0..elem.radiance.len() {
            let received = elem.received_radiance.get(i).copied().unwrap_or(Color::BLACK);
            let reflected = elem.rd.product(received);
            elem.radiance[i] = if i == 0 { elem.ed + reflected } else { reflected };
            if shooting {
                if let Some(u) = elem.unshot_radiance.as_mut() {
                    if i < u.len() {
                        u[i] += reflected;
                    }
                }
            }
            elem.received_radiance[i] = Color::BLACK;
        }
        elem.potential += elem.received_potential;
        if shooting {
            elem.unshot_potential += elem.received_potential;
        }
        elem.received_potential = 0.0;
    }

    finalize_cluster_radiance(arena, root);
}

/// Recomputes every cluster's displayed radiance as the area-weighted mean
/// of its children's (now finalized) radiance, bottom-up.
fn finalize_cluster_radiance(arena: &mut ElementArena, id: ElementId) -> Color {
    let irregular = arena.get(id).irregular_children.clone();
    if !arena.get(id).is_cluster() {
        return arena.get(id).radiance.first().copied().unwrap_or(Color::BLACK);
    }
    let mut area_sum = 0.0f32;
    let mut radiance = Color::BLACK;
    for &c in &irregular {
        let child_radiance = finalize_cluster_radiance(arena, c);
        let area = arena.get(c).area;
        area_sum += area;
        radiance += child_radiance * area;
    }
    if area_sum > 0.0 {
        radiance = radiance * (1.0 / area_sum);
    }
    arena.get_mut(id).radiance[0] = radiance;
    radiance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{TestGeometry, TestPatch};
    use glam::Vec3;
    use std::rc::Rc;

    #[test]
    fn leaf_radiance_reflects_received_times_rd_plus_emission() {
        let mut arena = ElementArena::new();
        let config = Config::default();
        let patch: Rc<dyn crate::scene::Patch> = Rc::new(TestPatch::quad(
            1,
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Color::gray(0.5),
            Color::gray(0.1),
        ));
        let id = arena.create_top_level(patch, &config).unwrap();
        arena.get_mut(id).received_radiance[0] = Color::gray(2.0);
        reconcile(&mut arena, id, &config);
        let expected = Color::gray(0.1) + Color::gray(0.5).product(Color::gray(2.0));
        assert!((arena.get(id).radiance[0].0 - expected.0).length() < 1e-5);
        assert_eq!(arena.get(id).received_radiance[0], Color::BLACK);
    }

    #[test]
    fn cluster_pull_push_round_trips_through_both_leaves() {
        let mut arena = ElementArena::new();
        let config = Config::default();
        let p1 = TestPatch::quad(1, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0), Vec3::new(0.0, 1.0, 0.0), Color::gray(0.5), Color::BLACK);
        let p2 = TestPatch::quad(2, Vec3::new(2.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 0.0), Vec3::new(3.0, 1.0, 0.0), Vec3::new(2.0, 1.0, 0.0), Color::gray(0.5), Color::BLACK);
        let leaf1 = TestGeometry::leaf(Rc::new(p1));
        let leaf2 = TestGeometry::leaf(Rc::new(p2));
        let root: Rc<dyn crate::scene::SceneGeometry> = TestGeometry::compound(1, vec![leaf1, leaf2]);
        let cluster = arena.create_cluster_hierarchy(&root, &config).unwrap();

        let mut ids = Vec::new();
        arena.for_each_surface_in_subtree(cluster, &mut |id| ids.push(id));
        arena.get_mut(ids[0]).received_radiance[0] = Color::gray(1.0);

        reconcile(&mut arena, cluster, &config);
        // The cluster pulled leaf0's received radiance up, then pushed it back
        // down equally to both leaves.
        assert!(arena.get(ids[1]).radiance[0].abs_max_component() > 0.0);
    }
}
