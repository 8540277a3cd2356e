//! Benchmarks for the refinement oracle and its recursive subdivision,
//! exercised through the public `Engine` so the benchmark tracks the whole
//! refine -> form-factor -> shaft-cull -> transport loop rather than one
//! function in isolation. Each benchmark asserts the solve actually moved
//! energy, guarding against a silently-broken refine pass looking fast.

use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;

use radiant_hierarchy::config::{BasisType, Config, IterationMethod};
use radiant_hierarchy::scene::{SceneGeometry, TestGeometry, TestPatch, TestRayCaster};
use radiant_hierarchy::Color;

/// Builds a grid of `n x n` unit-quad receiver patches in the z=1 plane plus
/// one unit-quad emitter in the z=0 plane, all facing each other.
fn grid_scene(n: usize) -> (Vec<Rc<TestPatch>>, Rc<dyn SceneGeometry>) {
    let mut patches = Vec::with_capacity(n * n + 1);
    let emitter = Rc::new(TestPatch::quad(
        0,
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(n as f32, 0.0, 0.0),
        Vec3::new(n as f32, n as f32, 0.0),
        Vec3::new(0.0, n as f32, 0.0),
        Color::BLACK,
        Color::gray(1.0),
    ));
    patches.push(emitter);

    let mut id = 1u64;
    for y in 0..n {
        for x in 0..n {
            let x0 = x as f32;
            let y0 = y as f32;
            let p = Rc::new(TestPatch::quad(
                id,
                Vec3::new(x0, y0, 2.0),
                Vec3::new(x0 + 1.0, y0, 2.0),
                Vec3::new(x0 + 1.0, y0 + 1.0, 2.0),
                Vec3::new(x0, y0 + 1.0, 2.0),
                Color::gray(0.6),
                Color::BLACK,
            ));
            patches.push(p);
            id += 1;
        }
    }

    let leaves: Vec<Rc<TestGeometry>> = patches.iter().map(|p| TestGeometry::leaf(p.clone())).collect();
    let root: Rc<dyn SceneGeometry> = TestGeometry::compound(u64::MAX, leaves);
    (patches, root)
}

fn bench_gathering_iterations(c: &mut Criterion) {
    let mut group = c.benchmark_group("refine_gathering_iterations");
    for n in [2usize, 4usize] {
        let (patches, root) = grid_scene(n);
        let patch_refs: Vec<Rc<dyn radiant_hierarchy::Patch>> = patches.iter().map(|p| p.clone() as Rc<dyn radiant_hierarchy::Patch>).collect();
        let caster = TestRayCaster { patches: patch_refs.clone() };
        let config = Config { iteration_method: IterationMethod::GaussSeidel, clustered: n > 2, basis_type: BasisType::Constant, ..Config::default() };

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bencher, _| {
            bencher.iter(|| {
                let mut engine = radiant_hierarchy::init(&root, &patch_refs, config.clone(), &caster).unwrap();
                for _ in 0..3 {
                    engine.step();
                }
                let stats = engine.stats();
                assert!(
                    stats.interactions.total > 0,
                    "[CORRECTNESS FAILURE] bench_gathering_iterations: no interactions created for n={}",
                    n
                );
                black_box(stats.interactions.total)
            });
        });
    }
    group.finish();
}

fn bench_shooting_iterations(c: &mut Criterion) {
    let (patches, root) = grid_scene(3);
    let patch_refs: Vec<Rc<dyn radiant_hierarchy::Patch>> = patches.iter().map(|p| p.clone() as Rc<dyn radiant_hierarchy::Patch>).collect();
    let caster = TestRayCaster { patches: patch_refs.clone() };
    let config = Config { iteration_method: IterationMethod::Southwell, clustered: true, basis_type: BasisType::Constant, ..Config::default() };

    c.bench_function("refine_shooting_iterations_n3", |bencher| {
        bencher.iter(|| {
            let mut engine = radiant_hierarchy::init(&root, &patch_refs, config.clone(), &caster).unwrap();
            for _ in 0..5 {
                engine.step();
            }
            let stats = engine.stats();
            assert_eq!(stats.iteration_number, 5, "[CORRECTNESS FAILURE] bench_shooting_iterations: iteration count drifted");
            black_box(stats.elements)
        });
    });
}

criterion_group!(benches, bench_gathering_iterations, bench_shooting_iterations);
criterion_main!(benches);
