//! Physics engine benchmarks (criterion - wall-clock time).
//!
//! Run all:    cargo bench --manifest-path benchmarks/Cargo.toml --bench physics
//! Filter:     cargo bench --manifest-path benchmarks/Cargo.toml --bench physics -- broadphase

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{Quat, Vec3};
use rein_physics::physics::broadphase::{brute_force_pairs, SpatialHashGrid};
use rein_physics::physics::integrator::integrate;
use rein_physics::physics::narrowphase::{
    box_box, capsule_capsule, detect_collision, sphere_box, sphere_sphere,
};
use rein_physics::physics::solver::ContactSolver;
use rein_physics::{BodyDescriptor, SimParams};
use rein_physics_bench::*;

// ---------------------------------------------------------------------------
// Broadphase
// ---------------------------------------------------------------------------

fn bench_broadphase(c: &mut Criterion) {
    let scenes: [(&str, fn(usize) -> Vec<rein_physics::RigidBody>); 3] = [
        ("uniform_spheres", setup_sphere_bodies),
        ("mixed_shapes", setup_mixed_bodies),
        ("sparse", setup_sparse_bodies),
    ];
    for (name, setup) in scenes {
        let mut group = c.benchmark_group(format!("broadphase/{name}"));
        for &n in &[100, 500, 1000, 2000] {
            let bodies = setup(n);
            let aabbs = aabbs_of(&bodies);
            let mut grid = SpatialHashGrid::new(n.next_power_of_two().max(256), 32, n * 8);
            let mut pairs = Vec::new();
            group.bench_with_input(BenchmarkId::new("grid", n), &n, |b, _| {
                b.iter(|| {
                    grid.build(&bodies, &aabbs, 2.0);
                    grid.find_pairs(&bodies, &aabbs, 2.0, n * 8, &mut pairs)
                });
            });
            if n <= 500 {
                group.bench_with_input(BenchmarkId::new("brute_force", n), &n, |b, _| {
                    b.iter(|| brute_force_pairs(&bodies, &aabbs, n * 8, &mut pairs));
                });
            }
        }
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// Narrowphase
// ---------------------------------------------------------------------------

fn bench_narrowphase(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("narrowphase/sphere_sphere");
        group.bench_function("intersecting", |b| {
            b.iter(|| sphere_sphere(Vec3::ZERO, 1.0, Vec3::new(1.5, 0.0, 0.0), 1.0));
        });
        group.bench_function("separated", |b| {
            b.iter(|| sphere_sphere(Vec3::ZERO, 1.0, Vec3::new(5.0, 0.0, 0.0), 1.0));
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("narrowphase/box_box");
        let half = Vec3::splat(1.0);
        group.bench_function("intersecting", |b| {
            b.iter(|| box_box(Vec3::ZERO, half, Vec3::new(1.5, 0.0, 0.0), half));
        });
        group.bench_function("separated", |b| {
            b.iter(|| box_box(Vec3::ZERO, half, Vec3::new(5.0, 0.0, 0.0), half));
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("narrowphase/sphere_box");
        let half = Vec3::splat(1.0);
        let rotated = Quat::from_rotation_y(0.785);
        group.bench_function("intersecting", |b| {
            b.iter(|| sphere_box(Vec3::new(1.5, 0.0, 0.0), 1.0, Vec3::ZERO, Quat::IDENTITY, half));
        });
        group.bench_function("rotated", |b| {
            b.iter(|| sphere_box(Vec3::new(1.5, 0.0, 0.0), 1.0, Vec3::ZERO, rotated, half));
        });
        group.bench_function("inside", |b| {
            b.iter(|| sphere_box(Vec3::new(0.2, 0.1, 0.0), 1.0, Vec3::ZERO, Quat::IDENTITY, half));
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("narrowphase/capsule_capsule");
        let tilted = Quat::from_rotation_z(1.2);
        group.bench_function("crossing", |b| {
            b.iter(|| {
                capsule_capsule(
                    Vec3::ZERO,
                    Quat::IDENTITY,
                    0.5,
                    1.0,
                    Vec3::new(0.8, 0.0, 0.0),
                    tilted,
                    0.5,
                    1.0,
                )
            });
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("narrowphase/dispatch");
        let offset = Vec3::new(0.8, 0.0, 0.0);
        let sphere = BodyDescriptor::sphere(0.5).to_body();
        let cube = BodyDescriptor::cuboid(Vec3::splat(0.5)).to_body();
        let capsule = BodyDescriptor::capsule(0.3, 0.4).to_body();
        let shifted = |mut body: rein_physics::RigidBody| {
            body.position += offset;
            body
        };
        let cases = [
            ("sphere_sphere", sphere, shifted(sphere)),
            ("box_box", cube, shifted(cube)),
            ("box_sphere", cube, shifted(sphere)),
            ("sphere_box", sphere, shifted(cube)),
            ("capsule_sphere", capsule, shifted(sphere)),
        ];
        for (name, a, b_body) in cases {
            group.bench_function(name, |b| {
                b.iter(|| detect_collision(&a, &b_body));
            });
        }
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

fn bench_solver(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("solver/contact_count");
        for &n in &[10, 50, 100, 500] {
            let (bodies, contacts) = setup_contacts(n);
            let mut solver = ContactSolver::new();
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
                b.iter_batched(
                    || (bodies.clone(), contacts.clone()),
                    |(mut bodies, mut contacts)| {
                        solver.solve_velocities(&mut bodies, &mut contacts, 8, 1.0 / 60.0)
                    },
                    criterion::BatchSize::SmallInput,
                );
            });
        }
        group.finish();
    }

    {
        let mut group = c.benchmark_group("solver/iterations");
        let (bodies, contacts) = setup_contacts(100);
        let mut solver = ContactSolver::new();
        for &iters in &[1, 4, 8, 16, 32] {
            group.bench_with_input(BenchmarkId::from_parameter(iters), &iters, |b, &iters| {
                b.iter_batched(
                    || (bodies.clone(), contacts.clone()),
                    |(mut bodies, mut contacts)| {
                        solver.solve_velocities(&mut bodies, &mut contacts, iters, 1.0 / 60.0)
                    },
                    criterion::BatchSize::SmallInput,
                );
            });
        }
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

fn bench_pipeline(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("pipeline/step");
        group.sample_size(30);
        for &n in &[50, 100, 500, 1000] {
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
                b.iter_batched(
                    || setup_scene(n),
                    |mut world| world.step(1.0 / 60.0),
                    criterion::BatchSize::LargeInput,
                );
            });
        }
        group.finish();
    }

    {
        let mut group = c.benchmark_group("pipeline/sustained_10steps");
        group.sample_size(20);
        for &n in &[100, 500] {
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
                b.iter_batched(
                    || setup_scene(n),
                    |mut world| {
                        for _ in 0..10 {
                            world.step(1.0 / 60.0);
                        }
                    },
                    criterion::BatchSize::LargeInput,
                );
            });
        }
        group.finish();
    }

    {
        let mut group = c.benchmark_group("pipeline/stages");
        let bodies = setup_mixed_bodies(500);
        let params = SimParams::default();
        group.bench_function("integrate_500", |b| {
            b.iter_batched(
                || bodies.clone(),
                |mut bodies| integrate(&mut bodies, &params, 1.0 / 60.0),
                criterion::BatchSize::LargeInput,
            );
        });
        group.bench_function("transforms_500", |b| {
            let mut world = setup_scene(500);
            b.iter(|| world.transforms());
        });
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// Mass physics (continuous spawn + step)
// ---------------------------------------------------------------------------

fn bench_mass_physics(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("mass_physics/spawn_rate");
        group.sample_size(10);
        for &spawn_per_frame in &[1, 3, 10] {
            group.bench_with_input(
                BenchmarkId::from_parameter(spawn_per_frame),
                &spawn_per_frame,
                |b, &spf| {
                    b.iter_batched(
                        || setup_mass_scene(0),
                        |mut world| run_mass_physics(&mut world, 60, spf),
                        criterion::BatchSize::LargeInput,
                    );
                },
            );
        }
        group.finish();
    }

    {
        let mut group = c.benchmark_group("mass_physics/initial_bodies");
        group.sample_size(10);
        for &initial in &[0, 100, 500] {
            group.bench_with_input(
                BenchmarkId::from_parameter(initial),
                &initial,
                |b, &init| {
                    b.iter_batched(
                        || setup_mass_scene(init),
                        |mut world| run_mass_physics(&mut world, 60, 3),
                        criterion::BatchSize::LargeInput,
                    );
                },
            );
        }
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// GPU physics
// ---------------------------------------------------------------------------

fn bench_gpu_physics(c: &mut Criterion) {
    let ctx = match create_headless_context() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("GPU benchmarks skipped: {e}");
            return;
        }
    };

    let mut group = c.benchmark_group("gpu/pipeline_step");
    group.sample_size(20);
    for &n in &[256, 1000, 4000] {
        let mut world = match setup_gpu_scene(&ctx, n) {
            Ok(world) => world,
            Err(e) => {
                eprintln!("GPU benchmarks skipped: {e}");
                return;
            }
        };
        group.bench_with_input(BenchmarkId::new("gpu", n), &n, |b, _| {
            b.iter(|| world.step(1.0 / 60.0));
        });

        let mut cpu = setup_scene(n);
        group.bench_with_input(BenchmarkId::new("cpu", n), &n, |b, _| {
            b.iter(|| cpu.step(1.0 / 60.0));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_broadphase,
    bench_narrowphase,
    bench_solver,
    bench_pipeline,
    bench_mass_physics,
    bench_gpu_physics,
);
criterion_main!(benches);
