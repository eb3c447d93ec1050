//! End-to-end behaviour of the physics world. Every scenario runs on the CPU
//! backend; the GPU variants run only when a compute adapter exists,
//! including software adapters.

use approx::assert_abs_diff_eq;
use glam::{Quat, Vec3};
use rein_physics::physics::broadphase::{compute_aabbs, SpatialHashGrid};
use rein_physics::physics::solver::{contact_material, SLOP};
use rein_physics::{
    Backend, BackendKind, BodyDescriptor, BodyHandle, PhysicsConfig, PhysicsError, PhysicsWorld,
    RigidBody, SimParamsUpdate, WgpuContext, GROUND,
};
use std::collections::HashSet;

const DT: f32 = 1.0 / 60.0;

fn cpu_world(capacity: usize) -> PhysicsWorld {
    PhysicsWorld::new(PhysicsConfig::with_capacity(capacity).with_backend(Backend::Cpu))
}

/// World stepping on the GPU, or `None` when no adapter or GPU backend is
/// available on this machine.
fn gpu_world(config: PhysicsConfig) -> Option<PhysicsWorld> {
    let Ok(ctx) = WgpuContext::new_blocking(true) else {
        eprintln!("no compute adapter, skipping");
        return None;
    };
    let world = PhysicsWorld::with_context(config.with_backend(Backend::Gpu), &ctx);
    if !world.has_gpu() {
        eprintln!("gpu physics unavailable, skipping: {:?}", world.device_error());
        return None;
    }
    Some(world)
}

fn no_gravity(world: &mut PhysicsWorld) {
    world.update_parameters(SimParamsUpdate {
        gravity: Some(Vec3::ZERO),
        ground_plane: Some(false),
        ..Default::default()
    });
}

/// Small deterministic generator for scene layouts.
struct Lcg(u64);

impl Lcg {
    fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 40) as f32) / ((1u64 << 24) as f32)
    }
}

fn assert_bounce_ratio(world: &mut PhysicsWorld) {
    let dt = 1.0 / 120.0;
    let ball = world
        .create_body(
            &BodyDescriptor::sphere(0.5)
                .with_position(Vec3::new(0.0, 5.5, 0.0))
                .with_restitution(0.8)
                .with_damping(0.0, 0.0),
        )
        .unwrap();

    let mut bounced = false;
    for _ in 0..1000 {
        let before = world.body(ball).unwrap().linear_velocity.y;
        world.step(dt);
        let after = world.body(ball).unwrap().linear_velocity.y;
        if after > 0.0 {
            let impact = -(before - 9.81 * dt);
            assert!(impact > 9.0, "impact speed {impact}");
            let ratio = after / impact;
            assert!(
                (ratio - 0.8).abs() < 0.8 * 0.02,
                "post-bounce ratio {ratio} (impact {impact}, rebound {after})"
            );
            bounced = true;
            break;
        }
    }
    assert!(bounced, "sphere never bounced");
}

#[test]
fn bounce_keeps_restitution_ratio() {
    assert_bounce_ratio(&mut cpu_world(4));
}

#[test]
fn gpu_bounce_keeps_restitution_ratio() {
    let Some(mut world) = gpu_world(PhysicsConfig::with_capacity(4)) else {
        return;
    };
    assert_bounce_ratio(&mut world);
    assert_eq!(world.metrics().backend, BackendKind::Gpu);
}

#[test]
fn inelastic_collision_conserves_momentum() {
    let mut world = cpu_world(4);
    no_gravity(&mut world);
    let desc = BodyDescriptor::sphere(0.5)
        .with_restitution(0.0)
        .with_friction(0.0)
        .with_damping(0.0, 0.0);
    let a = world
        .create_body(
            &desc
                .with_position(Vec3::new(-0.501, 5.0, 0.0))
                .with_linear_velocity(Vec3::X * 0.3),
        )
        .unwrap();
    let b = world
        .create_body(
            &desc
                .with_position(Vec3::new(0.501, 5.0, 0.0))
                .with_linear_velocity(Vec3::X * -0.1),
        )
        .unwrap();

    let momentum = |world: &mut PhysicsWorld| {
        world.body(a).unwrap().linear_velocity + world.body(b).unwrap().linear_velocity
    };
    let before = momentum(&mut world);
    world.step(DT);
    let after = momentum(&mut world);

    assert_eq!(world.metrics().contact_count, 1);
    assert_abs_diff_eq!(before, after, epsilon = 1e-5);
    let va = world.body(a).unwrap().linear_velocity;
    let vb = world.body(b).unwrap().linear_velocity;
    assert_abs_diff_eq!(va, vb, epsilon = 1e-4);
    assert_abs_diff_eq!(va.x, 0.1, epsilon = 1e-4);
}

#[test]
fn resting_body_sleeps_until_impulse() {
    let mut world = cpu_world(4);
    let ball = world
        .create_body(
            &BodyDescriptor::sphere(0.5)
                .with_position(Vec3::new(0.0, 0.5, 0.0))
                .with_restitution(0.0),
        )
        .unwrap();

    let mut steps = 0;
    while !world.body(ball).unwrap().is_sleeping() {
        world.step(DT);
        steps += 1;
        assert!(steps < 600, "body never fell asleep");
    }
    assert!(steps >= 60, "slept after only {steps} steps");
    assert_eq!(world.metrics().sleeping_body_count, 1);
    assert_eq!(world.metrics().active_body_count, 0);

    let rest = world.body(ball).unwrap();
    assert_eq!(rest.linear_velocity, Vec3::ZERO);
    for _ in 0..30 {
        world.step(DT);
    }
    assert_eq!(world.body(ball).unwrap().position, rest.position);

    world.apply_impulse(ball, Vec3::X).unwrap();
    assert!(!world.body(ball).unwrap().is_sleeping());
    world.step(DT);
    assert!(world.body(ball).unwrap().position.x > rest.position.x);
}

#[test]
fn grid_pairs_cover_every_overlap() {
    let mut rng = Lcg(7);
    let mut bodies: Vec<RigidBody> = Vec::new();

    // Separated lattice with jitter; every fifth body is static.
    for i in 0..216 {
        let cell = Vec3::new((i % 6) as f32, ((i / 6) % 6) as f32, (i / 36) as f32);
        let jitter = Vec3::new(rng.next_f32(), rng.next_f32(), rng.next_f32()) - 0.5;
        let mut desc = BodyDescriptor::sphere(0.5).with_position(cell * 4.0 + jitter);
        if i % 5 == 0 {
            desc = desc.fixed();
        }
        bodies.push(desc.to_body());
    }
    // Injected overlaps, including static-static ones.
    for k in 0..30 {
        let host = bodies[k * 7].position;
        let offset = Vec3::new(rng.next_f32(), rng.next_f32(), rng.next_f32()) * 0.6;
        let mut desc = BodyDescriptor::cuboid(Vec3::splat(0.4)).with_position(host + offset);
        if k % 3 == 0 {
            desc = desc.fixed();
        }
        bodies.push(desc.to_body());
    }

    let mut aabbs = Vec::new();
    compute_aabbs(&bodies, &mut aabbs);

    let mut grid = SpatialHashGrid::new(1024, 32, bodies.len() * 8);
    let cell_size = 2.0;
    grid.build(&bodies, &aabbs, cell_size);
    let mut pairs = Vec::new();
    let dropped = grid.find_pairs(&bodies, &aabbs, cell_size, 4096, &mut pairs);
    assert_eq!(dropped, 0);
    assert_eq!(grid.dropped_entries(), 0);

    let found: HashSet<(u32, u32)> = pairs.iter().copied().collect();
    assert_eq!(found.len(), pairs.len(), "duplicate pairs");

    let mut expected = 0;
    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            if !aabbs[i].overlaps(&aabbs[j]) {
                continue;
            }
            if bodies[i].is_static() && bodies[j].is_static() {
                assert!(!found.contains(&(i as u32, j as u32)));
                continue;
            }
            expected += 1;
            assert!(found.contains(&(i as u32, j as u32)), "missing pair ({i}, {j})");
        }
    }
    assert!(expected >= 15, "too few injected overlaps: {expected}");
    for &(i, j) in &pairs {
        assert!(i < j);
        assert!(!(bodies[i as usize].is_static() && bodies[j as usize].is_static()));
    }
}

fn assert_box_stack_stable(world: &mut PhysicsWorld) {
    let desc = BodyDescriptor::cuboid(Vec3::splat(0.5))
        .with_restitution(0.0)
        .with_damping(0.05, 0.05);
    let boxes: Vec<BodyHandle> = (0..3)
        .map(|i| {
            world
                .create_body(&desc.with_position(Vec3::new(0.0, 0.5 + i as f32, 0.0)))
                .unwrap()
        })
        .collect();

    let mut worst = 0.0f32;
    for _ in 0..120 {
        world.step(DT);
        worst = worst.max(world.metrics().max_penetration);
    }

    assert!(worst < SLOP * 10.0, "max penetration {worst}");
    for (i, &handle) in boxes.iter().enumerate() {
        let body = world.body(handle).unwrap();
        let drift = Vec3::new(body.position.x, 0.0, body.position.z).length();
        assert!(drift < 0.01, "box {i} drifted {drift}");
        assert!(
            (body.position.y - (0.5 + i as f32)).abs() < 0.05,
            "box {i} at y = {}",
            body.position.y
        );
    }
}

#[test]
fn box_stack_stays_stable() {
    assert_box_stack_stable(&mut cpu_world(8));
}

#[test]
fn gpu_box_stack_stays_stable() {
    let Some(mut world) = gpu_world(PhysicsConfig::with_capacity(8)) else {
        return;
    };
    assert_box_stack_stable(&mut world);
    assert_eq!(world.metrics().backend, BackendKind::Gpu);
}

/// A 300 m static slab with 80 spheres dropped onto it, ground plane off.
/// The slab covers far more grid cells than any one body may occupy.
fn slab_scene(world: &mut PhysicsWorld) -> Vec<BodyHandle> {
    world.update_parameters(SimParamsUpdate {
        ground_plane: Some(false),
        ..Default::default()
    });
    world
        .create_body(&BodyDescriptor::cuboid(Vec3::new(150.0, 0.5, 150.0)).fixed())
        .unwrap();
    (0..80)
        .map(|i| {
            let x = (i % 9) as f32 * 6.0 - 24.0;
            let z = (i / 9) as f32 * 6.0 - 24.0;
            world
                .create_body(
                    &BodyDescriptor::sphere(0.5)
                        .with_position(Vec3::new(x, 1.5, z))
                        .with_restitution(0.0),
                )
                .unwrap()
        })
        .collect()
}

fn assert_spheres_rest_on_slab(world: &mut PhysicsWorld, spheres: &[BodyHandle]) {
    let mut peak_contacts = 0;
    for _ in 0..120 {
        world.step(DT);
        let metrics = world.metrics();
        assert!(!metrics.saturated(), "capacity saturated: {metrics:?}");
        peak_contacts = peak_contacts.max(metrics.contact_count);
    }
    assert!(peak_contacts >= 80, "peak contact count {peak_contacts}");
    for &handle in spheres {
        let y = world.body(handle).unwrap().position.y;
        assert!((y - 1.0).abs() < 0.05, "{handle} at y = {y}");
    }
}

#[test]
fn large_static_slab_supports_bodies() {
    let mut world = cpu_world(128);
    let spheres = slab_scene(&mut world);
    assert_spheres_rest_on_slab(&mut world, &spheres);
}

#[test]
fn gpu_large_static_slab_supports_bodies() {
    let Some(mut world) = gpu_world(PhysicsConfig::with_capacity(128)) else {
        return;
    };
    let spheres = slab_scene(&mut world);
    assert_spheres_rest_on_slab(&mut world, &spheres);
    assert_eq!(world.metrics().backend, BackendKind::Gpu);
}

fn mixed_scene(world: &mut PhysicsWorld) -> Vec<BodyHandle> {
    let mut handles = vec![world
        .create_body(
            &BodyDescriptor::cuboid(Vec3::new(2.0, 0.25, 2.0))
                .with_position(Vec3::new(0.0, 1.0, 0.0))
                .with_orientation(Quat::from_rotation_y(0.3))
                .fixed(),
        )
        .unwrap()];
    for i in 0..12 {
        let x = (i % 4) as f32 * 0.9 - 1.35;
        let y = 2.0 + (i / 4) as f32 * 1.1;
        let desc = match i % 3 {
            0 => BodyDescriptor::sphere(0.4),
            1 => BodyDescriptor::cuboid(Vec3::splat(0.35)),
            _ => BodyDescriptor::capsule(0.25, 0.3),
        };
        handles.push(
            world
                .create_body(&desc.with_position(Vec3::new(x, y, 0.2 * i as f32 - 1.0)))
                .unwrap(),
        );
    }
    handles
}

#[test]
fn static_bodies_never_move() {
    let mut world = cpu_world(32);
    let handles = mixed_scene(&mut world);
    let slab = world.body(handles[0]).unwrap();
    for _ in 0..180 {
        world.step(DT);
    }
    let after = world.body(handles[0]).unwrap();
    assert_eq!(after.position, slab.position);
    assert_eq!(after.orientation, slab.orientation);
    assert_eq!(after.linear_velocity, Vec3::ZERO);
}

#[test]
fn contacts_respect_ordering_and_impulse_bounds() {
    let mut world = cpu_world(32);
    mixed_scene(&mut world);
    let mut seen = 0;
    for _ in 0..120 {
        world.step(DT);
        let contacts = world.contacts().to_vec();
        seen += contacts.len();
        for contact in contacts {
            assert!(contact.body_b == GROUND || contact.body_a < contact.body_b);
            assert!(contact.normal_impulse >= 0.0);

            let a = world.body(BodyHandle(contact.body_a)).unwrap();
            let b = (contact.body_b != GROUND)
                .then(|| world.body(BodyHandle(contact.body_b)).unwrap());
            let (_, friction) = contact_material(&a, b.as_ref());
            let limit = friction * contact.normal_impulse + 1e-5;
            for t in contact.tangent_impulse {
                assert!(t.abs() <= limit, "tangent {t} exceeds {limit}");
            }
        }
    }
    assert!(seen > 0);
}

#[test]
fn zero_step_leaves_transforms() {
    let mut world = cpu_world(32);
    mixed_scene(&mut world);
    for _ in 0..10 {
        world.step(DT);
    }
    let before = world.transforms();
    world.step(0.0);
    assert_eq!(world.transforms(), before);
}

#[test]
fn handles_survive_removal_until_reset() {
    let mut world = cpu_world(8);
    let a = world.create_body(&BodyDescriptor::sphere(0.5)).unwrap();
    let b = world
        .create_body(&BodyDescriptor::sphere(0.5).with_position(Vec3::X * 3.0))
        .unwrap();
    world.remove_body(a).unwrap();
    world.step(DT);

    assert!(world.body(a).is_none());
    assert_eq!(world.body(b).unwrap().position.x, 3.0);
    assert_eq!(world.metrics().body_count, 1);
    assert_eq!(
        world.apply_impulse(a, Vec3::Y),
        Err(PhysicsError::InvalidHandle(a))
    );

    world.reset();
    assert_eq!(world.body_count(), 0);
    assert_eq!(world.create_body(&BodyDescriptor::sphere(0.5)).unwrap(), a);
}

#[test]
fn invalid_descriptors_create_nothing() {
    let mut world = cpu_world(8);
    let bad = [
        BodyDescriptor::sphere(-1.0),
        BodyDescriptor::cuboid(Vec3::new(1.0, 0.0, 1.0)),
        BodyDescriptor::sphere(1.0).with_mass(-2.0),
        BodyDescriptor::sphere(1.0).with_restitution(1.5),
        BodyDescriptor::sphere(1.0).with_position(Vec3::NAN),
    ];
    for desc in &bad {
        assert!(matches!(
            world.create_body(desc),
            Err(PhysicsError::InvalidDescriptor { .. })
        ));
    }
    assert_eq!(world.body_count(), 0);
    assert!(world.transforms().is_empty());
}

#[test]
fn gpu_matches_cpu() {
    let config = PhysicsConfig::with_capacity(64);
    let Some(mut gpu) = gpu_world(config.clone()) else {
        return;
    };
    let mut cpu = PhysicsWorld::new(config.with_backend(Backend::Cpu));
    let handles = mixed_scene(&mut cpu);
    mixed_scene(&mut gpu);

    for _ in 0..60 {
        cpu.step(DT);
        gpu.step(DT);
    }
    assert_eq!(gpu.metrics().backend, BackendKind::Gpu);
    assert_eq!(gpu.metrics().body_count, cpu.metrics().body_count);
    for handle in handles {
        let c = cpu.body(handle).unwrap();
        let g = gpu.body(handle).unwrap();
        assert!(
            (c.position - g.position).length() < 0.05,
            "{handle}: cpu {} vs gpu {}",
            c.position,
            g.position
        );
    }
}
