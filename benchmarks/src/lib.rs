//! Scene builders shared by the physics benchmarks.

use glam::Vec3;
use rein_physics::physics::broadphase::{compute_aabbs, CollisionPair};
use rein_physics::physics::narrowphase::{collide_pair, ground_contact};
use rein_physics::{
    Aabb, Backend, BodyDescriptor, Contact, PhysicsConfig, PhysicsWorld, RigidBody, WgpuContext,
};

/// Deterministic jitter so runs are comparable.
fn jitter(i: usize) -> f32 {
    let h = (i as u32).wrapping_mul(2_654_435_761);
    (h >> 8) as f32 / (1u32 << 24) as f32 - 0.5
}

fn grid_position(i: usize, n: usize, spacing: f32) -> Vec3 {
    let side = (n as f32).cbrt().ceil().max(1.0) as usize;
    Vec3::new(
        (i % side) as f32 * spacing + jitter(i) * 0.2,
        (i / (side * side)) as f32 * spacing + 1.0,
        ((i / side) % side) as f32 * spacing + jitter(i + n) * 0.2,
    )
}

/// `n` unit spheres packed close enough that neighbours overlap.
pub fn setup_sphere_bodies(n: usize) -> Vec<RigidBody> {
    (0..n)
        .map(|i| {
            BodyDescriptor::sphere(0.5)
                .with_position(grid_position(i, n, 0.9))
                .to_body()
        })
        .collect()
}

/// Spheres, boxes and capsules in a dense block.
pub fn setup_mixed_bodies(n: usize) -> Vec<RigidBody> {
    (0..n)
        .map(|i| {
            let desc = match i % 3 {
                0 => BodyDescriptor::sphere(0.5),
                1 => BodyDescriptor::cuboid(Vec3::splat(0.45)),
                _ => BodyDescriptor::capsule(0.3, 0.3),
            };
            desc.with_position(grid_position(i, n, 0.9)).to_body()
        })
        .collect()
}

/// Spheres spread out so almost nothing overlaps.
pub fn setup_sparse_bodies(n: usize) -> Vec<RigidBody> {
    (0..n)
        .map(|i| {
            BodyDescriptor::sphere(0.5)
                .with_position(grid_position(i, n, 4.0))
                .to_body()
        })
        .collect()
}

pub fn aabbs_of(bodies: &[RigidBody]) -> Vec<Aabb> {
    let mut aabbs = Vec::with_capacity(bodies.len());
    compute_aabbs(bodies, &mut aabbs);
    aabbs
}

/// Bodies resting in pairs on the ground, with their contacts.
pub fn setup_contacts(n: usize) -> (Vec<RigidBody>, Vec<Contact>) {
    let mut bodies = Vec::with_capacity(n * 2);
    for i in 0..n {
        let x = i as f32 * 3.0;
        bodies.push(
            BodyDescriptor::cuboid(Vec3::splat(0.5))
                .with_position(Vec3::new(x, 0.49, 0.0))
                .to_body(),
        );
        bodies.push(
            BodyDescriptor::sphere(0.5)
                .with_position(Vec3::new(x, 1.45, 0.0))
                .with_linear_velocity(Vec3::new(0.0, -1.0, 0.2))
                .to_body(),
        );
    }
    let mut contacts = Vec::new();
    for (i, body) in bodies.iter().enumerate() {
        contacts.extend(ground_contact(i as u32, body));
    }
    let pairs: Vec<CollisionPair> = (0..n as u32).map(|i| (2 * i, 2 * i + 1)).collect();
    for (a, b) in pairs {
        contacts.extend(collide_pair(
            a,
            &bodies[a as usize],
            b,
            &bodies[b as usize],
        ));
    }
    (bodies, contacts)
}

/// Falling mixed bodies above the ground plane.
pub fn populate(world: &mut PhysicsWorld, n: usize) -> anyhow::Result<()> {
    for (i, body) in setup_mixed_bodies(n).iter().enumerate() {
        let desc = match body.shape {
            rein_physics::ColliderShape::Sphere { radius } => BodyDescriptor::sphere(radius),
            rein_physics::ColliderShape::Box { half_extents } => {
                BodyDescriptor::cuboid(half_extents)
            }
            rein_physics::ColliderShape::Capsule {
                radius,
                half_height,
            } => BodyDescriptor::capsule(radius, half_height),
        };
        let position = grid_position(i, n, 1.2) + Vec3::Y * 2.0;
        world.create_body(&desc.with_position(position))?;
    }
    Ok(())
}

/// CPU world with `n` falling bodies.
pub fn setup_scene(n: usize) -> PhysicsWorld {
    let mut world =
        PhysicsWorld::new(PhysicsConfig::with_capacity(n.max(64) * 2).with_backend(Backend::Cpu));
    // Capacity covers `n`, so creation cannot fail.
    let _ = populate(&mut world, n);
    world
}

/// GPU world with `n` falling bodies.
pub fn setup_gpu_scene(ctx: &WgpuContext, n: usize) -> anyhow::Result<PhysicsWorld> {
    let config = PhysicsConfig::with_capacity(n.max(64) * 2).with_backend(Backend::Gpu);
    let mut world = PhysicsWorld::with_context(config, ctx);
    anyhow::ensure!(world.has_gpu(), "gpu physics could not be created");
    populate(&mut world, n)?;
    Ok(world)
}

/// Spawn `spawn_per_frame` spheres every frame while stepping, the way a
/// demo pouring bodies into a pile would.
pub fn run_mass_physics(world: &mut PhysicsWorld, frames: usize, spawn_per_frame: usize) {
    for frame in 0..frames {
        for k in 0..spawn_per_frame {
            let i = frame * spawn_per_frame + k;
            let position = Vec3::new(jitter(i) * 4.0, 8.0, jitter(i + 7) * 4.0);
            if world
                .create_body(&BodyDescriptor::sphere(0.3).with_position(position))
                .is_err()
            {
                break;
            }
        }
        world.step(1.0 / 60.0);
    }
}

/// Empty world sized for the mass benchmarks, optionally pre-filled.
pub fn setup_mass_scene(initial: usize) -> PhysicsWorld {
    let mut world =
        PhysicsWorld::new(PhysicsConfig::with_capacity(4096).with_backend(Backend::Cpu));
    let _ = populate(&mut world, initial);
    world
}

/// Hardware adapters only; software timings are not comparable.
pub fn create_headless_context() -> anyhow::Result<WgpuContext> {
    WgpuContext::new_blocking(false)
}
