//! Rein Physics
//!
//! Real-time rigid body simulation on wgpu compute, with a CPU path that
//! produces the same results when no device is available.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **context** - Core wgpu wrapper (Device, Queue)
//! 2. **core** - GPU primitives (storage/uniform buffers, compute pipelines)
//! 3. **compute** - Dispatch and readback helpers
//! 4. **physics** - Bodies, broadphase, narrowphase, solver, integrator and
//!    the [`PhysicsWorld`] orchestrator (GPU backend behind `gpu-physics`)
//!
//! # Example
//!
//! ```no_run
//! use rein_physics::{BodyDescriptor, PhysicsConfig, PhysicsWorld};
//! use rein_physics::glam::Vec3;
//!
//! let mut world = PhysicsWorld::initialize(PhysicsConfig::default());
//! let ball = world
//!     .create_body(&BodyDescriptor::sphere(0.5).with_position(Vec3::Y * 5.0))
//!     .unwrap();
//! for _ in 0..60 {
//!     world.step(1.0 / 60.0);
//! }
//! println!("{:?}", world.body(ball).map(|b| b.position));
//! ```

pub mod context;
pub mod core;

pub mod compute;

pub mod physics;

// Re-export commonly used types
pub use context::WgpuContext;

pub use core::{ComputePipelineBuilder, StorageBuffer, UniformBuffer};

pub use compute::{compute_workgroup_count, read_back, ComputeDispatcher};

pub use physics::{
    Aabb, Backend, BackendKind, BodyDescriptor, BodyFlags, BodyHandle, BodyTransform,
    ColliderShape, Contact, PhysicsConfig, PhysicsError, PhysicsWorld, RigidBody, SimParams,
    SimParamsUpdate, StepMetrics, GROUND,
};

#[cfg(feature = "gpu-physics")]
pub use physics::gpu::{GpuPhysics, GPU_BODY_THRESHOLD};

// Re-export glam for convenience
pub use glam;
