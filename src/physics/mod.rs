//! Rigid body physics: spatial hash broadphase, exact narrowphase, Jacobi
//! impulse solver, and a GPU backend running the same passes as compute
//! shaders.
//!
//! # Architecture
//!
//! Every step runs the same pass sequence on either backend:
//!
//! 1. Integrate velocities and positions (CCD sub-steps for fast bodies)
//! 2. Broadphase: AABBs, spatial hash counting sort, candidate pairs
//! 3. Narrowphase: ground contacts and pairwise shape tests
//! 4. Warm start from last step's impulses, wake touched sleepers
//! 5. Velocity iterations (Jacobi, per-body gather)
//! 6. Position correction
//! 7. Sleep bookkeeping, force clear, contact cache
//!
//! [`PhysicsWorld`] owns the body store and picks the backend per step.

pub mod broadphase;
pub mod collider;
pub mod contact;
pub mod error;
#[cfg(feature = "gpu-physics")]
pub mod gpu;
pub mod integrator;
pub mod metrics;
pub mod narrowphase;
pub mod params;
pub mod rigid_body;
pub mod solver;

use std::time::Instant;

use glam::{Quat, Vec3};

pub use self::collider::{Aabb, ColliderShape};
pub use self::contact::{Contact, ContactCache, GROUND};
pub use self::error::PhysicsError;
pub use self::metrics::{BackendKind, StepMetrics};
pub use self::params::{Backend, PhysicsConfig, SimParams, SimParamsUpdate};
pub use self::rigid_body::{BodyDescriptor, BodyFlags, BodyHandle, BodyStore, RigidBody};

use self::broadphase::{brute_force_pairs, compute_aabbs, CollisionPair, SpatialHashGrid};
use self::narrowphase::{collide_pair, ground_contact};
use self::solver::{clear_contacts, correct_positions, wake_touching, ContactSolver};

/// Impulses at or below this magnitude do not wake a sleeping body.
pub const WAKE_IMPULSE_EPSILON: f32 = 1e-6;

/// Pose of one live body, as handed to a renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyTransform {
    pub handle: BodyHandle,
    pub position: Vec3,
    pub orientation: Quat,
}

/// Device, pipelines and the sync state between host and device copies.
#[cfg(feature = "gpu-physics")]
struct GpuBackend {
    ctx: crate::context::WgpuContext,
    physics: gpu::GpuPhysics,
    /// Host bodies changed since the last upload.
    device_stale: bool,
    /// Device bodies advanced past the host copy.
    host_stale: bool,
    /// Device contacts are newer than `PhysicsWorld::solved`.
    contacts_stale: bool,
}

/// The physics world: body store, step orchestration and host API.
pub struct PhysicsWorld {
    config: PhysicsConfig,
    params: SimParams,
    store: BodyStore,
    aabbs: Vec<Aabb>,
    grid: SpatialHashGrid,
    pairs: Vec<CollisionPair>,
    /// Contacts of the step in progress.
    contacts: Vec<Contact>,
    /// Contacts solved in the last step.
    solved: Vec<Contact>,
    cache: ContactCache,
    solver: ContactSolver,
    start_positions: Vec<Vec3>,
    metrics: StepMetrics,
    last_backend: Option<BackendKind>,
    /// Why the GPU backend is missing or was dropped.
    device_error: Option<PhysicsError>,
    #[cfg(feature = "gpu-physics")]
    gpu: Option<GpuBackend>,
}

impl PhysicsWorld {
    /// Create a world that steps on the CPU.
    pub fn new(config: PhysicsConfig) -> Self {
        let world = Self::cpu_only(config);
        tracing::info!(
            max_bodies = world.config.max_bodies,
            backend = ?BackendKind::Cpu,
            "physics world created"
        );
        world
    }

    fn cpu_only(config: PhysicsConfig) -> Self {
        Self {
            params: config.params,
            store: BodyStore::new(config.max_bodies),
            aabbs: Vec::new(),
            grid: SpatialHashGrid::new(
                config.grid_table_size,
                config.cell_capacity,
                config.max_cell_entries,
            ),
            pairs: Vec::new(),
            contacts: Vec::new(),
            solved: Vec::new(),
            cache: ContactCache::new(),
            solver: ContactSolver::new(),
            start_positions: Vec::new(),
            metrics: StepMetrics::default(),
            last_backend: None,
            device_error: None,
            #[cfg(feature = "gpu-physics")]
            gpu: None,
            config,
        }
    }

    /// Create a world that may step on the GPU behind `ctx`.
    ///
    /// Falls back to the CPU, with a warning, when the GPU resources cannot
    /// be created. [`Backend::Cpu`] never touches the device.
    #[cfg(feature = "gpu-physics")]
    pub fn with_context(config: PhysicsConfig, ctx: &crate::context::WgpuContext) -> Self {
        let mut world = Self::cpu_only(config);
        if world.config.backend != Backend::Cpu {
            match gpu::GpuPhysics::new(ctx, &world.config) {
                Ok(physics) => {
                    world.gpu = Some(GpuBackend {
                        ctx: ctx.clone(),
                        physics,
                        device_stale: true,
                        host_stale: false,
                        contacts_stale: false,
                    });
                }
                Err(err) => {
                    tracing::warn!(%err, "gpu physics unavailable, using cpu");
                    world.device_error = Some(PhysicsError::Device(format!("{err:#}")));
                }
            }
        }
        tracing::info!(
            max_bodies = world.config.max_bodies,
            gpu = world.gpu.is_some(),
            backend = ?world.config.backend,
            "physics world created"
        );
        world
    }

    /// Create a world, acquiring a headless compute device when the backend
    /// asks for one. Any failure degrades to the CPU path.
    pub fn initialize(config: PhysicsConfig) -> Self {
        #[cfg(feature = "gpu-physics")]
        if config.backend != Backend::Cpu {
            let allow_fallback = config.backend == Backend::Gpu;
            match crate::context::WgpuContext::new_blocking(allow_fallback) {
                Ok(ctx) => return Self::with_context(config, &ctx),
                Err(err) => {
                    tracing::warn!(%err, "no compute device, using cpu");
                    let mut world = Self::new(config);
                    world.device_error = Some(PhysicsError::Device(format!("{err:#}")));
                    return world;
                }
            }
        }
        Self::new(config)
    }

    /// Validate the descriptor and add a body.
    pub fn create_body(&mut self, desc: &BodyDescriptor) -> Result<BodyHandle, PhysicsError> {
        self.sync_host();
        let handle = self.store.insert(desc)?;
        self.mark_device_stale();
        tracing::trace!(%handle, "body created");
        Ok(handle)
    }

    /// Remove a body. Its slot stays and its handle is never reissued.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Result<(), PhysicsError> {
        self.sync_host();
        self.store.remove(handle)?;
        self.mark_device_stale();
        Ok(())
    }

    /// Add `impulse / mass` to the body's linear velocity.
    ///
    /// Static bodies ignore impulses. An impulse above
    /// [`WAKE_IMPULSE_EPSILON`] wakes a sleeping body.
    pub fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3) -> Result<(), PhysicsError> {
        self.sync_host();
        let body = self
            .store
            .get_mut(handle)
            .ok_or(PhysicsError::InvalidHandle(handle))?;
        if body.is_static() {
            return Ok(());
        }
        if !impulse.is_finite() {
            tracing::warn!(%handle, ?impulse, "ignoring non-finite impulse");
            return Ok(());
        }
        body.linear_velocity += impulse * body.inv_mass;
        if impulse.length() > WAKE_IMPULSE_EPSILON {
            body.wake();
        }
        self.mark_device_stale();
        Ok(())
    }

    /// Accumulate an external force, consumed by the next step.
    pub fn apply_force(&mut self, handle: BodyHandle, force: Vec3) -> Result<(), PhysicsError> {
        self.sync_host();
        let body = self
            .store
            .get_mut(handle)
            .ok_or(PhysicsError::InvalidHandle(handle))?;
        if body.is_static() {
            return Ok(());
        }
        if !force.is_finite() {
            tracing::warn!(%handle, ?force, "ignoring non-finite force");
            return Ok(());
        }
        body.force += force;
        self.mark_device_stale();
        Ok(())
    }

    /// Advance the simulation by `dt` seconds.
    ///
    /// Never fails. A non-positive or non-finite `dt` leaves every body
    /// untouched and only refreshes the metrics.
    pub fn step(&mut self, dt: f32) {
        let start = Instant::now();

        if !(dt.is_finite() && dt > 0.0) {
            self.sync_host();
            let (live, active, sleeping) = count_bodies(self.store.as_slice());
            self.metrics = StepMetrics {
                step_time_ms: elapsed_ms(start),
                body_count: live,
                active_body_count: active,
                sleeping_body_count: sleeping,
                backend: self.metrics.backend,
                ..StepMetrics::default()
            };
            return;
        }

        self.params.dt = dt;
        let backend = self.backend();
        if self.last_backend != Some(backend) {
            self.start_cold(backend);
        }

        let ran = match backend {
            BackendKind::Gpu => self.step_gpu(),
            BackendKind::Cpu => false,
        };
        if !ran {
            // The CPU cache predates the device steps being discarded.
            if backend == BackendKind::Gpu && self.last_backend == Some(BackendKind::Gpu) {
                self.cache.clear();
            }
            self.step_cpu(dt);
        }
        self.last_backend = Some(self.metrics.backend);

        self.metrics.step_time_ms = elapsed_ms(start);
        self.report_saturation();
        tracing::debug!(
            step_time_ms = self.metrics.step_time_ms,
            pairs = self.metrics.pair_count,
            contacts = self.metrics.contact_count,
            active = self.metrics.active_body_count,
            backend = ?self.metrics.backend,
            "physics step"
        );
    }

    /// Drop warm-start state that belongs to the other backend.
    fn start_cold(&mut self, backend: BackendKind) {
        match backend {
            BackendKind::Cpu => self.cache.clear(),
            BackendKind::Gpu => {
                #[cfg(feature = "gpu-physics")]
                if let Some(gpu) = &self.gpu {
                    gpu.physics.reset_warm_start(&gpu.ctx);
                }
            }
        }
    }

    fn step_cpu(&mut self, dt: f32) {
        self.sync_host();
        let bodies = self.store.as_mut_slice();
        let params = self.params;

        self.start_positions.clear();
        self.start_positions
            .extend(bodies.iter().map(|b| b.position));

        integrator::integrate(bodies, &params, dt);

        compute_aabbs(bodies, &mut self.aabbs);
        let (dropped_pairs, dropped_cell_entries) =
            if bodies.len() <= self.config.brute_force_threshold {
                let dropped =
                    brute_force_pairs(bodies, &self.aabbs, self.config.max_pairs, &mut self.pairs);
                (dropped, 0)
            } else {
                self.grid.build(bodies, &self.aabbs, params.cell_size);
                let dropped = self.grid.find_pairs(
                    bodies,
                    &self.aabbs,
                    params.cell_size,
                    self.config.max_pairs,
                    &mut self.pairs,
                );
                (dropped, self.grid.dropped_entries())
            };

        self.contacts.clear();
        let max_contacts = self.config.max_contacts;
        let mut dropped_contacts = 0u32;
        let mut max_penetration = 0.0f32;
        let mut emit = |contact: Contact, contacts: &mut Vec<Contact>| {
            max_penetration = max_penetration.max(contact.penetration);
            if contacts.len() < max_contacts {
                contacts.push(contact);
            } else {
                dropped_contacts += 1;
            }
        };
        if params.ground_plane {
            for (i, body) in bodies.iter().enumerate() {
                if let Some(contact) = ground_contact(i as u32, body) {
                    emit(contact, &mut self.contacts);
                }
            }
        }
        for &(a, b) in &self.pairs {
            if let Some(contact) = collide_pair(a, &bodies[a as usize], b, &bodies[b as usize]) {
                emit(contact, &mut self.contacts);
            }
        }

        if self.config.warm_start {
            self.cache.warm_start(&mut self.contacts);
        }
        let woken = wake_touching(bodies, &self.contacts);
        self.solver
            .solve_velocities(bodies, &mut self.contacts, params.solver_iterations, dt);
        correct_positions(bodies, &self.contacts);

        integrator::update_sleep_states(bodies, &self.start_positions, dt);
        integrator::clear_forces(bodies);

        let (live, active, sleeping) = count_bodies(bodies);
        self.metrics = StepMetrics {
            step_time_ms: 0.0,
            contact_count: self.contacts.len() as u32,
            pair_count: self.pairs.len() as u32,
            body_count: live,
            active_body_count: active,
            sleeping_body_count: sleeping,
            dropped_pairs,
            dropped_contacts,
            dropped_cell_entries,
            max_penetration,
            backend: BackendKind::Cpu,
        };
        tracing::trace!(woken, "cpu step solved");

        clear_contacts(
            &mut self.contacts,
            &mut self.cache,
            self.config.warm_start,
            &mut self.solved,
        );
        self.mark_device_stale();
    }

    /// Run the step on the device. Returns false when the GPU failed and
    /// has been dropped; the caller then re-runs the step on the CPU.
    #[cfg(feature = "gpu-physics")]
    fn step_gpu(&mut self) -> bool {
        let Some(gpu) = self.gpu.as_mut() else {
            return false;
        };
        let body_count = self.store.len() as u32;
        let use_grid = self.store.len() > self.config.brute_force_threshold;

        let result = (|| -> anyhow::Result<gpu::GpuStepCounters> {
            if gpu.device_stale {
                gpu.physics.upload_bodies(&gpu.ctx, self.store.as_slice())?;
                gpu.device_stale = false;
            }
            gpu.physics.step(
                &gpu.ctx,
                body_count,
                &self.params,
                self.config.warm_start,
                use_grid,
            )
        })();

        match result {
            Ok(counters) => {
                gpu.host_stale = true;
                gpu.contacts_stale = true;
                let (live, _, _) = count_bodies(self.store.as_slice());
                self.metrics = gpu_metrics(&counters, &self.config, live);
                tracing::trace!(
                    woken = counters.woken_bodies,
                    grid_entries = counters.grid_entries,
                    "gpu step solved"
                );
                true
            }
            Err(err) => {
                self.drop_gpu("gpu step failed", &err);
                false
            }
        }
    }

    #[cfg(not(feature = "gpu-physics"))]
    fn step_gpu(&mut self) -> bool {
        false
    }

    /// Poses of all live bodies.
    pub fn transforms(&mut self) -> Vec<BodyTransform> {
        self.sync_host();
        self.store
            .iter()
            .map(|(handle, body)| BodyTransform {
                handle,
                position: body.position,
                orientation: body.orientation,
            })
            .collect()
    }

    /// Override the given simulation parameters from the next step on.
    pub fn update_parameters(&mut self, update: SimParamsUpdate) {
        update.apply_to(&mut self.params);
        tracing::debug!(params = ?self.params, "simulation parameters updated");
    }

    /// Drop every body, contact, cached impulse and metric.
    ///
    /// Handle numbering restarts at zero.
    pub fn reset(&mut self) {
        self.store.clear();
        self.aabbs.clear();
        self.pairs.clear();
        self.contacts.clear();
        self.solved.clear();
        self.cache.clear();
        self.start_positions.clear();
        self.metrics = StepMetrics::default();
        self.last_backend = None;
        #[cfg(feature = "gpu-physics")]
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.device_stale = true;
            gpu.host_stale = false;
            gpu.contacts_stale = false;
            gpu.physics.reset_warm_start(&gpu.ctx);
        }
        tracing::info!("physics world reset");
    }

    /// Statistics of the last step.
    pub fn metrics(&self) -> StepMetrics {
        self.metrics
    }

    /// Snapshot of one live body.
    pub fn body(&mut self, handle: BodyHandle) -> Option<RigidBody> {
        self.sync_host();
        self.store.get(handle).copied()
    }

    /// Number of live bodies.
    pub fn body_count(&self) -> usize {
        self.store.live_count()
    }

    /// Contacts solved in the last step.
    pub fn contacts(&mut self) -> &[Contact] {
        #[cfg(feature = "gpu-physics")]
        self.sync_contacts();
        &self.solved
    }

    /// Backend the next step will run on.
    pub fn backend(&self) -> BackendKind {
        #[cfg(feature = "gpu-physics")]
        if self.gpu.is_some() {
            let use_gpu = match self.config.backend {
                Backend::Gpu => true,
                Backend::Auto => gpu::GpuPhysics::should_use_gpu(self.store.len()),
                Backend::Cpu => false,
            };
            if use_gpu {
                return BackendKind::Gpu;
            }
        }
        BackendKind::Cpu
    }

    /// Whether a GPU backend is attached.
    pub fn has_gpu(&self) -> bool {
        #[cfg(feature = "gpu-physics")]
        let attached = self.gpu.is_some();
        #[cfg(not(feature = "gpu-physics"))]
        let attached = false;
        attached
    }

    /// Why the GPU backend is unavailable, if creating or running it failed.
    pub fn device_error(&self) -> Option<&PhysicsError> {
        self.device_error.as_ref()
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Bring the host body copy up to date with the device.
    #[cfg(feature = "gpu-physics")]
    fn sync_host(&mut self) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        if !gpu.host_stale {
            return;
        }
        let expected = self.store.len();
        let result = gpu
            .physics
            .download_bodies(&gpu.ctx, expected as u32)
            .and_then(|bodies| {
                anyhow::ensure!(
                    bodies.len() == expected,
                    "downloaded {} bodies, expected {expected}",
                    bodies.len()
                );
                Ok(bodies)
            });
        match result {
            Ok(bodies) => {
                self.store.as_mut_slice().copy_from_slice(&bodies);
                gpu.host_stale = false;
            }
            Err(err) => self.drop_gpu("gpu readback failed", &err),
        }
    }

    #[cfg(not(feature = "gpu-physics"))]
    fn sync_host(&mut self) {}

    #[cfg(feature = "gpu-physics")]
    fn sync_contacts(&mut self) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        if !gpu.contacts_stale {
            return;
        }
        match gpu.physics.download_contacts(&gpu.ctx) {
            Ok(contacts) => {
                self.solved = contacts;
                gpu.contacts_stale = false;
            }
            Err(err) => self.drop_gpu("gpu contact readback failed", &err),
        }
    }

    /// Detach the GPU for good. Later steps run on the CPU.
    #[cfg(feature = "gpu-physics")]
    fn drop_gpu(&mut self, what: &str, err: &anyhow::Error) {
        tracing::warn!(%err, "{what}, falling back to cpu");
        self.gpu = None;
        self.device_error = Some(PhysicsError::Device(format!("{what}: {err:#}")));
    }

    fn mark_device_stale(&mut self) {
        #[cfg(feature = "gpu-physics")]
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.device_stale = true;
            gpu.contacts_stale = false;
        }
    }

    fn report_saturation(&self) {
        let m = &self.metrics;
        if m.dropped_pairs > 0 {
            tracing::warn!(
                dropped = m.dropped_pairs,
                max_pairs = self.config.max_pairs,
                "pair capacity saturated"
            );
        }
        if m.dropped_contacts > 0 {
            tracing::warn!(
                dropped = m.dropped_contacts,
                max_contacts = self.config.max_contacts,
                "contact capacity saturated"
            );
        }
        if m.dropped_cell_entries > 0 {
            tracing::warn!(
                dropped = m.dropped_cell_entries,
                cell_capacity = self.config.cell_capacity,
                max_cell_entries = self.config.max_cell_entries,
                "grid capacity saturated"
            );
        }
    }
}

impl std::fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("bodies", &self.store.len())
            .field("params", &self.params)
            .field("backend", &self.backend())
            .finish_non_exhaustive()
    }
}

/// `(live, active, sleeping)` body counts.
fn count_bodies(bodies: &[RigidBody]) -> (u32, u32, u32) {
    bodies
        .iter()
        .filter(|b| !b.is_removed())
        .fold((0, 0, 0), |(live, active, sleeping), b| {
            (
                live + 1,
                active + b.is_active() as u32,
                sleeping + (!b.is_static() && b.is_sleeping()) as u32,
            )
        })
}

#[cfg(feature = "gpu-physics")]
fn gpu_metrics(counters: &gpu::GpuStepCounters, config: &PhysicsConfig, live: u32) -> StepMetrics {
    let max_pairs = config.max_pairs.min(u32::MAX as usize) as u32;
    let max_contacts = config.max_contacts.min(u32::MAX as usize) as u32;
    let pair_count = counters.pairs_attempted.min(max_pairs);
    let contact_count = counters.contacts_attempted.min(max_contacts);
    StepMetrics {
        step_time_ms: 0.0,
        contact_count,
        pair_count,
        body_count: live,
        active_body_count: counters.active_bodies,
        sleeping_body_count: counters.sleeping_bodies,
        dropped_pairs: counters.pairs_attempted - pair_count,
        dropped_contacts: counters.contacts_attempted - contact_count,
        dropped_cell_entries: counters.dropped_cell_entries,
        max_penetration: counters.max_penetration,
        backend: BackendKind::Gpu,
    }
}

fn elapsed_ms(start: Instant) -> f32 {
    start.elapsed().as_secs_f32() * 1000.0
}
