//! Simulation parameters and engine configuration.

use glam::Vec3;

/// Per-step simulation parameters.
///
/// Read-only while a step runs; the host changes them between steps with
/// [`PhysicsWorld::update_parameters`](super::PhysicsWorld::update_parameters).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimParams {
    /// Gravity acceleration. Default: (0, -9.81, 0).
    pub gravity: Vec3,
    /// Duration of the most recent step in seconds. Set by `step`.
    pub dt: f32,
    /// Number of velocity iterations per step. Default: 8.
    pub solver_iterations: u32,
    /// Enable CCD sub-stepping for bodies that request it. Default: true.
    pub ccd: bool,
    /// Edge length of a spatial hash cell in meters. Default: 2.0.
    pub cell_size: f32,
    /// Collide bodies against the y = 0 plane. Default: true.
    pub ground_plane: bool,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            dt: 1.0 / 60.0,
            solver_iterations: 8,
            ccd: true,
            cell_size: 2.0,
            ground_plane: true,
        }
    }
}

/// Partial update of [`SimParams`]. `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimParamsUpdate {
    pub gravity: Option<Vec3>,
    pub solver_iterations: Option<u32>,
    pub ccd: Option<bool>,
    pub cell_size: Option<f32>,
    pub ground_plane: Option<bool>,
}

impl SimParamsUpdate {
    /// Apply this update to `params`.
    ///
    /// Non-finite gravity and non-positive cell sizes are ignored with a
    /// warning; everything else is taken as is.
    pub fn apply_to(&self, params: &mut SimParams) {
        if let Some(gravity) = self.gravity {
            if gravity.is_finite() {
                params.gravity = gravity;
            } else {
                tracing::warn!(?gravity, "ignoring non-finite gravity");
            }
        }
        if let Some(iterations) = self.solver_iterations {
            params.solver_iterations = iterations;
        }
        if let Some(ccd) = self.ccd {
            params.ccd = ccd;
        }
        if let Some(cell_size) = self.cell_size {
            if cell_size.is_finite() && cell_size > 0.0 {
                params.cell_size = cell_size;
            } else {
                tracing::warn!(cell_size, "ignoring invalid cell size");
            }
        }
        if let Some(ground_plane) = self.ground_plane {
            params.ground_plane = ground_plane;
        }
    }
}

/// Which implementation runs the step passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    /// GPU when a device is available and the body count makes it worthwhile.
    #[default]
    Auto,
    /// GPU whenever a device is available.
    Gpu,
    /// Always the sequential CPU path.
    Cpu,
}

/// Configuration for the physics engine.
///
/// Capacities are fixed for the lifetime of a world; buffers are sized from
/// them once.
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    /// Initial simulation parameters.
    pub params: SimParams,
    /// Maximum number of bodies. Default: 16384.
    pub max_bodies: usize,
    /// Maximum candidate pairs per step; extra pairs are dropped. Default: 65536.
    pub max_pairs: usize,
    /// Maximum contacts per step; extra contacts are dropped. Default: 65536.
    pub max_contacts: usize,
    /// Number of hash buckets in the spatial grid. Default: 16384.
    pub grid_table_size: usize,
    /// Total body-in-cell entries the grid can hold. Default: 8 * max_bodies.
    pub max_cell_entries: usize,
    /// Maximum bodies stored per hash bucket. Default: 32.
    pub cell_capacity: usize,
    /// At or below this many bodies the all-pairs broadphase is used. Default: 64.
    pub brute_force_threshold: usize,
    /// Seed contacts with last step's impulses. Default: true.
    pub warm_start: bool,
    /// Backend selection. Default: [`Backend::Auto`].
    pub backend: Backend,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        let max_bodies = 16_384;
        Self {
            params: SimParams::default(),
            max_bodies,
            max_pairs: 65_536,
            max_contacts: 65_536,
            grid_table_size: 16_384,
            max_cell_entries: max_bodies * 8,
            cell_capacity: 32,
            brute_force_threshold: 64,
            warm_start: true,
            backend: Backend::Auto,
        }
    }
}

impl PhysicsConfig {
    /// Config sized for at most `max_bodies` bodies, other limits scaled to match.
    pub fn with_capacity(max_bodies: usize) -> Self {
        let max_bodies = max_bodies.max(1);
        Self {
            max_bodies,
            max_pairs: (max_bodies * 8).max(1024),
            max_contacts: (max_bodies * 8).max(1024),
            grid_table_size: max_bodies.next_power_of_two().max(256),
            max_cell_entries: max_bodies * 8,
            ..Self::default()
        }
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the initial simulation parameters.
    pub fn with_params(mut self, params: SimParams) -> Self {
        self.params = params;
        self
    }
}
