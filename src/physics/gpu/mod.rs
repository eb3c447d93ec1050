//! GPU physics backend running the whole step as compute passes.
//!
//! | Stage | Kernel(s) | Parallel over |
//! |-------|-----------|---------------|
//! | Integration + CCD | `cs_integrate` | bodies |
//! | Broadphase | `cs_compute_aabbs` .. `cs_oversized_pairs` / `cs_brute_pairs` | bodies, buckets |
//! | Narrowphase | `cs_ground_contacts`, `cs_narrowphase` | bodies, pairs |
//! | Warm start, wake-up | `cs_carry_warm_start`, `cs_wake_contacts` | contacts |
//! | Velocity solve | `cs_prepare`, `cs_solve`, `cs_gather_velocities` | contacts, bodies |
//! | Position correction | `cs_position_correction`, `cs_gather_positions` | contacts, bodies |
//! | Sleep, cache | `cs_sleep`, `cs_cache_reset`, `cs_cache_contacts` | bodies, contacts |
//!
//! All passes of a step are recorded into one compute pass and submitted
//! once; bodies and contacts stay resident between steps. The host reads back
//! a small counter block every step and the full body array only on demand.
//! Shader, pipeline and dispatch validation errors are returned as `Err`.
//!
//! GPU offload is used when body count >= [`GPU_BODY_THRESHOLD`].

use glam::{Quat, Vec3};

use crate::compute::{
    compute_workgroup_count, read_buffer_range, record_dispatch, ComputeDispatcher,
};
use crate::context::WgpuContext;
use crate::core::{compile_wgsl, ComputePipelineBuilder, StorageBuffer, UniformBuffer};

use super::broadphase::{HASH_OFFSET, HASH_PRIME_X, HASH_PRIME_Y, HASH_PRIME_Z, MAX_CELL_SPAN};
use super::collider::{ColliderShape, FLAT_EPSILON};
use super::contact::{Contact, GROUND, WARM_START_EPSILON};
use super::integrator::{
    CCD_TRAVEL_FRACTION, FORCE_WAKE_EPSILON, MAX_ANGULAR_SPEED, MAX_CCD_SUBSTEPS, SLEEP_STEPS,
    SLEEP_VELOCITY_THRESHOLD,
};
use super::narrowphase::EPSILON;
use super::params::{PhysicsConfig, SimParams};
use super::rigid_body::{BodyFlags, RigidBody};
use super::solver::{
    BAUMGARTE, GROUND_FRICTION, GROUND_RESTITUTION, INV_MASS_EPSILON, MAX_CORRECTION,
    RESTITUTION_THRESHOLD, SLOP, WAKE_THRESHOLD,
};

/// Minimum number of bodies before GPU offload is used.
pub const GPU_BODY_THRESHOLD: usize = 256;

/// Workgroup size matching the WGSL shaders.
pub const WORKGROUP_SIZE: u32 = 64;

/// Lanes of the single-workgroup prefix sum.
pub const SCAN_WORKGROUP_SIZE: u32 = 256;

/// Empty slot in the per-body contact lists.
const LINK_NONE: u32 = u32::MAX;

// Slots of the counter buffer.
const COUNTER_PAIRS: u32 = 0;
const COUNTER_CONTACTS: u32 = 1;
const COUNTER_DROPPED_CELLS: u32 = 2;
const COUNTER_ENTRIES: u32 = 3;
const COUNTER_MAX_PENETRATION: u32 = 4;
const COUNTER_ACTIVE: u32 = 5;
const COUNTER_SLEEPING: u32 = 6;
const COUNTER_WOKEN: u32 = 7;
/// Contacts kept for warm starting. Survives the per-step counter reset.
const COUNTER_PREV_CONTACTS: u32 = 8;
const COUNTER_SLOTS: usize = 16;

const COMMON_WGSL: &str = include_str!("../../shaders/compute/common.wgsl");
const INTEGRATE_WGSL: &str = include_str!("../../shaders/compute/integrate.wgsl");
const BROADPHASE_WGSL: &str = include_str!("../../shaders/compute/broadphase.wgsl");
const NARROWPHASE_WGSL: &str = include_str!("../../shaders/compute/narrowphase.wgsl");
const SOLVER_WGSL: &str = include_str!("../../shaders/compute/solver.wgsl");

/// GPU body layout matching `Body` in `common.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuBody {
    pub position: [f32; 3],
    pub inv_mass: f32,
    pub orientation: [f32; 4],
    pub linear_velocity: [f32; 3],
    pub restitution: f32,
    pub angular_velocity: [f32; 3],
    pub friction: f32,
    pub inv_inertia: [f32; 3],
    pub shape: u32,
    pub shape_params: [f32; 3],
    pub flags: u32,
    pub force: [f32; 3],
    pub linear_damping: f32,
    /// Position at the start of the step, for the sleep test.
    pub prev_position: [f32; 3],
    pub angular_damping: f32,
    pub sleep_counter: u32,
    pub _padding: [u32; 3],
}

impl From<&RigidBody> for GpuBody {
    fn from(body: &RigidBody) -> Self {
        Self {
            position: body.position.into(),
            inv_mass: body.inv_mass,
            orientation: body.orientation.to_array(),
            linear_velocity: body.linear_velocity.into(),
            restitution: body.restitution,
            angular_velocity: body.angular_velocity.into(),
            friction: body.friction,
            inv_inertia: body.inv_inertia.into(),
            shape: body.shape.kind(),
            shape_params: body.shape.params().into(),
            flags: body.flags.bits(),
            force: body.force.into(),
            linear_damping: body.linear_damping,
            prev_position: body.position.into(),
            angular_damping: body.angular_damping,
            sleep_counter: body.sleep_counter,
            _padding: [0; 3],
        }
    }
}

impl GpuBody {
    pub fn to_body(&self) -> RigidBody {
        RigidBody {
            position: Vec3::from(self.position),
            orientation: Quat::from_array(self.orientation),
            linear_velocity: Vec3::from(self.linear_velocity),
            angular_velocity: Vec3::from(self.angular_velocity),
            inv_mass: self.inv_mass,
            inv_inertia: Vec3::from(self.inv_inertia),
            restitution: self.restitution,
            friction: self.friction,
            shape: ColliderShape::from_packed(self.shape, Vec3::from(self.shape_params)),
            linear_damping: self.linear_damping,
            angular_damping: self.angular_damping,
            force: Vec3::from(self.force),
            flags: BodyFlags::from_bits_retain(self.flags),
            sleep_counter: self.sleep_counter,
        }
    }
}

/// GPU AABB layout matching the broadphase shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuAabb {
    pub min: [f32; 3],
    pub _pad0: u32,
    pub max: [f32; 3],
    pub _pad1: u32,
}

/// Hash bucket of the spatial grid.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuCell {
    pub count: u32,
    pub offset: u32,
    pub cursor: u32,
    pub stored: u32,
}

/// GPU contact layout matching `Contact` in `common.wgsl`.
///
/// Besides the public contact data it carries the solver's per-step scratch:
/// lever arms, effective masses and the last impulse delta.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuContact {
    pub body_a: u32,
    pub body_b: u32,
    pub penetration: f32,
    pub normal_impulse: f32,
    pub normal: [f32; 3],
    pub velocity_target: f32,
    pub point: [f32; 3],
    pub friction: f32,
    pub tangent1: [f32; 3],
    pub normal_mass: f32,
    pub tangent2: [f32; 3],
    pub tangent_impulse1: f32,
    pub r_a: [f32; 3],
    pub tangent_impulse2: f32,
    pub r_b: [f32; 3],
    pub tangent_mass1: f32,
    pub delta_linear: [f32; 3],
    pub tangent_mass2: f32,
    pub delta_angular_a: [f32; 3],
    pub enabled: u32,
    pub delta_angular_b: [f32; 3],
    pub _pad: u32,
}

impl GpuContact {
    pub fn to_contact(&self) -> Contact {
        Contact {
            body_a: self.body_a,
            body_b: self.body_b,
            normal: Vec3::from(self.normal),
            penetration: self.penetration,
            point: Vec3::from(self.point),
            tangent1: Vec3::from(self.tangent1),
            tangent2: Vec3::from(self.tangent2),
            normal_impulse: self.normal_impulse,
            tangent_impulse: [self.tangent_impulse1, self.tangent_impulse2],
        }
    }
}

/// Per-step uniform matching `Params` in `common.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuParams {
    pub body_count: u32,
    pub dt: f32,
    pub gravity_x: f32,
    pub gravity_y: f32,
    pub gravity_z: f32,
    pub cell_size: f32,
    pub table_size: u32,
    pub cell_capacity: u32,
    pub max_entries: u32,
    pub max_pairs: u32,
    pub max_contacts: u32,
    pub body_capacity: u32,
    pub ccd: u32,
    pub ground: u32,
    pub warm_start: u32,
    pub _pad: u32,
}

/// Fixed buffer sizes of a [`GpuPhysics`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuLimits {
    pub max_bodies: u32,
    pub max_pairs: u32,
    pub max_contacts: u32,
    pub table_size: u32,
    pub max_entries: u32,
    pub cell_capacity: u32,
}

impl GpuLimits {
    pub fn from_config(config: &PhysicsConfig) -> Self {
        let clamp = |v: usize| v.clamp(1, u32::MAX as usize) as u32;
        Self {
            max_bodies: clamp(config.max_bodies),
            max_pairs: clamp(config.max_pairs),
            max_contacts: clamp(config.max_contacts),
            table_size: clamp(config.grid_table_size),
            max_entries: clamp(config.max_cell_entries),
            cell_capacity: clamp(config.cell_capacity),
        }
    }

    /// Heads and next links for this step and for the cached step.
    fn link_slots(&self) -> usize {
        2 * self.max_bodies as usize + 3 * self.max_contacts as usize
    }
}

impl GpuParams {
    pub fn new(body_count: u32, params: &SimParams, limits: &GpuLimits, warm_start: bool) -> Self {
        Self {
            body_count,
            dt: params.dt,
            gravity_x: params.gravity.x,
            gravity_y: params.gravity.y,
            gravity_z: params.gravity.z,
            cell_size: params.cell_size,
            table_size: limits.table_size,
            cell_capacity: limits.cell_capacity,
            max_entries: limits.max_entries,
            max_pairs: limits.max_pairs,
            max_contacts: limits.max_contacts,
            body_capacity: limits.max_bodies,
            ccd: params.ccd as u32,
            ground: params.ground_plane as u32,
            warm_start: warm_start as u32,
            _pad: 0,
        }
    }
}

/// Counter block read back after each GPU step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuStepCounters {
    /// Pairs the broadphase tried to emit, including dropped ones.
    pub pairs_attempted: u32,
    /// Contacts the narrowphase tried to emit, including dropped ones.
    pub contacts_attempted: u32,
    pub dropped_cell_entries: u32,
    pub grid_entries: u32,
    pub max_penetration: f32,
    pub active_bodies: u32,
    pub sleeping_bodies: u32,
    pub woken_bodies: u32,
}

impl GpuStepCounters {
    fn from_slots(slots: &[u32]) -> Self {
        let slot = |i: u32| slots.get(i as usize).copied().unwrap_or(0);
        Self {
            pairs_attempted: slot(COUNTER_PAIRS),
            contacts_attempted: slot(COUNTER_CONTACTS),
            dropped_cell_entries: slot(COUNTER_DROPPED_CELLS),
            grid_entries: slot(COUNTER_ENTRIES),
            max_penetration: f32::from_bits(slot(COUNTER_MAX_PENETRATION)),
            active_bodies: slot(COUNTER_ACTIVE),
            sleeping_bodies: slot(COUNTER_SLEEPING),
            woken_bodies: slot(COUNTER_WOKEN),
        }
    }
}

/// WGSL constant block prepended to every shader module, generated from the
/// Rust constants so both backends share one set of numbers.
pub fn shader_prelude() -> String {
    let mut out = String::from("// Generated constants.\n");
    let mut u = |name: &str, value: u32| out.push_str(&format!("const {name}: u32 = {value}u;\n"));
    u("WORKGROUP_SIZE", WORKGROUP_SIZE);
    u("SCAN_WORKGROUP_SIZE", SCAN_WORKGROUP_SIZE);
    u("FLAG_STATIC", BodyFlags::STATIC.bits());
    u("FLAG_SLEEPING", BodyFlags::SLEEPING.bits());
    u("FLAG_CCD", BodyFlags::CCD.bits());
    u("FLAG_REMOVED", BodyFlags::REMOVED.bits());
    u("SHAPE_SPHERE", ColliderShape::SPHERE);
    u("SHAPE_BOX", ColliderShape::BOX);
    u("SHAPE_CAPSULE", ColliderShape::CAPSULE);
    u("GROUND", GROUND);
    u("LINK_NONE", LINK_NONE);
    u("COUNTER_PAIRS", COUNTER_PAIRS);
    u("COUNTER_CONTACTS", COUNTER_CONTACTS);
    u("COUNTER_DROPPED_CELLS", COUNTER_DROPPED_CELLS);
    u("COUNTER_ENTRIES", COUNTER_ENTRIES);
    u("COUNTER_MAX_PENETRATION", COUNTER_MAX_PENETRATION);
    u("COUNTER_ACTIVE", COUNTER_ACTIVE);
    u("COUNTER_SLEEPING", COUNTER_SLEEPING);
    u("COUNTER_WOKEN", COUNTER_WOKEN);
    u("COUNTER_PREV_CONTACTS", COUNTER_PREV_CONTACTS);
    u("HASH_PRIME_X", HASH_PRIME_X);
    u("HASH_PRIME_Y", HASH_PRIME_Y);
    u("HASH_PRIME_Z", HASH_PRIME_Z);
    u("SLEEP_STEPS", SLEEP_STEPS);
    u("MAX_CCD_SUBSTEPS", MAX_CCD_SUBSTEPS);

    for (name, value) in [("HASH_OFFSET", HASH_OFFSET), ("MAX_CELL_SPAN", MAX_CELL_SPAN)] {
        out.push_str(&format!("const {name}: i32 = {value}i;\n"));
    }

    for (name, value) in [
        ("EPSILON", EPSILON),
        ("FLAT_EPSILON", FLAT_EPSILON),
        ("WARM_START_EPSILON", WARM_START_EPSILON),
        ("BAUMGARTE", BAUMGARTE),
        ("SLOP", SLOP),
        ("MAX_CORRECTION", MAX_CORRECTION),
        ("RESTITUTION_THRESHOLD", RESTITUTION_THRESHOLD),
        ("WAKE_THRESHOLD", WAKE_THRESHOLD),
        ("GROUND_RESTITUTION", GROUND_RESTITUTION),
        ("GROUND_FRICTION", GROUND_FRICTION),
        ("INV_MASS_EPSILON", INV_MASS_EPSILON),
        ("MAX_ANGULAR_SPEED", MAX_ANGULAR_SPEED),
        ("SLEEP_VELOCITY_THRESHOLD", SLEEP_VELOCITY_THRESHOLD),
        ("FORCE_WAKE_EPSILON", FORCE_WAKE_EPSILON),
        ("CCD_TRAVEL_FRACTION", CCD_TRAVEL_FRACTION),
    ] {
        out.push_str(&format!("const {name}: f32 = {value:?};\n"));
    }
    out
}

/// Full source of one shader module: prelude, shared declarations, passes.
pub fn shader_source(pass: &str) -> String {
    format!("{}\n{}\n{}", shader_prelude(), COMMON_WGSL, pass)
}

struct Pipelines {
    integrate: wgpu::ComputePipeline,
    sleep: wgpu::ComputePipeline,
    compute_aabbs: wgpu::ComputePipeline,
    clear_cells: wgpu::ComputePipeline,
    count_cells: wgpu::ComputePipeline,
    prefix_sum: wgpu::ComputePipeline,
    scatter: wgpu::ComputePipeline,
    find_pairs: wgpu::ComputePipeline,
    oversized_pairs: wgpu::ComputePipeline,
    brute_pairs: wgpu::ComputePipeline,
    ground_contacts: wgpu::ComputePipeline,
    narrowphase: wgpu::ComputePipeline,
    reset_links: wgpu::ComputePipeline,
    carry_warm_start: wgpu::ComputePipeline,
    wake_contacts: wgpu::ComputePipeline,
    build_adjacency: wgpu::ComputePipeline,
    prepare: wgpu::ComputePipeline,
    solve: wgpu::ComputePipeline,
    gather_velocities: wgpu::ComputePipeline,
    position_correction: wgpu::ComputePipeline,
    gather_positions: wgpu::ComputePipeline,
    cache_reset: wgpu::ComputePipeline,
    cache_contacts: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// GPU-resident physics state and the pipelines that step it.
pub struct GpuPhysics {
    pipelines: Pipelines,
    bodies: StorageBuffer,
    // Kept alive for the bind group; only touched by the kernels.
    _aabbs: StorageBuffer,
    _cells: StorageBuffer,
    _entries: StorageBuffer,
    _pairs: StorageBuffer,
    counters: StorageBuffer,
    contacts: StorageBuffer,
    links: StorageBuffer,
    params: UniformBuffer<GpuParams>,
    data_bind_group: wgpu::BindGroup,
    params_bind_group: wgpu::BindGroup,
    limits: GpuLimits,
}

impl GpuPhysics {
    /// Allocate every buffer for the configured capacities and compile the
    /// compute shaders.
    ///
    /// Fails instead of panicking when the device rejects a shader, a
    /// pipeline or a buffer size.
    pub fn new(ctx: &WgpuContext, config: &PhysicsConfig) -> anyhow::Result<Self> {
        ctx.validated("gpu physics setup", || Self::create(ctx, config))?
    }

    fn create(ctx: &WgpuContext, config: &PhysicsConfig) -> anyhow::Result<Self> {
        let limits = GpuLimits::from_config(config);

        let data_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("physics data layout"),
                entries: &(0..8).map(storage_entry).collect::<Vec<_>>(),
            });

        let params_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("physics params layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let module = |label: &str, pass: &str| compile_wgsl(ctx, label, &shader_source(pass));
        let integrate_module = module("integrate", INTEGRATE_WGSL)?;
        let broadphase_module = module("broadphase", BROADPHASE_WGSL)?;
        let narrowphase_module = module("narrowphase", NARROWPHASE_WGSL)?;
        let solver_module = module("solver", SOLVER_WGSL)?;

        let pipeline = |module: &wgpu::ShaderModule, entry: &str| {
            ComputePipelineBuilder::new(ctx)
                .label(entry)
                .module(module)
                .entry_point(entry)
                .bind_group_layout(&data_layout)
                .bind_group_layout(&params_layout)
                .build()
        };

        let pipelines = Pipelines {
            integrate: pipeline(&integrate_module, "cs_integrate")?,
            sleep: pipeline(&integrate_module, "cs_sleep")?,
            compute_aabbs: pipeline(&broadphase_module, "cs_compute_aabbs")?,
            clear_cells: pipeline(&broadphase_module, "cs_clear_cells")?,
            count_cells: pipeline(&broadphase_module, "cs_count_cells")?,
            prefix_sum: pipeline(&broadphase_module, "cs_prefix_sum")?,
            scatter: pipeline(&broadphase_module, "cs_scatter")?,
            find_pairs: pipeline(&broadphase_module, "cs_find_pairs")?,
            oversized_pairs: pipeline(&broadphase_module, "cs_oversized_pairs")?,
            brute_pairs: pipeline(&broadphase_module, "cs_brute_pairs")?,
            ground_contacts: pipeline(&narrowphase_module, "cs_ground_contacts")?,
            narrowphase: pipeline(&narrowphase_module, "cs_narrowphase")?,
            reset_links: pipeline(&solver_module, "cs_reset_links")?,
            carry_warm_start: pipeline(&solver_module, "cs_carry_warm_start")?,
            wake_contacts: pipeline(&solver_module, "cs_wake_contacts")?,
            build_adjacency: pipeline(&solver_module, "cs_build_adjacency")?,
            prepare: pipeline(&solver_module, "cs_prepare")?,
            solve: pipeline(&solver_module, "cs_solve")?,
            gather_velocities: pipeline(&solver_module, "cs_gather_velocities")?,
            position_correction: pipeline(&solver_module, "cs_position_correction")?,
            gather_positions: pipeline(&solver_module, "cs_gather_positions")?,
            cache_reset: pipeline(&solver_module, "cs_cache_reset")?,
            cache_contacts: pipeline(&solver_module, "cs_cache_contacts")?,
        };

        let max_bodies = limits.max_bodies as usize;
        let max_contacts = limits.max_contacts as usize;
        let bodies = StorageBuffer::with_capacity::<GpuBody>(ctx, max_bodies, Some("body buffer"));
        let aabbs = StorageBuffer::with_capacity::<GpuAabb>(ctx, max_bodies, Some("aabb buffer"));
        let cells = StorageBuffer::with_capacity::<GpuCell>(
            ctx,
            limits.table_size as usize,
            Some("grid cell buffer"),
        );
        let entries = StorageBuffer::with_capacity::<u32>(
            ctx,
            limits.max_entries as usize,
            Some("grid entry buffer"),
        );
        let pairs = StorageBuffer::with_capacity::<[u32; 2]>(
            ctx,
            limits.max_pairs as usize,
            Some("pair buffer"),
        );
        let counters =
            StorageBuffer::with_capacity::<u32>(ctx, COUNTER_SLOTS, Some("counter buffer"));
        let contacts = StorageBuffer::with_capacity::<GpuContact>(
            ctx,
            2 * max_contacts,
            Some("contact buffer"),
        );
        let links =
            StorageBuffer::with_capacity::<u32>(ctx, limits.link_slots(), Some("link buffer"));
        links.write(ctx, &vec![LINK_NONE; limits.link_slots()]);

        let params = UniformBuffer::new(
            ctx,
            &GpuParams::new(0, &config.params, &limits, config.warm_start),
            Some("physics params"),
        );

        let data_buffers = [
            &bodies, &aabbs, &cells, &entries, &pairs, &counters, &contacts, &links,
        ];
        let data_entries: Vec<_> = data_buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.buffer().as_entire_binding(),
            })
            .collect();
        let data_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("physics data"),
            layout: &data_layout,
            entries: &data_entries,
        });
        let params_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("physics params"),
            layout: &params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params.buffer().as_entire_binding(),
            }],
        });

        tracing::debug!(?limits, "gpu physics buffers allocated");

        Ok(Self {
            pipelines,
            bodies,
            _aabbs: aabbs,
            _cells: cells,
            _entries: entries,
            _pairs: pairs,
            counters,
            contacts,
            links,
            params,
            data_bind_group,
            params_bind_group,
            limits,
        })
    }

    /// Replace the resident body array.
    pub fn upload_bodies(&self, ctx: &WgpuContext, bodies: &[RigidBody]) -> anyhow::Result<()> {
        anyhow::ensure!(
            bodies.len() <= self.limits.max_bodies as usize,
            "{} bodies exceed the gpu capacity of {}",
            bodies.len(),
            self.limits.max_bodies
        );
        let gpu_bodies: Vec<GpuBody> = bodies.iter().map(GpuBody::from).collect();
        self.bodies.write(ctx, &gpu_bodies);
        Ok(())
    }

    /// Run one full step on the resident bodies.
    ///
    /// `use_grid` selects the spatial hash broadphase over the all-pairs one.
    pub fn step(
        &self,
        ctx: &WgpuContext,
        body_count: u32,
        params: &SimParams,
        warm_start: bool,
        use_grid: bool,
    ) -> anyhow::Result<GpuStepCounters> {
        if body_count == 0 {
            return Ok(GpuStepCounters::default());
        }
        anyhow::ensure!(
            body_count <= self.limits.max_bodies,
            "{body_count} bodies exceed the gpu capacity of {}",
            self.limits.max_bodies
        );

        self.params
            .update(ctx, &GpuParams::new(body_count, params, &self.limits, warm_start));
        self.counters
            .write(ctx, &[0u32; COUNTER_PREV_CONTACTS as usize]);

        let p = &self.pipelines;
        let groups = [&self.data_bind_group, &self.params_bind_group];
        let per_body = [compute_workgroup_count(body_count, WORKGROUP_SIZE), 1, 1];
        let per_bucket = [compute_workgroup_count(self.limits.table_size, WORKGROUP_SIZE), 1, 1];
        let per_pair = [compute_workgroup_count(self.limits.max_pairs, WORKGROUP_SIZE), 1, 1];
        let per_contact = [compute_workgroup_count(self.limits.max_contacts, WORKGROUP_SIZE), 1, 1];

        let dispatcher = ComputeDispatcher::new(ctx);
        ctx.validated("physics step", || {
            dispatcher.batch(
                Some("physics step"),
                |pass| {
                    record_dispatch(pass, &p.integrate, &groups, per_body);
                    record_dispatch(pass, &p.compute_aabbs, &groups, per_body);
                    if use_grid {
                        record_dispatch(pass, &p.clear_cells, &groups, per_bucket);
                        record_dispatch(pass, &p.count_cells, &groups, per_body);
                        record_dispatch(pass, &p.prefix_sum, &groups, [1, 1, 1]);
                        record_dispatch(pass, &p.scatter, &groups, per_body);
                        record_dispatch(pass, &p.find_pairs, &groups, per_body);
                        record_dispatch(pass, &p.oversized_pairs, &groups, per_body);
                    } else {
                        record_dispatch(pass, &p.brute_pairs, &groups, per_body);
                    }
                    record_dispatch(pass, &p.ground_contacts, &groups, per_body);
                    record_dispatch(pass, &p.narrowphase, &groups, per_pair);

                    record_dispatch(pass, &p.reset_links, &groups, per_body);
                    record_dispatch(pass, &p.carry_warm_start, &groups, per_contact);
                    record_dispatch(pass, &p.wake_contacts, &groups, per_contact);
                    record_dispatch(pass, &p.build_adjacency, &groups, per_contact);
                    record_dispatch(pass, &p.prepare, &groups, per_contact);
                    record_dispatch(pass, &p.gather_velocities, &groups, per_body);
                    for _ in 0..params.solver_iterations {
                        record_dispatch(pass, &p.solve, &groups, per_contact);
                        record_dispatch(pass, &p.gather_velocities, &groups, per_body);
                    }
                    record_dispatch(pass, &p.position_correction, &groups, per_contact);
                    record_dispatch(pass, &p.gather_positions, &groups, per_body);

                    record_dispatch(pass, &p.sleep, &groups, per_body);
                    record_dispatch(pass, &p.cache_reset, &groups, per_body);
                    record_dispatch(pass, &p.cache_contacts, &groups, per_contact);
                },
                |_| {},
            )
        })?;

        let slots: Vec<u32> = read_buffer_range(
            ctx,
            self.counters.buffer(),
            0,
            (COUNTER_SLOTS * std::mem::size_of::<u32>()) as u64,
        )?;
        Ok(GpuStepCounters::from_slots(&slots))
    }

    /// Read back the first `body_count` bodies.
    pub fn download_bodies(
        &self,
        ctx: &WgpuContext,
        body_count: u32,
    ) -> anyhow::Result<Vec<RigidBody>> {
        let size = body_count as u64 * std::mem::size_of::<GpuBody>() as u64;
        let gpu_bodies: Vec<GpuBody> = read_buffer_range(ctx, self.bodies.buffer(), 0, size)?;
        Ok(gpu_bodies.iter().map(GpuBody::to_body).collect())
    }

    /// Read back the contacts solved in the last step.
    pub fn download_contacts(&self, ctx: &WgpuContext) -> anyhow::Result<Vec<Contact>> {
        let offset = COUNTER_PREV_CONTACTS as u64 * std::mem::size_of::<u32>() as u64;
        let count: Vec<u32> = read_buffer_range(ctx, self.counters.buffer(), offset, 4)?;
        let count = count.first().copied().unwrap_or(0).min(self.limits.max_contacts);
        if count == 0 {
            return Ok(Vec::new());
        }

        let stride = std::mem::size_of::<GpuContact>() as u64;
        let gpu_contacts: Vec<GpuContact> = read_buffer_range(
            ctx,
            self.contacts.buffer(),
            self.limits.max_contacts as u64 * stride,
            count as u64 * stride,
        )?;
        Ok(gpu_contacts.iter().map(GpuContact::to_contact).collect())
    }

    /// Forget the cached contacts so the next step starts cold.
    pub fn reset_warm_start(&self, ctx: &WgpuContext) {
        let offset = COUNTER_PREV_CONTACTS as u64 * std::mem::size_of::<u32>() as u64;
        self.counters.write_at(ctx, offset, &[0u32]);
    }

    /// Check if GPU offload should be used based on body count.
    pub fn should_use_gpu(body_count: usize) -> bool {
        body_count >= GPU_BODY_THRESHOLD
    }

    #[cfg(test)]
    fn link_buffer_size(&self) -> u64 {
        self.links.size()
    }
}
