//! Compute shader dispatch utilities.
//!
//! Provides `ComputeDispatcher` for dispatching compute shaders and
//! readback helpers for GPU-to-CPU data transfer.

use crate::context::WgpuContext;
use crate::core::StorageBuffer;

/// Helper for dispatching compute shader workloads.
///
/// Wraps the boilerplate of creating a command encoder, opening a compute
/// pass and submitting it.
pub struct ComputeDispatcher<'a> {
    ctx: &'a WgpuContext,
}

impl<'a> ComputeDispatcher<'a> {
    /// Create a new compute dispatcher.
    pub fn new(ctx: &'a WgpuContext) -> Self {
        Self { ctx }
    }

    /// Record a sequence of dispatches into one compute pass and submit once.
    ///
    /// `record` receives the open pass. Every dispatch it records observes the
    /// writes of the dispatches recorded before it, so consecutive passes can
    /// depend on each other without extra submits. `finish` runs after the
    /// pass is closed and may append copies to the same encoder.
    pub fn batch<R, F>(&self, label: Option<&str>, record: R, finish: F)
    where
        R: FnOnce(&mut wgpu::ComputePass<'_>),
        F: FnOnce(&mut wgpu::CommandEncoder),
    {
        let mut encoder = self.ctx.create_encoder(label);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label,
                timestamp_writes: None,
            });
            record(&mut pass);
        }
        finish(&mut encoder);
        self.ctx.submit([encoder.finish()]);
    }
}

/// Set pipeline and bind groups on an open pass and dispatch.
///
/// Dispatches with a zero-sized grid are skipped.
pub fn record_dispatch(
    pass: &mut wgpu::ComputePass<'_>,
    pipeline: &wgpu::ComputePipeline,
    bind_groups: &[&wgpu::BindGroup],
    workgroups: [u32; 3],
) {
    if workgroups.contains(&0) {
        return;
    }
    pass.set_pipeline(pipeline);
    for (i, bg) in bind_groups.iter().enumerate() {
        pass.set_bind_group(i as u32, *bg, &[]);
    }
    pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
}

/// Calculate the number of workgroups needed to cover `total_items`
/// with a given `workgroup_size`. Rounds up.
pub fn compute_workgroup_count(total_items: u32, workgroup_size: u32) -> u32 {
    total_items.div_ceil(workgroup_size)
}

/// Read `size` bytes starting at `offset` from a raw `wgpu::Buffer`.
///
/// Creates a staging buffer, copies data from the source buffer, maps it,
/// and returns the result as a `Vec<T>`. Blocks until the data is available.
/// Mapping failures and device loss are returned as errors.
pub fn read_buffer_range<T: bytemuck::Pod>(
    ctx: &WgpuContext,
    source: &wgpu::Buffer,
    offset: u64,
    size: u64,
) -> anyhow::Result<Vec<T>> {
    if size == 0 {
        return Ok(Vec::new());
    }

    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging_readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = ctx.create_encoder(Some("readback copy"));
    encoder.copy_buffer_to_buffer(source, offset, &staging, 0, size);
    ctx.submit([encoder.finish()]);

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| anyhow::anyhow!("device poll failed: {e}"))?;
    rx.recv()
        .map_err(|_| anyhow::anyhow!("readback callback dropped"))?
        .map_err(|e| anyhow::anyhow!("failed to map staging buffer: {e}"))?;

    let data = slice.get_mapped_range();
    let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();

    Ok(result)
}

/// Read a whole `StorageBuffer` back to the CPU synchronously.
pub fn read_back<T: bytemuck::Pod>(
    ctx: &WgpuContext,
    buffer: &StorageBuffer,
) -> anyhow::Result<Vec<T>> {
    read_buffer_range(ctx, buffer.buffer(), 0, buffer.size())
}
