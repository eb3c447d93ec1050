//! GPU buffer abstractions
//!
//! Storage and uniform buffers used by the compute passes.

use std::marker::PhantomData;

use bytemuck::{Pod, Zeroable};

use crate::context::WgpuContext;

/// Read-write storage buffer addressable from compute shaders.
///
/// Also usable as a copy source and destination so it can be reset from the
/// host and read back through a staging buffer.
pub struct StorageBuffer {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) size: u64,
}

impl StorageBuffer {
    /// Create a zero-initialized storage buffer of `size` bytes.
    ///
    /// The size is rounded up to a multiple of 16 bytes and never zero, since
    /// wgpu rejects empty bindings.
    pub fn new(ctx: &WgpuContext, size: u64, label: Option<&str>) -> Self {
        let size = size.max(16).next_multiple_of(16);
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        Self { buffer, size }
    }

    /// Create a storage buffer holding `capacity` elements of `T`.
    pub fn with_capacity<T: Pod>(ctx: &WgpuContext, capacity: usize, label: Option<&str>) -> Self {
        Self::new(ctx, (capacity * std::mem::size_of::<T>()) as u64, label)
    }

    /// Write a slice at the start of the buffer.
    pub fn write<T: Pod>(&self, ctx: &WgpuContext, data: &[T]) {
        self.write_at(ctx, 0, data);
    }

    /// Write a slice at `offset` bytes into the buffer.
    pub fn write_at<T: Pod>(&self, ctx: &WgpuContext, offset: u64, data: &[T]) {
        if data.is_empty() {
            return;
        }
        ctx.queue
            .write_buffer(&self.buffer, offset, bytemuck::cast_slice(data));
    }

    /// Record a clear of the whole buffer into `encoder`.
    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.clear_buffer(&self.buffer, 0, None);
    }

    /// Get the raw wgpu buffer.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Typed uniform buffer.
pub struct UniformBuffer<T> {
    pub(crate) buffer: wgpu::Buffer,
    _marker: PhantomData<T>,
}

impl<T: Pod + Zeroable> UniformBuffer<T> {
    /// Create a new uniform buffer with initial data.
    pub fn new(ctx: &WgpuContext, data: &T, label: Option<&str>) -> Self {
        use wgpu::util::DeviceExt;

        let buffer = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label,
                contents: bytemuck::bytes_of(data),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });

        Self {
            buffer,
            _marker: PhantomData,
        }
    }

    /// Update the buffer contents.
    pub fn update(&self, ctx: &WgpuContext, data: &T) {
        ctx.queue
            .write_buffer(&self.buffer, 0, bytemuck::bytes_of(data));
    }

    /// Get the raw wgpu buffer.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}
