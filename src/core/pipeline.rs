//! Compute pipeline builder
//!
//! Provides a builder pattern for creating wgpu compute pipelines.

use crate::context::WgpuContext;

/// Compile a WGSL module, failing on parse or validation errors.
pub fn compile_wgsl(
    ctx: &WgpuContext,
    label: &str,
    source: &str,
) -> anyhow::Result<wgpu::ShaderModule> {
    ctx.validated(label, || {
        ctx.device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
    })
}

/// Builder for creating compute pipelines.
pub struct ComputePipelineBuilder<'a> {
    ctx: &'a WgpuContext,
    label: Option<&'a str>,
    shader_module: Option<&'a wgpu::ShaderModule>,
    entry_point: &'a str,
    bind_group_layouts: Vec<&'a wgpu::BindGroupLayout>,
}

impl<'a> ComputePipelineBuilder<'a> {
    /// Create a new compute pipeline builder.
    pub fn new(ctx: &'a WgpuContext) -> Self {
        Self {
            ctx,
            label: None,
            shader_module: None,
            entry_point: "cs_main",
            bind_group_layouts: Vec::new(),
        }
    }

    /// Set the pipeline label.
    pub fn label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    /// Use a compiled shader module. Several entry points may share one.
    pub fn module(mut self, module: &'a wgpu::ShaderModule) -> Self {
        self.shader_module = Some(module);
        self
    }

    /// Set the compute shader entry point.
    pub fn entry_point(mut self, entry: &'a str) -> Self {
        self.entry_point = entry;
        self
    }

    /// Add a bind group layout.
    pub fn bind_group_layout(mut self, layout: &'a wgpu::BindGroupLayout) -> Self {
        self.bind_group_layouts.push(layout);
        self
    }

    /// Build the compute pipeline.
    ///
    /// A missing entry point or a layout mismatch is returned as `Err`.
    pub fn build(self) -> anyhow::Result<wgpu::ComputePipeline> {
        let module = self
            .shader_module
            .ok_or_else(|| anyhow::anyhow!("Shader module is required"))?;
        let device = &self.ctx.device;

        self.ctx
            .validated(self.label.unwrap_or(self.entry_point), || {
                let pipeline_layout =
                    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: self.label,
                        bind_group_layouts: &self.bind_group_layouts,
                        immediate_size: 0,
                    });

                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: self.label,
                    layout: Some(&pipeline_layout),
                    module,
                    entry_point: Some(self.entry_point),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
            })
    }
}
