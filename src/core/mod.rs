//! Core GPU abstractions
//!
//! This module provides mid-level abstractions over wgpu primitives.

pub mod buffer;
pub mod pipeline;

pub use buffer::{StorageBuffer, UniformBuffer};
pub use pipeline::{compile_wgsl, ComputePipelineBuilder};
