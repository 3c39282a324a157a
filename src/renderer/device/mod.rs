//! Render Device Abstraction
//!
//! The device is the external collaborator that owns physical GPU memory and
//! accepts submitted work. This crate only ever calls it from the render
//! context (the consumer side of the command queue).
//!
//! Two implementations ship with the crate:
//!
//! | Backend            | Use case                                            |
//! |--------------------|-----------------------------------------------------|
//! | [`HeadlessDevice`] | Tests and tools; records calls, injects faults      |
//! | [`WgpuDevice`]     | Real GPU via `wgpu` (no hardware ray tracing)       |

mod headless;
mod wgpu_device;

pub use headless::{DeviceCall, HeadlessDevice};
pub use wgpu_device::WgpuDevice;

use glam::{UVec2, UVec3};
use smallvec::SmallVec;

use crate::errors::DeviceError;
use crate::renderer::pipeline::ShaderRef;

// ─── Device Object Ids ───────────────────────────────────────────────────────

macro_rules! device_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

device_id!(
    /// Device-side buffer allocation.
    DeviceBufferId
);
device_id!(
    /// Bottom-level acceleration structure.
    AccelerationStructureId
);
device_id!(
    /// Top-level acceleration structure over a set of geometries.
    RayTracingSceneId
);
device_id!(
    /// Compiled compute or ray-tracing pipeline.
    DevicePipelineId
);
device_id!(
    /// Texture owned outside this crate (scene textures, output targets).
    TextureId
);

// ─── Capabilities ────────────────────────────────────────────────────────────

/// Feature detection results, gathered once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Hardware ray tracing (acceleration structures, ray dispatch).
    pub ray_tracing: bool,
    /// Shader timing extensions used by the ray-timing visualization.
    pub shader_timing: bool,
    /// Largest single buffer allocation.
    pub max_buffer_size: u64,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            ray_tracing: false,
            shader_timing: false,
            max_buffer_size: 256 << 20,
        }
    }
}

// ─── Descriptors ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryType {
    Triangles,
    /// Axis-aligned boxes intersected by a custom intersection shader.
    Procedural,
}

/// One segment of a bottom-level acceleration structure, with device buffers
/// already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGeometrySegment {
    pub vertex_buffer: DeviceBufferId,
    pub vertex_offset: u64,
    pub vertex_stride: u32,
    pub first_primitive: u32,
    pub num_primitives: u32,
    pub enabled: bool,
    pub force_opaque: bool,
    pub allow_duplicate_any_hit: bool,
}

#[derive(Debug, Clone)]
pub struct AccelerationStructureDescriptor<'a> {
    pub label: &'a str,
    pub index_buffer: Option<DeviceBufferId>,
    pub total_primitive_count: u32,
    pub geometry_type: GeometryType,
    pub fast_build: bool,
    pub segments: &'a [DeviceGeometrySegment],
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor<'a> {
    pub label: &'a str,
    pub shader: ShaderRef,
    /// Work-group edge length baked into the shader (`THREADGROUP_SIZE`).
    pub group_size: u32,
}

#[derive(Debug, Clone)]
pub struct RayTracingPipelineDescriptor<'a> {
    pub label: &'a str,
    pub ray_gen: ShaderRef,
    pub hit_groups: &'a [ShaderRef],
    pub miss: &'a [ShaderRef],
    pub max_payload_bytes: u32,
    pub allow_hit_group_indexing: bool,
}

// ─── Bindings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureAccess {
    /// Sampled / loaded read-only (registered external texture).
    Read,
    /// Unordered-access write target.
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub slot: u32,
    pub texture: TextureId,
    pub access: TextureAccess,
}

impl TextureBinding {
    /// Read-only binding of a texture owned elsewhere.
    #[inline]
    #[must_use]
    pub fn external(slot: u32, texture: TextureId) -> Self {
        Self {
            slot,
            texture,
            access: TextureAccess::Read,
        }
    }

    /// Unordered-access view for writing.
    #[inline]
    #[must_use]
    pub fn uav(slot: u32, texture: TextureId) -> Self {
        Self {
            slot,
            texture,
            access: TextureAccess::Write,
        }
    }
}

/// Everything a dispatch binds besides the pipeline.
#[derive(Debug, Clone, Default)]
pub struct DispatchBindings {
    /// Raw uniform block bytes (binding 0).
    pub uniforms: Vec<u8>,
    pub textures: SmallVec<[TextureBinding; 4]>,
    /// Extra bottom-level structures made visible to the ray pipeline.
    pub acceleration_structures: SmallVec<[AccelerationStructureId; 2]>,
}

// ─── Device Trait ────────────────────────────────────────────────────────────

/// Device memory allocator and command submission API.
///
/// All methods run on the render context only.
pub trait RenderDevice: Send {
    fn capabilities(&self) -> DeviceCapabilities;

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<DeviceBufferId, DeviceError>;

    /// Write-only lock, copy, unlock.
    fn write_buffer(
        &mut self,
        buffer: DeviceBufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    fn destroy_buffer(&mut self, buffer: DeviceBufferId);

    fn create_acceleration_structure(
        &mut self,
        desc: &AccelerationStructureDescriptor<'_>,
    ) -> Result<AccelerationStructureId, DeviceError>;

    fn destroy_acceleration_structure(&mut self, id: AccelerationStructureId);

    fn create_ray_tracing_scene(
        &mut self,
        label: &str,
        instances: &[AccelerationStructureId],
    ) -> Result<RayTracingSceneId, DeviceError>;

    fn destroy_ray_tracing_scene(&mut self, id: RayTracingSceneId);

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> Result<DevicePipelineId, DeviceError>;

    fn create_ray_tracing_pipeline(
        &mut self,
        desc: &RayTracingPipelineDescriptor<'_>,
    ) -> Result<DevicePipelineId, DeviceError>;

    fn dispatch_compute(
        &mut self,
        label: &str,
        pipeline: DevicePipelineId,
        bindings: &DispatchBindings,
        groups: UVec3,
    ) -> Result<(), DeviceError>;

    fn dispatch_rays(
        &mut self,
        label: &str,
        pipeline: DevicePipelineId,
        scene: RayTracingSceneId,
        bindings: &DispatchBindings,
        extent: UVec2,
    ) -> Result<(), DeviceError>;
}
