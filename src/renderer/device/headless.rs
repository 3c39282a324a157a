//! Headless device
//!
//! Keeps "device memory" in host vectors and records every call, so command
//! execution can be observed without a GPU.

use glam::{UVec2, UVec3};
use rustc_hash::FxHashMap;

use super::{
    AccelerationStructureDescriptor, AccelerationStructureId, BufferDescriptor,
    ComputePipelineDescriptor, DeviceBufferId, DeviceCapabilities, DevicePipelineId,
    DispatchBindings, GeometryType, RayTracingPipelineDescriptor, RayTracingSceneId, RenderDevice,
    TextureId,
};
use crate::errors::DeviceError;

/// One observed device call, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateBuffer { id: DeviceBufferId, label: String, size: u64 },
    WriteBuffer { id: DeviceBufferId, len: usize },
    DestroyBuffer { id: DeviceBufferId },
    CreateAccelerationStructure {
        id: AccelerationStructureId,
        label: String,
        geometry_type: GeometryType,
        primitives: u32,
        segments: usize,
    },
    DestroyAccelerationStructure { id: AccelerationStructureId },
    CreateRayTracingScene { id: RayTracingSceneId, instances: usize },
    DestroyRayTracingScene { id: RayTracingSceneId },
    CreatePipeline { id: DevicePipelineId, label: String },
    DispatchCompute { label: String, groups: UVec3, uniforms: Vec<u8> },
    DispatchRays { label: String, extent: UVec2, uniforms: Vec<u8>, proxies: usize },
}

struct GeometryRecord {
    primitives: u32,
}

/// In-memory [`RenderDevice`].
pub struct HeadlessDevice {
    caps: DeviceCapabilities,
    next_id: u64,
    buffers: FxHashMap<u64, Vec<u8>>,
    geometries: FxHashMap<u64, GeometryRecord>,
    scenes: FxHashMap<u64, Vec<AccelerationStructureId>>,
    pipelines: FxHashMap<u64, String>,
    textures: FxHashMap<u64, UVec2>,
    calls: Vec<DeviceCall>,
    pending_failure: Option<DeviceError>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(DeviceCapabilities::default())
    }
}

impl HeadlessDevice {
    #[must_use]
    pub fn new(caps: DeviceCapabilities) -> Self {
        Self {
            caps,
            next_id: 1,
            buffers: FxHashMap::default(),
            geometries: FxHashMap::default(),
            scenes: FxHashMap::default(),
            pipelines: FxHashMap::default(),
            textures: FxHashMap::default(),
            calls: Vec::new(),
            pending_failure: None,
        }
    }

    /// Device reporting full ray tracing and timing support.
    #[must_use]
    pub fn with_ray_tracing() -> Self {
        Self::new(DeviceCapabilities {
            ray_tracing: true,
            shader_timing: true,
            ..DeviceCapabilities::default()
        })
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Creates a texture owned by the caller (scene textures, output targets).
    pub fn create_texture(&mut self, size: UVec2) -> TextureId {
        let id = self.alloc_id();
        self.textures.insert(id, size);
        TextureId(id)
    }

    /// The next dispatch or allocation fails with `error`.
    pub fn fail_next(&mut self, error: DeviceError) {
        self.pending_failure = Some(error);
    }

    fn take_failure(&mut self) -> Result<(), DeviceError> {
        match self.pending_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn live_acceleration_structures(&self) -> usize {
        self.geometries.len()
    }

    #[must_use]
    pub fn live_scenes(&self) -> usize {
        self.scenes.len()
    }

    #[must_use]
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    #[must_use]
    pub fn buffer_contents(&self, id: DeviceBufferId) -> Option<&[u8]> {
        self.buffers.get(&id.0).map(Vec::as_slice)
    }

    /// Instances of a ray-tracing scene, in build order.
    #[must_use]
    pub fn scene_instances(&self, id: RayTracingSceneId) -> Option<&[AccelerationStructureId]> {
        self.scenes.get(&id.0).map(Vec::as_slice)
    }

    #[must_use]
    pub fn primitive_count(&self, id: AccelerationStructureId) -> Option<u32> {
        self.geometries.get(&id.0).map(|g| g.primitives)
    }

    fn check_textures(&self, bindings: &DispatchBindings) -> Result<(), DeviceError> {
        for binding in &bindings.textures {
            if !self.textures.contains_key(&binding.texture.0) {
                return Err(DeviceError::InvalidHandle(binding.texture.0));
            }
        }
        Ok(())
    }
}

impl RenderDevice for HeadlessDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.caps
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<DeviceBufferId, DeviceError> {
        self.take_failure()?;
        if desc.size > self.caps.max_buffer_size {
            return Err(DeviceError::OutOfMemory {
                requested: desc.size,
            });
        }
        let id = self.alloc_id();
        self.buffers.insert(id, vec![0u8; desc.size as usize]);
        self.calls.push(DeviceCall::CreateBuffer {
            id: DeviceBufferId(id),
            label: desc.label.to_string(),
            size: desc.size,
        });
        Ok(DeviceBufferId(id))
    }

    fn write_buffer(
        &mut self,
        buffer: DeviceBufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let storage = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(DeviceError::InvalidHandle(buffer.0))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > storage.len() {
            return Err(DeviceError::Validation(format!(
                "write of {} bytes at offset {offset} overruns buffer of {} bytes",
                data.len(),
                storage.len()
            )));
        }
        storage[start..end].copy_from_slice(data);
        self.calls.push(DeviceCall::WriteBuffer {
            id: buffer,
            len: data.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: DeviceBufferId) {
        if self.buffers.remove(&buffer.0).is_some() {
            self.calls.push(DeviceCall::DestroyBuffer { id: buffer });
        }
    }

    fn create_acceleration_structure(
        &mut self,
        desc: &AccelerationStructureDescriptor<'_>,
    ) -> Result<AccelerationStructureId, DeviceError> {
        if !self.caps.ray_tracing {
            return Err(DeviceError::Unsupported("acceleration structures"));
        }
        self.take_failure()?;
        for segment in desc.segments {
            if !self.buffers.contains_key(&segment.vertex_buffer.0) {
                return Err(DeviceError::InvalidHandle(segment.vertex_buffer.0));
            }
        }
        let id = self.alloc_id();
        self.geometries.insert(
            id,
            GeometryRecord {
                primitives: desc.total_primitive_count,
            },
        );
        self.calls.push(DeviceCall::CreateAccelerationStructure {
            id: AccelerationStructureId(id),
            label: desc.label.to_string(),
            geometry_type: desc.geometry_type,
            primitives: desc.total_primitive_count,
            segments: desc.segments.len(),
        });
        Ok(AccelerationStructureId(id))
    }

    fn destroy_acceleration_structure(&mut self, id: AccelerationStructureId) {
        if self.geometries.remove(&id.0).is_some() {
            self.calls
                .push(DeviceCall::DestroyAccelerationStructure { id });
        }
    }

    fn create_ray_tracing_scene(
        &mut self,
        _label: &str,
        instances: &[AccelerationStructureId],
    ) -> Result<RayTracingSceneId, DeviceError> {
        if !self.caps.ray_tracing {
            return Err(DeviceError::Unsupported("ray tracing scenes"));
        }
        self.take_failure()?;
        if let Some(missing) = instances
            .iter()
            .find(|g| !self.geometries.contains_key(&g.0))
        {
            return Err(DeviceError::InvalidHandle(missing.0));
        }
        let id = self.alloc_id();
        self.scenes.insert(id, instances.to_vec());
        self.calls.push(DeviceCall::CreateRayTracingScene {
            id: RayTracingSceneId(id),
            instances: instances.len(),
        });
        Ok(RayTracingSceneId(id))
    }

    fn destroy_ray_tracing_scene(&mut self, id: RayTracingSceneId) {
        if self.scenes.remove(&id.0).is_some() {
            self.calls.push(DeviceCall::DestroyRayTracingScene { id });
        }
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> Result<DevicePipelineId, DeviceError> {
        self.take_failure()?;
        let id = self.alloc_id();
        self.pipelines.insert(id, desc.label.to_string());
        self.calls.push(DeviceCall::CreatePipeline {
            id: DevicePipelineId(id),
            label: desc.label.to_string(),
        });
        Ok(DevicePipelineId(id))
    }

    fn create_ray_tracing_pipeline(
        &mut self,
        desc: &RayTracingPipelineDescriptor<'_>,
    ) -> Result<DevicePipelineId, DeviceError> {
        if !self.caps.ray_tracing {
            return Err(DeviceError::Unsupported("ray tracing pipelines"));
        }
        self.take_failure()?;
        if desc.miss.is_empty() {
            return Err(DeviceError::Validation(
                "ray tracing pipeline requires a miss shader".to_string(),
            ));
        }
        let id = self.alloc_id();
        self.pipelines.insert(id, desc.label.to_string());
        self.calls.push(DeviceCall::CreatePipeline {
            id: DevicePipelineId(id),
            label: desc.label.to_string(),
        });
        Ok(DevicePipelineId(id))
    }

    fn dispatch_compute(
        &mut self,
        label: &str,
        pipeline: DevicePipelineId,
        bindings: &DispatchBindings,
        groups: UVec3,
    ) -> Result<(), DeviceError> {
        self.take_failure()?;
        if !self.pipelines.contains_key(&pipeline.0) {
            return Err(DeviceError::InvalidHandle(pipeline.0));
        }
        self.check_textures(bindings)?;
        self.calls.push(DeviceCall::DispatchCompute {
            label: label.to_string(),
            groups,
            uniforms: bindings.uniforms.clone(),
        });
        Ok(())
    }

    fn dispatch_rays(
        &mut self,
        label: &str,
        pipeline: DevicePipelineId,
        scene: RayTracingSceneId,
        bindings: &DispatchBindings,
        extent: UVec2,
    ) -> Result<(), DeviceError> {
        self.take_failure()?;
        if !self.pipelines.contains_key(&pipeline.0) {
            return Err(DeviceError::InvalidHandle(pipeline.0));
        }
        if !self.scenes.contains_key(&scene.0) {
            return Err(DeviceError::InvalidHandle(scene.0));
        }
        self.check_textures(bindings)?;
        self.calls.push(DeviceCall::DispatchRays {
            label: label.to_string(),
            extent,
            uniforms: bindings.uniforms.clone(),
            proxies: bindings.acceleration_structures.len(),
        });
        Ok(())
    }
}
