//! Render-side resource table
//!
//! Maps producer-side [`ResourceId`]s to the device objects currently
//! resident for them. Only the render context owns a table, so no
//! synchronization is needed beyond the `initialized` flag on each handle.

use rustc_hash::FxHashMap;

use crate::errors::{DeviceError, LifecycleError, Result};
use crate::renderer::core::handle::{ResourceHandle, ResourceId};
use crate::renderer::core::shared_geometry::RayTracingGeometryInitializer;
use crate::renderer::device::{
    AccelerationStructureDescriptor, AccelerationStructureId, BufferDescriptor, DeviceBufferId,
    DeviceGeometrySegment, RayTracingSceneId, RenderDevice,
};
use crate::renderer::mesh::{ResolvedStream, VertexFactoryLayout, VertexStreams};

/// Device buffers are sized in 4-byte units.
const BUFFER_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

#[derive(Debug)]
enum Resident {
    Buffer { buffer: DeviceBufferId, size: u64 },
    VertexFactory(VertexFactoryLayout),
    Geometry(AccelerationStructureId),
    Scene(RayTracingSceneId),
}

#[inline]
fn uninitialized(handle: &ResourceHandle) -> LifecycleError {
    LifecycleError::UninitializedResource {
        id: handle.id(),
        name: handle.debug_name().to_string(),
    }
}

#[inline]
fn submission(command: &'static str) -> impl FnOnce(DeviceError) -> LifecycleError {
    move |source| LifecycleError::DeviceSubmission { command, source }
}

/// Resident device objects, keyed by handle id.
#[derive(Debug, Default)]
pub struct ResourceTable {
    entries: FxHashMap<ResourceId, Resident>,
}

impl ResourceTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer for `handle` and fills it with `data`.
    ///
    /// Returns `false` without touching the device when the handle is
    /// already resident (buffers shared by several instances).
    pub fn init_buffer(
        &mut self,
        device: &mut dyn RenderDevice,
        handle: &ResourceHandle,
        data: &[u8],
        usage: wgpu::BufferUsages,
        command: &'static str,
    ) -> Result<bool> {
        if self.entries.contains_key(&handle.id()) {
            log::trace!("{} already resident", handle.debug_name());
            return Ok(false);
        }

        let size = (data.len() as u64)
            .next_multiple_of(BUFFER_ALIGNMENT)
            .max(BUFFER_ALIGNMENT);
        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: handle.debug_name(),
                size,
                usage,
            })
            .map_err(submission(command))?;

        if !data.is_empty() {
            let written = if data.len() as u64 == size {
                device.write_buffer(buffer, 0, data)
            } else {
                let mut padded = data.to_vec();
                padded.resize(size as usize, 0);
                device.write_buffer(buffer, 0, &padded)
            };
            if let Err(source) = written {
                device.destroy_buffer(buffer);
                return Err(LifecycleError::DeviceSubmission { command, source });
            }
        }

        self.entries
            .insert(handle.id(), Resident::Buffer { buffer, size });
        handle.set_initialized(true);
        Ok(true)
    }

    /// Resolves every stream of `streams` and records the factory layout.
    ///
    /// Fails with `UninitializedResource` when a stream buffer is not resident.
    pub fn init_vertex_factory(
        &mut self,
        handle: &ResourceHandle,
        streams: &VertexStreams,
    ) -> Result<bool> {
        if self.entries.contains_key(&handle.id()) {
            log::warn!("Vertex factory {} initialized twice", handle.debug_name());
            return Ok(false);
        }

        let resolve = |binding: &crate::renderer::mesh::StreamBinding| -> Result<ResolvedStream> {
            Ok(ResolvedStream {
                buffer: self.buffer(&binding.buffer)?,
                offset: binding.offset,
                stride: binding.stride,
                format: binding.format,
            })
        };
        let layout = VertexFactoryLayout {
            streams: [
                resolve(&streams.position)?,
                resolve(&streams.tangent)?,
                resolve(&streams.tex_coord)?,
                resolve(&streams.color)?,
            ],
        };

        self.entries
            .insert(handle.id(), Resident::VertexFactory(layout));
        handle.set_initialized(true);
        Ok(true)
    }

    /// Builds the bottom-level acceleration structure described by
    /// `initializer`. Its index and vertex buffers must be resident.
    pub fn init_geometry(
        &mut self,
        device: &mut dyn RenderDevice,
        handle: &ResourceHandle,
        initializer: &RayTracingGeometryInitializer,
        command: &'static str,
    ) -> Result<bool> {
        if self.entries.contains_key(&handle.id()) {
            return Ok(false);
        }

        let index_buffer = initializer
            .index_buffer
            .as_ref()
            .map(|index| self.buffer(index))
            .transpose()?;
        let segments = initializer
            .segments
            .iter()
            .map(|segment| {
                Ok(DeviceGeometrySegment {
                    vertex_buffer: self.buffer(&segment.vertex_buffer)?,
                    vertex_offset: segment.vertex_offset,
                    vertex_stride: segment.vertex_stride,
                    first_primitive: segment.first_primitive,
                    num_primitives: segment.num_primitives,
                    enabled: segment.enabled,
                    force_opaque: segment.force_opaque,
                    allow_duplicate_any_hit: segment.allow_duplicate_any_hit,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let structure = device
            .create_acceleration_structure(&AccelerationStructureDescriptor {
                label: &initializer.debug_name,
                index_buffer,
                total_primitive_count: initializer.total_primitive_count,
                geometry_type: initializer.geometry_type,
                fast_build: initializer.fast_build,
                segments: &segments,
            })
            .map_err(submission(command))?;

        self.entries
            .insert(handle.id(), Resident::Geometry(structure));
        handle.set_initialized(true);
        Ok(true)
    }

    /// Creates (or replaces) the top-level structure for `handle`.
    ///
    /// The previous structure is destroyed only once its replacement exists;
    /// a failed rebuild leaves it resident.
    pub fn init_scene(
        &mut self,
        device: &mut dyn RenderDevice,
        handle: &ResourceHandle,
        instances: &[AccelerationStructureId],
        command: &'static str,
    ) -> Result<()> {
        let scene = device
            .create_ray_tracing_scene(handle.debug_name(), instances)
            .map_err(submission(command))?;
        if let Some(Resident::Scene(previous)) =
            self.entries.insert(handle.id(), Resident::Scene(scene))
        {
            device.destroy_ray_tracing_scene(previous);
        }
        handle.set_initialized(true);
        Ok(())
    }

    /// Destroys whatever is resident for `handle`.
    ///
    /// Returns `false` for handles that never initialized (a no-op).
    pub fn release(&mut self, device: &mut dyn RenderDevice, handle: &ResourceHandle) -> bool {
        let Some(resident) = self.entries.remove(&handle.id()) else {
            return false;
        };
        match resident {
            Resident::Buffer { buffer, .. } => device.destroy_buffer(buffer),
            Resident::VertexFactory(_) => {}
            Resident::Geometry(structure) => device.destroy_acceleration_structure(structure),
            Resident::Scene(scene) => device.destroy_ray_tracing_scene(scene),
        }
        handle.set_initialized(false);
        true
    }

    pub fn buffer(&self, handle: &ResourceHandle) -> Result<DeviceBufferId> {
        match self.entries.get(&handle.id()) {
            Some(Resident::Buffer { buffer, .. }) => Ok(*buffer),
            _ => Err(uninitialized(handle)),
        }
    }

    /// Allocated size of a resident buffer.
    pub fn buffer_size(&self, handle: &ResourceHandle) -> Result<u64> {
        match self.entries.get(&handle.id()) {
            Some(Resident::Buffer { size, .. }) => Ok(*size),
            _ => Err(uninitialized(handle)),
        }
    }

    pub fn vertex_factory(&self, handle: &ResourceHandle) -> Result<&VertexFactoryLayout> {
        match self.entries.get(&handle.id()) {
            Some(Resident::VertexFactory(layout)) => Ok(layout),
            _ => Err(uninitialized(handle)),
        }
    }

    pub fn geometry(&self, handle: &ResourceHandle) -> Result<AccelerationStructureId> {
        match self.entries.get(&handle.id()) {
            Some(Resident::Geometry(structure)) => Ok(*structure),
            _ => Err(uninitialized(handle)),
        }
    }

    pub fn scene(&self, handle: &ResourceHandle) -> Result<RayTracingSceneId> {
        match self.entries.get(&handle.id()) {
            Some(Resident::Scene(scene)) => Ok(*scene),
            _ => Err(uninitialized(handle)),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_resident(&self, id: ResourceId) -> bool {
        self.entries.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::HeadlessDevice;

    #[test]
    fn buffer_size_is_padded_to_four_bytes() {
        let mut device = HeadlessDevice::default();
        let mut table = ResourceTable::new();
        let handle = ResourceHandle::new("odd");

        assert!(
            table
                .init_buffer(&mut device, &handle, &[1, 2, 3], wgpu::BufferUsages::VERTEX, "test")
                .unwrap()
        );
        assert!(handle.is_initialized());
        assert_eq!(table.buffer_size(&handle).unwrap(), 4);

        let id = table.buffer(&handle).unwrap();
        assert_eq!(device.buffer_contents(id), Some(&[1u8, 2, 3, 0][..]));
    }

    #[test]
    fn second_init_is_skipped() {
        let mut device = HeadlessDevice::default();
        let mut table = ResourceTable::new();
        let handle = ResourceHandle::new("shared");

        table
            .init_buffer(&mut device, &handle, &[0; 8], wgpu::BufferUsages::INDEX, "test")
            .unwrap();
        let again = table
            .init_buffer(&mut device, &handle, &[0; 8], wgpu::BufferUsages::INDEX, "test")
            .unwrap();
        assert!(!again);
        assert_eq!(device.live_buffers(), 1);
    }

    #[test]
    fn release_of_unknown_handle_is_noop() {
        let mut device = HeadlessDevice::default();
        let mut table = ResourceTable::new();
        let handle = ResourceHandle::new("never");
        assert!(!table.release(&mut device, &handle));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn lookup_before_init_reports_violation() {
        let table = ResourceTable::new();
        let handle = ResourceHandle::new("late");
        let err = table.buffer(&handle).unwrap_err();
        assert!(err.is_lifecycle_violation());
    }

    #[test]
    fn failed_allocation_leaves_handle_uninitialized() {
        let mut device = HeadlessDevice::default();
        device.fail_next(DeviceError::OutOfMemory { requested: 16 });
        let mut table = ResourceTable::new();
        let handle = ResourceHandle::new("oom");

        let err = table
            .init_buffer(&mut device, &handle, &[0; 16], wgpu::BufferUsages::VERTEX, "test")
            .unwrap_err();
        assert!(matches!(err, LifecycleError::DeviceSubmission { command: "test", .. }));
        assert!(!handle.is_initialized());
        assert!(table.is_empty());
    }

    #[test]
    fn failed_scene_rebuild_keeps_previous_scene() {
        let mut device = HeadlessDevice::with_ray_tracing();
        let mut table = ResourceTable::new();
        let handle = ResourceHandle::new("RayTracingScene");

        table.init_scene(&mut device, &handle, &[], "test").unwrap();
        let first = table.scene(&handle).unwrap();

        device.fail_next(DeviceError::OutOfMemory { requested: 256 });
        let err = table.init_scene(&mut device, &handle, &[], "test").unwrap_err();
        assert!(matches!(err, LifecycleError::DeviceSubmission { .. }));
        assert!(handle.is_initialized());
        assert_eq!(table.scene(&handle).unwrap(), first);
        assert_eq!(device.live_scenes(), 1);

        table.init_scene(&mut device, &handle, &[], "test").unwrap();
        assert_ne!(table.scene(&handle).unwrap(), first);
        assert_eq!(device.live_scenes(), 1);
    }
}
