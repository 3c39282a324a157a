//! `wgpu` device backend
//!
//! Real GPU buffers, externally registered textures and the compute
//! visualization pipelines. `wgpu` exposes no hardware ray tracing here, so
//! acceleration structures, ray-tracing scenes and ray pipelines report
//! [`DeviceError::Unsupported`] and the capability flag stays off.

use std::borrow::Cow;

use glam::{UVec2, UVec3};
use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;
use xxhash_rust::xxh3::xxh3_128;

use super::{
    AccelerationStructureDescriptor, AccelerationStructureId, BufferDescriptor,
    ComputePipelineDescriptor, DeviceBufferId, DeviceCapabilities, DevicePipelineId,
    DispatchBindings, RayTracingPipelineDescriptor, RayTracingSceneId, RenderDevice, TextureId,
};
use crate::errors::DeviceError;

/// WGSL sources addressable by [`ShaderRef::file`](crate::renderer::pipeline::ShaderRef).
fn shader_source(file: &str) -> Option<&'static str> {
    match file {
        "visualize_timing" => Some(include_str!("../shaders/visualize_timing.wgsl")),
        _ => None,
    }
}

struct ComputeEntry {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// [`RenderDevice`] backed by a `wgpu` device and queue.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCapabilities,
    next_id: u64,
    buffers: FxHashMap<u64, wgpu::Buffer>,
    textures: FxHashMap<u64, wgpu::TextureView>,
    pipelines: FxHashMap<u64, ComputeEntry>,
    /// xxh3-128 of the final WGSL source → compiled module.
    modules: FxHashMap<u128, wgpu::ShaderModule>,
}

impl WgpuDevice {
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let caps = DeviceCapabilities {
            ray_tracing: false,
            shader_timing: true,
            max_buffer_size: device.limits().max_buffer_size,
        };
        log::info!("wgpu device ready (max buffer size: {} bytes)", caps.max_buffer_size);
        Self {
            device,
            queue,
            caps,
            next_id: 1,
            buffers: FxHashMap::default(),
            textures: FxHashMap::default(),
            pipelines: FxHashMap::default(),
            modules: FxHashMap::default(),
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Makes a texture view owned by the caller bindable in dispatches.
    pub fn register_texture(&mut self, view: wgpu::TextureView) -> TextureId {
        let id = self.alloc_id();
        self.textures.insert(id, view);
        TextureId(id)
    }

    pub fn unregister_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture.0);
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn get_or_compile(&mut self, label: &str, source: String) -> &wgpu::ShaderModule {
        let hash = xxh3_128(source.as_bytes());
        self.modules.entry(hash).or_insert_with(|| {
            log::debug!("Compiling shader module: {label}");
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
            })
        })
    }

    fn visualize_layout(&self, label: &str) -> wgpu::BindGroupLayout {
        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Uint,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: wgpu::TextureFormat::Rgba16Float,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                ],
            })
    }
}

impl RenderDevice for WgpuDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.caps
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<DeviceBufferId, DeviceError> {
        if desc.size > self.caps.max_buffer_size {
            return Err(DeviceError::OutOfMemory {
                requested: desc.size,
            });
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size,
            usage: desc.usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = self.alloc_id();
        self.buffers.insert(id, buffer);
        Ok(DeviceBufferId(id))
    }

    fn write_buffer(
        &mut self,
        buffer: DeviceBufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let target = self
            .buffers
            .get(&buffer.0)
            .ok_or(DeviceError::InvalidHandle(buffer.0))?;
        if offset + data.len() as u64 > target.size() {
            return Err(DeviceError::Validation(format!(
                "write of {} bytes at offset {offset} overruns buffer of {} bytes",
                data.len(),
                target.size()
            )));
        }
        self.queue.write_buffer(target, offset, data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: DeviceBufferId) {
        if let Some(buffer) = self.buffers.remove(&buffer.0) {
            buffer.destroy();
        }
    }

    fn create_acceleration_structure(
        &mut self,
        _desc: &AccelerationStructureDescriptor<'_>,
    ) -> Result<AccelerationStructureId, DeviceError> {
        Err(DeviceError::Unsupported("acceleration structures"))
    }

    fn destroy_acceleration_structure(&mut self, _id: AccelerationStructureId) {}

    fn create_ray_tracing_scene(
        &mut self,
        _label: &str,
        _instances: &[AccelerationStructureId],
    ) -> Result<RayTracingSceneId, DeviceError> {
        Err(DeviceError::Unsupported("ray tracing scenes"))
    }

    fn destroy_ray_tracing_scene(&mut self, _id: RayTracingSceneId) {}

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> Result<DevicePipelineId, DeviceError> {
        let template = shader_source(desc.shader.file).ok_or_else(|| {
            DeviceError::Validation(format!("unknown shader file `{}`", desc.shader.file))
        })?;
        let source = template.replace("{{THREADGROUP_SIZE}}", &desc.group_size.to_string());

        let layout = self.visualize_layout(desc.label);
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[Some(&layout)],
                immediate_size: 0,
            });

        let entry_point = desc.shader.entry;
        let module = self.get_or_compile(desc.label, source).clone();
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        let id = self.alloc_id();
        self.pipelines.insert(id, ComputeEntry { pipeline, layout });
        Ok(DevicePipelineId(id))
    }

    fn create_ray_tracing_pipeline(
        &mut self,
        _desc: &RayTracingPipelineDescriptor<'_>,
    ) -> Result<DevicePipelineId, DeviceError> {
        Err(DeviceError::Unsupported("ray tracing pipelines"))
    }

    fn dispatch_compute(
        &mut self,
        label: &str,
        pipeline: DevicePipelineId,
        bindings: &DispatchBindings,
        groups: UVec3,
    ) -> Result<(), DeviceError> {
        let entry = self
            .pipelines
            .get(&pipeline.0)
            .ok_or(DeviceError::InvalidHandle(pipeline.0))?;

        let uniforms = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: &bindings.uniforms,
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut entries = Vec::with_capacity(1 + bindings.textures.len());
        entries.push(wgpu::BindGroupEntry {
            binding: 0,
            resource: uniforms.as_entire_binding(),
        });
        for binding in &bindings.textures {
            let view = self
                .textures
                .get(&binding.texture.0)
                .ok_or(DeviceError::InvalidHandle(binding.texture.0))?;
            entries.push(wgpu::BindGroupEntry {
                binding: binding.slot,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &entry.layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&entry.pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(groups.x, groups.y, groups.z);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn dispatch_rays(
        &mut self,
        _label: &str,
        _pipeline: DevicePipelineId,
        _scene: RayTracingSceneId,
        _bindings: &DispatchBindings,
        _extent: UVec2,
    ) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("ray dispatch"))
    }
}
