//! Pipeline Cache
//!
//! Render-context owner of every device pipeline requested by the
//! visualization passes. Pipelines are stored in a contiguous `Vec` and
//! addressed through lightweight [`PipelineId`] handles; the lookup is keyed
//! by the full-state hash of a [`PipelineKey`], so each shader permutation is
//! compiled exactly once and reused across frames.

use rustc_hash::FxHashMap;

use crate::errors::DeviceError;
use crate::renderer::device::{
    ComputePipelineDescriptor, DevicePipelineId, RayTracingPipelineDescriptor, RenderDevice,
};
use crate::renderer::pipeline::pipeline_id::PipelineId;
use crate::renderer::pipeline::pipeline_key::{PipelineKey, fx_hash_key};

/// Central pipeline storage and deduplication cache.
#[derive(Default)]
pub struct PipelineCache {
    pipelines: Vec<DevicePipelineId>,
    lookup: FxHashMap<u64, PipelineId>,
}

impl PipelineCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pipelines: Vec::with_capacity(8),
            lookup: FxHashMap::default(),
        }
    }

    /// Retrieve a device pipeline by handle. **Panics** if the id is invalid.
    #[inline]
    #[must_use]
    pub fn get(&self, id: PipelineId) -> DevicePipelineId {
        self.pipelines[id.index()]
    }

    /// Look up or create the pipeline for `key`.
    ///
    /// A failed creation is not cached; the next request tries again.
    pub fn get_or_create(
        &mut self,
        device: &mut dyn RenderDevice,
        key: &PipelineKey,
    ) -> Result<PipelineId, DeviceError> {
        let hash = fx_hash_key(key);
        if let Some(&id) = self.lookup.get(&hash) {
            return Ok(id);
        }

        let label = key.label();
        let pipeline = match key {
            PipelineKey::Compute(compute) => {
                device.create_compute_pipeline(&ComputePipelineDescriptor {
                    label,
                    shader: compute.shader,
                    group_size: compute.group_size,
                })?
            }
            PipelineKey::RayTracing(rt) => {
                device.create_ray_tracing_pipeline(&RayTracingPipelineDescriptor {
                    label,
                    ray_gen: rt.ray_gen,
                    hit_groups: &rt.hit_groups,
                    miss: &rt.miss,
                    max_payload_bytes: rt.max_payload_bytes,
                    allow_hit_group_indexing: rt.allow_hit_group_indexing,
                })?
            }
        };

        log::debug!("Pipeline created: {label}");
        let id = PipelineId(self.pipelines.len() as u32);
        self.pipelines.push(pipeline);
        self.lookup.insert(hash, id);
        Ok(id)
    }

    /// Drops every cached handle (after device loss).
    pub fn clear(&mut self) {
        self.pipelines.clear();
        self.lookup.clear();
    }

    /// Number of cached pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
