//! Pipeline Cache Keys
//!
//! Canonical, hashable descriptions of every pipeline the visualization
//! passes request. Keys are plain values so they can travel inside
//! render commands and be hashed on the render context.
//!
//! - [`ComputePipelineKey`]: compute shader + work-group size permutation.
//! - [`RayTracingPipelineKey`]: ray-gen / hit-group / miss tuple plus payload
//!   size and hit-group indexing flag.

use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

/// Reference to one shader entry point inside a shader file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderRef {
    pub file: &'static str,
    pub entry: &'static str,
}

impl ShaderRef {
    #[inline]
    #[must_use]
    pub const fn new(file: &'static str, entry: &'static str) -> Self {
        Self { file, entry }
    }
}

/// Cache key for compute pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputePipelineKey {
    pub shader: ShaderRef,
    pub group_size: u32,
}

/// Cache key for ray-tracing pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RayTracingPipelineKey {
    pub ray_gen: ShaderRef,
    pub hit_groups: SmallVec<[ShaderRef; 2]>,
    pub miss: SmallVec<[ShaderRef; 1]>,
    pub max_payload_bytes: u32,
    pub allow_hit_group_indexing: bool,
}

/// Any pipeline the render context can create.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineKey {
    Compute(ComputePipelineKey),
    RayTracing(RayTracingPipelineKey),
}

impl PipelineKey {
    /// Human-readable label used for device debug names.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Compute(key) => key.shader.file,
            Self::RayTracing(key) => key.ray_gen.entry,
        }
    }
}

/// Hashes any key with `FxHasher`.
pub fn fx_hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    const RGS: ShaderRef = ShaderRef::new("VisualizeBVH", "VisualizeBVHRGS");
    const CHS: ShaderRef = ShaderRef::new("VisualizeBVH", "VisualizeBVHCHS");
    const MS: ShaderRef = ShaderRef::new("VisualizeBVH", "VisualizeBVHMS");

    fn ray_key(payload: u32) -> PipelineKey {
        PipelineKey::RayTracing(RayTracingPipelineKey {
            ray_gen: RGS,
            hit_groups: smallvec![CHS],
            miss: smallvec![MS],
            max_payload_bytes: payload,
            allow_hit_group_indexing: false,
        })
    }

    #[test]
    fn identical_keys_hash_identically() {
        assert_eq!(fx_hash_key(&ray_key(12)), fx_hash_key(&ray_key(12)));
    }

    #[test]
    fn payload_size_is_part_of_the_key() {
        assert_ne!(fx_hash_key(&ray_key(12)), fx_hash_key(&ray_key(16)));
    }
}
