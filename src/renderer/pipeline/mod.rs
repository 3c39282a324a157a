//! Pipeline module
//!
//! - [`PipelineCache`]: permutation-keyed pipeline storage on the render context
//! - [`pipeline_key`]: hashable pipeline descriptions carried by commands
//! - [`pipeline_id`]: `Copy` handles into the cache

pub mod cache;
pub mod pipeline_id;
pub mod pipeline_key;

pub use cache::PipelineCache;
pub use pipeline_id::PipelineId;
pub use pipeline_key::{ComputePipelineKey, PipelineKey, RayTracingPipelineKey, ShaderRef};
