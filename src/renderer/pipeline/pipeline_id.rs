//! Strongly-typed pipeline handle.
//!
//! Thin `Copy` wrapper around a `u32` index into the [`PipelineCache`]
//! storage array.
//!
//! [`PipelineCache`]: super::cache::PipelineCache

/// Handle to a cached device pipeline.
///
/// Returned by [`PipelineCache::get_or_create`](super::cache::PipelineCache::get_or_create).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub(crate) u32);

impl PipelineId {
    /// Raw index into the pipeline storage array.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
