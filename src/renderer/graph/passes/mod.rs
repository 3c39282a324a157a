//! Ray-tracing visualization passes
//!
//! Each pass runs once per view per frame on the producer side: it checks the
//! device capability and the view's show flags, reads its tunables into a
//! [`VisualizationParams`] block and enqueues exactly one dispatch command.
//! The pipeline itself is created lazily by the render context.
//!
//! Per-view state: `Idle → ParamsBuilt → Dispatched → Idle`.

pub mod bvh;
pub mod params;
pub mod timing;

pub use bvh::{UnitCubeAabb, VisualizeBvhPass};
pub use params::{BvhMode, ColorMap, VisualizationParams, VisualizeUniforms};
pub use timing::VisualizeTimingPass;

use glam::{UVec2, UVec3};

use crate::errors::Result;
use crate::renderer::command::CommandSender;
use crate::renderer::device::{DeviceCapabilities, TextureId};
use crate::renderer::graph::view::{SceneTextures, ViewInfo};
use crate::tunables::TunableRegistry;

/// Producer-side collaborators shared by every pass in a frame.
pub struct PassContext<'a> {
    pub commands: &'a CommandSender,
    /// Gathered once at startup.
    pub capabilities: DeviceCapabilities,
    pub tunables: &'a TunableRegistry,
}

/// Why a pass did nothing for a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CapabilityUnavailable(&'static str),
    ShowFlagDisabled,
    NoRayTracingScene,
    MissingTexture(&'static str),
    EmptyView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Dispatched,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
    #[default]
    Idle,
    ParamsBuilt,
    Dispatched,
}

/// A pass that contributes one dispatch per view.
pub trait ViewPass {
    fn name(&self) -> &'static str;

    /// Enqueues this pass's work for `view`, writing into `output`.
    fn render_view(
        &mut self,
        ctx: &PassContext<'_>,
        view: &ViewInfo,
        textures: &SceneTextures,
        output: TextureId,
    ) -> Result<PassOutcome>;

    /// State reached by the most recent `render_view`.
    fn state(&self) -> PassState;

    /// Runs `render_view` for every view, in order.
    fn render(
        &mut self,
        ctx: &PassContext<'_>,
        views: &[ViewInfo],
        textures: &SceneTextures,
        output: TextureId,
    ) -> Result<Vec<PassOutcome>> {
        views
            .iter()
            .map(|view| self.render_view(ctx, view, textures, output))
            .collect()
    }
}

/// Work groups needed to cover `size` with square groups of `group_size`.
#[inline]
#[must_use]
pub fn dispatch_extent(size: UVec2, group_size: u32) -> UVec3 {
    UVec3::new(size.x.div_ceil(group_size), size.y.div_ceil(group_size), 1)
}
