//! Per-view inputs of the visualization passes.

use bitflags::bitflags;
use glam::UVec2;

use crate::renderer::core::handle::ResourceHandle;
use crate::renderer::device::TextureId;

bitflags! {
    /// Debug show flags of one view.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ShowFlags: u32 {
        const VISUALIZE_BVH_OVERLAP    = 1 << 0;
        const VISUALIZE_BVH_COMPLEXITY = 1 << 1;
        const VISUALIZE_RAY_TIMING     = 1 << 2;
    }
}

/// Pixel rectangle of a view inside the output texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRect {
    pub min: UVec2,
    pub max: UVec2,
}

impl ViewRect {
    #[must_use]
    pub fn from_size(size: UVec2) -> Self {
        Self {
            min: UVec2::ZERO,
            max: size,
        }
    }

    /// Width and height; empty for inverted rectangles.
    #[inline]
    #[must_use]
    pub fn size(&self) -> UVec2 {
        self.max.saturating_sub(self.min)
    }
}

/// One view rendered this frame.
#[derive(Debug, Clone)]
pub struct ViewInfo {
    pub rect: ViewRect,
    pub show_flags: ShowFlags,
    /// Top-level structure traced by ray-tracing passes, if the view has one.
    pub ray_tracing_scene: Option<ResourceHandle>,
}

impl ViewInfo {
    #[must_use]
    pub fn new(size: UVec2, show_flags: ShowFlags) -> Self {
        Self {
            rect: ViewRect::from_size(size),
            show_flags,
            ray_tracing_scene: None,
        }
    }

    #[must_use]
    pub fn with_ray_tracing_scene(mut self, scene: ResourceHandle) -> Self {
        self.ray_tracing_scene = Some(scene);
        self
    }
}

/// Frame textures owned outside the passes.
#[derive(Debug, Clone, Copy)]
pub struct SceneTextures {
    /// Glyph atlas used for on-screen legends.
    pub mini_font: Option<TextureId>,
    /// 1×1 white texture, bound when `mini_font` is missing.
    pub white_dummy: TextureId,
    /// Per-pixel ray timings written by the tracing passes.
    pub ray_timing: Option<TextureId>,
}

impl SceneTextures {
    /// Overlay font with the white fallback applied.
    #[inline]
    #[must_use]
    pub fn overlay_font(&self) -> TextureId {
        self.mini_font.unwrap_or(self.white_dummy)
    }
}
