//! Per-view debug passes and their inputs.

pub mod passes;
pub mod view;

pub use passes::{
    PassContext, PassOutcome, PassState, SkipReason, ViewPass, VisualizeBvhPass,
    VisualizeTimingPass,
};
pub use view::{SceneTextures, ShowFlags, ViewInfo, ViewRect};
