//! Render-side machinery
//!
//! - [`core`]: resource handles, the resident-object table and shared geometry
//! - [`command`]: the deferred command queue and its executor
//! - [`mesh`]: mesh render data and per-instance LOD resources
//! - [`graph`]: per-view visualization passes
//! - [`device`]: the device collaborator (`HeadlessDevice`, `WgpuDevice`)
//! - [`pipeline`]: permutation-keyed pipeline cache

pub mod command;
pub mod core;
pub mod device;
pub mod graph;
pub mod mesh;
pub mod pipeline;
