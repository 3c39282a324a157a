#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Deferred, reference-counted GPU resource lifecycle.
//!
//! Producer-side code (scene updates, streaming, per-frame passes) never
//! touches device memory. It schedules typed [`RenderCommand`]s that a single
//! [`RenderContext`] executes in order against a [`RenderDevice`].
//!
//! ```rust,ignore
//! use render_lifecycle::prelude::*;
//!
//! let settings = LifecycleSettings::default();
//! let (commands, queue) = command_queue();
//! let mut context = RenderContext::new(HeadlessDevice::with_ray_tracing(), &settings);
//! let mut scene = Scene::new(commands, &settings);
//!
//! let key = scene.add_instance(mesh, Vec::new())?;
//! context.drain(&queue)?;
//! ```

pub mod errors;
pub mod renderer;
pub mod scene;
pub mod settings;
pub mod tunables;

pub use errors::{DeviceError, LifecycleError, Result};
pub use renderer::command::{
    CommandReceiver, CommandSender, DrainReport, RenderCommand, RenderContext, RenderThread,
    command_queue,
};
pub use renderer::core::{GeometryKey, ResourceHandle, SharedGeometry, SharedGeometryRegistry};
pub use renderer::device::{DeviceCapabilities, HeadlessDevice, RenderDevice, WgpuDevice};
pub use renderer::graph::{
    SceneTextures, ShowFlags, ViewInfo, ViewPass, VisualizeBvhPass, VisualizeTimingPass,
};
pub use renderer::mesh::{LodResourceSet, MeshLodRenderData, MeshRenderData, VertexBuffer};
pub use scene::{MeshInstanceKey, Scene};
pub use settings::{LifecycleSettings, UnderflowPolicy, ValidationMode};
pub use tunables::TunableRegistry;

pub mod prelude {
    pub use crate::errors::{LifecycleError, Result};
    pub use crate::renderer::command::{RenderContext, command_queue};
    pub use crate::renderer::device::{HeadlessDevice, RenderDevice};
    pub use crate::renderer::graph::{
        PassContext, PassOutcome, SceneTextures, ShowFlags, ViewInfo, ViewPass, VisualizeBvhPass,
        VisualizeTimingPass,
    };
    pub use crate::renderer::mesh::{MeshLodRenderData, MeshRenderData};
    pub use crate::scene::Scene;
    pub use crate::settings::LifecycleSettings;
    pub use crate::tunables::TunableRegistry;
}
