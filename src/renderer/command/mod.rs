//! Deferred Command Queue
//!
//! The producer side never touches device memory. It describes every
//! allocation, release and dispatch as a [`RenderCommand`] value and pushes it
//! through a [`CommandSender`]. The render context drains the queue in FIFO
//! order and executes each command against its [`RenderDevice`].
//!
//! Commands are plain data: they can be logged, counted and inspected in
//! tests before (or instead of) executing them.
//!
//! [`RenderDevice`]: crate::renderer::device::RenderDevice

mod executor;
mod thread;

pub use executor::{DrainReport, RenderContext};
pub use thread::{RenderThread, RenderThreadExit};

use std::sync::Arc;

use glam::{UVec2, UVec3};
use smallvec::{SmallVec, smallvec};

use crate::errors::{LifecycleError, Result};
use crate::renderer::core::handle::{ResourceHandle, ResourceId};
use crate::renderer::core::shared_geometry::{
    RayTracingGeometryInitializer, Residency, SharedGeometry,
};
use crate::renderer::device::DispatchBindings;
use crate::renderer::mesh::VertexStreams;
use crate::renderer::pipeline::PipelineKey;

/// Bytes to upload into a freshly created buffer.
#[derive(Debug, Clone)]
pub struct BufferUpload {
    pub handle: ResourceHandle,
    pub data: Arc<[u8]>,
    pub usage: wgpu::BufferUsages,
}

/// A compute dispatch over a view.
#[derive(Debug, Clone)]
pub struct ComputeDispatch {
    pub label: &'static str,
    pub pipeline: PipelineKey,
    pub bindings: DispatchBindings,
    pub groups: UVec3,
}

/// A ray dispatch against a ray-tracing scene.
#[derive(Debug, Clone)]
pub struct RayDispatch {
    pub label: &'static str,
    pub pipeline: PipelineKey,
    pub scene: ResourceHandle,
    /// Extra geometry bound next to the scene, used only while exposed.
    pub proxy: Option<Arc<SharedGeometry>>,
    pub bindings: DispatchBindings,
    pub extent: UVec2,
}

/// One unit of deferred render-context work.
#[derive(Debug)]
pub enum RenderCommand {
    /// Create and fill the buffers of one LOD. Already-resident buffers are
    /// left untouched.
    InitVertexBuffers {
        lod_index: u32,
        buffers: SmallVec<[BufferUpload; 4]>,
    },
    /// Bind a vertex factory to already-initialized stream buffers.
    InitVertexFactory {
        factory: ResourceHandle,
        streams: VertexStreams,
    },
    ReleaseVertexFactory {
        factory: ResourceHandle,
    },
    ReleaseBuffers {
        buffers: SmallVec<[ResourceHandle; 4]>,
    },
    /// First owner of a shared geometry appeared.
    InitRayGeometry {
        geometry: Arc<SharedGeometry>,
        initializer: RayTracingGeometryInitializer,
        residency: Residency,
    },
    /// Source data of a referenced geometry became resident.
    RealizeRayGeometry {
        geometry: Arc<SharedGeometry>,
        residency: Residency,
    },
    /// Last owner of a shared geometry went away.
    ReleaseRayGeometry {
        geometry: Arc<SharedGeometry>,
    },
    /// (Re)build the top-level structure from the exposed geometries.
    BuildRayTracingScene {
        scene: ResourceHandle,
        geometries: Vec<Arc<SharedGeometry>>,
    },
    ReleaseRayTracingScene {
        scene: ResourceHandle,
    },
    DispatchCompute(ComputeDispatch),
    DispatchRays(RayDispatch),
    /// Signals the sender once every earlier command has executed.
    Fence(flume::Sender<()>),
    /// Stops the render thread after the commands before it.
    Shutdown,
}

impl RenderCommand {
    /// Stable command name for logs and error reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitVertexBuffers { .. } => "InitVertexBuffers",
            Self::InitVertexFactory { .. } => "InitVertexFactory",
            Self::ReleaseVertexFactory { .. } => "ReleaseVertexFactory",
            Self::ReleaseBuffers { .. } => "ReleaseBuffers",
            Self::InitRayGeometry { .. } => "InitRayGeometry",
            Self::RealizeRayGeometry { .. } => "RealizeRayGeometry",
            Self::ReleaseRayGeometry { .. } => "ReleaseRayGeometry",
            Self::BuildRayTracingScene { .. } => "BuildRayTracingScene",
            Self::ReleaseRayTracingScene { .. } => "ReleaseRayTracingScene",
            Self::DispatchCompute(_) => "DispatchCompute",
            Self::DispatchRays(_) => "DispatchRays",
            Self::Fence(_) => "Fence",
            Self::Shutdown => "Shutdown",
        }
    }

    /// Ids of the resources the command creates, releases or reads.
    #[must_use]
    pub fn referenced_resources(&self) -> SmallVec<[ResourceId; 8]> {
        match self {
            Self::InitVertexBuffers { buffers, .. } => {
                buffers.iter().map(|upload| upload.handle.id()).collect()
            }
            Self::InitVertexFactory { factory, streams } => {
                let mut ids: SmallVec<[ResourceId; 8]> = smallvec![factory.id()];
                ids.extend(streams.bindings().iter().map(|stream| stream.buffer.id()));
                ids
            }
            Self::ReleaseVertexFactory { factory } => smallvec![factory.id()],
            Self::ReleaseBuffers { buffers } => buffers.iter().map(ResourceHandle::id).collect(),
            Self::InitRayGeometry { geometry, .. }
            | Self::RealizeRayGeometry { geometry, .. }
            | Self::ReleaseRayGeometry { geometry } => smallvec![geometry.handle().id()],
            Self::BuildRayTracingScene { scene, geometries } => {
                let mut ids: SmallVec<[ResourceId; 8]> = smallvec![scene.id()];
                ids.extend(geometries.iter().map(|geometry| geometry.handle().id()));
                ids
            }
            Self::ReleaseRayTracingScene { scene } => smallvec![scene.id()],
            Self::DispatchRays(dispatch) => {
                let mut ids: SmallVec<[ResourceId; 8]> = smallvec![dispatch.scene.id()];
                if let Some(proxy) = &dispatch.proxy {
                    ids.push(proxy.handle().id());
                }
                ids
            }
            Self::DispatchCompute(_) | Self::Fence(_) | Self::Shutdown => SmallVec::new(),
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Producer end of the command queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: flume::Sender<RenderCommand>,
}

impl CommandSender {
    /// Appends `command` to the queue.
    ///
    /// Fails only when the render context dropped its receiver.
    pub fn enqueue(&self, command: RenderCommand) -> Result<()> {
        log::trace!("enqueue {}", command.name());
        self.tx
            .send(command)
            .map_err(|_| LifecycleError::RenderThreadDisconnected)
    }
}

/// Consumer end of the command queue.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: flume::Receiver<RenderCommand>,
}

impl CommandReceiver {
    /// Number of commands waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[must_use]
    pub fn try_recv(&self) -> Option<RenderCommand> {
        self.rx.try_recv().ok()
    }

    /// Blocks until a command arrives; `None` once every sender is gone.
    #[must_use]
    pub fn recv(&self) -> Option<RenderCommand> {
        self.rx.recv().ok()
    }

    /// Takes every command queued so far, in order, without executing it.
    #[must_use]
    pub fn drain_pending(&self) -> Vec<RenderCommand> {
        self.rx.drain().collect()
    }
}

/// Creates a connected unbounded sender/receiver pair.
#[must_use]
pub fn command_queue() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = flume::unbounded();
    (CommandSender { tx }, CommandReceiver { rx })
}
