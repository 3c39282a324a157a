//! LOD Resource Set
//!
//! Per-instance render resources of a mesh: one vertex factory per LOD, an
//! optional color override, and a reference on the LOD's shared ray-tracing
//! geometry. Everything is created and destroyed through render commands; the
//! set itself only holds handles.

use std::sync::Arc;

use crate::errors::{LifecycleError, Result};
use crate::renderer::command::{CommandSender, RenderCommand};
use crate::renderer::core::handle::ResourceHandle;
use crate::renderer::core::shared_geometry::{SharedGeometry, SharedGeometryRegistry};
use crate::renderer::mesh::render_data::{MeshRenderData, VertexBuffer};

/// Producer-side collaborators needed to (re)initialize a resource set.
pub struct LodInitContext<'a> {
    pub commands: &'a CommandSender,
    pub geometry: &'a mut SharedGeometryRegistry,
    pub ray_tracing_enabled: bool,
}

#[derive(Debug, Clone)]
enum ColorSource {
    Mesh,
    Override(VertexBuffer),
}

/// Resources of one LOD of one instance.
#[derive(Debug)]
pub struct LodLevel {
    index: u32,
    vertex_factory: ResourceHandle,
    color: ColorSource,
    ray_geometry: Option<Arc<SharedGeometry>>,
    initialized: bool,
}

impl LodLevel {
    fn new(mesh_name: &str, index: u32) -> Self {
        Self {
            index,
            vertex_factory: ResourceHandle::new(format!("{mesh_name}.LOD{index}.VertexFactory")),
            color: ColorSource::Mesh,
            ray_geometry: None,
            initialized: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    #[must_use]
    pub fn vertex_factory(&self) -> &ResourceHandle {
        &self.vertex_factory
    }

    #[must_use]
    pub fn ray_geometry(&self) -> Option<&Arc<SharedGeometry>> {
        self.ray_geometry.as_ref()
    }

    /// Whether the factory is bound to an override color buffer.
    #[must_use]
    pub fn uses_color_override(&self) -> bool {
        matches!(self.color, ColorSource::Override(_))
    }

    /// Init commands were enqueued and no release has followed.
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// All per-LOD resources of one scene instance of a mesh.
#[derive(Debug)]
pub struct LodResourceSet {
    mesh: Arc<MeshRenderData>,
    lods: Vec<LodLevel>,
}

impl LodResourceSet {
    #[must_use]
    pub fn new(mesh: Arc<MeshRenderData>) -> Self {
        let lods = (0..mesh.lod_count() as u32)
            .map(|index| LodLevel::new(mesh.name(), index))
            .collect();
        Self { mesh, lods }
    }

    /// Enqueues buffer uploads, vertex factory setup and (when enabled and
    /// supported) a reference on the shared ray geometry of every LOD.
    ///
    /// `color_overrides[i]` replaces the mesh colors of LOD `i` when its
    /// vertex count matches. LODs without vertices are skipped.
    pub fn init_resources(
        &mut self,
        ctx: &mut LodInitContext<'_>,
        color_overrides: &[Option<VertexBuffer>],
    ) -> Result<()> {
        let mesh = self.mesh.clone();
        for level in &mut self.lods {
            let index = level.index;
            let Some(data) = mesh.lod(index as usize) else {
                continue;
            };
            if data.num_vertices() == 0 {
                log::debug!("{} LOD{index}: stripped, no resources", mesh.name());
                continue;
            }
            if level.initialized {
                log::warn!("{} LOD{index}: init without release; skipped", mesh.name());
                continue;
            }

            let override_color = color_overrides
                .get(index as usize)
                .and_then(Option::as_ref)
                .filter(|colors| {
                    let matches = colors.vertex_count() == data.num_vertices();
                    if !matches {
                        log::debug!(
                            "{} LOD{index}: color override has {} vertices, expected {}",
                            mesh.name(),
                            colors.vertex_count(),
                            data.num_vertices()
                        );
                    }
                    matches
                });
            level.color = match override_color {
                Some(colors) => ColorSource::Override(colors.clone()),
                None => ColorSource::Mesh,
            };
            let color = match &level.color {
                ColorSource::Override(colors) => colors,
                ColorSource::Mesh => &data.vertex_buffers.color,
            };

            ctx.commands.enqueue(RenderCommand::InitVertexBuffers {
                lod_index: index,
                buffers: data.uploads(color),
            })?;
            ctx.commands.enqueue(RenderCommand::InitVertexFactory {
                factory: level.vertex_factory.clone(),
                streams: data.vertex_buffers.bind(color),
            })?;

            if ctx.ray_tracing_enabled && mesh.supports_ray_tracing() {
                let key = mesh.ray_geometry_key(index);
                let residency = mesh.residency(index);
                let debug_name = format!("{}_LOD{index}", mesh.name());
                let geometry = ctx.geometry.acquire_or_create(key, residency, || {
                    data.ray_tracing_initializer(debug_name)
                })?;
                level.ray_geometry = Some(geometry);
            }

            level.initialized = true;
        }
        Ok(())
    }

    /// Drops this set's geometry references and enqueues vertex factory
    /// release. Calling it twice is a no-op the second time.
    ///
    /// Every LOD is released even when one of them fails; the first error is
    /// returned afterwards and the set ends up uninitialized either way.
    pub fn release_resources(&mut self, ctx: &mut LodInitContext<'_>) -> Result<()> {
        let mut first_error = None;
        for level in &mut self.lods {
            if !level.initialized {
                continue;
            }
            if let Some(geometry) = level.ray_geometry.take() {
                if let Err(err) = ctx.geometry.release(&geometry) {
                    log::error!("{} LOD{}: {err}", self.mesh.name(), level.index);
                    first_error.get_or_insert(err);
                }
            }
            if let Err(err) = ctx.commands.enqueue(RenderCommand::ReleaseVertexFactory {
                factory: level.vertex_factory.clone(),
            }) {
                first_error.get_or_insert(err);
            }
            level.color = ColorSource::Mesh;
            level.initialized = false;
        }
        first_error.map_or(Ok(()), Err)
    }

    /// The vertex factory of `lod`.
    pub fn vertex_factory(&self, lod: usize) -> Result<&ResourceHandle> {
        self.lods
            .get(lod)
            .map(LodLevel::vertex_factory)
            .ok_or(LifecycleError::InvalidLodIndex {
                index: lod,
                count: self.lods.len(),
            })
    }

    #[must_use]
    pub fn lod(&self, index: usize) -> Option<&LodLevel> {
        self.lods.get(index)
    }

    #[must_use]
    pub fn lods(&self) -> &[LodLevel] {
        &self.lods
    }

    #[inline]
    #[must_use]
    pub fn lod_count(&self) -> usize {
        self.lods.len()
    }

    #[inline]
    #[must_use]
    pub fn mesh(&self) -> &Arc<MeshRenderData> {
        &self.mesh
    }

    /// Whether any LOD currently holds resources.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lods.iter().any(LodLevel::is_initialized)
    }
}
