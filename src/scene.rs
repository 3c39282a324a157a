//! Scene
//!
//! Producer-side owner of mesh instances. Adding an instance builds its
//! [`LodResourceSet`] and schedules initialization; removing it schedules the
//! mirrored release. The scene also owns the [`SharedGeometryRegistry`], so all
//! reference-count changes happen during the scene's (single-threaded) update.

use std::sync::Arc;

use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::errors::{LifecycleError, Result};
use crate::renderer::command::{CommandSender, RenderCommand};
use crate::renderer::core::handle::ResourceHandle;
use crate::renderer::core::shared_geometry::SharedGeometryRegistry;
use crate::renderer::mesh::{LodInitContext, LodResourceSet, MeshRenderData, VertexBuffer};
use crate::settings::LifecycleSettings;

new_key_type! {
    /// Stable key of a mesh instance inside a [`Scene`].
    pub struct MeshInstanceKey;
}

struct MeshInstance {
    lods: LodResourceSet,
    /// Per-LOD color overrides supplied by the instance owner.
    color_overrides: Vec<Option<VertexBuffer>>,
}

pub struct Scene {
    instances: SlotMap<MeshInstanceKey, MeshInstance>,
    geometry: SharedGeometryRegistry,
    commands: CommandSender,
    ray_tracing_enabled: bool,
    ray_tracing_scene: ResourceHandle,
}

impl Scene {
    #[must_use]
    pub fn new(commands: CommandSender, settings: &LifecycleSettings) -> Self {
        Self {
            instances: SlotMap::with_key(),
            geometry: SharedGeometryRegistry::new(commands.clone(), settings.underflow_policy),
            commands,
            ray_tracing_enabled: settings.ray_tracing_enabled,
            ray_tracing_scene: ResourceHandle::new("RayTracingScene"),
        }
    }

    /// Binds a mesh instance to the scene and schedules its resources.
    ///
    /// `color_overrides[i]` (if any) replaces the vertex colors of LOD `i`.
    /// The scene releases the override buffers when the instance is removed.
    pub fn add_instance(
        &mut self,
        mesh: Arc<MeshRenderData>,
        color_overrides: Vec<Option<VertexBuffer>>,
    ) -> Result<MeshInstanceKey> {
        let mut lods = LodResourceSet::new(mesh);
        let mut ctx = LodInitContext {
            commands: &self.commands,
            geometry: &mut self.geometry,
            ray_tracing_enabled: self.ray_tracing_enabled,
        };
        lods.init_resources(&mut ctx, &color_overrides)?;

        let key = self.instances.insert(MeshInstance {
            lods,
            color_overrides,
        });
        log::debug!("Mesh instance {key:?} added");
        Ok(key)
    }

    /// Unbinds an instance and schedules the release of its resources.
    ///
    /// Every release is attempted before the instance leaves the scene; the
    /// first failure is returned after that.
    pub fn remove_instance(&mut self, key: MeshInstanceKey) -> Result<()> {
        let instance = self
            .instances
            .get_mut(key)
            .ok_or(LifecycleError::InstanceNotFound)?;
        let mut ctx = LodInitContext {
            commands: &self.commands,
            geometry: &mut self.geometry,
            ray_tracing_enabled: self.ray_tracing_enabled,
        };
        let released = instance.lods.release_resources(&mut ctx);

        let overrides: SmallVec<[ResourceHandle; 4]> = instance
            .color_overrides
            .drain(..)
            .flatten()
            .map(|colors| colors.handle().clone())
            .collect();
        let overrides_released = if overrides.is_empty() {
            Ok(())
        } else {
            self.commands
                .enqueue(RenderCommand::ReleaseBuffers { buffers: overrides })
        };

        self.instances.remove(key);
        log::debug!("Mesh instance {key:?} removed");
        released.and(overrides_released)
    }

    /// Removes every instance, returning the first failure.
    pub fn clear(&mut self) -> Result<()> {
        let keys: Vec<_> = self.instances.keys().collect();
        let mut first_error = None;
        for key in keys {
            if let Err(err) = self.remove_instance(key) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    #[must_use]
    pub fn instance(&self, key: MeshInstanceKey) -> Option<&LodResourceSet> {
        self.instances.get(key).map(|instance| &instance.lods)
    }

    /// Records a streaming update for `mesh` and asks the render context to
    /// build the ray geometry of every LOD that just became resident.
    ///
    /// Returns the number of realization requests enqueued.
    pub fn set_first_resident_lod(&mut self, mesh: &MeshRenderData, first_resident: u32) -> Result<usize> {
        mesh.set_first_resident_lod(first_resident);
        let mut requested = 0;
        for lod in first_resident..mesh.lod_count() as u32 {
            let key = mesh.ray_geometry_key(lod);
            if self.geometry.request_realization(key, mesh.residency(lod))? {
                requested += 1;
            }
        }
        Ok(requested)
    }

    /// Enqueues a rebuild of the scene's top-level structure over every
    /// shared geometry. Only geometries exposed at execution time are included.
    ///
    /// Returns `None` when ray tracing is disabled.
    pub fn build_ray_tracing_scene(&self) -> Result<Option<ResourceHandle>> {
        if !self.ray_tracing_enabled {
            return Ok(None);
        }
        self.commands.enqueue(RenderCommand::BuildRayTracingScene {
            scene: self.ray_tracing_scene.clone(),
            geometries: self.geometry.iter().cloned().collect(),
        })?;
        Ok(Some(self.ray_tracing_scene.clone()))
    }

    pub fn release_ray_tracing_scene(&self) -> Result<()> {
        self.commands.enqueue(RenderCommand::ReleaseRayTracingScene {
            scene: self.ray_tracing_scene.clone(),
        })
    }

    #[inline]
    #[must_use]
    pub fn ray_tracing_scene(&self) -> &ResourceHandle {
        &self.ray_tracing_scene
    }

    #[inline]
    #[must_use]
    pub fn geometry(&self) -> &SharedGeometryRegistry {
        &self.geometry
    }

    #[inline]
    pub(crate) fn geometry_mut(&mut self) -> &mut SharedGeometryRegistry {
        &mut self.geometry
    }

    #[inline]
    #[must_use]
    pub fn commands(&self) -> &CommandSender {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
