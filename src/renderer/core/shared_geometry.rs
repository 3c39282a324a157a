//! Reference-Counted Shared Geometry
//!
//! Ray-tracing acceleration structures are expensive, so every scene instance
//! rendering the same mesh LOD shares one [`SharedGeometry`]. The producer-side
//! [`SharedGeometryRegistry`] is the only place the owner count changes:
//!
//! - `0 → 1` enqueues the creation command,
//! - `1 → 0` hides the geometry from render consumers immediately, then
//!   enqueues its destruction.
//!
//! Render-context readers must check [`SharedGeometry::is_exposed`] before
//! consuming the handle; a non-null handle alone is not enough.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{LifecycleError, Result};
use crate::renderer::command::{BufferUpload, CommandSender, RenderCommand};
use crate::renderer::core::handle::ResourceHandle;
use crate::renderer::device::GeometryType;
use crate::renderer::mesh::MeshAssetId;
use crate::settings::UnderflowPolicy;

/// Identity under which a geometry is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKey {
    /// One LOD of one mesh asset.
    MeshLod { mesh: MeshAssetId, lod: u32 },
    /// The procedural unit-cube AABB used by the BVH visualization.
    UnitCubeAabb,
}

/// One segment of a geometry initializer, referencing buffers by handle.
#[derive(Debug, Clone)]
pub struct GeometrySegment {
    pub vertex_buffer: ResourceHandle,
    pub vertex_offset: u64,
    pub vertex_stride: u32,
    pub first_primitive: u32,
    pub num_primitives: u32,
    pub enabled: bool,
    pub force_opaque: bool,
    pub allow_duplicate_any_hit: bool,
}

/// Everything needed to build a bottom-level acceleration structure.
#[derive(Debug, Clone)]
pub struct RayTracingGeometryInitializer {
    pub debug_name: String,
    pub index_buffer: Option<ResourceHandle>,
    pub total_primitive_count: u32,
    pub geometry_type: GeometryType,
    pub fast_build: bool,
    pub segments: Vec<GeometrySegment>,
}

/// Whether a geometry's source data is streamed in.
#[derive(Debug, Clone)]
pub enum Residency {
    Always,
    /// Resident while `lod_index >= first_resident`.
    Lod {
        first_resident: Arc<AtomicU32>,
        lod_index: u32,
    },
}

impl Residency {
    #[must_use]
    pub fn is_resident(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Lod {
                first_resident,
                lod_index,
            } => *lod_index >= first_resident.load(Ordering::Acquire),
        }
    }
}

/// A geometry shared by N logical owners.
#[derive(Debug)]
pub struct SharedGeometry {
    key: GeometryKey,
    handle: ResourceHandle,
    /// Written by the producer-side registry only.
    reference_count: AtomicU32,
    exposed: AtomicBool,
    /// Last initializer received on the render context.
    initializer: Mutex<Option<RayTracingGeometryInitializer>>,
    /// Source buffers uploaded with the first owner and released with the
    /// last. Producer side only.
    owned_buffers: Mutex<SmallVec<[ResourceHandle; 4]>>,
}

impl SharedGeometry {
    fn new(key: GeometryKey, debug_name: String) -> Self {
        Self {
            key,
            handle: ResourceHandle::new(debug_name),
            reference_count: AtomicU32::new(0),
            exposed: AtomicBool::new(false),
            initializer: Mutex::new(None),
            owned_buffers: Mutex::new(SmallVec::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> GeometryKey {
        self.key
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    #[inline]
    #[must_use]
    pub fn reference_count(&self) -> u32 {
        self.reference_count.load(Ordering::Acquire)
    }

    /// True once the acceleration structure exists and owners remain.
    #[inline]
    #[must_use]
    pub fn is_exposed(&self) -> bool {
        self.exposed.load(Ordering::Acquire)
    }

    pub(crate) fn set_exposed(&self, exposed: bool) {
        self.exposed.store(exposed, Ordering::Release);
    }

    pub(crate) fn store_initializer(&self, initializer: RayTracingGeometryInitializer) {
        *self.initializer.lock() = Some(initializer);
    }

    pub(crate) fn initializer(&self) -> Option<RayTracingGeometryInitializer> {
        self.initializer.lock().clone()
    }

    pub(crate) fn clear_initializer(&self) {
        *self.initializer.lock() = None;
    }

    /// Buffers this geometry uploaded for itself, if any.
    #[must_use]
    pub fn owned_buffers(&self) -> SmallVec<[ResourceHandle; 4]> {
        self.owned_buffers.lock().clone()
    }
}

/// Result of [`SharedGeometryRegistry::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other owners remain; carries the remaining count.
    Retained(u32),
    /// Last owner gone; destruction enqueued.
    Destroyed,
    /// Underflow clamped under [`UnderflowPolicy::Clamp`].
    Ignored,
}

/// Producer-side owner of all shared geometries.
///
/// Single writer: callers serialize acquire/release through `&mut self`
/// (the owning scene's update phase).
pub struct SharedGeometryRegistry {
    entries: FxHashMap<GeometryKey, Arc<SharedGeometry>>,
    commands: CommandSender,
    policy: UnderflowPolicy,
    debug_counter: u32,
}

impl SharedGeometryRegistry {
    #[must_use]
    pub fn new(commands: CommandSender, policy: UnderflowPolicy) -> Self {
        Self {
            entries: FxHashMap::default(),
            commands,
            policy,
            debug_counter: 0,
        }
    }

    /// Adds one owner to `key`, creating the geometry on first reference.
    ///
    /// `build` runs only when the creation command is enqueued.
    pub fn acquire_or_create(
        &mut self,
        key: GeometryKey,
        residency: Residency,
        build: impl FnOnce() -> RayTracingGeometryInitializer,
    ) -> Result<Arc<SharedGeometry>> {
        self.acquire_or_create_owning(key, residency, || (build(), SmallVec::new()))
    }

    /// Like [`acquire_or_create`](Self::acquire_or_create) for geometries
    /// built from buffers nobody else owns (procedural proxies).
    ///
    /// The uploads returned by `build` are enqueued ahead of the creation
    /// command and released after the destruction command of the last owner.
    pub fn acquire_or_create_owning(
        &mut self,
        key: GeometryKey,
        residency: Residency,
        build: impl FnOnce() -> (RayTracingGeometryInitializer, SmallVec<[BufferUpload; 4]>),
    ) -> Result<Arc<SharedGeometry>> {
        let debug_counter = &mut self.debug_counter;
        let geometry = self
            .entries
            .entry(key)
            .or_insert_with(|| {
                let name = format!("SharedGeometry_{}", *debug_counter);
                *debug_counter += 1;
                Arc::new(SharedGeometry::new(key, name))
            })
            .clone();

        let previous = geometry.reference_count.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            log::debug!("Shared geometry {key:?} created (first owner)");
            if let Err(err) = self.enqueue_creation(&geometry, residency, build) {
                // Nothing reached the render context; undo the reference.
                geometry.reference_count.store(0, Ordering::Release);
                geometry.owned_buffers.lock().clear();
                self.entries.remove(&key);
                return Err(err);
            }
        }
        Ok(geometry)
    }

    fn enqueue_creation(
        &self,
        geometry: &Arc<SharedGeometry>,
        residency: Residency,
        build: impl FnOnce() -> (RayTracingGeometryInitializer, SmallVec<[BufferUpload; 4]>),
    ) -> Result<()> {
        let (initializer, uploads) = build();
        if !uploads.is_empty() {
            *geometry.owned_buffers.lock() =
                uploads.iter().map(|upload| upload.handle.clone()).collect();
            self.commands.enqueue(RenderCommand::InitVertexBuffers {
                lod_index: 0,
                buffers: uploads,
            })?;
        }
        self.commands.enqueue(RenderCommand::InitRayGeometry {
            geometry: geometry.clone(),
            initializer,
            residency,
        })
    }

    /// Removes one owner from `geometry`.
    pub fn release(&mut self, geometry: &SharedGeometry) -> Result<ReleaseOutcome> {
        let key = geometry.key();
        let registered = self
            .entries
            .get(&key)
            .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), geometry));
        let count = geometry.reference_count();

        if !registered || count == 0 {
            return self.underflow(key);
        }

        let remaining = count - 1;
        geometry.reference_count.store(remaining, Ordering::Release);
        if remaining > 0 {
            return Ok(ReleaseOutcome::Retained(remaining));
        }

        // Hidden before the destruction command exists.
        geometry.set_exposed(false);
        let Some(entry) = self.entries.remove(&key) else {
            return self.underflow(key);
        };
        log::debug!("Shared geometry {key:?} released (last owner)");
        let owned = std::mem::take(&mut *entry.owned_buffers.lock());
        self.commands
            .enqueue(RenderCommand::ReleaseRayGeometry { geometry: entry })?;
        if !owned.is_empty() {
            self.commands
                .enqueue(RenderCommand::ReleaseBuffers { buffers: owned })?;
        }
        Ok(ReleaseOutcome::Destroyed)
    }

    /// Removes one owner from whatever geometry is registered under `key`.
    pub fn release_key(&mut self, key: GeometryKey) -> Result<ReleaseOutcome> {
        match self.entries.get(&key).cloned() {
            Some(geometry) => self.release(&geometry),
            None => self.underflow(key),
        }
    }

    fn underflow(&self, key: GeometryKey) -> Result<ReleaseOutcome> {
        match self.policy {
            UnderflowPolicy::Fail => Err(LifecycleError::RefCountUnderflow { key }),
            UnderflowPolicy::Clamp => {
                log::warn!("Reference count underflow on {key:?}; release ignored");
                Ok(ReleaseOutcome::Ignored)
            }
        }
    }

    /// Asks the render context to create a referenced geometry whose source
    /// data has become resident since its creation command ran.
    ///
    /// Returns `false` when nothing references `key`.
    pub fn request_realization(&self, key: GeometryKey, residency: Residency) -> Result<bool> {
        let Some(geometry) = self.entries.get(&key) else {
            return Ok(false);
        };
        if geometry.is_exposed() {
            return Ok(false);
        }
        self.commands.enqueue(RenderCommand::RealizeRayGeometry {
            geometry: geometry.clone(),
            residency,
        })?;
        Ok(true)
    }

    /// Current owner count; zero for unknown keys.
    #[must_use]
    pub fn reference_count(&self, key: GeometryKey) -> u32 {
        self.entries
            .get(&key)
            .map_or(0, |geometry| geometry.reference_count())
    }

    #[must_use]
    pub fn get(&self, key: GeometryKey) -> Option<&Arc<SharedGeometry>> {
        self.entries.get(&key)
    }

    /// All geometries with at least one owner.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SharedGeometry>> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn policy(&self) -> UnderflowPolicy {
        self.policy
    }
}
