//! Render-context command execution.

use crate::errors::{LifecycleError, Result};
use crate::renderer::command::{CommandReceiver, ComputeDispatch, RayDispatch, RenderCommand};
use crate::renderer::core::shared_geometry::SharedGeometry;
use crate::renderer::core::table::ResourceTable;
use crate::renderer::device::{DeviceCapabilities, RenderDevice};
use crate::renderer::pipeline::PipelineCache;
use crate::settings::{LifecycleSettings, ValidationMode};

/// What one [`RenderContext::drain`] call did.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Commands that completed.
    pub executed: usize,
    /// Commands skipped after a lifecycle violation (lenient validation).
    pub skipped: usize,
    /// Device and capability failures, in execution order. Never retried.
    pub failures: Vec<LifecycleError>,
    /// A `Shutdown` command was reached.
    pub shutdown: bool,
}

impl DrainReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && self.failures.is_empty()
    }
}

/// The render context: sole owner of the device and of every resident
/// device object.
pub struct RenderContext<D: RenderDevice> {
    device: D,
    resources: ResourceTable,
    pipelines: PipelineCache,
    validation: ValidationMode,
    caps: DeviceCapabilities,
}

impl<D: RenderDevice> RenderContext<D> {
    #[must_use]
    pub fn new(device: D, settings: &LifecycleSettings) -> Self {
        let mut caps = device.capabilities();
        caps.ray_tracing &= settings.ray_tracing_enabled;
        log::info!(
            "Render context created (ray tracing: {}, shader timing: {})",
            caps.ray_tracing,
            caps.shader_timing
        );
        Self {
            device,
            resources: ResourceTable::new(),
            pipelines: PipelineCache::new(),
            validation: settings.validation,
            caps,
        }
    }

    /// Device capabilities with the global ray-tracing switch applied.
    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.caps
    }

    /// Executes every command queued so far, in FIFO order.
    ///
    /// Under [`ValidationMode::Strict`] the first lifecycle violation stops
    /// the drain and is returned; commands after it stay queued. Device
    /// failures never stop the drain.
    pub fn drain(&mut self, queue: &CommandReceiver) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        while let Some(command) = queue.try_recv() {
            if matches!(command, RenderCommand::Shutdown) {
                report.shutdown = true;
                break;
            }
            self.step(command, &mut report)?;
        }
        Ok(report)
    }

    /// Blocks on `queue` until `Shutdown` arrives or every sender is gone.
    pub fn run(&mut self, queue: &CommandReceiver) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        while let Some(command) = queue.recv() {
            if matches!(command, RenderCommand::Shutdown) {
                report.shutdown = true;
                break;
            }
            self.step(command, &mut report)?;
        }
        Ok(report)
    }

    fn step(&mut self, command: RenderCommand, report: &mut DrainReport) -> Result<()> {
        let name = command.name();
        match self.execute(command) {
            Ok(()) => report.executed += 1,
            Err(err) if err.is_lifecycle_violation() => match self.validation {
                ValidationMode::Strict => {
                    log::error!("{name}: {err}");
                    return Err(err);
                }
                ValidationMode::Lenient => {
                    log::warn!("{name} skipped: {err}");
                    report.skipped += 1;
                }
            },
            Err(err) => {
                log::error!("{name} failed: {err}");
                report.failures.push(err);
            }
        }
        Ok(())
    }

    /// Executes a single command.
    pub fn execute(&mut self, command: RenderCommand) -> Result<()> {
        let name = command.name();
        match command {
            RenderCommand::InitVertexBuffers { lod_index, buffers } => {
                let mut created = 0;
                for upload in &buffers {
                    if self.resources.init_buffer(
                        &mut self.device,
                        &upload.handle,
                        &upload.data,
                        upload.usage,
                        name,
                    )? {
                        created += 1;
                    }
                }
                log::debug!("LOD{lod_index}: {created}/{} buffers created", buffers.len());
            }
            RenderCommand::InitVertexFactory { factory, streams } => {
                self.resources.init_vertex_factory(&factory, &streams)?;
            }
            RenderCommand::ReleaseVertexFactory { factory } => {
                self.resources.release(&mut self.device, &factory);
            }
            RenderCommand::ReleaseBuffers { buffers } => {
                for buffer in &buffers {
                    self.resources.release(&mut self.device, buffer);
                }
            }
            RenderCommand::InitRayGeometry {
                geometry,
                initializer,
                residency,
            } => {
                geometry.store_initializer(initializer);
                if !self.caps.ray_tracing {
                    log::debug!("{:?}: ray tracing unavailable, not built", geometry.key());
                } else if residency.is_resident() {
                    self.realize(&geometry, name)?;
                } else {
                    log::debug!("{:?}: LOD not resident, creation deferred", geometry.key());
                }
            }
            RenderCommand::RealizeRayGeometry {
                geometry,
                residency,
            } => {
                if self.caps.ray_tracing
                    && geometry.reference_count() > 0
                    && !geometry.is_exposed()
                    && residency.is_resident()
                {
                    self.realize(&geometry, name)?;
                }
            }
            RenderCommand::ReleaseRayGeometry { geometry } => {
                geometry.set_exposed(false);
                self.resources.release(&mut self.device, geometry.handle());
                geometry.clear_initializer();
            }
            RenderCommand::BuildRayTracingScene { scene, geometries } => {
                if !self.caps.ray_tracing {
                    log::debug!("Ray tracing unavailable, scene {} not built", scene.debug_name());
                    return Ok(());
                }
                let instances: Vec<_> = geometries
                    .iter()
                    .filter(|geometry| geometry.is_exposed())
                    .filter_map(|geometry| self.resources.geometry(geometry.handle()).ok())
                    .collect();
                log::debug!(
                    "Ray tracing scene rebuilt: {} of {} geometries",
                    instances.len(),
                    geometries.len()
                );
                self.resources
                    .init_scene(&mut self.device, &scene, &instances, name)?;
            }
            RenderCommand::ReleaseRayTracingScene { scene } => {
                self.resources.release(&mut self.device, &scene);
            }
            RenderCommand::DispatchCompute(dispatch) => self.dispatch_compute(&dispatch, name)?,
            RenderCommand::DispatchRays(dispatch) => self.dispatch_rays(&dispatch, name)?,
            RenderCommand::Fence(signal) => {
                // The waiter may have given up; nothing to report.
                let _ = signal.send(());
            }
            RenderCommand::Shutdown => {}
        }
        Ok(())
    }

    /// Builds the acceleration structure of a referenced geometry and exposes
    /// it if owners remain.
    fn realize(&mut self, geometry: &SharedGeometry, command: &'static str) -> Result<()> {
        let Some(initializer) = geometry.initializer() else {
            return Ok(());
        };
        if initializer.total_primitive_count == 0 {
            log::debug!("{:?}: no primitives, nothing to build", geometry.key());
            return Ok(());
        }
        self.resources
            .init_geometry(&mut self.device, geometry.handle(), &initializer, command)?;
        if geometry.reference_count() > 0 {
            geometry.set_exposed(true);
        }
        Ok(())
    }

    fn dispatch_compute(&mut self, dispatch: &ComputeDispatch, command: &'static str) -> Result<()> {
        let pipeline = self
            .pipelines
            .get_or_create(&mut self.device, &dispatch.pipeline)
            .map_err(|source| LifecycleError::DeviceSubmission { command, source })?;
        self.device
            .dispatch_compute(
                dispatch.label,
                self.pipelines.get(pipeline),
                &dispatch.bindings,
                dispatch.groups,
            )
            .map_err(|source| LifecycleError::DeviceSubmission { command, source })
    }

    fn dispatch_rays(&mut self, dispatch: &RayDispatch, command: &'static str) -> Result<()> {
        if !self.caps.ray_tracing {
            return Err(LifecycleError::CapabilityUnavailable("ray tracing"));
        }
        let scene = self.resources.scene(&dispatch.scene).map_err(|_| {
            LifecycleError::SceneNotResident(dispatch.scene.debug_name().to_string())
        })?;

        let mut bindings = dispatch.bindings.clone();
        if let Some(proxy) = dispatch.proxy.as_deref().filter(|proxy| proxy.is_exposed()) {
            bindings
                .acceleration_structures
                .push(self.resources.geometry(proxy.handle())?);
        }

        let pipeline = self
            .pipelines
            .get_or_create(&mut self.device, &dispatch.pipeline)
            .map_err(|source| LifecycleError::DeviceSubmission { command, source })?;
        self.device
            .dispatch_rays(
                dispatch.label,
                self.pipelines.get(pipeline),
                scene,
                &bindings,
                dispatch.extent,
            )
            .map_err(|source| LifecycleError::DeviceSubmission { command, source })
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[inline]
    #[must_use]
    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    #[inline]
    #[must_use]
    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    /// Consumes the context, returning the device.
    #[must_use]
    pub fn into_device(self) -> D {
        self.device
    }
}
