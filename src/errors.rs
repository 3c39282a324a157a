//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! [`LifecycleError`] covers resource-lifecycle violations detected on either
//! side of the render-context boundary, configuration problems and failures
//! reported back by the device collaborator. [`DeviceError`] is the narrower
//! vocabulary a [`RenderDevice`](crate::renderer::device::RenderDevice)
//! implementation uses to report submission failures.
//!
//! # Propagation
//!
//! - Lifecycle violations (`UninitializedResource`, `RefCountUnderflow`) are
//!   local invariant checks. Whether they stop the caller or degrade to a
//!   logged no-op is selected by
//!   [`ValidationMode`](crate::settings::ValidationMode) and
//!   [`UnderflowPolicy`](crate::settings::UnderflowPolicy).
//! - `CapabilityUnavailable` silently disables the dependent visualization.
//! - `DeviceSubmission` and `SceneNotResident` are reported upward and never
//!   retried.

use thiserror::Error;

use crate::renderer::core::handle::ResourceId;
use crate::renderer::core::shared_geometry::GeometryKey;

/// Failures reported by a device implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device was lost; nothing submitted after this point executes.
    #[error("device lost")]
    DeviceLost,

    /// The device allocator could not satisfy an allocation.
    #[error("out of device memory ({requested} bytes requested)")]
    OutOfMemory {
        /// Size of the failed allocation
        requested: u64,
    },

    /// The device does not implement the requested feature.
    #[error("unsupported device feature: {0}")]
    Unsupported(&'static str),

    /// A device object id was not (or no longer) known to the device.
    #[error("invalid device handle {0}")]
    InvalidHandle(u64),

    /// Backend validation rejected the call.
    #[error("device validation error: {0}")]
    Validation(String),
}

/// The main error type for the crate.
#[derive(Error, Debug)]
pub enum LifecycleError {
    // ========================================================================
    // Resource Lifecycle Errors
    // ========================================================================
    /// A resource was bound or read before its `Init` executed on the render context.
    #[error("resource {name} ({id}) used before initialization")]
    UninitializedResource {
        /// Id of the offending handle
        id: ResourceId,
        /// Debug name of the offending handle
        name: String,
    },

    /// `Release` was called more times than `Acquire` for the same key.
    #[error("reference count underflow for shared geometry {key:?}")]
    RefCountUnderflow {
        /// Key of the geometry whose count would have gone negative
        key: GeometryKey,
    },

    /// A LOD index outside the resource set was requested.
    #[error("LOD index {index} out of range (LOD count: {count})")]
    InvalidLodIndex {
        /// The invalid index
        index: usize,
        /// Number of LODs in the set
        count: usize,
    },

    /// A scene instance key did not resolve.
    #[error("mesh instance not found in scene")]
    InstanceNotFound,

    // ========================================================================
    // Capability & Device Errors
    // ========================================================================
    /// Feature detection failed; the dependent pass is disabled.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(&'static str),

    /// The device collaborator rejected a submitted command.
    #[error("device submission failed while executing `{command}`: {source}")]
    DeviceSubmission {
        /// Name of the command being executed
        command: &'static str,
        /// Device-reported cause
        #[source]
        source: DeviceError,
    },

    /// A ray dispatch named a ray-tracing scene with nothing resident; the
    /// visualization is dropped for this frame.
    #[error("ray tracing scene {0} is not resident")]
    SceneNotResident(String),

    /// The render thread is gone; no further commands can be delivered.
    #[error("render thread disconnected")]
    RenderThreadDisconnected,

    /// The OS refused to start the render thread.
    #[error("failed to spawn render thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// No tunable is registered under this name.
    #[error("unknown tunable: {0}")]
    UnknownTunable(String),

    /// A tunable value could not be parsed for the tunable's type.
    #[error("invalid value `{value}` for tunable {name}")]
    InvalidTunableValue {
        /// Tunable name
        name: String,
        /// Rejected text
        value: String,
    },

    /// Settings JSON could not be parsed.
    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),
}

impl LifecycleError {
    /// Returns `true` for the local invariant violations governed by
    /// [`ValidationMode`](crate::settings::ValidationMode).
    #[must_use]
    pub fn is_lifecycle_violation(&self) -> bool {
        matches!(
            self,
            Self::UninitializedResource { .. } | Self::RefCountUnderflow { .. }
        )
    }
}

/// Alias for `Result<T, LifecycleError>`.
pub type Result<T> = std::result::Result<T, LifecycleError>;
