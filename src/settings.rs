//! Lifecycle Settings
//!
//! Process-wide configuration consumed once when the producer-side
//! [`Scene`](crate::scene::Scene) and the render-side
//! [`RenderContext`](crate::renderer::command::RenderContext) are created.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use render_lifecycle::settings::{LifecycleSettings, UnderflowPolicy};
//!
//! // Debug defaults: strict validation, failing on underflow
//! let settings = LifecycleSettings::default();
//!
//! // Shipping configuration loaded from JSON
//! let settings = LifecycleSettings::from_json_str(r#"{
//!     "ray_tracing_enabled": true,
//!     "underflow_policy": "clamp",
//!     "validation": "lenient",
//!     "tunables": { "r.RayTracing.VisualizeBVH.Range": "64" }
//! }"#)?;
//! ```

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::errors::Result;
use crate::tunables::TunableRegistry;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Behaviour when a shared geometry is released more often than acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnderflowPolicy {
    /// Return [`LifecycleError::RefCountUnderflow`](crate::errors::LifecycleError::RefCountUnderflow).
    Fail,
    /// Log a warning and keep the count at zero.
    Clamp,
}

impl Default for UnderflowPolicy {
    #[inline]
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Fail
        } else {
            Self::Clamp
        }
    }
}

/// How the render context reacts to use-before-init violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Stop draining at the first violation and return it to the caller.
    Strict,
    /// Log the violation, skip the command and keep draining.
    Lenient,
}

impl Default for ValidationMode {
    #[inline]
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

// ---------------------------------------------------------------------------
// LifecycleSettings
// ---------------------------------------------------------------------------

/// Global configuration for resource scheduling and command execution.
///
/// | Field                 | Description                                   | Default               |
/// |-----------------------|-----------------------------------------------|-----------------------|
/// | `ray_tracing_enabled` | Create shared ray-tracing geometry for LODs   | `true`                |
/// | `underflow_policy`    | Reaction to release/acquire mismatches        | `Fail` (debug builds) |
/// | `validation`          | Reaction to use-before-init on render context | `Strict` (debug)      |
/// | `tunables`            | Initial values applied to the tunable registry| empty                 |
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Global ray-tracing switch.
    ///
    /// When `false`, LOD resource sets never acquire shared ray-tracing
    /// geometry, regardless of per-mesh support.
    pub ray_tracing_enabled: bool,

    /// Reaction to reference-count underflow in the shared geometry registry.
    pub underflow_policy: UnderflowPolicy,

    /// Reaction to lifecycle violations detected while draining commands.
    pub validation: ValidationMode,

    /// Tunable overrides (`name -> textual value`) applied at startup.
    pub tunables: FxHashMap<String, String>,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            ray_tracing_enabled: true,
            underflow_policy: UnderflowPolicy::default(),
            validation: ValidationMode::default(),
            tunables: FxHashMap::default(),
        }
    }
}

impl LifecycleSettings {
    /// Parses settings from JSON. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Applies the configured tunable overrides to `registry`.
    ///
    /// Stops at the first unknown name or unparsable value.
    pub fn apply_tunables(&self, registry: &TunableRegistry) -> Result<()> {
        for (name, value) in &self.tunables {
            registry.set(name, value)?;
            log::debug!("Tunable override applied: {name} = {value}");
        }
        Ok(())
    }
}
