//! Runtime Tunables
//!
//! Named numeric variables that a configuration surface may write at any time
//! and the render context reads once per frame per view.
//!
//! Values live in atomics: writers are rare and readers tolerate eventual
//! consistency, so no lock is held on the read path. The registry itself is
//! only locked while registering or looking up by name.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::errors::{LifecycleError, Result};

/// Storage type of a tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunableKind {
    Int,
    Float,
}

/// A single named runtime variable.
///
/// Both kinds are stored as raw bits in one `AtomicU32`.
#[derive(Debug)]
pub struct Tunable {
    name: &'static str,
    help: &'static str,
    kind: TunableKind,
    bits: AtomicU32,
}

impl Tunable {
    fn new_int(name: &'static str, default: i32, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: TunableKind::Int,
            bits: AtomicU32::new(default.cast_unsigned()),
        }
    }

    fn new_float(name: &'static str, default: f32, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: TunableKind::Float,
            bits: AtomicU32::new(default.to_bits()),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    #[must_use]
    pub fn help(&self) -> &'static str {
        self.help
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> TunableKind {
        self.kind
    }

    /// Current value as an integer. Float tunables are truncated.
    #[inline]
    #[must_use]
    pub fn get_int(&self) -> i32 {
        let bits = self.bits.load(Ordering::Relaxed);
        match self.kind {
            TunableKind::Int => bits.cast_signed(),
            TunableKind::Float => f32::from_bits(bits) as i32,
        }
    }

    /// Current value as a float.
    #[inline]
    #[must_use]
    pub fn get_float(&self) -> f32 {
        let bits = self.bits.load(Ordering::Relaxed);
        match self.kind {
            TunableKind::Int => bits.cast_signed() as f32,
            TunableKind::Float => f32::from_bits(bits),
        }
    }

    pub fn set_int(&self, value: i32) {
        let bits = match self.kind {
            TunableKind::Int => value.cast_unsigned(),
            TunableKind::Float => (value as f32).to_bits(),
        };
        self.bits.store(bits, Ordering::Relaxed);
    }

    pub fn set_float(&self, value: f32) {
        let bits = match self.kind {
            TunableKind::Int => (value as i32).cast_unsigned(),
            TunableKind::Float => value.to_bits(),
        };
        self.bits.store(bits, Ordering::Relaxed);
    }

    /// Parses `text` according to the tunable's kind and stores it.
    pub fn set_from_str(&self, text: &str) -> Result<()> {
        let text = text.trim();
        let invalid = || LifecycleError::InvalidTunableValue {
            name: self.name.to_string(),
            value: text.to_string(),
        };
        match self.kind {
            TunableKind::Int => self.set_int(text.parse::<i32>().map_err(|_| invalid())?),
            TunableKind::Float => {
                let value = text.parse::<f32>().map_err(|_| invalid())?;
                if !value.is_finite() {
                    return Err(invalid());
                }
                self.set_float(value);
            }
        }
        Ok(())
    }
}

/// Name-indexed collection of tunables.
///
/// Passed explicitly to the passes that read it; there is no global instance.
#[derive(Debug, Default)]
pub struct TunableRegistry {
    entries: RwLock<FxHashMap<&'static str, Arc<Tunable>>>,
}

impl TunableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an integer tunable, or returns the existing one of that name.
    pub fn register_int(&self, name: &'static str, default: i32, help: &'static str) -> Arc<Tunable> {
        self.entries
            .write()
            .entry(name)
            .or_insert_with(|| Arc::new(Tunable::new_int(name, default, help)))
            .clone()
    }

    /// Registers a float tunable, or returns the existing one of that name.
    pub fn register_float(&self, name: &'static str, default: f32, help: &'static str) -> Arc<Tunable> {
        self.entries
            .write()
            .entry(name)
            .or_insert_with(|| Arc::new(Tunable::new_float(name, default, help)))
            .clone()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Tunable>> {
        self.entries.read().get(name).cloned()
    }

    /// Sets a tunable from its textual form.
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        let tunable = self
            .get(name)
            .ok_or_else(|| LifecycleError::UnknownTunable(name.to_string()))?;
        tunable.set_from_str(value)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.read().keys().copied().collect();
        names.sort_unstable();
        names
    }
}
