//! Resource Handles
//!
//! A [`ResourceHandle`] is the producer-side identity of one device
//! allocation. It carries no device object itself: the render context keeps
//! the resident object in its [`ResourceTable`](super::table::ResourceTable)
//! and flips the shared `initialized` flag when `Init`/`Release` execute.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Global unique id generator
static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Process-unique identity of a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    #[inline]
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct HandleInner {
    id: ResourceId,
    debug_name: String,
    initialized: AtomicBool,
}

/// Cloneable, ownership-tracked identity of one device object.
///
/// Clones share the same id and initialization state.
#[derive(Clone)]
pub struct ResourceHandle {
    inner: Arc<HandleInner>,
}

impl ResourceHandle {
    /// Allocates a fresh id. The handle starts uninitialized.
    #[must_use]
    pub fn new(debug_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: ResourceId(next_id()),
                debug_name: debug_name.into(),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    #[inline]
    #[must_use]
    pub fn debug_name(&self) -> &str {
        &self.inner.debug_name
    }

    /// Whether `Init` has completed on the render context and no `Release`
    /// has executed since.
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn set_initialized(&self, initialized: bool) {
        self.inner.initialized.store(initialized, Ordering::Release);
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ResourceHandle {}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.debug_name)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
