//! Core resource lifecycle primitives
//!
//! - [`handle`]: producer-side identities of device objects
//! - [`shared_geometry`]: reference-counted ray-tracing geometry
//! - [`table`]: render-side map from identity to resident device object

pub mod handle;
pub mod shared_geometry;
pub mod table;

pub use handle::{ResourceHandle, ResourceId};
pub use shared_geometry::{
    GeometryKey, GeometrySegment, RayTracingGeometryInitializer, ReleaseOutcome, Residency,
    SharedGeometry, SharedGeometryRegistry,
};
pub use table::ResourceTable;
