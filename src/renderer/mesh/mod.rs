//! Mesh render data and per-instance LOD resources.

pub mod lod;
pub mod render_data;
pub mod vertex_factory;

pub use lod::{LodInitContext, LodLevel, LodResourceSet};
pub use render_data::{
    IndexBuffer, MeshAssetId, MeshLodRenderData, MeshRenderData, RenderSection, StaticMeshVertex,
    StaticVertexBuffers, VertexBuffer,
};
pub use vertex_factory::{ResolvedStream, StreamBinding, VertexFactoryLayout, VertexStreams};
