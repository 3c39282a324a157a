//! Mesh asset render data
//!
//! CPU-side vertex/index data of a mesh asset, per LOD. Buffers are shared by
//! every scene instance of the asset; the asset initializes and releases them,
//! instances only build vertex factories and ray-tracing geometry on top.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use smallvec::smallvec;

use crate::errors::Result;
use crate::renderer::command::{BufferUpload, CommandSender, RenderCommand};
use crate::renderer::core::handle::ResourceHandle;
use crate::renderer::core::shared_geometry::{
    GeometryKey, GeometrySegment, RayTracingGeometryInitializer, Residency,
};
use crate::renderer::device::GeometryType;
use crate::renderer::mesh::vertex_factory::{StreamBinding, VertexStreams};

static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a mesh asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshAssetId(u64);

impl MeshAssetId {
    fn next() -> Self {
        Self(NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Buffers
// ============================================================================

/// Tangent basis and first texture coordinate of one vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct StaticMeshVertex {
    pub tangent_x: [f32; 4],
    pub tangent_z: [f32; 4],
    pub uv: [f32; 2],
}

impl StaticMeshVertex {
    /// Byte offset of `uv` inside the vertex.
    pub const UV_OFFSET: u32 = 32;

    #[must_use]
    pub fn new(tangent_x: Vec3, tangent_z: Vec3, uv: Vec2) -> Self {
        Self {
            tangent_x: tangent_x.extend(0.0).to_array(),
            tangent_z: tangent_z.extend(1.0).to_array(),
            uv: uv.to_array(),
        }
    }
}

impl Default for StaticMeshVertex {
    fn default() -> Self {
        Self::new(Vec3::X, Vec3::Z, Vec2::ZERO)
    }
}

/// Immutable vertex stream with its own device handle.
#[derive(Debug, Clone)]
pub struct VertexBuffer {
    handle: ResourceHandle,
    data: Arc<[u8]>,
    stride: u32,
    vertex_count: u32,
}

impl VertexBuffer {
    /// Wraps a slice of plain-old-data vertices.
    #[must_use]
    pub fn from_pod<T: Pod>(debug_name: impl Into<String>, vertices: &[T]) -> Self {
        Self {
            handle: ResourceHandle::new(debug_name),
            data: Arc::from(bytemuck::cast_slice::<T, u8>(vertices)),
            stride: std::mem::size_of::<T>() as u32,
            vertex_count: vertices.len() as u32,
        }
    }

    /// RGBA8 per-vertex colors.
    #[must_use]
    pub fn colors(debug_name: impl Into<String>, colors: &[[u8; 4]]) -> Self {
        Self::from_pod(debug_name, colors)
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    #[inline]
    #[must_use]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[must_use]
    pub fn upload(&self) -> BufferUpload {
        BufferUpload {
            handle: self.handle.clone(),
            data: self.data.clone(),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        }
    }
}

/// 32-bit triangle-list indices.
#[derive(Debug, Clone)]
pub struct IndexBuffer {
    handle: ResourceHandle,
    data: Arc<[u8]>,
    count: u32,
}

impl IndexBuffer {
    #[must_use]
    pub fn new(debug_name: impl Into<String>, indices: &[u32]) -> Self {
        Self {
            handle: ResourceHandle::new(debug_name),
            data: Arc::from(bytemuck::cast_slice::<u32, u8>(indices)),
            count: indices.len() as u32,
        }
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    #[inline]
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> wgpu::IndexFormat {
        wgpu::IndexFormat::Uint32
    }

    #[must_use]
    pub fn upload(&self) -> BufferUpload {
        BufferUpload {
            handle: self.handle.clone(),
            data: self.data.clone(),
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        }
    }
}

/// The fixed vertex buffer set of one LOD.
#[derive(Debug, Clone)]
pub struct StaticVertexBuffers {
    pub position: VertexBuffer,
    /// Interleaved [`StaticMeshVertex`] (tangents + texcoords).
    pub attributes: VertexBuffer,
    pub color: VertexBuffer,
}

impl StaticVertexBuffers {
    /// Binds position, tangent, texcoord and `color` streams into a vertex
    /// factory description.
    #[must_use]
    pub fn bind(&self, color: &VertexBuffer) -> VertexStreams {
        VertexStreams {
            position: StreamBinding {
                buffer: self.position.handle.clone(),
                offset: 0,
                stride: self.position.stride,
                format: wgpu::VertexFormat::Float32x3,
            },
            tangent: StreamBinding {
                buffer: self.attributes.handle.clone(),
                offset: 0,
                stride: self.attributes.stride,
                format: wgpu::VertexFormat::Float32x4,
            },
            tex_coord: StreamBinding {
                buffer: self.attributes.handle.clone(),
                offset: StaticMeshVertex::UV_OFFSET,
                stride: self.attributes.stride,
                format: wgpu::VertexFormat::Float32x2,
            },
            color: StreamBinding {
                buffer: color.handle.clone(),
                offset: 0,
                // Zero stride broadcasts a single default color.
                stride: if color.vertex_count == 0 { 0 } else { color.stride },
                format: wgpu::VertexFormat::Unorm8x4,
            },
        }
    }
}

/// A contiguous index range drawn with one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSection {
    pub base_index: u32,
    pub num_triangles: u32,
    pub disabled: bool,
}

// ============================================================================
// LOD / Mesh
// ============================================================================

/// Render data of one LOD.
#[derive(Debug, Clone)]
pub struct MeshLodRenderData {
    pub vertex_buffers: StaticVertexBuffers,
    pub index_buffer: IndexBuffer,
    pub sections: Vec<RenderSection>,
}

impl MeshLodRenderData {
    #[must_use]
    pub fn new(
        name: &str,
        positions: &[Vec3],
        attributes: &[StaticMeshVertex],
        colors: &[[u8; 4]],
        indices: &[u32],
        sections: Vec<RenderSection>,
    ) -> Self {
        let positions: Vec<[f32; 3]> = positions.iter().map(|p| p.to_array()).collect();
        Self {
            vertex_buffers: StaticVertexBuffers {
                position: VertexBuffer::from_pod(format!("{name}.Position"), &positions),
                attributes: VertexBuffer::from_pod(format!("{name}.Attributes"), attributes),
                color: VertexBuffer::colors(format!("{name}.Color"), colors),
            },
            index_buffer: IndexBuffer::new(format!("{name}.Indices"), indices),
            sections,
        }
    }

    /// Single-section LOD with default tangents and no vertex colors.
    #[must_use]
    pub fn from_positions(name: &str, positions: &[Vec3], indices: &[u32]) -> Self {
        let attributes = vec![StaticMeshVertex::default(); positions.len()];
        let sections = vec![RenderSection {
            base_index: 0,
            num_triangles: indices.len() as u32 / 3,
            disabled: false,
        }];
        Self::new(name, positions, &attributes, &[], indices, sections)
    }

    /// LOD whose render data was stripped at cook time.
    #[must_use]
    pub fn stripped(name: &str) -> Self {
        Self::new(name, &[], &[], &[], &[], Vec::new())
    }

    #[inline]
    #[must_use]
    pub fn num_vertices(&self) -> u32 {
        self.vertex_buffers.position.vertex_count
    }

    /// Sum of per-section triangle counts.
    #[must_use]
    pub fn triangle_count(&self) -> u32 {
        self.sections.iter().map(|s| s.num_triangles).sum()
    }

    /// Triangle geometry over the position and index buffers, one segment
    /// per render section.
    #[must_use]
    pub fn ray_tracing_initializer(&self, debug_name: String) -> RayTracingGeometryInitializer {
        let position = &self.vertex_buffers.position;
        let segments = self
            .sections
            .iter()
            .map(|section| GeometrySegment {
                vertex_buffer: position.handle.clone(),
                vertex_offset: 0,
                vertex_stride: position.stride,
                first_primitive: section.base_index / 3,
                num_primitives: section.num_triangles,
                enabled: !section.disabled,
                force_opaque: false,
                allow_duplicate_any_hit: true,
            })
            .collect();

        RayTracingGeometryInitializer {
            debug_name,
            index_buffer: Some(self.index_buffer.handle.clone()),
            total_primitive_count: self.triangle_count(),
            geometry_type: GeometryType::Triangles,
            fast_build: false,
            segments,
        }
    }

    /// Every buffer the LOD owns, for init/release commands.
    #[must_use]
    pub fn uploads(&self, color: &VertexBuffer) -> smallvec::SmallVec<[BufferUpload; 4]> {
        smallvec![
            self.vertex_buffers.position.upload(),
            self.vertex_buffers.attributes.upload(),
            color.upload(),
            self.index_buffer.upload(),
        ]
    }
}

/// Render data of a mesh asset: its LODs plus streaming state.
#[derive(Debug)]
pub struct MeshRenderData {
    id: MeshAssetId,
    name: String,
    lods: Vec<MeshLodRenderData>,
    supports_ray_tracing: bool,
    first_resident_lod: Arc<AtomicU32>,
}

impl MeshRenderData {
    #[must_use]
    pub fn new(name: impl Into<String>, lods: Vec<MeshLodRenderData>, supports_ray_tracing: bool) -> Self {
        Self {
            id: MeshAssetId::next(),
            name: name.into(),
            lods,
            supports_ray_tracing,
            first_resident_lod: Arc::new(AtomicU32::new(0)),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> MeshAssetId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn lod_count(&self) -> usize {
        self.lods.len()
    }

    #[must_use]
    pub fn lod(&self, index: usize) -> Option<&MeshLodRenderData> {
        self.lods.get(index)
    }

    #[inline]
    #[must_use]
    pub fn supports_ray_tracing(&self) -> bool {
        self.supports_ray_tracing
    }

    /// Lowest LOD index whose data is streamed in.
    #[must_use]
    pub fn first_resident_lod(&self) -> u32 {
        self.first_resident_lod.load(Ordering::Acquire)
    }

    /// Records a streaming change. Visible to the render context immediately.
    pub fn set_first_resident_lod(&self, lod: u32) {
        self.first_resident_lod.store(lod, Ordering::Release);
    }

    #[must_use]
    pub fn ray_geometry_key(&self, lod: u32) -> GeometryKey {
        GeometryKey::MeshLod { mesh: self.id, lod }
    }

    #[must_use]
    pub fn residency(&self, lod: u32) -> Residency {
        Residency::Lod {
            first_resident: self.first_resident_lod.clone(),
            lod_index: lod,
        }
    }

    /// Uploads the asset-owned buffers of every non-stripped LOD.
    pub fn init_resources(&self, commands: &CommandSender) -> Result<()> {
        for (index, lod) in self.lods.iter().enumerate() {
            if lod.num_vertices() == 0 {
                continue;
            }
            commands.enqueue(RenderCommand::InitVertexBuffers {
                lod_index: index as u32,
                buffers: lod.uploads(&lod.vertex_buffers.color),
            })?;
        }
        Ok(())
    }

    /// Releases the asset-owned buffers. Buffers never initialized are
    /// skipped on the render context.
    pub fn release_resources(&self, commands: &CommandSender) -> Result<()> {
        for lod in self.lods.iter().filter(|lod| lod.num_vertices() > 0) {
            commands.enqueue(RenderCommand::ReleaseBuffers {
                buffers: smallvec![
                    lod.vertex_buffers.position.handle.clone(),
                    lod.vertex_buffers.attributes.handle.clone(),
                    lod.vertex_buffers.color.handle.clone(),
                    lod.index_buffer.handle.clone(),
                ],
            })?;
        }
        Ok(())
    }
}
