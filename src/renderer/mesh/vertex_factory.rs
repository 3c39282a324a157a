//! Vertex factory stream layout.
//!
//! The producer side describes streams by [`ResourceHandle`]; the render
//! context resolves them into a [`VertexFactoryLayout`] of device buffers when
//! the factory is initialized.

use crate::renderer::core::handle::ResourceHandle;
use crate::renderer::device::DeviceBufferId;

/// One vertex stream: a buffer plus how to read it.
#[derive(Debug, Clone)]
pub struct StreamBinding {
    pub buffer: ResourceHandle,
    pub offset: u32,
    /// Zero means every vertex reads the same element.
    pub stride: u32,
    pub format: wgpu::VertexFormat,
}

/// The four streams a static-mesh vertex factory binds.
#[derive(Debug, Clone)]
pub struct VertexStreams {
    pub position: StreamBinding,
    pub tangent: StreamBinding,
    pub tex_coord: StreamBinding,
    pub color: StreamBinding,
}

impl VertexStreams {
    /// Streams in shader-location order.
    #[must_use]
    pub fn bindings(&self) -> [&StreamBinding; 4] {
        [&self.position, &self.tangent, &self.tex_coord, &self.color]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedStream {
    pub buffer: DeviceBufferId,
    pub offset: u32,
    pub stride: u32,
    pub format: wgpu::VertexFormat,
}

/// Render-side vertex factory: streams resolved to device buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexFactoryLayout {
    pub streams: [ResolvedStream; 4],
}

impl VertexFactoryLayout {
    #[must_use]
    pub fn position(&self) -> &ResolvedStream {
        &self.streams[0]
    }

    #[must_use]
    pub fn color(&self) -> &ResolvedStream {
        &self.streams[3]
    }
}
