//! BVH overlap / complexity visualization.
//!
//! Traces one ray per pixel against the view's ray-tracing scene and counts
//! the bounding volumes crossed (overlap) or visited (complexity). A shared
//! unit-cube AABB is bound next to the scene as a procedural proxy.

use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::errors::Result;
use crate::renderer::command::{BufferUpload, RayDispatch, RenderCommand};
use crate::renderer::core::shared_geometry::{
    GeometryKey, GeometrySegment, RayTracingGeometryInitializer, Residency, SharedGeometry,
    SharedGeometryRegistry,
};
use crate::renderer::device::{DispatchBindings, GeometryType, TextureBinding, TextureId};
use crate::renderer::graph::passes::params::{BvhMode, VisualizationParams};
use crate::renderer::graph::passes::{PassContext, PassOutcome, PassState, SkipReason, ViewPass};
use crate::renderer::graph::view::{SceneTextures, ShowFlags, ViewInfo};
use crate::renderer::mesh::VertexBuffer;
use crate::renderer::pipeline::{PipelineKey, RayTracingPipelineKey, ShaderRef};
use crate::scene::Scene;
use crate::tunables::{Tunable, TunableRegistry};

const VISUALIZE_BVH_RGS: ShaderRef = ShaderRef::new("visualize_bvh", "VisualizeBVHRGS");
const VISUALIZE_BVH_HIT_GROUP: ShaderRef = ShaderRef::new("visualize_bvh", "VisualizeBVHCHS");
const VISUALIZE_BVH_MS: ShaderRef = ShaderRef::new("visualize_bvh", "VisualizeBVHMS");

/// Ray payload of the visualization shaders.
pub const BVH_MAX_PAYLOAD_BYTES: u32 = 12;

// ============================================================================
// Unit cube proxy
// ============================================================================

/// Procedural AABB spanning `[0, 1]³`, shared through the geometry registry.
///
/// The bounds buffer belongs to the shared geometry: it is uploaded by the
/// first owner and released with the last, whichever pass that is.
#[derive(Default)]
pub struct UnitCubeAabb {
    geometry: Option<Arc<SharedGeometry>>,
}

impl UnitCubeAabb {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn source() -> (RayTracingGeometryInitializer, SmallVec<[BufferUpload; 4]>) {
        let bounds: [[[f32; 3]; 2]; 1] = [[[0.0; 3], [1.0; 3]]];
        let bounds = VertexBuffer::from_pod("UnitCubeAABB", &bounds);
        let initializer = RayTracingGeometryInitializer {
            debug_name: "UnitCubeAABB".to_string(),
            index_buffer: None,
            total_primitive_count: 1,
            geometry_type: GeometryType::Procedural,
            fast_build: false,
            segments: vec![GeometrySegment {
                vertex_buffer: bounds.handle().clone(),
                vertex_offset: 0,
                vertex_stride: bounds.stride(),
                first_primitive: 0,
                num_primitives: 1,
                enabled: true,
                force_opaque: false,
                allow_duplicate_any_hit: false,
            }],
        };
        (initializer, smallvec![bounds.upload()])
    }

    /// Takes a reference on the shared geometry.
    pub fn init(&mut self, registry: &mut SharedGeometryRegistry) -> Result<()> {
        if self.geometry.is_some() {
            return Ok(());
        }
        let geometry = registry.acquire_or_create_owning(
            GeometryKey::UnitCubeAabb,
            Residency::Always,
            Self::source,
        )?;
        self.geometry = Some(geometry);
        Ok(())
    }

    pub fn release(&mut self, registry: &mut SharedGeometryRegistry) -> Result<()> {
        let Some(geometry) = self.geometry.take() else {
            return Ok(());
        };
        registry.release(&geometry)?;
        Ok(())
    }

    #[must_use]
    pub fn geometry(&self) -> Option<&Arc<SharedGeometry>> {
        self.geometry.as_ref()
    }
}

// ============================================================================
// Pass
// ============================================================================

pub struct VisualizeBvhPass {
    color_map: Arc<Tunable>,
    encoding: Arc<Tunable>,
    range: Arc<Tunable>,
    range_min: Arc<Tunable>,
    proxy: UnitCubeAabb,
    state: PassState,
    last_params: Option<VisualizationParams>,
}

impl VisualizeBvhPass {
    pub const DEFAULT_RANGE: f32 = 32.0;

    #[must_use]
    pub fn new(tunables: &TunableRegistry) -> Self {
        Self {
            color_map: tunables.register_int(
                "r.RayTracing.VisualizeBVH.ColorMap",
                0,
                "Color map: 0 simple ramp, 1 jet, 2 turbo, 3 viridis, 4 plasma, 5 magma, 6 inferno, 7 grayscale",
            ),
            encoding: tunables.register_int(
                "r.RayTracing.VisualizeBVH.Encoding",
                2,
                "Overlap count encoding: 0 linear, 1 log of linear, 2 logarithmic",
            ),
            range: tunables.register_float(
                "r.RayTracing.VisualizeBVH.Range",
                Self::DEFAULT_RANGE,
                "Upper bound on number of volumes accumulated",
            ),
            range_min: tunables.register_float(
                "r.RayTracing.VisualizeBVH.RangeMin",
                0.0,
                "Lower bound on number of volumes accumulated",
            ),
            proxy: UnitCubeAabb::new(),
            state: PassState::Idle,
            last_params: None,
        }
    }

    /// Takes a reference on the scene's unit-cube proxy when the device can
    /// trace rays.
    pub fn init_resources(&mut self, ctx: &PassContext<'_>, scene: &mut Scene) -> Result<()> {
        if !ctx.capabilities.ray_tracing {
            return Ok(());
        }
        self.proxy.init(scene.geometry_mut())
    }

    pub fn release_resources(&mut self, scene: &mut Scene) -> Result<()> {
        self.proxy.release(scene.geometry_mut())
    }

    #[must_use]
    pub fn proxy(&self) -> &UnitCubeAabb {
        &self.proxy
    }

    /// Ray-gen / hit group / miss tuple. A miss shader is mandatory even
    /// though it does nothing.
    #[must_use]
    pub fn pipeline_key() -> PipelineKey {
        PipelineKey::RayTracing(RayTracingPipelineKey {
            ray_gen: VISUALIZE_BVH_RGS,
            hit_groups: smallvec![VISUALIZE_BVH_HIT_GROUP],
            miss: smallvec![VISUALIZE_BVH_MS],
            max_payload_bytes: BVH_MAX_PAYLOAD_BYTES,
            allow_hit_group_indexing: false,
        })
    }

    #[must_use]
    pub fn read_params(&self, mode: BvhMode) -> VisualizationParams {
        VisualizationParams::new(
            mode as u32,
            self.color_map.get_int(),
            self.encoding.get_int(),
            self.range.get_float(),
            self.range_min.get_float(),
            Self::DEFAULT_RANGE,
        )
    }

    #[must_use]
    pub fn last_params(&self) -> Option<VisualizationParams> {
        self.last_params
    }
}

impl ViewPass for VisualizeBvhPass {
    fn name(&self) -> &'static str {
        "Visualize BVH"
    }

    fn render_view(
        &mut self,
        ctx: &PassContext<'_>,
        view: &ViewInfo,
        textures: &SceneTextures,
        output: TextureId,
    ) -> Result<PassOutcome> {
        self.state = PassState::Idle;

        if !ctx.capabilities.ray_tracing {
            return Ok(PassOutcome::Skipped(SkipReason::CapabilityUnavailable(
                "ray tracing",
            )));
        }
        let flags = view.show_flags;
        if !flags.intersects(ShowFlags::VISUALIZE_BVH_OVERLAP | ShowFlags::VISUALIZE_BVH_COMPLEXITY) {
            return Ok(PassOutcome::Skipped(SkipReason::ShowFlagDisabled));
        }
        let Some(scene) = view.ray_tracing_scene.clone() else {
            return Ok(PassOutcome::Skipped(SkipReason::NoRayTracingScene));
        };
        let size = view.rect.size();
        if size.x == 0 || size.y == 0 {
            return Ok(PassOutcome::Skipped(SkipReason::EmptyView));
        }

        let mode = if flags.contains(ShowFlags::VISUALIZE_BVH_COMPLEXITY) {
            BvhMode::Complexity
        } else {
            BvhMode::Overlap
        };
        let params = self.read_params(mode);
        self.last_params = Some(params);
        self.state = PassState::ParamsBuilt;

        let bindings = DispatchBindings {
            uniforms: bytemuck::bytes_of(&params.uniforms()).to_vec(),
            textures: smallvec![
                TextureBinding::external(1, textures.overlay_font()),
                TextureBinding::uav(2, output),
            ],
            acceleration_structures: smallvec::SmallVec::new(),
        };
        log::trace!("BVHRayTracing {}x{}", size.x, size.y);
        ctx.commands.enqueue(RenderCommand::DispatchRays(RayDispatch {
            label: self.name(),
            pipeline: Self::pipeline_key(),
            scene,
            proxy: self.proxy.geometry().cloned(),
            bindings,
            extent: size,
        }))?;

        self.state = PassState::Dispatched;
        Ok(PassOutcome::Dispatched)
    }

    fn state(&self) -> PassState {
        self.state
    }
}
