//! Ray timing visualization.
//!
//! Maps the per-pixel ray timing texture to colors with a 16×16 compute
//! dispatch over the view rectangle.

use std::sync::Arc;

use crate::errors::Result;
use crate::renderer::command::{ComputeDispatch, RenderCommand};
use crate::renderer::device::{DispatchBindings, TextureBinding, TextureId};
use crate::renderer::graph::passes::params::VisualizationParams;
use crate::renderer::graph::passes::{
    PassContext, PassOutcome, PassState, SkipReason, ViewPass, dispatch_extent,
};
use crate::renderer::graph::view::{SceneTextures, ShowFlags, ViewInfo};
use crate::renderer::pipeline::{ComputePipelineKey, PipelineKey, ShaderRef};
use crate::tunables::{Tunable, TunableRegistry};

/// Work-group edge length of the timing shader.
pub const TIMING_GROUP_SIZE: u32 = 16;

const VISUALIZE_TIMING_CS: ShaderRef = ShaderRef::new("visualize_timing", "main");

pub struct VisualizeTimingPass {
    color_map: Arc<Tunable>,
    encoding: Arc<Tunable>,
    range: Arc<Tunable>,
    state: PassState,
    last_params: Option<VisualizationParams>,
}

impl VisualizeTimingPass {
    pub const DEFAULT_RANGE: f32 = 100_000.0;

    #[must_use]
    pub fn new(tunables: &TunableRegistry) -> Self {
        Self {
            color_map: tunables.register_int(
                "r.RayTracing.VisualizeTiming.ColorMap",
                0,
                "Color map: 0 simple ramp, 1 jet, 2 turbo, 3 viridis, 4 plasma, 5 magma, 6 inferno, 7 grayscale",
            ),
            encoding: tunables.register_int(
                "r.RayTracing.VisualizeTiming.Encoding",
                0,
                "Timing scale: 0 linear, 1 logarithmic, 2 exponential",
            ),
            range: tunables.register_float(
                "r.RayTracing.VisualizeTiming.Range",
                Self::DEFAULT_RANGE,
                "Maximum timing value",
            ),
            state: PassState::Idle,
            last_params: None,
        }
    }

    #[must_use]
    pub fn pipeline_key() -> PipelineKey {
        PipelineKey::Compute(ComputePipelineKey {
            shader: VISUALIZE_TIMING_CS,
            group_size: TIMING_GROUP_SIZE,
        })
    }

    /// Current tunable values as a parameter block. The lower bound is fixed
    /// at zero.
    #[must_use]
    pub fn read_params(&self) -> VisualizationParams {
        VisualizationParams::new(
            0,
            self.color_map.get_int(),
            self.encoding.get_int(),
            self.range.get_float(),
            0.0,
            Self::DEFAULT_RANGE,
        )
    }

    /// Parameters of the most recent dispatch.
    #[must_use]
    pub fn last_params(&self) -> Option<VisualizationParams> {
        self.last_params
    }
}

impl ViewPass for VisualizeTimingPass {
    fn name(&self) -> &'static str {
        "Visualize Ray Tracing Timing"
    }

    fn render_view(
        &mut self,
        ctx: &PassContext<'_>,
        view: &ViewInfo,
        textures: &SceneTextures,
        output: TextureId,
    ) -> Result<PassOutcome> {
        self.state = PassState::Idle;

        if !ctx.capabilities.shader_timing {
            return Ok(PassOutcome::Skipped(SkipReason::CapabilityUnavailable(
                "shader timing",
            )));
        }
        if !view.show_flags.contains(ShowFlags::VISUALIZE_RAY_TIMING) {
            return Ok(PassOutcome::Skipped(SkipReason::ShowFlagDisabled));
        }
        let Some(ray_timing) = textures.ray_timing else {
            return Ok(PassOutcome::Skipped(SkipReason::MissingTexture("ray timing")));
        };
        let size = view.rect.size();
        if size.x == 0 || size.y == 0 {
            return Ok(PassOutcome::Skipped(SkipReason::EmptyView));
        }

        let params = self.read_params();
        self.last_params = Some(params);
        self.state = PassState::ParamsBuilt;

        let bindings = DispatchBindings {
            uniforms: bytemuck::bytes_of(&params.uniforms()).to_vec(),
            textures: smallvec::smallvec![
                TextureBinding::external(1, ray_timing),
                TextureBinding::external(2, textures.overlay_font()),
                TextureBinding::uav(3, output),
            ],
            acceleration_structures: smallvec::SmallVec::new(),
        };
        ctx.commands
            .enqueue(RenderCommand::DispatchCompute(ComputeDispatch {
                label: self.name(),
                pipeline: Self::pipeline_key(),
                bindings,
                groups: dispatch_extent(size, TIMING_GROUP_SIZE),
            }))?;

        self.state = PassState::Dispatched;
        Ok(PassOutcome::Dispatched)
    }

    fn state(&self) -> PassState {
        self.state
    }
}
