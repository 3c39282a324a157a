//! Visualization Pass Tests
//!
//! Tests for:
//! - Tunable decoding (out-of-range color map, encoding clamp, invalid range)
//! - Dispatch extent of the 16×16 timing shader
//! - Capability, show-flag, missing-texture and empty-view guards
//! - Lazy pipeline creation, cached across frames
//! - Device failures reported in the drain report and not retried
//! - BVH ray dispatch against a built scene with the unit-cube proxy
//! - Failed scene rebuilds and missing scenes reported without stopping the drain
//! - One unit-cube proxy and bounds buffer shared by every BVH pass

use std::sync::Arc;

use glam::{UVec2, UVec3, Vec3};

use render_lifecycle::errors::{DeviceError, LifecycleError};
use render_lifecycle::renderer::command::{CommandReceiver, CommandSender, RenderContext, command_queue};
use render_lifecycle::renderer::device::{DeviceCall, DeviceCapabilities, HeadlessDevice};
use render_lifecycle::renderer::graph::passes::{
    BvhMode, ColorMap, PassContext, PassOutcome, PassState, SkipReason, ViewPass,
    VisualizeBvhPass, VisualizeTimingPass, VisualizeUniforms,
};
use render_lifecycle::renderer::graph::{SceneTextures, ShowFlags, ViewInfo};
use render_lifecycle::renderer::mesh::{MeshLodRenderData, MeshRenderData};
use render_lifecycle::scene::Scene;
use render_lifecycle::settings::{LifecycleSettings, UnderflowPolicy, ValidationMode};
use render_lifecycle::tunables::TunableRegistry;

const VIEW: UVec2 = UVec2::new(1000, 700);

struct Frame {
    settings: LifecycleSettings,
    commands: CommandSender,
    queue: CommandReceiver,
    context: RenderContext<HeadlessDevice>,
    tunables: TunableRegistry,
    textures: SceneTextures,
    output: render_lifecycle::renderer::device::TextureId,
}

impl Frame {
    fn new(device: HeadlessDevice) -> Self {
        let settings = LifecycleSettings {
            underflow_policy: UnderflowPolicy::Fail,
            validation: ValidationMode::Strict,
            ..LifecycleSettings::default()
        };
        let (commands, queue) = command_queue();
        let mut context = RenderContext::new(device, &settings);
        let white_dummy = context.device_mut().create_texture(UVec2::ONE);
        let ray_timing = context.device_mut().create_texture(VIEW);
        let output = context.device_mut().create_texture(VIEW);
        Self {
            settings,
            commands,
            queue,
            context,
            tunables: TunableRegistry::new(),
            textures: SceneTextures {
                mini_font: None,
                white_dummy,
                ray_timing: Some(ray_timing),
            },
            output,
        }
    }

    fn pass_context(&self) -> PassContext<'_> {
        PassContext {
            commands: &self.commands,
            capabilities: self.context.capabilities(),
            tunables: &self.tunables,
        }
    }
}

fn decode_uniforms(bytes: &[u8]) -> VisualizeUniforms {
    bytemuck::pod_read_unaligned(bytes)
}

fn compute_dispatches(device: &HeadlessDevice) -> Vec<(UVec3, VisualizeUniforms)> {
    device
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::DispatchCompute {
                groups, uniforms, ..
            } => Some((*groups, decode_uniforms(uniforms))),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Parameters
// ============================================================================

#[test]
fn out_of_range_color_map_decodes_to_unknown() {
    let tunables = TunableRegistry::new();
    let pass = VisualizeBvhPass::new(&tunables);

    tunables
        .set("r.RayTracing.VisualizeBVH.ColorMap", "9")
        .unwrap();
    let params = pass.read_params(BvhMode::Overlap);

    assert_eq!(params.color_map, ColorMap::Unknown(9));
    assert_eq!(params.uniforms().color_map, 9);
}

#[test]
fn bvh_defaults() {
    let tunables = TunableRegistry::new();
    let pass = VisualizeBvhPass::new(&tunables);
    let params = pass.read_params(BvhMode::Complexity);

    assert_eq!(params.mode, 1);
    assert_eq!(params.color_map, ColorMap::SimpleRamp);
    assert_eq!(params.encoding, 2);
    assert!((params.range - 32.0).abs() < f32::EPSILON);
    assert!(params.range_min.abs() < f32::EPSILON);
}

#[test]
fn encoding_is_clamped_and_bad_range_falls_back() {
    let tunables = TunableRegistry::new();
    let pass = VisualizeTimingPass::new(&tunables);

    tunables
        .set("r.RayTracing.VisualizeTiming.Encoding", "7")
        .unwrap();
    tunables
        .set("r.RayTracing.VisualizeTiming.Range", "-5")
        .unwrap();
    let params = pass.read_params();

    assert_eq!(params.encoding, 2);
    assert!((params.range - VisualizeTimingPass::DEFAULT_RANGE).abs() < f32::EPSILON);
    assert!(params.range_min.abs() < f32::EPSILON);
}

#[test]
fn settings_override_tunables() {
    let tunables = TunableRegistry::new();
    let pass = VisualizeTimingPass::new(&tunables);
    let settings = LifecycleSettings::from_json_str(
        r#"{ "tunables": { "r.RayTracing.VisualizeTiming.Range": "500", "r.RayTracing.VisualizeTiming.ColorMap": "1" } }"#,
    )
    .unwrap();

    settings.apply_tunables(&tunables).unwrap();
    let params = pass.read_params();
    assert!((params.range - 500.0).abs() < f32::EPSILON);
    assert_eq!(params.color_map, ColorMap::Jet);

    let mut unknown = LifecycleSettings::default();
    unknown
        .tunables
        .insert("r.Missing".to_string(), "1".to_string());
    let err = unknown.apply_tunables(&tunables).unwrap_err();
    assert!(matches!(err, LifecycleError::UnknownTunable(name) if name == "r.Missing"));
}

// ============================================================================
// Timing pass
// ============================================================================

#[test]
fn timing_dispatch_covers_view() {
    let mut frame = Frame::new(HeadlessDevice::with_ray_tracing());
    let mut pass = VisualizeTimingPass::new(&frame.tunables);
    let view = ViewInfo::new(VIEW, ShowFlags::VISUALIZE_RAY_TIMING);

    let outcome = pass
        .render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    assert_eq!(outcome, PassOutcome::Dispatched);
    assert_eq!(pass.state(), PassState::Dispatched);

    let report = frame.context.drain(&frame.queue).unwrap();
    assert!(report.is_clean());

    let dispatches = compute_dispatches(frame.context.device());
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].0, UVec3::new(63, 44, 1));
    assert!((dispatches[0].1.range - VisualizeTimingPass::DEFAULT_RANGE).abs() < f32::EPSILON);
}

#[test]
fn timing_skips_without_capability() {
    let frame = Frame::new(HeadlessDevice::new(DeviceCapabilities::default()));
    let mut pass = VisualizeTimingPass::new(&frame.tunables);
    let view = ViewInfo::new(VIEW, ShowFlags::VISUALIZE_RAY_TIMING);

    let outcome = pass
        .render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Skipped(SkipReason::CapabilityUnavailable("shader timing"))
    );
    assert_eq!(pass.state(), PassState::Idle);
    assert!(frame.queue.is_empty());
}

#[test]
fn timing_skips_when_flag_disabled() {
    let frame = Frame::new(HeadlessDevice::with_ray_tracing());
    let mut pass = VisualizeTimingPass::new(&frame.tunables);
    let view = ViewInfo::new(VIEW, ShowFlags::VISUALIZE_BVH_OVERLAP);

    let outcome = pass
        .render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    assert_eq!(outcome, PassOutcome::Skipped(SkipReason::ShowFlagDisabled));
    assert!(frame.queue.is_empty());
}

#[test]
fn timing_skips_without_timing_texture() {
    let mut frame = Frame::new(HeadlessDevice::with_ray_tracing());
    frame.textures.ray_timing = None;
    let mut pass = VisualizeTimingPass::new(&frame.tunables);
    let view = ViewInfo::new(VIEW, ShowFlags::VISUALIZE_RAY_TIMING);

    let outcome = pass
        .render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Skipped(SkipReason::MissingTexture("ray timing"))
    );
    assert!(frame.queue.is_empty());
}

#[test]
fn empty_view_is_skipped() {
    let frame = Frame::new(HeadlessDevice::with_ray_tracing());
    let mut pass = VisualizeTimingPass::new(&frame.tunables);
    let view = ViewInfo::new(UVec2::new(0, 700), ShowFlags::VISUALIZE_RAY_TIMING);

    let outcome = pass
        .render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    assert_eq!(outcome, PassOutcome::Skipped(SkipReason::EmptyView));
}

#[test]
fn pipeline_is_created_once_across_frames() {
    let mut frame = Frame::new(HeadlessDevice::with_ray_tracing());
    let mut pass = VisualizeTimingPass::new(&frame.tunables);
    let views = [
        ViewInfo::new(VIEW, ShowFlags::VISUALIZE_RAY_TIMING),
        ViewInfo::new(UVec2::new(640, 480), ShowFlags::VISUALIZE_RAY_TIMING),
    ];

    for _ in 0..3 {
        let outcomes = pass
            .render(&frame.pass_context(), &views, &frame.textures, frame.output)
            .unwrap();
        assert_eq!(outcomes, vec![PassOutcome::Dispatched; 2]);
        frame.context.drain(&frame.queue).unwrap();
    }

    assert_eq!(frame.context.device().pipeline_count(), 1);
    assert_eq!(frame.context.pipelines().len(), 1);
    let dispatches = compute_dispatches(frame.context.device());
    assert_eq!(dispatches.len(), 6);
    assert_eq!(dispatches[1].0, UVec3::new(40, 30, 1));
}

#[test]
fn device_failure_is_reported_not_retried() {
    let mut frame = Frame::new(HeadlessDevice::with_ray_tracing());
    let mut pass = VisualizeTimingPass::new(&frame.tunables);
    let view = ViewInfo::new(VIEW, ShowFlags::VISUALIZE_RAY_TIMING);

    frame.context.device_mut().fail_next(DeviceError::DeviceLost);
    pass.render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    let report = frame.context.drain(&frame.queue).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0],
        LifecycleError::DeviceSubmission {
            source: DeviceError::DeviceLost,
            ..
        }
    ));
    assert!(frame.queue.is_empty(), "failed dispatch must not be requeued");
    assert!(compute_dispatches(frame.context.device()).is_empty());

    // The next frame proceeds normally.
    pass.render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    let report = frame.context.drain(&frame.queue).unwrap();
    assert!(report.is_clean());
    assert_eq!(compute_dispatches(frame.context.device()).len(), 1);
}

// ============================================================================
// BVH pass
// ============================================================================

fn statue() -> Arc<MeshRenderData> {
    let positions = [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z];
    let lod = MeshLodRenderData::from_positions("Statue_LOD0", &positions, &[0, 1, 2, 0, 2, 3]);
    Arc::new(MeshRenderData::new("Statue", vec![lod], true))
}

#[test]
fn bvh_skips_without_ray_tracing() {
    let frame = Frame::new(HeadlessDevice::new(DeviceCapabilities {
        shader_timing: true,
        ..DeviceCapabilities::default()
    }));
    let mut pass = VisualizeBvhPass::new(&frame.tunables);
    let view = ViewInfo::new(VIEW, ShowFlags::VISUALIZE_BVH_OVERLAP);

    let outcome = pass
        .render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Skipped(SkipReason::CapabilityUnavailable("ray tracing"))
    );
}

#[test]
fn bvh_skips_without_scene() {
    let frame = Frame::new(HeadlessDevice::with_ray_tracing());
    let mut pass = VisualizeBvhPass::new(&frame.tunables);
    let view = ViewInfo::new(VIEW, ShowFlags::VISUALIZE_BVH_OVERLAP);

    let outcome = pass
        .render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    assert_eq!(outcome, PassOutcome::Skipped(SkipReason::NoRayTracingScene));
    assert!(frame.queue.is_empty());
}

#[test]
fn bvh_dispatches_rays_with_proxy() {
    let mut frame = Frame::new(HeadlessDevice::with_ray_tracing());
    let mut scene = Scene::new(frame.commands.clone(), &frame.settings);
    let mut pass = VisualizeBvhPass::new(&frame.tunables);

    scene.add_instance(statue(), Vec::new()).unwrap();
    pass.init_resources(&frame.pass_context(), &mut scene).unwrap();
    let rt_scene = scene.build_ray_tracing_scene().unwrap().unwrap();
    let report = frame.context.drain(&frame.queue).unwrap();
    assert!(report.is_clean());
    assert!(pass.proxy().geometry().unwrap().is_exposed());
    assert_eq!(frame.context.device().live_scenes(), 1);

    let view = ViewInfo::new(VIEW, ShowFlags::VISUALIZE_BVH_COMPLEXITY)
        .with_ray_tracing_scene(rt_scene);
    let outcome = pass
        .render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    assert_eq!(outcome, PassOutcome::Dispatched);
    assert_eq!(pass.last_params().unwrap().mode, BvhMode::Complexity as u32);

    let report = frame.context.drain(&frame.queue).unwrap();
    assert!(report.is_clean());

    let rays: Vec<_> = frame
        .context
        .device()
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::DispatchRays {
                extent,
                uniforms,
                proxies,
                ..
            } => Some((*extent, decode_uniforms(uniforms), *proxies)),
            _ => None,
        })
        .collect();
    assert_eq!(rays.len(), 1);
    assert_eq!(rays[0].0, VIEW);
    assert_eq!(rays[0].1.mode, 1);
    assert_eq!(rays[0].1.encoding, 2);
    assert_eq!(rays[0].2, 1);

    pass.release_resources(&mut scene).unwrap();
    scene.clear().unwrap();
    scene.release_ray_tracing_scene().unwrap();
    frame.context.drain(&frame.queue).unwrap();
    assert_eq!(frame.context.device().live_acceleration_structures(), 0);
    assert_eq!(frame.context.device().live_scenes(), 0);
}

#[test]
fn bvh_dispatch_before_scene_build_is_reported() {
    let mut frame = Frame::new(HeadlessDevice::with_ray_tracing());
    let mut scene = Scene::new(frame.commands.clone(), &frame.settings);
    let mut pass = VisualizeBvhPass::new(&frame.tunables);

    let view = ViewInfo::new(VIEW, ShowFlags::VISUALIZE_BVH_OVERLAP)
        .with_ray_tracing_scene(scene.ray_tracing_scene().clone());
    pass.render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    let key = scene.add_instance(statue(), Vec::new()).unwrap();

    let report = frame.context.drain(&frame.queue).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0],
        LifecycleError::SceneNotResident(ref name) if name == "RayTracingScene"
    ));
    assert!(frame.queue.is_empty());
    let geometry = scene.instance(key).unwrap().lod(0).unwrap().ray_geometry();
    assert!(geometry.unwrap().is_exposed());
}

#[test]
fn failed_scene_rebuild_keeps_tracing_previous_scene() {
    let mut frame = Frame::new(HeadlessDevice::with_ray_tracing());
    let mut scene = Scene::new(frame.commands.clone(), &frame.settings);
    let mut pass = VisualizeBvhPass::new(&frame.tunables);

    scene.add_instance(statue(), Vec::new()).unwrap();
    let rt_scene = scene.build_ray_tracing_scene().unwrap().unwrap();
    assert!(frame.context.drain(&frame.queue).unwrap().is_clean());

    frame
        .context
        .device_mut()
        .fail_next(DeviceError::OutOfMemory { requested: 4096 });
    scene.build_ray_tracing_scene().unwrap();
    let report = frame.context.drain(&frame.queue).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(frame.context.device().live_scenes(), 1);
    assert!(rt_scene.is_initialized());

    // Next frame: trace against the surviving scene while another mesh streams in.
    let view = ViewInfo::new(VIEW, ShowFlags::VISUALIZE_BVH_OVERLAP)
        .with_ray_tracing_scene(rt_scene);
    let outcome = pass
        .render_view(&frame.pass_context(), &view, &frame.textures, frame.output)
        .unwrap();
    assert_eq!(outcome, PassOutcome::Dispatched);
    let key = scene.add_instance(statue(), Vec::new()).unwrap();

    let report = frame.context.drain(&frame.queue).unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);
    assert!(frame.queue.is_empty());
    let factory = scene.instance(key).unwrap().vertex_factory(0).unwrap();
    assert!(factory.is_initialized());
    let rays = frame
        .context
        .device()
        .calls()
        .iter()
        .filter(|call| matches!(call, DeviceCall::DispatchRays { .. }))
        .count();
    assert_eq!(rays, 1);
}

#[test]
fn passes_share_one_proxy_and_its_bounds() {
    let mut frame = Frame::new(HeadlessDevice::with_ray_tracing());
    let mut scene = Scene::new(frame.commands.clone(), &frame.settings);
    let mut first = VisualizeBvhPass::new(&frame.tunables);
    let mut second = VisualizeBvhPass::new(&frame.tunables);

    first.init_resources(&frame.pass_context(), &mut scene).unwrap();
    second.init_resources(&frame.pass_context(), &mut scene).unwrap();
    frame.context.drain(&frame.queue).unwrap();
    assert_eq!(frame.context.device().live_buffers(), 1);
    assert_eq!(frame.context.device().live_acceleration_structures(), 1);

    let proxy = first.proxy().geometry().unwrap().clone();
    assert!(Arc::ptr_eq(&proxy, second.proxy().geometry().unwrap()));
    let bounds = proxy.owned_buffers();
    assert_eq!(bounds.len(), 1);

    // The first pass going away leaves the bounds alive under the second.
    first.release_resources(&mut scene).unwrap();
    frame.context.drain(&frame.queue).unwrap();
    assert!(proxy.is_exposed());
    assert!(bounds[0].is_initialized());
    assert_eq!(frame.context.device().live_buffers(), 1);

    second.release_resources(&mut scene).unwrap();
    frame.context.drain(&frame.queue).unwrap();
    assert!(!proxy.is_exposed());
    assert!(!bounds[0].is_initialized());
    assert_eq!(frame.context.device().live_buffers(), 0);
    assert_eq!(frame.context.device().live_acceleration_structures(), 0);
}
