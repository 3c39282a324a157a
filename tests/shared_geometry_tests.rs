//! Shared Geometry Tests
//!
//! Tests for:
//! - Owner counting: one creation command on 0→1, one destruction on 1→0
//! - Count equals acquires minus releases at every observation point, over
//!   seeded random interleavings with and without clamped over-releases
//! - A failed creation enqueue leaves no reference behind
//! - Underflow handling (Fail vs Clamp)
//! - Exposure flag: false before the creation command runs, cleared
//!   synchronously on last release
//! - Re-acquiring after destruction builds a fresh geometry
//! - Release scheduled before creation executes still cleans up

use std::sync::Arc;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use render_lifecycle::errors::LifecycleError;
use render_lifecycle::renderer::command::{CommandReceiver, RenderContext, command_queue};
use render_lifecycle::renderer::core::shared_geometry::{
    RayTracingGeometryInitializer, ReleaseOutcome, Residency, SharedGeometryRegistry,
};
use render_lifecycle::renderer::device::{DeviceCall, GeometryType, HeadlessDevice};
use render_lifecycle::renderer::mesh::{MeshLodRenderData, MeshRenderData};
use render_lifecycle::settings::{LifecycleSettings, UnderflowPolicy, ValidationMode};

fn triangle_mesh(name: &str) -> Arc<MeshRenderData> {
    let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
    let lod = MeshLodRenderData::from_positions(&format!("{name}_LOD0"), &positions, &[0, 1, 2]);
    Arc::new(MeshRenderData::new(name, vec![lod], true))
}

fn initializer(mesh: &MeshRenderData) -> RayTracingGeometryInitializer {
    mesh.lod(0)
        .unwrap()
        .ray_tracing_initializer(format!("{}_LOD0", mesh.name()))
}

fn strict_settings() -> LifecycleSettings {
    LifecycleSettings {
        underflow_policy: UnderflowPolicy::Fail,
        validation: ValidationMode::Strict,
        ..LifecycleSettings::default()
    }
}

fn command_names(queue: &CommandReceiver) -> Vec<&'static str> {
    queue.drain_pending().iter().map(|c| c.name()).collect()
}

// ============================================================================
// Owner counting
// ============================================================================

#[test]
fn first_acquire_enqueues_single_creation() {
    let (commands, queue) = command_queue();
    let mut registry = SharedGeometryRegistry::new(commands, UnderflowPolicy::Fail);
    let mesh = triangle_mesh("Crate");
    let key = mesh.ray_geometry_key(0);

    let first = registry
        .acquire_or_create(key, mesh.residency(0), || initializer(&mesh))
        .unwrap();
    assert_eq!(queue.len(), 1);

    let second = registry
        .acquire_or_create(key, mesh.residency(0), || -> RayTracingGeometryInitializer {
            unreachable!("initializer built for an existing geometry")
        })
        .unwrap();
    assert_eq!(queue.len(), 1, "second acquire must not enqueue");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.reference_count(key), 2);

    assert_eq!(registry.release(&first).unwrap(), ReleaseOutcome::Retained(1));
    assert_eq!(queue.len(), 1, "release with owners left must not enqueue");

    assert_eq!(registry.release(&second).unwrap(), ReleaseOutcome::Destroyed);
    assert_eq!(
        command_names(&queue),
        vec!["InitRayGeometry", "ReleaseRayGeometry"]
    );
    assert!(registry.is_empty());
    assert_eq!(registry.reference_count(key), 0);
}

/// Replays `steps` seeded acquire/release choices against one key, checking
/// the count against a model after every step. Releases on an empty model
/// are deliberate over-releases.
fn replay_random_sequence(seed: u64, steps: usize, policy: UnderflowPolicy) {
    let (commands, queue) = command_queue();
    let mut registry = SharedGeometryRegistry::new(commands, policy);
    let mesh = triangle_mesh("Barrel");
    let key = mesh.ray_geometry_key(0);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut held = Vec::new();
    let mut creations = 0;
    let mut destructions = 0;

    for step in 0..steps {
        if rng.random_bool(0.55) {
            let geometry = registry
                .acquire_or_create(key, mesh.residency(0), || initializer(&mesh))
                .unwrap();
            if held.is_empty() {
                creations += 1;
            }
            held.push(geometry);
        } else if let Some(geometry) = held.pop() {
            let outcome = registry.release(&geometry).unwrap();
            if held.is_empty() {
                assert_eq!(outcome, ReleaseOutcome::Destroyed, "seed {seed} step {step}");
                destructions += 1;
            }
        } else {
            match policy {
                UnderflowPolicy::Fail => {
                    assert!(registry.release_key(key).is_err(), "seed {seed} step {step}");
                }
                UnderflowPolicy::Clamp => {
                    assert_eq!(registry.release_key(key).unwrap(), ReleaseOutcome::Ignored);
                }
            }
        }

        let expected = held.len() as u32;
        assert_eq!(registry.reference_count(key), expected, "seed {seed} step {step}");
        if let Some(geometry) = held.last() {
            assert_eq!(geometry.reference_count(), expected);
        }
        assert_eq!(registry.is_empty(), held.is_empty());
    }

    let names = command_names(&queue);
    let count = |name: &str| names.iter().filter(|n| **n == name).count();
    assert_eq!(count("InitRayGeometry"), creations, "seed {seed}");
    assert_eq!(count("ReleaseRayGeometry"), destructions, "seed {seed}");
}

#[test]
fn count_tracks_acquires_minus_releases() {
    for seed in 0..32 {
        replay_random_sequence(seed, 200, UnderflowPolicy::Fail);
    }
}

#[test]
fn count_survives_clamped_over_releases() {
    for seed in 100..132 {
        replay_random_sequence(seed, 200, UnderflowPolicy::Clamp);
    }
}

#[test]
fn disconnected_acquire_leaves_no_reference() {
    let (commands, queue) = command_queue();
    let mut registry = SharedGeometryRegistry::new(commands, UnderflowPolicy::Fail);
    let mesh = triangle_mesh("Anvil");
    let key = mesh.ray_geometry_key(0);
    drop(queue);

    let err = registry
        .acquire_or_create(key, mesh.residency(0), || initializer(&mesh))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::RenderThreadDisconnected));
    assert_eq!(registry.reference_count(key), 0);
    assert!(registry.get(key).is_none());
    assert!(registry.is_empty());
}

// ============================================================================
// Underflow
// ============================================================================

#[test]
fn underflow_fails_under_fail_policy() {
    let (commands, queue) = command_queue();
    let mut registry = SharedGeometryRegistry::new(commands, UnderflowPolicy::Fail);
    let mesh = triangle_mesh("Lamp");
    let key = mesh.ray_geometry_key(0);

    let geometry = registry
        .acquire_or_create(key, mesh.residency(0), || initializer(&mesh))
        .unwrap();
    registry.release(&geometry).unwrap();
    let _ = queue.drain_pending();

    let err = registry.release(&geometry).unwrap_err();
    assert!(matches!(err, LifecycleError::RefCountUnderflow { key: k } if k == key));
    assert_eq!(geometry.reference_count(), 0, "count must not wrap");

    let err = registry.release_key(key).unwrap_err();
    assert!(matches!(err, LifecycleError::RefCountUnderflow { .. }));
    assert!(queue.is_empty());
}

#[test]
fn underflow_is_ignored_under_clamp_policy() {
    let (commands, queue) = command_queue();
    let mut registry = SharedGeometryRegistry::new(commands, UnderflowPolicy::Clamp);
    let mesh = triangle_mesh("Lamp");
    let key = mesh.ray_geometry_key(0);

    assert_eq!(registry.release_key(key).unwrap(), ReleaseOutcome::Ignored);

    let geometry = registry
        .acquire_or_create(key, mesh.residency(0), || initializer(&mesh))
        .unwrap();
    registry.release(&geometry).unwrap();
    let _ = queue.drain_pending();

    assert_eq!(registry.release(&geometry).unwrap(), ReleaseOutcome::Ignored);
    assert_eq!(geometry.reference_count(), 0);
    assert!(queue.is_empty(), "ignored release must not enqueue");
}

// ============================================================================
// Exposure
// ============================================================================

#[test]
fn exposed_only_after_creation_executes() {
    let settings = strict_settings();
    let (commands, queue) = command_queue();
    let mut context = RenderContext::new(HeadlessDevice::with_ray_tracing(), &settings);
    let mut registry = SharedGeometryRegistry::new(commands.clone(), settings.underflow_policy);
    let mesh = triangle_mesh("Statue");
    mesh.init_resources(&commands).unwrap();

    let geometry = registry
        .acquire_or_create(mesh.ray_geometry_key(0), mesh.residency(0), || {
            initializer(&mesh)
        })
        .unwrap();
    assert!(!geometry.is_exposed(), "exposed before the render context ran");

    let report = context.drain(&queue).unwrap();
    assert!(report.is_clean());
    assert!(geometry.is_exposed());
    assert!(geometry.handle().is_initialized());
    assert_eq!(context.device().live_acceleration_structures(), 1);

    registry.release(&geometry).unwrap();
    assert!(
        !geometry.is_exposed(),
        "flag must clear before the destruction command runs"
    );
    assert_eq!(context.device().live_acceleration_structures(), 1);

    context.drain(&queue).unwrap();
    assert_eq!(context.device().live_acceleration_structures(), 0);
    assert!(!geometry.handle().is_initialized());
}

#[test]
fn reacquire_after_destroy_creates_fresh_geometry() {
    let (commands, queue) = command_queue();
    let mut registry = SharedGeometryRegistry::new(commands, UnderflowPolicy::Fail);
    let mesh = triangle_mesh("Chair");
    let key = mesh.ray_geometry_key(0);

    let old = registry
        .acquire_or_create(key, mesh.residency(0), || initializer(&mesh))
        .unwrap();
    registry.release(&old).unwrap();
    let new = registry
        .acquire_or_create(key, mesh.residency(0), || initializer(&mesh))
        .unwrap();

    assert!(!Arc::ptr_eq(&old, &new));
    assert_ne!(old.handle().id(), new.handle().id());
    assert_eq!(new.reference_count(), 1);
    assert_eq!(
        command_names(&queue),
        vec!["InitRayGeometry", "ReleaseRayGeometry", "InitRayGeometry"]
    );
}

#[test]
fn release_before_creation_executes_still_cleans_up() {
    let settings = strict_settings();
    let (commands, queue) = command_queue();
    let mut context = RenderContext::new(HeadlessDevice::with_ray_tracing(), &settings);
    let mut registry = SharedGeometryRegistry::new(commands.clone(), settings.underflow_policy);
    let mesh = triangle_mesh("Table");
    mesh.init_resources(&commands).unwrap();

    let geometry = registry
        .acquire_or_create(mesh.ray_geometry_key(0), mesh.residency(0), || {
            initializer(&mesh)
        })
        .unwrap();
    registry.release(&geometry).unwrap();

    let report = context.drain(&queue).unwrap();
    assert!(report.is_clean());
    assert!(!geometry.is_exposed(), "no owners left, never exposed");
    assert_eq!(context.device().live_acceleration_structures(), 0);

    let created = context
        .device()
        .calls()
        .iter()
        .position(|call| matches!(call, DeviceCall::CreateAccelerationStructure { .. }));
    let destroyed = context
        .device()
        .calls()
        .iter()
        .position(|call| matches!(call, DeviceCall::DestroyAccelerationStructure { .. }));
    assert!(created.unwrap() < destroyed.unwrap());
}

#[test]
fn geometry_without_primitives_is_never_exposed() {
    let settings = strict_settings();
    let (commands, queue) = command_queue();
    let mut context = RenderContext::new(HeadlessDevice::with_ray_tracing(), &settings);
    let mut registry = SharedGeometryRegistry::new(commands, settings.underflow_policy);
    let mesh = triangle_mesh("Decal");

    let geometry = registry
        .acquire_or_create(mesh.ray_geometry_key(0), Residency::Always, || {
            RayTracingGeometryInitializer {
                debug_name: "Empty".to_string(),
                index_buffer: None,
                total_primitive_count: 0,
                geometry_type: GeometryType::Triangles,
                fast_build: false,
                segments: Vec::new(),
            }
        })
        .unwrap();

    context.drain(&queue).unwrap();
    assert!(!geometry.is_exposed());
    assert_eq!(context.device().live_acceleration_structures(), 0);
}

#[test]
fn disabled_ray_tracing_never_builds() {
    let settings = LifecycleSettings {
        ray_tracing_enabled: false,
        ..strict_settings()
    };
    let (commands, queue) = command_queue();
    let mut context = RenderContext::new(HeadlessDevice::with_ray_tracing(), &settings);
    let mut registry = SharedGeometryRegistry::new(commands.clone(), settings.underflow_policy);
    let mesh = triangle_mesh("Pillar");
    mesh.init_resources(&commands).unwrap();

    assert!(!context.capabilities().ray_tracing);

    let geometry = registry
        .acquire_or_create(mesh.ray_geometry_key(0), mesh.residency(0), || {
            initializer(&mesh)
        })
        .unwrap();
    let report = context.drain(&queue).unwrap();

    assert!(report.is_clean());
    assert!(!geometry.is_exposed());
    assert_eq!(context.device().live_acceleration_structures(), 0);
}
