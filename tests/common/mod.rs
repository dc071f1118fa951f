//! Common utilities for renderer integration tests.
//!
//! Builds small engines and scenes that every backend can run, so the
//! test files only describe what they check.

use std::sync::Once;

use glam::Vec3;

use clustered_renderer::backend::Backend;
use clustered_renderer::resources::{Material, Mesh};
use clustered_renderer::scene::{Camera, Light, RenderObject, Scene, View};
use clustered_renderer::{BackendType, Engine, FrameScheduler, RendererConfig, SchedulerConfig};

static LOGGER: Once = Once::new();

/// Route `log` output through the test harness. Safe to call repeatedly.
#[allow(dead_code)]
pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

// ============================================================================
// Configuration
// ============================================================================

/// A small configuration that keeps cluster tables and uniform rings cheap.
#[allow(dead_code)]
pub fn test_config(backend: BackendType) -> RendererConfig {
    RendererConfig::default()
        .with_backend(backend)
        .with_size(320, 180)
        .with_cluster_dims(8, 4, 6)
        .with_max_objects(64)
        .with_max_lights(32)
        .with_max_lights_per_cluster(16)
}

#[allow(dead_code)]
pub fn scheduler_config(frames_in_flight: usize) -> SchedulerConfig {
    test_config(BackendType::Immediate)
        .with_frames_in_flight(frames_in_flight)
        .scheduler_config()
}

#[allow(dead_code)]
pub fn create_backend(backend: BackendType) -> Backend {
    Backend::new(backend, &Default::default()).expect("headless device")
}

/// A backend plus a scheduler running on it.
#[allow(dead_code)]
pub fn create_scheduler(backend: BackendType, frames_in_flight: usize) -> (Backend, FrameScheduler) {
    let mut backend = create_backend(backend);
    let scheduler = FrameScheduler::new(&mut backend, scheduler_config(frames_in_flight))
        .expect("scheduler");
    (backend, scheduler)
}

// ============================================================================
// Scenes
// ============================================================================

/// Camera at (0, 2, 8) looking at the origin.
#[allow(dead_code)]
pub fn test_camera() -> Camera {
    Camera::new(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO)
}

/// A row of cubes and spheres lit by a few point lights.
#[allow(dead_code)]
pub fn test_scene() -> Scene {
    let mut scene = Scene::new();
    let cube = scene.add_mesh(Mesh::cube());
    let sphere = scene.add_mesh(Mesh::sphere(16, 8));
    let floor = scene.add_mesh(Mesh::plane(20.0, 20.0, 1));

    let gold = scene.add_material(Material::gold());
    let plastic = scene.add_material(Material::plastic(Vec3::new(0.8, 0.1, 0.1)));

    scene.add_object(RenderObject::new(floor, plastic).with_position(Vec3::new(0.0, -1.0, 0.0)));
    for i in 0..3 {
        let x = (i as f32 - 1.0) * 2.5;
        scene.add_object(RenderObject::new(cube, gold).with_position(Vec3::new(x, 0.0, 0.0)));
        scene.add_object(RenderObject::new(sphere, plastic).with_position(Vec3::new(x, 1.5, -2.0)));
    }

    scene.add_light(Light::new(Vec3::new(0.0, 3.0, 0.0), 6.0));
    scene.add_light(Light::new(Vec3::new(-4.0, 1.0, 2.0), 3.0).with_color(Vec3::new(1.0, 0.5, 0.2)));
    scene.add_light(Light::new(Vec3::new(4.0, 1.0, -3.0), 4.0).with_intensity(2.0));
    scene
}

/// An engine with one view of [`test_scene`], buffers already built.
#[allow(dead_code)]
pub fn create_engine(backend: BackendType) -> (Engine, Scene) {
    create_engine_with(test_config(backend))
}

#[allow(dead_code)]
pub fn create_engine_with(config: RendererConfig) -> (Engine, Scene) {
    init_logging();
    let mut engine = Engine::new(config).expect("engine");
    let mut scene = test_scene();
    let extent = engine.extent();
    engine
        .create_view(View::new(test_camera(), extent))
        .expect("view");
    engine.build_buffers(&mut scene).expect("buffers");
    (engine, scene)
}
