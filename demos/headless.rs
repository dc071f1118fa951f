//! Headless demo: renders a lit grid of objects for a fixed number of frames
//! and reports pacing and cluster statistics.
//!
//! ```bash
//! cargo run --example headless -- --backend threaded --gpu-latency-ms 4 --frames 120
//! RUST_LOG=debug cargo run --example headless -- --lights 512 --linear-slicing
//! ```

use std::time::{Duration, Instant};

use clap::Parser;
use glam::Vec3;

use clustered_renderer::resources::{Material, Mesh};
use clustered_renderer::scene::{Camera, Light, RenderObject, Scene, SceneGraph, Transform, View};
use clustered_renderer::{BackendOptions, BackendType, DepthSlicing, Engine, RendererConfig};

/// Backend selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// Queue work completes on submission.
    #[default]
    Immediate,
    /// Queue work runs on a worker thread.
    Threaded,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Immediate => BackendType::Immediate,
            CliBackend::Threaded => BackendType::Threaded,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "headless", about = "Clustered forward rendering without a window")]
struct Args {
    #[arg(long, value_enum, default_value_t = CliBackend::Immediate)]
    backend: CliBackend,

    /// Number of frames to render before exiting.
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Frames the CPU may record ahead of the GPU.
    #[arg(long, default_value_t = 2)]
    frames_in_flight: usize,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Cluster grid as XxYxZ.
    #[arg(long, default_value = "16x9x24", value_parser = parse_dims)]
    clusters: (u32, u32, u32),

    #[arg(long, default_value_t = 128)]
    lights: usize,

    /// Objects per side of the object grid.
    #[arg(long, default_value_t = 8)]
    grid: u32,

    #[arg(long)]
    linear_slicing: bool,

    #[arg(long)]
    no_prepass: bool,

    /// Simulated GPU time per submission (threaded backend).
    #[arg(long, default_value_t = 0)]
    gpu_latency_ms: u64,

    /// Resize the swapchain halfway through.
    #[arg(long)]
    resize: bool,
}

fn parse_dims(value: &str) -> Result<(u32, u32, u32), String> {
    let parts: Vec<&str> = value.split('x').collect();
    let [x, y, z] = parts.as_slice() else {
        return Err(format!("expected XxYxZ, got '{}'", value));
    };
    let parse = |s: &str| s.parse::<u32>().map_err(|e| format!("'{}': {}", s, e));
    Ok((parse(*x)?, parse(*y)?, parse(*z)?))
}

fn build_scene(grid: u32, light_count: usize) -> Scene {
    let mut scene = Scene::new();
    let cube = scene.add_mesh(Mesh::cube());
    let sphere = scene.add_mesh(Mesh::sphere(24, 12));
    let floor = scene.add_mesh(Mesh::plane(100.0, 100.0, 4));

    let materials = [
        scene.add_material(Material::gold()),
        scene.add_material(Material::plastic(Vec3::new(0.2, 0.4, 0.9))),
        scene.add_material(Material::metal(Vec3::splat(0.8), 0.3)),
    ];
    let concrete = scene.add_material(Material::plastic(Vec3::splat(0.5)).with_roughness(0.9));
    scene.add_object(RenderObject::new(floor, concrete).with_position(Vec3::new(0.0, -1.0, 0.0)));

    // Objects hang off one root so the whole field can be placed at once.
    let mut graph = SceneGraph::new("field");
    if let Some(root) = graph.node_mut(SceneGraph::ROOT) {
        root.local = Transform::from_position(Vec3::new(0.0, 0.0, -10.0));
    }
    let half = grid as f32 * 0.5;
    for i in 0..grid {
        for j in 0..grid {
            let position = Vec3::new((i as f32 - half) * 3.0, 0.0, (j as f32 - half) * 3.0);
            let Ok(node) = graph.add_child(
                SceneGraph::ROOT,
                &format!("cell_{i}_{j}"),
                Transform::from_position(position),
            ) else {
                continue;
            };
            let mesh = if (i + j) % 2 == 0 { cube } else { sphere };
            let material = materials[((i * grid + j) % 3) as usize];
            if let Err(e) = graph.attach_mesh(node, mesh, material) {
                log::warn!("Skipping cell {},{}: {}", i, j, e);
            }
        }
    }
    scene.add_graph(&graph);

    let extent = grid as f32 * 1.5 + 4.0;
    for i in 0..light_count {
        let t = i as f32 / light_count.max(1) as f32;
        let angle = t * std::f32::consts::TAU * 7.0;
        let radius = extent * t.sqrt();
        let position = Vec3::new(angle.cos() * radius, 0.5 + (i % 4) as f32, angle.sin() * radius - 10.0);
        let color = Vec3::new(0.5 + 0.5 * angle.cos(), 0.5 + 0.5 * angle.sin(), 1.0 - t);
        scene.add_light(
            Light::new(position, 2.0 + (i % 5) as f32)
                .with_color(color)
                .with_intensity(1.5),
        );
    }
    scene
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    log::info!("Starting headless clustered renderer demo");
    log::info!("Backend: {:?}, {} frames", args.backend, args.frames);

    let (cx, cy, cz) = args.clusters;
    let config = RendererConfig::default()
        .with_backend(args.backend.into())
        .with_backend_options(BackendOptions {
            gpu_latency: Duration::from_millis(args.gpu_latency_ms),
            ..Default::default()
        })
        .with_frames_in_flight(args.frames_in_flight)
        .with_size(args.width, args.height)
        .with_cluster_dims(cx, cy, cz)
        .with_depth_slicing(if args.linear_slicing {
            DepthSlicing::Linear
        } else {
            DepthSlicing::Exponential
        })
        .with_max_objects((args.grid * args.grid + 1) as usize)
        .with_max_lights(args.lights.max(1))
        .with_depth_prepass(!args.no_prepass);

    let mut engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to create engine: {}", e);
            std::process::exit(1);
        }
    };

    let mut scene = build_scene(args.grid, args.lights);
    let mut camera = Camera::new(Vec3::new(0.0, 12.0, 20.0), Vec3::new(0.0, 0.0, -10.0));
    let extent = engine.extent();
    let view = match engine.create_view(View::new(camera, extent)) {
        Ok(view) => view,
        Err(e) => {
            log::error!("Failed to create view: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = engine.build_buffers(&mut scene) {
        log::error!("Failed to build buffers: {}", e);
        std::process::exit(1);
    }

    let start = Instant::now();
    let mut waits = 0u64;
    let mut assignments = 0usize;
    let mut dropped = 0usize;
    let mut failures = 0u64;

    for frame in 0..args.frames {
        if args.resize && frame == args.frames / 2 {
            match engine.resize(args.width / 2, args.height / 2) {
                Ok(_) => {
                    let extent = engine.extent();
                    log::info!("Resized to {}x{}", extent.width, extent.height);
                }
                Err(e) => log::error!("Resize failed: {}", e),
            }
        }

        // Orbit the camera; the cluster grid is reused since only the view moves.
        let angle = frame as f32 * 0.02;
        camera.set_position(Vec3::new(angle.sin() * 20.0, 12.0, angle.cos() * 20.0 - 10.0));
        if let Err(e) = engine.update_view(view, View::new(camera, engine.extent())) {
            log::error!("Failed to update view: {}", e);
        }

        match engine.render_frame(&scene) {
            Ok(stats) => {
                waits += stats.waited as u64;
                assignments += stats.light_assignments;
                dropped += stats.dropped_assignments;
                log::debug!(
                    "Frame {} slot {} fence {}: {} draws, {} assignments",
                    frame,
                    stats.slot,
                    stats.fence_value,
                    stats.draws,
                    stats.light_assignments
                );
            }
            Err(e) if engine.is_device_lost() => {
                log::error!("Device lost at frame {}: {}", frame, e);
                break;
            }
            Err(_) => failures += 1,
        }
    }

    if let Err(e) = engine.flush() {
        log::error!("Final flush failed: {}", e);
    }
    let elapsed = start.elapsed();
    let frames = engine.scheduler().presented_frames().max(1);

    log::info!(
        "Presented {} frames in {:.2?} ({:.2?} per frame)",
        engine.scheduler().presented_frames(),
        elapsed,
        elapsed / frames as u32
    );
    log::info!(
        "Fence waits: {}, failed frames: {}, avg light assignments: {}, dropped: {}",
        waits,
        failures,
        assignments / frames as usize,
        dropped
    );
    let (hits, misses) = engine.shader_cache().stats();
    log::info!("Shader cache: {} hits, {} misses", hits, misses);

    if let Err(e) = engine.shutdown() {
        log::error!("Shutdown failed: {}", e);
    }
}
