//! Clustered Renderer - frame pipelining and clustered light culling
//!
//! The core of a real-time forward renderer:
//! - **Frame scheduler**: keeps N frames in flight on one queue, paced by a
//!   timeline fence, with tracked swapchain and depth buffer states
//! - **Clustered lighting**: splits each view frustum into a 3D grid and
//!   assigns point lights to cells every frame
//! - **Uniform ring buffer**: per-frame-slot, aligned shader parameter regions
//! - **Engine**: drives views, materials and draws through the frame lifecycle
//!
//! Two headless backends implement [`backend::GraphicsBackend`]:
//! - **Immediate**: completes work synchronously on submission
//! - **Threaded**: a worker thread plays the GPU queue, with simulated latency
//!   and a pause gate
//!
//! # Example
//!
//! ```
//! use clustered_renderer::scene::{Camera, Light, RenderObject, Scene, View};
//! use clustered_renderer::resources::{Material, Mesh};
//! use clustered_renderer::{Engine, RendererConfig};
//! use glam::Vec3;
//!
//! let config = RendererConfig::default().with_size(640, 360);
//! let mut engine = Engine::new(config).unwrap();
//!
//! let mut scene = Scene::new();
//! let cube = scene.add_mesh(Mesh::cube());
//! let gold = scene.add_material(Material::gold());
//! scene.add_object(RenderObject::new(cube, gold));
//! scene.add_light(Light::new(Vec3::new(0.0, 2.0, 0.0), 5.0));
//!
//! let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO);
//! engine.create_view(View::new(camera, engine.extent())).unwrap();
//! engine.build_buffers(&mut scene).unwrap();
//!
//! let stats = engine.render_frame(&scene).unwrap();
//! assert_eq!(stats.draws, 1);
//! ```

pub mod backend;
pub mod clustering;
pub mod engine;
pub mod error;
pub mod resources;
pub mod scene;
pub mod scheduler;

use std::time::Duration;

use glam::UVec3;

pub use backend::{Backend, BackendOptions, Extent2d, GraphicsBackend, TextureFormat};
pub use clustering::{ClusterGrid, DepthSlicing, LightAssignment};
pub use engine::{Engine, FrameStats, ViewId};
pub use error::{RenderError, Result};
pub use scheduler::{FrameScheduler, SchedulerConfig};

/// Upper bound on frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Backend selection for the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Synchronous backend - queue work completes on submission
    #[default]
    Immediate,
    /// Worker-thread queue - work completes asynchronously
    Threaded,
}

/// Configuration for initializing the engine
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Which backend to use
    pub backend: BackendType,
    /// Device creation options passed to the backend
    pub backend_options: BackendOptions,
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Initial swapchain width
    pub width: u32,
    /// Initial swapchain height
    pub height: u32,
    pub format: TextureFormat,
    pub depth_format: TextureFormat,
    /// Cluster grid resolution (x, y, depth slices)
    pub cluster_dims: UVec3,
    pub depth_slicing: DepthSlicing,
    /// Object regions reserved per frame slot and view
    pub max_objects: usize,
    /// Lights uploaded per view; extra scene lights are ignored
    pub max_lights: usize,
    /// Cap on each cluster's light list in the packed table
    pub max_lights_per_cluster: u32,
    /// Draw every object with the depth-only pipeline before shading
    pub depth_prepass: bool,
    pub clear_color: [f32; 4],
    /// `None` waits on the fence forever
    pub fence_timeout: Option<Duration>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Immediate,
            backend_options: BackendOptions::default(),
            frames_in_flight: 2,
            width: 1280,
            height: 720,
            format: TextureFormat::Bgra8UnormSrgb,
            depth_format: TextureFormat::Depth32Float,
            cluster_dims: UVec3::new(16, 9, 24),
            depth_slicing: DepthSlicing::Exponential,
            max_objects: 1024,
            max_lights: 1024,
            max_lights_per_cluster: 64,
            depth_prepass: true,
            clear_color: [0.282, 0.239, 0.545, 1.0],
            fence_timeout: None,
        }
    }
}

impl RendererConfig {
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_backend_options(mut self, options: BackendOptions) -> Self {
        self.backend_options = options;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_cluster_dims(mut self, x: u32, y: u32, z: u32) -> Self {
        self.cluster_dims = UVec3::new(x, y, z);
        self
    }

    pub fn with_depth_slicing(mut self, slicing: DepthSlicing) -> Self {
        self.depth_slicing = slicing;
        self
    }

    pub fn with_max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = max_objects;
        self
    }

    pub fn with_max_lights(mut self, max_lights: usize) -> Self {
        self.max_lights = max_lights;
        self
    }

    pub fn with_max_lights_per_cluster(mut self, max: u32) -> Self {
        self.max_lights_per_cluster = max;
        self
    }

    pub fn with_depth_prepass(mut self, enabled: bool) -> Self {
        self.depth_prepass = enabled;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fence_timeout = timeout;
        self
    }

    /// Check the configuration before any device is created.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RenderError::InvalidParameter(msg));

        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return invalid(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            ));
        }
        if self.width == 0 || self.height == 0 {
            return invalid(format!("initial size {}x{} is empty", self.width, self.height));
        }
        if self.format.is_depth() {
            return invalid(format!("{:?} is not a color format", self.format));
        }
        if !self.depth_format.is_depth() {
            return invalid(format!("{:?} is not a depth format", self.depth_format));
        }
        if self.cluster_dims.min_element() == 0 {
            return invalid(format!("cluster dimensions {} contain zero", self.cluster_dims));
        }
        let clusters = self.cluster_dims.x as u64 * self.cluster_dims.y as u64 * self.cluster_dims.z as u64;
        if clusters > clustering::MAX_CLUSTERS {
            return invalid(format!(
                "{} clusters exceeds the limit of {}",
                clusters,
                clustering::MAX_CLUSTERS
            ));
        }
        if self.max_objects == 0 {
            return invalid("max_objects must be at least 1".into());
        }
        if self.max_lights_per_cluster == 0 {
            return invalid("max_lights_per_cluster must be at least 1".into());
        }
        Ok(())
    }

    /// Scheduler parameters derived from this configuration.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            frames_in_flight: self.frames_in_flight,
            extent: Extent2d::new(self.width, self.height),
            format: self.format,
            depth_format: self.depth_format,
            clear_color: self.clear_color,
            clear_depth: 1.0,
            fence_timeout: self.fence_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let base = RendererConfig::default();
        assert!(base.clone().with_frames_in_flight(0).validate().is_err());
        assert!(base.clone().with_frames_in_flight(9).validate().is_err());
        assert!(base.clone().with_size(0, 10).validate().is_err());
        assert!(base.clone().with_cluster_dims(16, 0, 8).validate().is_err());
        assert!(base.clone().with_cluster_dims(1024, 1024, 2).validate().is_err());
        assert!(base.clone().with_max_objects(0).validate().is_err());
        assert!(base.clone().with_max_lights_per_cluster(0).validate().is_err());
        assert!(base.with_format(TextureFormat::Depth32Float).validate().is_err());
    }

    #[test]
    fn test_scheduler_config() {
        let config = RendererConfig::default()
            .with_frames_in_flight(3)
            .with_size(800, 600)
            .with_fence_timeout(Some(Duration::from_millis(50)));
        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.frames_in_flight, 3);
        assert_eq!(scheduler.extent, Extent2d::new(800, 600));
        assert_eq!(scheduler.fence_timeout, Some(Duration::from_millis(50)));
    }
}
