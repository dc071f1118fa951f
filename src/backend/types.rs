//! Common types used across backends

use std::time::Duration;

/// Texture formats used by the swapchain and depth buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba16Float => 8,
            _ => 4,
        }
    }
}

/// GPU-synchronization state a texture is in.
///
/// A texture must be transitioned between states with a barrier before it
/// is used in a different way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Freshly created, no particular usage.
    Common,
    /// Owned by the presentation engine.
    Present,
    /// Bound as a color attachment.
    RenderTarget,
    /// Bound as a writable depth attachment.
    DepthWrite,
    /// Destination of a copy.
    CopyDest,
    /// Readable from shaders.
    GenericRead,
}

/// Size of a 2D surface in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-sized surface (e.g. a minimized window).
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Viewport and scissor rectangle recorded at the start of a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// A viewport covering the whole surface.
    pub fn full(extent: Extent2d) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const VERTEX: Self = Self(1 << 0);
    pub const INDEX: Self = Self(1 << 1);
    pub const UNIFORM: Self = Self(1 << 2);
    pub const STORAGE: Self = Self(1 << 3);
    pub const COPY_DST: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Shader pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

/// Shader source handed to the backend compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    /// Identity used for caching.
    pub name: String,
    pub stage: ShaderStage,
    pub entry_point: String,
    pub code: String,
}

impl ShaderSource {
    pub fn new(name: &str, stage: ShaderStage, code: &str) -> Self {
        let entry_point = match stage {
            ShaderStage::Vertex => "vs_main",
            ShaderStage::Pixel => "ps_main",
            ShaderStage::Compute => "cs_main",
        };
        Self {
            name: name.to_string(),
            stage,
            entry_point: entry_point.to_string(),
            code: code.to_string(),
        }
    }
}

/// Options used when creating a headless device
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Name reported for the adapter.
    pub adapter_name: String,
    /// When false, device creation fails as if no capable adapter exists.
    pub adapter_available: bool,
    /// Minimum constant buffer offset alignment (power of two).
    pub min_uniform_alignment: u64,
    /// Simulated time the GPU spends on each submission.
    pub gpu_latency: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            adapter_name: "Headless Adapter".to_string(),
            adapter_available: true,
            min_uniform_alignment: 256,
            gpu_latency: Duration::ZERO,
        }
    }
}

/// Properties of a created device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub adapter_name: String,
    pub backend_name: &'static str,
    pub min_uniform_alignment: u64,
}
