//! Core backend abstraction traits
//!
//! The frame scheduler, the clustering engine and the engine orchestrator
//! only talk to the device through [`GraphicsBackend`].

use crate::backend::types::*;
use crate::scheduler::{CommandList, Fence};
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("No capable adapter found")]
    NoCapableAdapter,
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to reset command allocator: {0}")]
    AllocatorResetFailed(String),
    #[error("Failed to execute command list: {0}")]
    ExecuteFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Failed to compile shader: {0}")]
    ShaderCompilationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a render-target or depth-stencil view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewHandle(pub(crate) u64);

/// Handle to a command allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocatorHandle(pub(crate) u64);

/// Handle to a compiled shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

/// Handle to a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

/// Graphics pipeline descriptor
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub label: String,
    pub vertex_shader: ShaderHandle,
    /// `None` for depth-only pipelines.
    pub pixel_shader: Option<ShaderHandle>,
    pub color_format: Option<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
}

/// Device-level operations the renderer core relies on.
///
/// Queue operations (`execute`, `signal`) are asynchronous: they return once
/// the work is queued, and completion is observed through the [`Fence`].
pub trait GraphicsBackend {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Properties of the device created with this backend
    fn device_info(&self) -> &DeviceInfo;

    // === Synchronization ===

    fn create_fence(&mut self) -> BackendResult<Fence>;

    /// Queue a signal of `value` on `fence` after all previously executed work.
    fn signal(&mut self, fence: &Fence, value: u64) -> BackendResult<()>;

    // === Command recording ===

    fn create_command_allocator(&mut self) -> BackendResult<AllocatorHandle>;

    /// Recycle an allocator. Only valid once the GPU finished its lists.
    fn reset_command_allocator(&mut self, allocator: AllocatorHandle) -> BackendResult<()>;

    /// Queue a closed command list for execution.
    fn execute(&mut self, list: &CommandList) -> BackendResult<()>;

    // === Swapchain ===

    /// (Re)create the swapchain images. Images start in [`ResourceState::Present`].
    fn create_swapchain_textures(
        &mut self,
        count: usize,
        extent: Extent2d,
        format: TextureFormat,
    ) -> BackendResult<Vec<TextureHandle>>;

    /// Create a depth buffer. It starts in [`ResourceState::Common`].
    fn create_depth_texture(
        &mut self,
        extent: Extent2d,
        format: TextureFormat,
    ) -> BackendResult<TextureHandle>;

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle>;

    /// Release a texture and every view created from it.
    fn release_texture(&mut self, texture: TextureHandle);

    /// Present the swapchain image with the given index.
    fn present(&mut self, image_index: usize) -> BackendResult<()>;

    // === Resources ===

    fn create_buffer(&mut self, size: u64, usage: BufferUsage, label: &str)
        -> BackendResult<BufferHandle>;

    /// Copy `data` into a CPU-visible buffer at `offset`.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;

    fn release_buffer(&mut self, buffer: BufferHandle);

    // === Pipelines ===

    fn compile_shader(&mut self, source: &ShaderSource) -> BackendResult<ShaderHandle>;

    fn create_pipeline(&mut self, descriptor: &PipelineDescriptor) -> BackendResult<PipelineHandle>;
}
