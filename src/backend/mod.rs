//! Backend abstraction layer
//!
//! Provides the [`GraphicsBackend`] trait and two headless implementations:
//! - **Immediate**: queue work runs on the submitting thread
//! - **Threaded**: queue work runs on a worker thread, like a real GPU queue

pub mod device;
pub mod immediate;
pub mod threaded;
pub mod traits;
pub mod types;

pub use device::{Fault, HeadlessDevice};
pub use immediate::{CompletionMode, ImmediateBackend};
pub use threaded::{GpuControl, ThreadedBackend};
pub use traits::*;
pub use types::*;

use crate::scheduler::{Command, CommandList, Fence};
use crate::BackendType;

/// Backend wrapper to abstract over the available backends
#[derive(Debug)]
pub enum Backend {
    Immediate(ImmediateBackend),
    Threaded(ThreadedBackend),
}

impl Backend {
    /// Create a device for the requested backend.
    pub fn new(backend_type: BackendType, options: &BackendOptions) -> BackendResult<Self> {
        match backend_type {
            BackendType::Immediate => Ok(Backend::Immediate(ImmediateBackend::with_options(
                options,
                CompletionMode::OnSignal,
            )?)),
            BackendType::Threaded => Ok(Backend::Threaded(ThreadedBackend::with_options(options)?)),
        }
    }

    pub fn backend_type(&self) -> BackendType {
        match self {
            Backend::Immediate(_) => BackendType::Immediate,
            Backend::Threaded(_) => BackendType::Threaded,
        }
    }

    /// Device-side bookkeeping, for inspection and fault injection.
    pub fn device(&self) -> &HeadlessDevice {
        match self {
            Backend::Immediate(b) => b.device(),
            Backend::Threaded(b) => b.device(),
        }
    }

    pub fn device_mut(&mut self) -> &mut HeadlessDevice {
        match self {
            Backend::Immediate(b) => b.device_mut(),
            Backend::Threaded(b) => b.device_mut(),
        }
    }

    pub fn inject_fault(&mut self, fault: Fault) {
        self.device_mut().inject_fault(fault);
    }

    /// Command lists executed so far, in order.
    ///
    /// The threaded queue only reports lists it has finished; flush first
    /// for a complete picture.
    pub fn submissions(&self) -> Vec<Vec<Command>> {
        match self {
            Backend::Immediate(b) => b.submissions().to_vec(),
            Backend::Threaded(b) => b.submissions(),
        }
    }

    pub fn as_immediate_mut(&mut self) -> Option<&mut ImmediateBackend> {
        match self {
            Backend::Immediate(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_threaded(&self) -> Option<&ThreadedBackend> {
        match self {
            Backend::Threaded(b) => Some(b),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn GraphicsBackend {
        match self {
            Backend::Immediate(b) => b,
            Backend::Threaded(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn GraphicsBackend {
        match self {
            Backend::Immediate(b) => b,
            Backend::Threaded(b) => b,
        }
    }
}

impl GraphicsBackend for Backend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn device_info(&self) -> &DeviceInfo {
        self.inner().device_info()
    }

    fn create_fence(&mut self) -> BackendResult<Fence> {
        self.inner_mut().create_fence()
    }

    fn signal(&mut self, fence: &Fence, value: u64) -> BackendResult<()> {
        self.inner_mut().signal(fence, value)
    }

    fn create_command_allocator(&mut self) -> BackendResult<AllocatorHandle> {
        self.inner_mut().create_command_allocator()
    }

    fn reset_command_allocator(&mut self, allocator: AllocatorHandle) -> BackendResult<()> {
        self.inner_mut().reset_command_allocator(allocator)
    }

    fn execute(&mut self, list: &CommandList) -> BackendResult<()> {
        self.inner_mut().execute(list)
    }

    fn create_swapchain_textures(
        &mut self,
        count: usize,
        extent: Extent2d,
        format: TextureFormat,
    ) -> BackendResult<Vec<TextureHandle>> {
        self.inner_mut().create_swapchain_textures(count, extent, format)
    }

    fn create_depth_texture(
        &mut self,
        extent: Extent2d,
        format: TextureFormat,
    ) -> BackendResult<TextureHandle> {
        self.inner_mut().create_depth_texture(extent, format)
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        self.inner_mut().create_texture_view(texture)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        self.inner_mut().release_texture(texture)
    }

    fn present(&mut self, image_index: usize) -> BackendResult<()> {
        self.inner_mut().present(image_index)
    }

    fn create_buffer(&mut self, size: u64, usage: BufferUsage, label: &str) -> BackendResult<BufferHandle> {
        self.inner_mut().create_buffer(size, usage, label)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        self.inner_mut().write_buffer(buffer, offset, data)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        self.inner_mut().release_buffer(buffer)
    }

    fn compile_shader(&mut self, source: &ShaderSource) -> BackendResult<ShaderHandle> {
        self.inner_mut().compile_shader(source)
    }

    fn create_pipeline(&mut self, descriptor: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        self.inner_mut().create_pipeline(descriptor)
    }
}
