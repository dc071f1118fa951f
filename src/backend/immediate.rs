//! Immediate headless backend.
//!
//! Executes command lists synchronously on the calling thread. By default a
//! queued fence signal completes at once, so the CPU never waits. In
//! [`CompletionMode::Manual`] signals are held back until the caller releases
//! them, which turns the fence into a fully controllable mock for testing
//! frame pacing.

use std::collections::VecDeque;

use crate::backend::device::HeadlessDevice;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::scheduler::{Command, CommandList, Fence};

/// When queued fence signals reach the fence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Signals complete as soon as they are queued.
    #[default]
    OnSignal,
    /// Signals complete only through [`ImmediateBackend::complete_next`] and
    /// friends. Any CPU wait on an unreleased value blocks until another
    /// thread releases it or a wait timeout expires.
    Manual,
}

/// Headless backend whose queue runs on the submitting thread.
#[derive(Debug)]
pub struct ImmediateBackend {
    device: HeadlessDevice,
    mode: CompletionMode,
    pending_signals: VecDeque<(Fence, u64)>,
    submissions: Vec<Vec<Command>>,
    next_fence_id: u64,
}

impl ImmediateBackend {
    /// Create a device with default options.
    pub fn new() -> BackendResult<Self> {
        Self::with_options(&BackendOptions::default(), CompletionMode::OnSignal)
    }

    /// Create a device whose fence completion is driven by the caller.
    pub fn manual() -> BackendResult<Self> {
        Self::with_options(&BackendOptions::default(), CompletionMode::Manual)
    }

    pub fn with_options(options: &BackendOptions, mode: CompletionMode) -> BackendResult<Self> {
        Ok(Self {
            device: HeadlessDevice::new(options, "Immediate")?,
            mode,
            pending_signals: VecDeque::new(),
            submissions: Vec::new(),
            next_fence_id: 0,
        })
    }

    pub fn completion_mode(&self) -> CompletionMode {
        self.mode
    }

    pub fn device(&self) -> &HeadlessDevice {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut HeadlessDevice {
        &mut self.device
    }

    /// Command lists executed so far, in submission order.
    pub fn submissions(&self) -> &[Vec<Command>] {
        &self.submissions
    }

    /// Fence values queued but not yet released.
    pub fn pending_signals(&self) -> Vec<u64> {
        self.pending_signals.iter().map(|(_, value)| *value).collect()
    }

    /// Release the oldest queued signal. Returns the value reached.
    pub fn complete_next(&mut self) -> Option<u64> {
        let (fence, value) = self.pending_signals.pop_front()?;
        fence.signal(value);
        Some(value)
    }

    /// Release queued signals up to and including `value`.
    pub fn complete_through(&mut self, value: u64) {
        while let Some((_, next)) = self.pending_signals.front() {
            if *next > value {
                break;
            }
            self.complete_next();
        }
    }

    /// Release every queued signal.
    pub fn complete_all(&mut self) {
        while self.complete_next().is_some() {}
    }
}

impl GraphicsBackend for ImmediateBackend {
    fn name(&self) -> &'static str {
        "Immediate"
    }

    fn device_info(&self) -> &DeviceInfo {
        self.device.info()
    }

    fn create_fence(&mut self) -> BackendResult<Fence> {
        self.device.check_alive()?;
        let fence = Fence::new(self.next_fence_id);
        self.next_fence_id += 1;
        Ok(fence)
    }

    fn signal(&mut self, fence: &Fence, value: u64) -> BackendResult<()> {
        self.device.check_alive()?;
        match self.mode {
            CompletionMode::OnSignal => fence.signal(value),
            CompletionMode::Manual => {
                log::trace!("Immediate: holding signal {} on fence {}", value, fence.id());
                self.pending_signals.push_back((fence.clone(), value));
            }
        }
        Ok(())
    }

    fn create_command_allocator(&mut self) -> BackendResult<AllocatorHandle> {
        self.device.create_command_allocator()
    }

    fn reset_command_allocator(&mut self, allocator: AllocatorHandle) -> BackendResult<()> {
        self.device.reset_command_allocator(allocator)
    }

    fn execute(&mut self, list: &CommandList) -> BackendResult<()> {
        self.device.validate_and_apply(list)?;
        log::trace!("Immediate: executed {} commands", list.len());
        self.submissions.push(list.commands().to_vec());
        Ok(())
    }

    fn create_swapchain_textures(
        &mut self,
        count: usize,
        extent: Extent2d,
        format: TextureFormat,
    ) -> BackendResult<Vec<TextureHandle>> {
        self.device.create_swapchain_textures(count, extent, format)
    }

    fn create_depth_texture(
        &mut self,
        extent: Extent2d,
        format: TextureFormat,
    ) -> BackendResult<TextureHandle> {
        self.device.create_depth_texture(extent, format)
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        self.device.create_texture_view(texture)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        self.device.release_texture(texture)
    }

    fn present(&mut self, image_index: usize) -> BackendResult<()> {
        self.device.present(image_index)
    }

    fn create_buffer(&mut self, size: u64, usage: BufferUsage, label: &str) -> BackendResult<BufferHandle> {
        self.device.create_buffer(size, usage, label)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        self.device.write_buffer(buffer, offset, data)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        self.device.release_buffer(buffer)
    }

    fn compile_shader(&mut self, source: &ShaderSource) -> BackendResult<ShaderHandle> {
        self.device.compile_shader(source)
    }

    fn create_pipeline(&mut self, descriptor: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        self.device.create_pipeline(descriptor)
    }
}
