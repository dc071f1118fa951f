//! Resource bookkeeping shared by the headless backends.
//!
//! [`HeadlessDevice`] tracks every object a backend hands out and validates
//! command lists the way a debug layer would: barriers must start from the
//! state the texture is actually in, views must be alive, and presented images
//! must be in [`ResourceState::Present`]. Faults can be injected to exercise
//! the renderer's error paths.

use std::collections::{HashMap, HashSet};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::scheduler::{Command, CommandList};

/// A failure that the next matching backend call will report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The next command allocator reset fails.
    AllocatorReset,
    /// The next command list execution fails.
    Execute,
    /// The next present fails.
    Present,
    /// The next swapchain creation fails.
    SwapchainCreation,
    /// The device is lost; every later call fails.
    DeviceLost,
}

#[derive(Debug, Clone)]
struct TextureRecord {
    extent: Extent2d,
    format: TextureFormat,
    state: ResourceState,
}

#[derive(Debug, Clone)]
struct BufferRecord {
    label: String,
    usage: BufferUsage,
    data: Vec<u8>,
}

/// Device-side object tables for a headless backend.
#[derive(Debug)]
pub struct HeadlessDevice {
    info: DeviceInfo,
    next_id: u64,
    textures: HashMap<u64, TextureRecord>,
    views: HashMap<u64, u64>,
    swapchain: Vec<u64>,
    buffers: HashMap<u64, BufferRecord>,
    allocators: HashSet<u64>,
    shaders: HashMap<u64, String>,
    pipelines: HashMap<u64, String>,
    faults: Vec<Fault>,
    device_lost: bool,
    presented: Vec<usize>,
}

impl HeadlessDevice {
    pub(crate) fn new(options: &BackendOptions, backend_name: &'static str) -> BackendResult<Self> {
        if !options.adapter_available {
            return Err(BackendError::NoCapableAdapter);
        }
        if !options.min_uniform_alignment.is_power_of_two() {
            return Err(BackendError::InitializationFailed(format!(
                "uniform alignment {} is not a power of two",
                options.min_uniform_alignment
            )));
        }

        log::info!(
            "Created {} device on '{}' (uniform alignment {})",
            backend_name,
            options.adapter_name,
            options.min_uniform_alignment
        );

        Ok(Self {
            info: DeviceInfo {
                adapter_name: options.adapter_name.clone(),
                backend_name,
                min_uniform_alignment: options.min_uniform_alignment,
            },
            next_id: 1,
            textures: HashMap::new(),
            views: HashMap::new(),
            swapchain: Vec::new(),
            buffers: HashMap::new(),
            allocators: HashSet::new(),
            shaders: HashMap::new(),
            pipelines: HashMap::new(),
            faults: Vec::new(),
            device_lost: false,
            presented: Vec::new(),
        })
    }

    pub(crate) fn info(&self) -> &DeviceInfo {
        &self.info
    }

    // === Fault injection and inspection ===

    /// Arm a fault for the next matching call.
    pub fn inject_fault(&mut self, fault: Fault) {
        log::debug!("Injecting fault {:?}", fault);
        if fault == Fault::DeviceLost {
            self.device_lost = true;
        } else {
            self.faults.push(fault);
        }
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    /// Swapchain image indices presented so far, in order.
    pub fn presented_images(&self) -> &[usize] {
        &self.presented
    }

    /// Number of textures currently alive.
    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Current device-side state of a texture.
    pub fn texture_state(&self, texture: TextureHandle) -> Option<ResourceState> {
        self.textures.get(&texture.0).map(|t| t.state)
    }

    /// Size of a texture.
    pub fn texture_extent(&self, texture: TextureHandle) -> Option<Extent2d> {
        self.textures.get(&texture.0).map(|t| t.extent)
    }

    /// Contents of a buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        if let Some(pos) = self.faults.iter().position(|f| *f == fault) {
            self.faults.remove(pos);
            true
        } else {
            false
        }
    }

    pub(crate) fn check_alive(&self) -> BackendResult<()> {
        if self.device_lost {
            Err(BackendError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // === Command recording ===

    pub(crate) fn create_command_allocator(&mut self) -> BackendResult<AllocatorHandle> {
        self.check_alive()?;
        let id = self.alloc_id();
        self.allocators.insert(id);
        Ok(AllocatorHandle(id))
    }

    pub(crate) fn reset_command_allocator(&mut self, allocator: AllocatorHandle) -> BackendResult<()> {
        self.check_alive()?;
        if self.take_fault(Fault::AllocatorReset) {
            return Err(BackendError::AllocatorResetFailed("injected fault".into()));
        }
        if !self.allocators.contains(&allocator.0) {
            return Err(BackendError::InvalidHandle(format!("{:?}", allocator)));
        }
        Ok(())
    }

    /// Validate a list at submission time and apply its state transitions.
    ///
    /// The queue executes lists in submission order, so validating here gives
    /// the same result as validating on the GPU timeline.
    pub(crate) fn validate_and_apply(&mut self, list: &CommandList) -> BackendResult<()> {
        self.check_alive()?;
        if self.take_fault(Fault::Execute) {
            return Err(BackendError::ExecuteFailed("injected fault".into()));
        }
        if list.is_recording() {
            return Err(BackendError::ExecuteFailed(
                "command list is still recording".into(),
            ));
        }

        let mut states: HashMap<u64, ResourceState> = HashMap::new();
        for command in list.commands() {
            match command {
                Command::Barrier {
                    texture,
                    before,
                    after,
                } => {
                    let current = match states.get(&texture.0) {
                        Some(state) => *state,
                        None => self
                            .textures
                            .get(&texture.0)
                            .map(|t| t.state)
                            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?,
                    };
                    if current != *before {
                        return Err(BackendError::ExecuteFailed(format!(
                            "barrier on {:?} expects {:?} but texture is {:?}",
                            texture, before, current
                        )));
                    }
                    states.insert(texture.0, *after);
                }
                Command::ClearColor { view, .. } | Command::ClearDepth { view, .. } => {
                    self.check_view(*view)?;
                }
                Command::SetRenderTargets { color, depth } => {
                    for view in color.iter().chain(depth.iter()) {
                        self.check_view(*view)?;
                    }
                }
                Command::BindPipeline(pipeline) => {
                    if !self.pipelines.contains_key(&pipeline.0) {
                        return Err(BackendError::InvalidHandle(format!("{:?}", pipeline)));
                    }
                }
                _ => {}
            }
        }

        for (id, state) in states {
            if let Some(texture) = self.textures.get_mut(&id) {
                texture.state = state;
            }
        }
        Ok(())
    }

    fn check_view(&self, view: TextureViewHandle) -> BackendResult<()> {
        if self.views.contains_key(&view.0) {
            Ok(())
        } else {
            Err(BackendError::InvalidHandle(format!("{:?}", view)))
        }
    }

    // === Swapchain ===

    pub(crate) fn create_swapchain_textures(
        &mut self,
        count: usize,
        extent: Extent2d,
        format: TextureFormat,
    ) -> BackendResult<Vec<TextureHandle>> {
        self.check_alive()?;
        if self.take_fault(Fault::SwapchainCreation) {
            return Err(BackendError::SwapchainCreationFailed("injected fault".into()));
        }
        if extent.is_empty() {
            return Err(BackendError::SwapchainCreationFailed(format!(
                "invalid extent {}x{}",
                extent.width, extent.height
            )));
        }
        if !self.swapchain.is_empty() {
            return Err(BackendError::SwapchainCreationFailed(
                "previous swapchain images are still alive".into(),
            ));
        }

        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.alloc_id();
            self.textures.insert(
                id,
                TextureRecord {
                    extent,
                    format,
                    state: ResourceState::Present,
                },
            );
            self.swapchain.push(id);
            handles.push(TextureHandle(id));
        }
        log::debug!(
            "Created {} swapchain images ({}x{} {:?})",
            count,
            extent.width,
            extent.height,
            format
        );
        Ok(handles)
    }

    pub(crate) fn create_depth_texture(
        &mut self,
        extent: Extent2d,
        format: TextureFormat,
    ) -> BackendResult<TextureHandle> {
        self.check_alive()?;
        if !format.is_depth() {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} is not a depth format",
                format
            )));
        }
        let id = self.alloc_id();
        self.textures.insert(
            id,
            TextureRecord {
                extent,
                format,
                state: ResourceState::Common,
            },
        );
        Ok(TextureHandle(id))
    }

    pub(crate) fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        self.check_alive()?;
        let format = self
            .textures
            .get(&texture.0)
            .map(|t| t.format)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;
        let id = self.alloc_id();
        self.views.insert(id, texture.0);
        log::trace!("Created {:?} view {} for texture {}", format, id, texture.0);
        Ok(TextureViewHandle(id))
    }

    pub(crate) fn release_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.views.retain(|_, owner| *owner != texture.0);
        self.swapchain.retain(|id| *id != texture.0);
    }

    pub(crate) fn present(&mut self, image_index: usize) -> BackendResult<()> {
        self.check_alive()?;
        if self.take_fault(Fault::Present) {
            return Err(BackendError::PresentFailed("injected fault".into()));
        }
        let id = *self.swapchain.get(image_index).ok_or_else(|| {
            BackendError::PresentFailed(format!("no swapchain image {}", image_index))
        })?;
        let state = self.textures.get(&id).map(|t| t.state);
        if state != Some(ResourceState::Present) {
            return Err(BackendError::PresentFailed(format!(
                "image {} is in state {:?}",
                image_index, state
            )));
        }
        self.presented.push(image_index);
        Ok(())
    }

    // === Buffers ===

    pub(crate) fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        label: &str,
    ) -> BackendResult<BufferHandle> {
        self.check_alive()?;
        if size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "buffer '{}' has zero size",
                label
            )));
        }
        let len = usize::try_from(size).map_err(|_| BackendError::OutOfMemory)?;
        let id = self.alloc_id();
        self.buffers.insert(
            id,
            BufferRecord {
                label: label.to_string(),
                usage,
                data: vec![0; len],
            },
        );
        log::trace!("Created buffer '{}' ({} bytes, {:?})", label, size, usage);
        Ok(BufferHandle(id))
    }

    pub(crate) fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        self.check_alive()?;
        let record = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))?;
        if !record.usage.contains(BufferUsage::COPY_DST) {
            return Err(BackendError::InvalidHandle(format!(
                "buffer '{}' is not writable",
                record.label
            )));
        }
        let start = usize::try_from(offset).map_err(|_| BackendError::OutOfMemory)?;
        let end = start + data.len();
        if end > record.data.len() {
            return Err(BackendError::BufferCreationFailed(format!(
                "write of {} bytes at {} overruns buffer '{}' ({} bytes)",
                data.len(),
                offset,
                record.label,
                record.data.len()
            )));
        }
        record.data[start..end].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn release_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    // === Pipelines ===

    pub(crate) fn compile_shader(&mut self, source: &ShaderSource) -> BackendResult<ShaderHandle> {
        self.check_alive()?;
        if source.code.trim().is_empty() {
            return Err(BackendError::ShaderCompilationFailed(format!(
                "{}: empty source",
                source.name
            )));
        }
        if let Some(line) = source.code.lines().position(|l| l.trim_start().starts_with("#error")) {
            return Err(BackendError::ShaderCompilationFailed(format!(
                "{}({}): #error directive",
                source.name,
                line + 1
            )));
        }
        if !source.code.contains(source.entry_point.as_str()) {
            return Err(BackendError::ShaderCompilationFailed(format!(
                "{}: entry point '{}' not found",
                source.name, source.entry_point
            )));
        }
        let id = self.alloc_id();
        self.shaders.insert(id, source.name.clone());
        Ok(ShaderHandle(id))
    }

    pub(crate) fn create_pipeline(&mut self, descriptor: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        self.check_alive()?;
        let shaders = std::iter::once(descriptor.vertex_shader).chain(descriptor.pixel_shader);
        for shader in shaders {
            if !self.shaders.contains_key(&shader.0) {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "'{}' references unknown {:?}",
                    descriptor.label, shader
                )));
            }
        }
        let id = self.alloc_id();
        self.pipelines.insert(id, descriptor.label.clone());
        Ok(PipelineHandle(id))
    }
}
