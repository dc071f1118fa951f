//! Threaded headless backend.
//!
//! A worker thread plays the GPU queue: executed command lists and fence
//! signals are sent over a channel and processed strictly in submission
//! order, optionally with a simulated per-submission latency. The queue can
//! be paused through [`GpuControl`], which lets tests hold the GPU while
//! observing how the CPU side paces itself.
//!
//! ```text
//!   submission thread              worker ("GPU queue")
//!   ─────────────────              ────────────────────
//!   execute(list)  ──Execute──►    sleep(latency), record
//!   signal(f, 3)   ──Signal───►    f.signal(3)
//!   drop           ──Shutdown─►    exit
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::backend::device::HeadlessDevice;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::scheduler::{Command, CommandList, Fence};

#[derive(Debug)]
enum GpuJob {
    Execute(Vec<Command>),
    Signal(Fence, u64),
    Shutdown,
}

#[derive(Debug, Default)]
struct Gate {
    paused: Mutex<bool>,
    resumed: Condvar,
}

/// Pause/resume switch for the simulated GPU queue.
///
/// Cloning shares the switch.
#[derive(Debug, Clone, Default)]
pub struct GpuControl {
    gate: Arc<Gate>,
}

impl GpuControl {
    /// Stop processing queued work after the current job.
    pub fn pause(&self) {
        *self.gate.paused.lock() = true;
    }

    /// Resume processing queued work.
    pub fn resume(&self) {
        *self.gate.paused.lock() = false;
        self.gate.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.gate.paused.lock()
    }

    fn wait_while_paused(&self) {
        let mut paused = self.gate.paused.lock();
        while *paused {
            self.gate.resumed.wait(&mut paused);
        }
    }
}

/// Headless backend with an asynchronous queue on a worker thread.
#[derive(Debug)]
pub struct ThreadedBackend {
    device: HeadlessDevice,
    sender: Sender<GpuJob>,
    worker: Option<JoinHandle<()>>,
    control: GpuControl,
    submissions: Arc<Mutex<Vec<Vec<Command>>>>,
    next_fence_id: u64,
}

impl ThreadedBackend {
    /// Create a device with default options.
    pub fn new() -> BackendResult<Self> {
        Self::with_options(&BackendOptions::default())
    }

    pub fn with_options(options: &BackendOptions) -> BackendResult<Self> {
        let device = HeadlessDevice::new(options, "Threaded")?;
        let (sender, receiver) = unbounded();
        let control = GpuControl::default();
        let submissions = Arc::new(Mutex::new(Vec::new()));

        let worker = {
            let control = control.clone();
            let submissions = Arc::clone(&submissions);
            let latency = options.gpu_latency;
            thread::Builder::new()
                .name("gpu-queue".into())
                .spawn(move || run_queue(receiver, control, latency, submissions))
                .map_err(|e| BackendError::InitializationFailed(format!("queue thread: {}", e)))?
        };

        Ok(Self {
            device,
            sender,
            worker: Some(worker),
            control,
            submissions,
            next_fence_id: 0,
        })
    }

    /// Handle for pausing and resuming the queue.
    pub fn gpu_control(&self) -> GpuControl {
        self.control.clone()
    }

    pub fn device(&self) -> &HeadlessDevice {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut HeadlessDevice {
        &mut self.device
    }

    /// Command lists the queue has finished, in execution order.
    pub fn submissions(&self) -> Vec<Vec<Command>> {
        self.submissions.lock().clone()
    }

    fn send(&self, job: GpuJob) -> BackendResult<()> {
        self.sender.send(job).map_err(|_| BackendError::DeviceLost)
    }
}

fn run_queue(
    receiver: Receiver<GpuJob>,
    control: GpuControl,
    latency: Duration,
    submissions: Arc<Mutex<Vec<Vec<Command>>>>,
) {
    log::debug!("GPU queue thread started");
    for job in receiver.iter() {
        control.wait_while_paused();
        match job {
            GpuJob::Execute(commands) => {
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                log::trace!("GPU queue: executed {} commands", commands.len());
                submissions.lock().push(commands);
            }
            GpuJob::Signal(fence, value) => fence.signal(value),
            GpuJob::Shutdown => break,
        }
    }
    log::debug!("GPU queue thread stopped");
}

impl Drop for ThreadedBackend {
    fn drop(&mut self) {
        self.control.resume();
        let _ = self.sender.send(GpuJob::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("GPU queue thread panicked");
            }
        }
    }
}

impl GraphicsBackend for ThreadedBackend {
    fn name(&self) -> &'static str {
        "Threaded"
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
        self.send(GpuJob::Signal(fence.clone(), value))
    }

    fn create_command_allocator(&mut self) -> BackendResult<AllocatorHandle> {
        self.device.create_command_allocator()
    }

    fn reset_command_allocator(&mut self, allocator: AllocatorHandle) -> BackendResult<()> {
        self.device.reset_command_allocator(allocator)
    }

    fn execute(&mut self, list: &CommandList) -> BackendResult<()> {
        self.device.validate_and_apply(list)?;
        self.send(GpuJob::Execute(list.commands().to_vec()))
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
