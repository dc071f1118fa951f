//! Frame pipeline scheduling.
//!
//! The [`FrameScheduler`] lets the CPU record frame K+1 while the GPU still
//! executes frame K, without ever reusing a frame's resources before the GPU
//! is done with them.
//!
//! # Frame Lifecycle
//!
//! ```text
//! begin_frame ──► record ──► end_recording ──► execute ──► present
//!     │                                          │            │
//!     │ wait: fence >= slot.pending              │            └─ frame_index += 1 (mod N)
//!     │ reset allocator                          └─ fence.current += 1
//!     │ Present → RenderTarget                      signal, slot.pending = value
//!     │ clear color/depth, bind targets
//! ```
//!
//! `submit` is `end_recording` followed by `execute`.
//!
//! # Pacing
//!
//! With N slots, frame K reuses the slot of frame K-N. `begin_frame` blocks
//! exactly when the fence has not reached the value that frame signaled,
//! which caps the CPU at N frames ahead of the GPU.
//!
//! # Errors
//!
//! Per-frame failures (allocator reset, execute, present) abandon the frame
//! and leave slot and fence bookkeeping consistent, so the next
//! `begin_frame` can proceed. A lost device or a fence wait timeout makes the
//! scheduler refuse further frames.

mod command;
mod slots;
mod swapchain;
mod sync;

pub use command::{Command, CommandAllocator, CommandList, ListState, UniformScope};
pub use slots::{FrameRing, FrameSlot, SlotState};
pub use swapchain::{SwapchainResources, TrackedTexture};
pub use sync::Fence;

use std::time::Duration;

use crate::backend::{BackendError, Extent2d, GraphicsBackend, ResourceState, TextureFormat, Viewport};
use crate::error::{RenderError, Result};

/// Parameters for creating a [`FrameScheduler`]
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of frame slots (N >= 1).
    pub frames_in_flight: usize,
    pub extent: Extent2d,
    pub format: TextureFormat,
    pub depth_format: TextureFormat,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    /// `None` waits forever on the fence.
    pub fence_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            extent: Extent2d::new(1280, 720),
            format: TextureFormat::Bgra8UnormSrgb,
            depth_format: TextureFormat::Depth32Float,
            clear_color: [0.282, 0.239, 0.545, 1.0],
            clear_depth: 1.0,
            fence_timeout: None,
        }
    }
}

/// Progress of the frame currently being built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Recording,
    Closed,
    Submitted,
}

/// Result of [`FrameScheduler::begin_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBegin {
    /// Slot recording this frame.
    pub slot: usize,
    /// Frame index within the ring (`[0, N)`).
    pub frame_index: usize,
    /// Whether the CPU had to block on the fence.
    pub waited: bool,
    /// Fence value that had to be reached before recording.
    pub required_fence_value: u64,
    pub extent: Extent2d,
}

#[derive(Debug, Clone, Copy)]
struct ActiveFrame {
    slot: usize,
    phase: FramePhase,
    color_entry_state: ResourceState,
    depth_entry_state: ResourceState,
}

/// Multi-frame-in-flight scheduler over a single queue.
#[derive(Debug)]
pub struct FrameScheduler {
    config: SchedulerConfig,
    fence: Fence,
    ring: FrameRing,
    swapchain: Option<SwapchainResources>,
    frame_index: usize,
    presented_frames: u64,
    active: Option<ActiveFrame>,
    device_lost: bool,
}

impl FrameScheduler {
    /// Create the fence, one allocator per slot, and the swapchain.
    ///
    /// Any failure is fatal: no scheduler is returned.
    pub fn new(backend: &mut dyn GraphicsBackend, config: SchedulerConfig) -> Result<Self> {
        if config.frames_in_flight == 0 {
            return Err(RenderError::InvalidParameter(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if config.extent.is_empty() {
            return Err(RenderError::InvalidParameter(format!(
                "initial extent {}x{} is empty",
                config.extent.width, config.extent.height
            )));
        }

        let fence = backend.create_fence()?;
        let allocators = (0..config.frames_in_flight)
            .map(|_| backend.create_command_allocator().map(CommandAllocator::new))
            .collect::<std::result::Result<Vec<_>, BackendError>>()?;

        let swapchain = SwapchainResources::create(
            backend,
            config.frames_in_flight,
            config.extent,
            config.format,
            config.depth_format,
        )?;

        log::debug!(
            "Frame scheduler ready on {} ({} frames in flight)",
            backend.name(),
            config.frames_in_flight
        );

        Ok(Self {
            ring: FrameRing::new(allocators),
            config,
            fence,
            swapchain: Some(swapchain),
            frame_index: 0,
            presented_frames: 0,
            active: None,
            device_lost: false,
        })
    }

    /// Start recording the next frame.
    ///
    /// Blocks until the GPU has finished the previous submission from the
    /// same slot, then resets the slot's allocator and records the
    /// `Present → RenderTarget` transition, clears, viewport and target
    /// bindings.
    pub fn begin_frame(&mut self, backend: &mut dyn GraphicsBackend) -> Result<FrameBegin> {
        if self.device_lost {
            return Err(RenderError::DeviceLost);
        }
        if let Some(active) = &self.active {
            return Err(RenderError::InvalidFrameState(format!(
                "frame in slot {} is still {:?}",
                active.slot, active.phase
            )));
        }
        let extent = match &self.swapchain {
            Some(swapchain) => swapchain.extent(),
            None => {
                return Err(RenderError::InvalidFrameState(
                    "swapchain unavailable; resize to recreate it".into(),
                ))
            }
        };

        let slot_index = self.ring.slot_for_frame(self.frame_index);
        let required = self.slot_ref(slot_index)?.pending_fence_value();
        let waited = self.slot_ref(slot_index)?.must_wait(self.fence.completed_value());
        if waited {
            log::trace!(
                "Slot {} waiting for fence {} (completed {})",
                slot_index,
                required,
                self.fence.completed_value()
            );
            self.wait_for(required)?;
        }
        self.ring.retire_completed(self.fence.completed_value());

        let slot = self
            .ring
            .get_mut(slot_index)
            .ok_or_else(|| RenderError::InvalidFrameState(format!("missing slot {}", slot_index)))?;
        if let Err(e) = backend.reset_command_allocator(slot.allocator().handle()) {
            log::error!("Failed to reset allocator for slot {}: {}", slot_index, e);
            return Err(self.backend_error(e));
        }
        slot.allocator_mut().mark_reset();
        slot.begin_recording();

        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| RenderError::InvalidFrameState("swapchain unavailable".into()))?;
        let (color, depth) = swapchain
            .targets_mut(slot_index)
            .ok_or_else(|| RenderError::InvalidFrameState(format!("no buffer for slot {}", slot_index)))?;
        let color_entry_state = color.state();
        let depth_entry_state = depth.state();

        let list = slot.command_list_mut();
        color.transition(ResourceState::RenderTarget, list);
        depth.transition(ResourceState::DepthWrite, list);
        list.record(Command::SetViewport(Viewport::full(extent)));
        list.record(Command::ClearColor {
            view: color.view(),
            color: self.config.clear_color,
        });
        list.record(Command::ClearDepth {
            view: depth.view(),
            depth: self.config.clear_depth,
        });
        list.record(Command::SetRenderTargets {
            color: Some(color.view()),
            depth: Some(depth.view()),
        });

        self.active = Some(ActiveFrame {
            slot: slot_index,
            phase: FramePhase::Recording,
            color_entry_state,
            depth_entry_state,
        });

        log::trace!("Began frame {} in slot {}", self.frame_index, slot_index);

        Ok(FrameBegin {
            slot: slot_index,
            frame_index: self.frame_index,
            waited,
            required_fence_value: required,
            extent,
        })
    }

    /// The command list of the frame being recorded.
    pub fn command_list(&mut self) -> Result<&mut CommandList> {
        let slot = self.expect_phase(FramePhase::Recording, "record commands")?;
        self.slot_mut(slot).map(|s| s.command_list_mut())
    }

    /// Transition the display buffer back to `Present` and close the list.
    pub fn end_recording(&mut self) -> Result<()> {
        let slot_index = self.expect_phase(FramePhase::Recording, "end recording")?;
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| RenderError::InvalidFrameState("swapchain unavailable".into()))?;
        let (color, _) = swapchain
            .targets_mut(slot_index)
            .ok_or_else(|| RenderError::InvalidFrameState(format!("no buffer for slot {}", slot_index)))?;
        let slot = self
            .ring
            .get_mut(slot_index)
            .ok_or_else(|| RenderError::InvalidFrameState(format!("missing slot {}", slot_index)))?;
        let list = slot.command_list_mut();
        color.transition(ResourceState::Present, list);
        list.close();
        self.set_phase(FramePhase::Closed);
        Ok(())
    }

    /// Execute the closed list and signal the fence with the next value.
    ///
    /// Returns the fence value stored as the slot's pending value.
    pub fn execute(&mut self, backend: &mut dyn GraphicsBackend) -> Result<u64> {
        let slot_index = self.expect_phase(FramePhase::Closed, "execute")?;

        let result = match self.ring.get(slot_index) {
            Some(slot) => backend.execute(slot.command_list()),
            None => Err(BackendError::InvalidHandle(format!("slot {}", slot_index))),
        };
        if let Err(e) = result {
            log::error!("Failed to execute frame in slot {}: {}", slot_index, e);
            self.abandon_frame();
            return Err(self.backend_error(e));
        }

        let value = self.fence.next_value();
        self.slot_mut(slot_index)?.mark_submitted(value);
        self.set_phase(FramePhase::Submitted);

        if let Err(e) = backend.signal(&self.fence, value) {
            log::error!("Failed to signal fence value {}: {}", value, e);
            // An unsignaled value can never be waited on again.
            self.device_lost = true;
            self.active = None;
            return Err(RenderError::DeviceLost);
        }

        log::trace!("Slot {} submitted with fence value {}", slot_index, value);
        Ok(value)
    }

    /// `end_recording` followed by `execute`.
    pub fn submit(&mut self, backend: &mut dyn GraphicsBackend) -> Result<u64> {
        self.end_recording()?;
        self.execute(backend)
    }

    /// Present the submitted frame and advance to the next slot.
    ///
    /// On failure the frame index does not advance; the next frame reuses
    /// the same slot after waiting for the work just submitted.
    pub fn present(&mut self, backend: &mut dyn GraphicsBackend) -> Result<()> {
        let slot_index = self.expect_phase(FramePhase::Submitted, "present")?;
        self.active = None;

        match backend.present(slot_index) {
            Ok(()) => {
                self.frame_index = (self.frame_index + 1) % self.ring.len();
                self.presented_frames += 1;
                Ok(())
            }
            Err(e) => {
                log::error!("Present failed for slot {}: {}", slot_index, e);
                Err(self.backend_error(e))
            }
        }
    }

    /// Discard the frame in progress.
    ///
    /// Unsubmitted commands are dropped and tracked texture states rolled
    /// back. A submitted frame keeps its pending fence value.
    pub fn abandon_frame(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        log::warn!("Abandoning frame in slot {} ({:?})", active.slot, active.phase);
        if active.phase == FramePhase::Submitted {
            return;
        }
        if let Some((color, depth)) = self
            .swapchain
            .as_mut()
            .and_then(|s| s.targets_mut(active.slot))
        {
            color.restore_state(active.color_entry_state);
            depth.restore_state(active.depth_entry_state);
        }
        if let Some(slot) = self.ring.get_mut(active.slot) {
            slot.retire();
        }
    }

    /// Signal a fresh fence value and block until the GPU reaches it.
    pub fn flush(&mut self, backend: &mut dyn GraphicsBackend) -> Result<()> {
        if self.device_lost {
            return Err(RenderError::DeviceLost);
        }
        let value = self.fence.next_value();
        if let Err(e) = backend.signal(&self.fence, value) {
            log::error!("Failed to signal flush value {}: {}", value, e);
            self.device_lost = true;
            return Err(RenderError::DeviceLost);
        }
        self.wait_for(value)?;
        self.ring.retire_completed(value);
        log::trace!("Flushed queue at fence value {}", value);
        Ok(())
    }

    /// Recreate the swapchain and depth buffer at a new size.
    ///
    /// A zero width or height is ignored and returns `Ok(false)`. Otherwise
    /// any frame in progress is abandoned, the queue is flushed before any
    /// buffer is released, and the frame index restarts at 0.
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> Result<bool> {
        let extent = Extent2d::new(width, height);
        if extent.is_empty() {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(false);
        }
        if self.device_lost {
            return Err(RenderError::DeviceLost);
        }

        self.abandon_frame();
        self.flush(backend)?;

        if let Some(old) = self.swapchain.take() {
            old.release(backend);
        }

        match SwapchainResources::create(
            backend,
            self.ring.len(),
            extent,
            self.config.format,
            self.config.depth_format,
        ) {
            Ok(swapchain) => {
                self.swapchain = Some(swapchain);
                self.config.extent = extent;
                self.frame_index = 0;
                log::info!("Resized swapchain to {}x{}", width, height);
                Ok(true)
            }
            Err(e) => {
                log::error!("Failed to resize swapchain to {}x{}: {}", width, height, e);
                Err(self.backend_error(e))
            }
        }
    }

    /// Flush and release the swapchain.
    pub fn shutdown(&mut self, backend: &mut dyn GraphicsBackend) -> Result<()> {
        self.abandon_frame();
        let flushed = if self.device_lost {
            Ok(())
        } else {
            self.flush(backend)
        };
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.release(backend);
        }
        flushed
    }

    /// Whether the next `begin_frame` would have to wait on the fence.
    pub fn would_block(&self) -> bool {
        self.ring
            .get(self.ring.slot_for_frame(self.frame_index))
            .map(|slot| slot.must_wait(self.fence.completed_value()))
            .unwrap_or(false)
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    /// Total frames presented successfully.
    pub fn presented_frames(&self) -> u64 {
        self.presented_frames
    }

    /// Slot of the frame in progress, if any.
    pub fn current_slot(&self) -> Option<usize> {
        self.active.map(|a| a.slot)
    }

    pub fn phase(&self) -> Option<FramePhase> {
        self.active.map(|a| a.phase)
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.ring.get(index)
    }

    /// Pending fence value of every slot, by slot index.
    pub fn pending_fence_values(&self) -> Vec<u64> {
        self.ring.iter().map(|s| s.pending_fence_value()).collect()
    }

    pub fn swapchain(&self) -> Option<&SwapchainResources> {
        self.swapchain.as_ref()
    }

    pub fn extent(&self) -> Extent2d {
        self.config.extent
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    /// Record that an error observed elsewhere lost the device.
    pub(crate) fn note_error(&mut self, error: &RenderError) {
        if error.is_device_lost() {
            self.device_lost = true;
        }
    }

    /// Convert a backend failure, latching device loss so every later call
    /// reports the same `RenderError::DeviceLost`.
    fn backend_error(&mut self, error: BackendError) -> RenderError {
        if error == BackendError::DeviceLost {
            self.device_lost = true;
            RenderError::DeviceLost
        } else {
            error.into()
        }
    }

    fn wait_for(&mut self, value: u64) -> Result<()> {
        match self.config.fence_timeout {
            None => {
                self.fence.wait(value);
                Ok(())
            }
            Some(timeout) => {
                if self.fence.wait_timeout(value, timeout) {
                    Ok(())
                } else {
                    let completed = self.fence.completed_value();
                    log::error!(
                        "GPU did not reach fence value {} within {:?} (completed {}); treating device as lost",
                        value,
                        timeout,
                        completed
                    );
                    self.device_lost = true;
                    Err(RenderError::FenceTimeout {
                        value,
                        completed,
                        timeout,
                    })
                }
            }
        }
    }

    fn expect_phase(&self, phase: FramePhase, action: &str) -> Result<usize> {
        match self.active {
            Some(active) if active.phase == phase => Ok(active.slot),
            Some(active) => Err(RenderError::InvalidFrameState(format!(
                "cannot {} while frame is {:?}",
                action, active.phase
            ))),
            None => Err(RenderError::InvalidFrameState(format!(
                "cannot {} without a frame in progress",
                action
            ))),
        }
    }

    fn set_phase(&mut self, phase: FramePhase) {
        if let Some(active) = self.active.as_mut() {
            active.phase = phase;
        }
    }

    fn slot_ref(&self, index: usize) -> Result<&FrameSlot> {
        self.ring
            .get(index)
            .ok_or_else(|| RenderError::InvalidFrameState(format!("missing slot {}", index)))
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut FrameSlot> {
        self.ring
            .get_mut(index)
            .ok_or_else(|| RenderError::InvalidFrameState(format!("missing slot {}", index)))
    }
}
