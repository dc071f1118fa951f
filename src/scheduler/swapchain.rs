//! Swapchain and depth buffer state tracking.
//!
//! Every texture the scheduler owns carries the [`ResourceState`] it will be
//! in once previously recorded work executes. Transitions record barriers
//! into a command list and update the tracked state in the same step.

use crate::backend::{
    BackendResult, Extent2d, GraphicsBackend, ResourceState, TextureFormat, TextureHandle,
    TextureViewHandle,
};
use crate::scheduler::command::{Command, CommandList};

/// A texture together with its view and tracked state
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedTexture {
    texture: TextureHandle,
    view: TextureViewHandle,
    extent: Extent2d,
    format: TextureFormat,
    state: ResourceState,
}

impl TrackedTexture {
    fn new(
        texture: TextureHandle,
        view: TextureViewHandle,
        extent: Extent2d,
        format: TextureFormat,
        state: ResourceState,
    ) -> Self {
        Self {
            texture,
            view,
            extent,
            format,
            state,
        }
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Record a barrier to `after` if the texture is not already there.
    ///
    /// Returns `true` if a barrier was recorded.
    pub fn transition(&mut self, after: ResourceState, list: &mut CommandList) -> bool {
        if self.state == after {
            return false;
        }
        list.record(Command::Barrier {
            texture: self.texture,
            before: self.state,
            after,
        });
        self.state = after;
        true
    }

    /// Overwrite the tracked state without recording anything.
    ///
    /// Only valid when recorded barriers were discarded before execution.
    pub(crate) fn restore_state(&mut self, state: ResourceState) {
        self.state = state;
    }
}

/// The N display buffers and the shared depth buffer.
#[derive(Debug)]
pub struct SwapchainResources {
    buffers: Vec<TrackedTexture>,
    depth: TrackedTexture,
    extent: Extent2d,
}

impl SwapchainResources {
    /// Create the swapchain images and the depth buffer.
    ///
    /// Images start in `Present`; the depth buffer starts in `Common` and is
    /// moved to `DepthWrite` by the first frame that records into it.
    pub(crate) fn create(
        backend: &mut dyn GraphicsBackend,
        count: usize,
        extent: Extent2d,
        format: TextureFormat,
        depth_format: TextureFormat,
    ) -> BackendResult<Self> {
        let images = backend.create_swapchain_textures(count, extent, format)?;

        let mut buffers = Vec::with_capacity(images.len());
        for &texture in &images {
            match backend.create_texture_view(texture) {
                Ok(view) => buffers.push(TrackedTexture::new(
                    texture,
                    view,
                    extent,
                    format,
                    ResourceState::Present,
                )),
                Err(e) => {
                    release_all(backend, &images, None);
                    return Err(e);
                }
            }
        }

        let depth_texture = match backend.create_depth_texture(extent, depth_format) {
            Ok(texture) => texture,
            Err(e) => {
                release_all(backend, &images, None);
                return Err(e);
            }
        };
        let depth_view = match backend.create_texture_view(depth_texture) {
            Ok(view) => view,
            Err(e) => {
                release_all(backend, &images, Some(depth_texture));
                return Err(e);
            }
        };

        let depth = TrackedTexture::new(
            depth_texture,
            depth_view,
            extent,
            depth_format,
            ResourceState::Common,
        );

        log::info!(
            "Swapchain ready: {} buffers at {}x{}",
            buffers.len(),
            extent.width,
            extent.height
        );

        Ok(Self {
            buffers,
            depth,
            extent,
        })
    }

    /// Release every texture. The GPU must no longer reference them.
    pub(crate) fn release(self, backend: &mut dyn GraphicsBackend) {
        let images: Vec<TextureHandle> = self.buffers.iter().map(|b| b.texture).collect();
        release_all(backend, &images, Some(self.depth.texture));
        log::debug!("Released {} swapchain buffers and depth buffer", images.len());
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer(&self, index: usize) -> Option<&TrackedTexture> {
        self.buffers.get(index)
    }

    pub fn buffers(&self) -> &[TrackedTexture] {
        &self.buffers
    }

    pub fn depth(&self) -> &TrackedTexture {
        &self.depth
    }

    /// Mutable access to a display buffer and the depth buffer together.
    pub(crate) fn targets_mut(&mut self, index: usize) -> Option<(&mut TrackedTexture, &mut TrackedTexture)> {
        let depth = &mut self.depth;
        self.buffers.get_mut(index).map(|buffer| (buffer, depth))
    }
}

fn release_all(
    backend: &mut dyn GraphicsBackend,
    images: &[TextureHandle],
    depth: Option<TextureHandle>,
) {
    for &texture in images.iter().chain(depth.iter()) {
        backend.release_texture(texture);
    }
}
