//! Command recording.
//!
//! A [`CommandList`] records GPU operations on the CPU and is handed to the
//! backend as a unit. Its backing memory belongs to a [`CommandAllocator`],
//! which can only be reset once the GPU has finished every list recorded
//! from it.

use crate::backend::{
    AllocatorHandle, PipelineHandle, ResourceState, TextureHandle, TextureViewHandle, Viewport,
};

/// Which uniform region a binding refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformScope {
    Frame,
    Object,
    ClusterTable,
}

/// A single recorded GPU operation
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier {
        texture: TextureHandle,
        before: ResourceState,
        after: ResourceState,
    },
    SetViewport(Viewport),
    ClearColor {
        view: TextureViewHandle,
        color: [f32; 4],
    },
    ClearDepth {
        view: TextureViewHandle,
        depth: f32,
    },
    SetRenderTargets {
        color: Option<TextureViewHandle>,
        depth: Option<TextureViewHandle>,
    },
    BindPipeline(PipelineHandle),
    BindUniforms {
        scope: UniformScope,
        offset: u64,
        size: u64,
    },
    Draw {
        first_index: u32,
        index_count: u32,
        base_vertex: i32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    TraceRays {
        width: u32,
        height: u32,
    },
}

/// Backing memory for command recording, one per frame slot.
#[derive(Debug)]
pub struct CommandAllocator {
    handle: AllocatorHandle,
    reset_count: u64,
}

impl CommandAllocator {
    pub(crate) fn new(handle: AllocatorHandle) -> Self {
        Self {
            handle,
            reset_count: 0,
        }
    }

    pub fn handle(&self) -> AllocatorHandle {
        self.handle
    }

    /// Number of times the allocator has been recycled.
    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    pub(crate) fn mark_reset(&mut self) {
        self.reset_count += 1;
    }
}

/// Recording state of a command list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    Recording,
    Closed,
}

/// A sequence of GPU operations submitted atomically.
#[derive(Debug, Clone)]
pub struct CommandList {
    commands: Vec<Command>,
    state: ListState,
}

impl Default for CommandList {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandList {
    /// Create an empty list, closed until [`CommandList::reset`] is called.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            state: ListState::Closed,
        }
    }

    /// Discard recorded commands and start recording again.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.state = ListState::Recording;
    }

    /// Finish recording. Closed lists can be executed but not appended to.
    pub fn close(&mut self) {
        self.state = ListState::Closed;
    }

    pub fn state(&self) -> ListState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == ListState::Recording
    }

    /// Append a command.
    ///
    /// # Panics
    ///
    /// Panics if the list is closed.
    pub fn record(&mut self, command: Command) {
        assert!(
            self.is_recording(),
            "Cannot record {:?} into a closed command list",
            command
        );
        log::trace!("Recording {:?}", command);
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of draw commands recorded so far.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .count()
    }
}
