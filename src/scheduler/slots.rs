//! Frame-in-flight slots.
//!
//! The ring owns N [`FrameSlot`]s, used round-robin. Each slot owns the
//! allocator and command list for one frame and remembers the fence value
//! its last submission signals, so the next user of the slot knows what to
//! wait for.
//!
//! ```text
//! frame:   0    1    2    3    4
//! slot:    0    1    0    1    0        (N = 2)
//! fence:   1    2    3    4    5        pending value stored per slot
//!
//! begin(frame 2) waits for fence >= 1 (slot 0's previous submission)
//! ```

use crate::scheduler::command::{CommandAllocator, CommandList};

/// Per-slot state machine: `Idle → Recording → Submitted → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Not in use; any previous work has been retired.
    Idle,
    /// Commands are being recorded.
    Recording,
    /// Submitted to the queue; may still be executing.
    Submitted,
}

/// Resources of one frame in flight.
#[derive(Debug)]
pub struct FrameSlot {
    index: usize,
    allocator: CommandAllocator,
    list: CommandList,
    pending_fence_value: u64,
    state: SlotState,
}

impl FrameSlot {
    pub(crate) fn new(index: usize, allocator: CommandAllocator) -> Self {
        Self {
            index,
            allocator,
            list: CommandList::new(),
            pending_fence_value: 0,
            state: SlotState::Idle,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Fence value signaled by this slot's last submission (0 = never submitted).
    pub fn pending_fence_value(&self) -> u64 {
        self.pending_fence_value
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn allocator(&self) -> &CommandAllocator {
        &self.allocator
    }

    pub fn command_list(&self) -> &CommandList {
        &self.list
    }

    pub(crate) fn allocator_mut(&mut self) -> &mut CommandAllocator {
        &mut self.allocator
    }

    pub(crate) fn command_list_mut(&mut self) -> &mut CommandList {
        &mut self.list
    }

    /// Whether reusing this slot requires waiting for `completed` to advance.
    pub fn must_wait(&self, completed: u64) -> bool {
        self.pending_fence_value != 0 && completed < self.pending_fence_value
    }

    pub(crate) fn begin_recording(&mut self) {
        self.list.reset();
        self.state = SlotState::Recording;
    }

    pub(crate) fn mark_submitted(&mut self, fence_value: u64) {
        debug_assert!(
            fence_value > self.pending_fence_value,
            "Fence values must increase"
        );
        self.pending_fence_value = fence_value;
        self.state = SlotState::Submitted;
    }

    /// Return to idle without touching the pending fence value.
    pub(crate) fn retire(&mut self) {
        if self.list.is_recording() {
            self.list.close();
        }
        self.state = SlotState::Idle;
    }
}

/// Round-robin ring of frame slots.
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
}

impl FrameRing {
    /// Build a ring from one allocator per slot.
    ///
    /// # Panics
    ///
    /// Panics if `allocators` is empty.
    pub(crate) fn new(allocators: Vec<CommandAllocator>) -> Self {
        assert!(!allocators.is_empty(), "Must have at least 1 frame in flight");
        let slots = allocators
            .into_iter()
            .enumerate()
            .map(|(index, allocator)| FrameSlot::new(index, allocator))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot used by the given frame index.
    pub fn slot_for_frame(&self, frame_index: usize) -> usize {
        frame_index % self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut FrameSlot> {
        self.slots.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSlot> {
        self.slots.iter()
    }

    /// Highest fence value any slot is waiting on.
    pub fn max_pending_fence_value(&self) -> u64 {
        self.slots
            .iter()
            .map(|s| s.pending_fence_value)
            .max()
            .unwrap_or(0)
    }

    /// Retire every submitted slot whose work the GPU has finished.
    pub(crate) fn retire_completed(&mut self, completed: u64) {
        for slot in &mut self.slots {
            if slot.state == SlotState::Submitted && !slot.must_wait(completed) {
                slot.retire();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AllocatorHandle;

    fn ring(n: usize) -> FrameRing {
        FrameRing::new(
            (0..n)
                .map(|i| CommandAllocator::new(AllocatorHandle(i as u64 + 1)))
                .collect(),
        )
    }

    #[test]
    fn test_new_slots_are_idle() {
        let ring = ring(3);
        assert_eq!(ring.len(), 3);
        for (i, slot) in ring.iter().enumerate() {
            assert_eq!(slot.index(), i);
            assert_eq!(slot.state(), SlotState::Idle);
            assert_eq!(slot.pending_fence_value(), 0);
        }
    }

    #[test]
    #[should_panic(expected = "at least 1 frame")]
    fn test_empty_ring_panics() {
        let _ = FrameRing::new(Vec::new());
    }

    #[test]
    fn test_slot_for_frame_wraps() {
        let ring = ring(2);
        let slots: Vec<usize> = (0..5).map(|f| ring.slot_for_frame(f)).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_never_submitted_slot_never_waits() {
        let ring = ring(1);
        assert!(!ring.get(0).unwrap().must_wait(0));
    }

    #[test]
    fn test_must_wait_until_completed() {
        let mut ring = ring(2);
        let slot = ring.get_mut(0).unwrap();
        slot.begin_recording();
        slot.mark_submitted(4);
        assert!(slot.must_wait(3));
        assert!(!slot.must_wait(4));
        assert!(!slot.must_wait(5));
    }

    #[test]
    fn test_retire_completed() {
        let mut ring = ring(2);
        for (index, value) in [(0, 1), (1, 2)] {
            let slot = ring.get_mut(index).unwrap();
            slot.begin_recording();
            slot.command_list_mut().close();
            slot.mark_submitted(value);
        }
        assert_eq!(ring.max_pending_fence_value(), 2);

        ring.retire_completed(1);
        assert_eq!(ring.get(0).unwrap().state(), SlotState::Idle);
        assert_eq!(ring.get(1).unwrap().state(), SlotState::Submitted);
        assert_eq!(ring.get(0).unwrap().pending_fence_value(), 1);
    }
}
