//! CPU-GPU synchronization primitives.
//!
//! The renderer uses a single timeline fence: a monotonically increasing
//! counter. The CPU reserves the next value for every submission
//! ([`Fence::next_value`]) and the GPU queue reports progress by signaling
//! values as the work preceding them completes ([`Fence::signal`]).
//!
//! ```text
//!   CPU:  next_value() -> 1     next_value() -> 2     next_value() -> 3
//!              |                      |                      |
//!   GPU:  ...work...  signal(1)  ...work...  signal(2)  ...work...
//!
//!   completed_value(): 0 ──────────► 1 ───────────────► 2
//! ```
//!
//! Waiting blocks on a condition variable until `completed_value >= value`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct FenceShared {
    id: u64,
    /// Highest value reached by the GPU.
    completed: Mutex<u64>,
    signaled: Condvar,
    /// Highest value handed out to the CPU.
    current: AtomicU64,
}

/// Timeline fence shared between the submission thread and the GPU queue.
///
/// Cloning a fence shares the underlying counter, which is how a backend's
/// queue gets a handle it can signal from another thread.
///
/// # Example
///
/// ```
/// use clustered_renderer::scheduler::Fence;
///
/// let fence = Fence::new(0);
/// let value = fence.next_value();
/// assert!(!fence.is_reached(value));
///
/// // The GPU side finishes the work and reports it.
/// fence.signal(value);
/// fence.wait(value);
/// assert_eq!(fence.completed_value(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Fence {
    shared: Arc<FenceShared>,
}

impl Fence {
    /// Create a fence with both counters at zero.
    pub fn new(id: u64) -> Self {
        Self {
            shared: Arc::new(FenceShared {
                id,
                completed: Mutex::new(0),
                signaled: Condvar::new(),
                current: AtomicU64::new(0),
            }),
        }
    }

    /// Get the fence's identifier (for debugging).
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// The last value the GPU reported as reached.
    pub fn completed_value(&self) -> u64 {
        *self.shared.completed.lock()
    }

    /// The last value reserved by the CPU.
    pub fn current_value(&self) -> u64 {
        self.shared.current.load(Ordering::Acquire)
    }

    /// Reserve the next timeline value for a submission.
    pub fn next_value(&self) -> u64 {
        self.shared.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Mark `value` as reached and wake any waiters.
    ///
    /// Signals never move the counter backwards; a stale value is ignored.
    pub fn signal(&self, value: u64) {
        let mut completed = self.shared.completed.lock();
        if value > *completed {
            *completed = value;
            log::trace!("Fence {} reached {}", self.shared.id, value);
            self.shared.signaled.notify_all();
        }
    }

    /// Check whether the GPU has reached `value` (non-blocking).
    pub fn is_reached(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// Block until the GPU reaches `value`.
    ///
    /// There is no upper bound on the wait. Use [`Fence::wait_timeout`] when a
    /// hung queue must surface as an error instead.
    pub fn wait(&self, value: u64) {
        let mut completed = self.shared.completed.lock();
        while *completed < value {
            self.shared.signaled.wait(&mut completed);
        }
    }

    /// Block until the GPU reaches `value` or `timeout` elapses.
    ///
    /// Returns `true` if the value was reached.
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.shared.completed.lock();
        while *completed < value {
            if self
                .shared
                .signaled
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                return *completed >= value;
            }
        }
        true
    }
}
