// src/load_balancer/round_robin.rs
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rotation counter shared by every in-flight dispatch.
///
/// Each call to [`next_index`](Self::next_index) claims exactly one position,
/// so concurrent callers never observe the same position twice. The counter
/// wraps at `usize::MAX`.
#[derive(Debug, Default)]
pub struct RoundRobinCursor {
    position: AtomicUsize,
}

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(position: usize) -> Self {
        Self {
            position: AtomicUsize::new(position),
        }
    }

    /// Claims the current position and maps it into `0..len`.
    ///
    /// Returns `None` when `len` is zero.
    pub fn next_index(&self, len: usize) -> Option<usize> {
        self.position.fetch_add(1, Ordering::Relaxed).checked_rem(len)
    }

    /// Moves the cursor past `count` positions that were inspected but not used.
    pub fn skip(&self, count: usize) {
        if count > 0 {
            self.position.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }
}
