//! Stand-in for the process-wide memory-pressure tracker a real node would
//! wire in.

use std::sync::atomic::{AtomicI64, AtomicBool, Ordering};

/// Per-phase memory accounting handle. `close()` is idempotent; only the
/// first call affects the reported total.
#[derive(Debug, Default)]
pub struct RamAccounting {
    used: AtomicI64,
    closed: AtomicBool,
}

impl RamAccounting {
    pub fn new() -> Self {
        RamAccounting::default()
    }

    /// Records `bytes` as consumed by the phase. A no-op once closed.
    pub fn add_bytes(&self, bytes: i64) {
        if !self.closed.load(Ordering::Acquire) {
            self.used.fetch_add(bytes, Ordering::AcqRel);
        }
    }

    pub fn bytes_used(&self) -> i64 {
        self.used.load(Ordering::Acquire)
    }

    /// Releases the accounting, returning the bytes used at the moment of
    /// closing. Safe to call more than once; only the first call's snapshot
    /// is meaningful.
    pub fn close(&self) -> i64 {
        self.closed.store(true, Ordering::Release);
        self.bytes_used()
    }
}

/// Reported by [`crate::task::CollectTask::completion_future`] once searchers
/// and ram accounting have both been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionState {
    pub bytes_used: i64,
}
