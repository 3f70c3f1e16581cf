//! A one-shot, settable-once cancellation cause shared between a driver of
//! async work and whatever it's driving, without either side needing a
//! `&mut` handle to the other.
//!
//! `CumulativePageBucketReceiver` and `BatchPagingIterator` share one for
//! `kill`; `CollectTask` shares a second one with whatever `BatchIterator`
//! its `CollectSource` produced.

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::CollectError;

#[derive(Default)]
pub(crate) struct KillSignal {
    cause: Mutex<Option<CollectError>>,
    notify: Notify,
}

impl KillSignal {
    /// Stores `cause` if this is the first call; returns whether it won the
    /// race. Idempotent - only the first cause is ever kept.
    pub(crate) fn set(&self, cause: CollectError) -> bool {
        let mut guard = self.cause.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(cause);
        drop(guard);
        self.notify.notify_waiters();
        true
    }

    pub(crate) fn cause(&self) -> Option<CollectError> {
        self.cause.lock().clone()
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.cause.lock().is_some()
    }

    /// Resolves once `set` has been called, including if it already has.
    pub(crate) async fn notified(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_killed() {
                return;
            }
            notified.await;
        }
    }
}
