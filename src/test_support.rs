//! Test doubles shared across this crate's own unit tests. Not part of the
//! public surface - each `tests/` integration file builds its own small
//! equivalents instead of reaching back into these `#[cfg(test)]`-only
//! internals.
#![cfg(test)]

use std::sync::OnceLock;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::batch_iterator::BatchIterator;
use crate::consumer::RowConsumer;
use crate::error::CollectError;

/// Records whatever it was handed by `accept`, and considers itself
/// "complete" the instant that happens: enough behavior to drive
/// `CollectTask`'s lifecycle tests without needing a real row-pulling
/// consumer.
#[derive(Default)]
pub(crate) struct RecordingConsumer {
    accepted: Mutex<Option<(bool, Option<String>)>>,
    result: OnceLock<Result<(), CollectError>>,
    notify: Notify,
}

impl RecordingConsumer {
    pub(crate) fn new() -> Self {
        RecordingConsumer::default()
    }

    pub(crate) fn accepted(&self) -> Option<(bool, Option<String>)> {
        self.accepted.lock().clone()
    }
}

#[async_trait]
impl RowConsumer for RecordingConsumer {
    fn accept(&self, iterator: Option<Box<dyn BatchIterator>>, failure: Option<CollectError>) {
        let had_iterator = iterator.is_some();
        let message = failure.as_ref().map(|f| f.to_string());
        *self.accepted.lock() = Some((had_iterator, message));

        let result = match failure {
            Some(err) => Err(err),
            None => Ok(()),
        };
        if self.result.set(result).is_ok() {
            self.notify.notify_waiters();
        }
    }

    async fn completion_future(&self) -> Result<(), CollectError> {
        loop {
            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }
            notified.await;
        }
    }
}
