//! The downstream sink every produced `BatchIterator<Row>` is ultimately
//! handed to, by both `CollectTask` and `CumulativePageBucketReceiver`.

use async_trait::async_trait;

use crate::batch_iterator::BatchIterator;
use crate::error::CollectError;

/// Receives the row iterator for a phase, or the failure that occurred
/// trying to build one. Exactly one of `iterator`/`failure` is meaningful
/// per call.
#[async_trait]
pub trait RowConsumer: Send + Sync {
    /// Hands the consumer the iterator it should drive, or the failure that
    /// prevented one from being built. Implementations typically spawn
    /// their own row-pulling loop here and resolve `completion_future` once
    /// it finishes.
    fn accept(&self, iterator: Option<Box<dyn BatchIterator>>, failure: Option<CollectError>);

    /// Whether this consumer needs a rewindable iterator. Forwarded to
    /// `CollectSource::get_iterator` as `support_move_to_start`.
    fn requires_scroll(&self) -> bool {
        false
    }

    /// Resolves once this consumer has fully processed (or failed to
    /// process) the iterator handed to it via `accept`. `CollectTask` awaits
    /// this to know when searchers and ram accounting can be released.
    async fn completion_future(&self) -> Result<(), CollectError>;
}
