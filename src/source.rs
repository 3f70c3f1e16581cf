//! `CollectSource`: the plug-in seam a `CollectTask` asks to build the batch
//! iterator for its phase. Shard-based implementations (reading
//! Lucene-backed shards) are out of scope; `SystemCollectSource`
//! (`system_collect_source.rs`) is the one concrete implementation this
//! crate ships, illustrating the interface.

use async_trait::async_trait;

use crate::batch_iterator::BatchIterator;
use crate::error::CollectError;
use crate::phase::Phase;
use crate::task::CollectTask;

/// Builds a lazily-producing batch iterator for one collect phase.
#[async_trait]
pub trait CollectSource: Send + Sync {
    /// `support_move_to_start` demands restartability: implementations that
    /// cannot naturally rewind the underlying source must materialize the
    /// produced sequence so `BatchIterator::move_to_start` can be honored.
    async fn get_iterator(
        &self,
        phase: &Phase,
        task: &CollectTask,
        support_move_to_start: bool,
    ) -> Result<Box<dyn BatchIterator>, CollectError>;
}
