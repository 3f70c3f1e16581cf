//! Distributed collect execution core.
//!
//! This crate drives a single *collect phase* of a query plan on one node:
//! [`task::CollectTask`] owns the phase's resources and lifecycle
//! (`created -> prepared -> running -> stopped`), while
//! [`receiver::CumulativePageBucketReceiver`] merges per-page bucket
//! streams pushed by upstream peers into the ordered row stream the
//! phase's [`consumer::RowConsumer`] pulls from.
//!
//! SQL parsing, planning, routing, shard-level searchers, and the wire
//! protocol that ships [`bucket::Bucket`]s between nodes are all external
//! collaborators.

pub mod batch_iterator;
pub mod batch_paging_iterator;
pub mod bucket;
pub mod config;
pub mod consumer;
pub mod error;
pub(crate) mod kill_signal;
pub mod paging_iterator;
pub mod phase;
pub mod pool;
pub mod ram_accounting;
pub mod receiver;
pub mod row;
pub mod searcher;
pub mod source;
pub mod system_collect_source;
pub mod task;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch_iterator::{BatchIterator, EmptyBatchIterator, VecBatchIterator};
pub use bucket::{Bucket, KeyedBucket};
pub use config::CollectConfig;
pub use consumer::RowConsumer;
pub use error::{CollectError, PhaseId, ReceiverError, SearcherId, SourceError, TaskError};
pub use paging_iterator::{ConcatPagingIterator, Need, Page, PagingIterator, SortMergePagingIterator};
pub use phase::{Phase, RowGranularity};
pub use pool::{PoolClass, ThreadPools};
pub use ram_accounting::{CompletionState, RamAccounting};
pub use receiver::{CumulativePageBucketReceiver, PageBucketReceiver, PageResultListener};
pub use row::{Cell, Row};
pub use searcher::Searcher;
pub use source::CollectSource;
pub use system_collect_source::{SystemCollectSource, SystemRecord, SystemTableCatalog, SystemTableDefinition};
pub use task::{CollectTask, TaskState};
