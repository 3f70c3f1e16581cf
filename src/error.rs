//! Error taxonomy for the collect execution core.
//!
//! One small enum per subsystem, with `#[from]` conversions at the
//! boundaries and `Arc` wrapping where a single error instance needs to
//! reach more than one listener.

use std::sync::Arc;
use uuid::Uuid;

/// Unique id of a collect phase, used to tag errors and tracing spans.
pub type PhaseId = Uuid;

/// Id under which a searcher is registered with a [`crate::task::CollectTask`].
pub type SearcherId = u64;

/// Errors raised by [`crate::task::CollectTask`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// A second searcher was registered under an id that was already present.
    /// Both the old and the new handle are closed before this is returned.
    #[error("searcher with id {id} is already registered for this phase")]
    DuplicateSearcher { id: SearcherId },

    /// `start()` was called before `prepare()` ever ran.
    #[error("task must be prepared before it can be started")]
    MustPrepareFirst,

    /// `start()` was called while the task was already running or past it.
    #[error("task has already been started")]
    AlreadyStarted,

    /// The phase was cancelled; carries the cause that triggered the kill.
    #[error("job killed: {0}")]
    JobKilled(#[from] JobKilled),
}

/// The default cause used when `kill(None)` is called.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct JobKilled {
    pub reason: Arc<str>,
}

impl JobKilled {
    pub fn new(reason: impl Into<Arc<str>>) -> Self {
        JobKilled {
            reason: reason.into(),
        }
    }
}

impl Default for JobKilled {
    fn default() -> Self {
        JobKilled::new("job was killed")
    }
}

/// Errors raised by [`crate::receiver::CumulativePageBucketReceiver`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReceiverError {
    /// The same bucket index was set twice within one page.
    #[error("duplicate bucket for upstream {idx} on phase {phase_id} (node {node})")]
    DuplicateBucket {
        node: Arc<str>,
        phase_id: PhaseId,
        idx: usize,
    },

    /// The phase was killed; stored as `lastThrowable` and surfaced to the
    /// processing future and to any still-parked `fetch_more` caller.
    #[error("job killed: {0}")]
    JobKilled(#[from] JobKilled),

    /// The consumer failed while accepting rows.
    #[error("downstream consumer failed: {0}")]
    DownstreamFailure(Arc<str>),
}

/// Errors raised by [`crate::source::CollectSource`] implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// `schema` does not match any known catalog (`information_schema`,
    /// `sys`, `pg_catalog`, ...).
    #[error("schema unknown: {0}")]
    SchemaUnknown(String),

    /// `relation` is not defined in the (known) `schema`.
    #[error("relation unknown: {schema}.{relation}")]
    RelationUnknown { schema: String, relation: String },
}

/// Top-level error uniting the per-subsystem errors, used wherever a single
/// propagation path crosses subsystem boundaries (e.g. the task forwarding a
/// kill cause into the receiver's `batch_iterator.kill`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollectError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Receiver(#[from] ReceiverError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("job killed: {0}")]
    JobKilled(#[from] JobKilled),

    /// A `BatchIterator` that cannot rewind was asked to `move_to_start`.
    #[error("{0} does not support move_to_start")]
    Unsupported(&'static str),
}
