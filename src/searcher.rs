//! Shard-local index handles owned for the lifetime of a `CollectTask`.
//! Lucene searchers themselves are out of scope; this crate only needs the
//! registration/close contract a real searcher type would satisfy.

pub use crate::error::SearcherId;

/// A shard-local handle to an index snapshot. Owned by `CollectTask` for the
/// task's lifetime and released during completion handling.
pub trait Searcher: Send {
    /// Releases the underlying resource. Called at most once by
    /// `CollectTask` in the normal path; implementations should tolerate
    /// being dropped without `close` having been called (e.g. on panic
    /// unwinds) since `Drop` is the backstop, not the contract.
    fn close(&mut self);
}
