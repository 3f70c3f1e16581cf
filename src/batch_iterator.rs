//! The pull-based row cursor contract relied upon throughout this crate.
//! Neither the receiver nor the task implement the merge itself; they only
//! drive, or are driven by, something implementing this trait.

use async_trait::async_trait;

use crate::error::CollectError;
use crate::row::Row;

/// A pull-based cursor over rows, loaded in batches.
///
/// Typical usage: call [`BatchIterator::move_next`] in a loop; when it
/// returns `false` and [`BatchIterator::all_loaded`] is also `false`, await
/// [`BatchIterator::load_next_batch`] and resume. When `all_loaded` is
/// `true` and `move_next` returns `false`, the stream is over.
#[async_trait]
pub trait BatchIterator: Send {
    /// Advances to the next row in the currently loaded batch. Returns
    /// `false` if the current batch is exhausted (caller must check
    /// [`Self::all_loaded`] to distinguish "load more" from "done").
    fn move_next(&mut self) -> bool;

    /// The row the cursor currently sits on. Only valid to call after a
    /// `true`-returning `move_next`; the returned reference is invalidated
    /// by any later `move_next`/`load_next_batch` call.
    fn current_row(&self) -> Option<&Row>;

    /// `true` once no more batches will ever arrive.
    fn all_loaded(&self) -> bool;

    /// Requests the next batch. Resolves once rows are available (or the
    /// iterator is exhausted, or killed).
    async fn load_next_batch(&mut self) -> Result<(), CollectError>;

    /// Releases any resources associated with this iterator. Idempotent.
    fn close(&mut self);

    /// Cancels the iterator, unblocking any in-flight `load_next_batch`
    /// with `cause`.
    fn kill(&mut self, cause: CollectError);

    /// Rewinds to the first row of the first batch, for iterators that
    /// support it. The default implementation reports that this iterator
    /// cannot rewind.
    fn move_to_start(&mut self) -> Result<(), CollectError> {
        Err(CollectError::Unsupported("this BatchIterator"))
    }
}

/// A `BatchIterator` over zero rows, used when a collect phase has no
/// upstreams to wait on.
#[derive(Debug, Default)]
pub struct EmptyBatchIterator {
    closed: bool,
}

impl EmptyBatchIterator {
    pub fn new() -> Self {
        EmptyBatchIterator::default()
    }
}

#[async_trait]
impl BatchIterator for EmptyBatchIterator {
    fn move_next(&mut self) -> bool {
        false
    }

    fn current_row(&self) -> Option<&Row> {
        None
    }

    fn all_loaded(&self) -> bool {
        true
    }

    async fn load_next_batch(&mut self) -> Result<(), CollectError> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn kill(&mut self, _cause: CollectError) {
        self.closed = true;
    }

    fn move_to_start(&mut self) -> Result<(), CollectError> {
        Ok(())
    }
}

/// A `BatchIterator` over a fully materialized, in-memory row sequence.
/// Used by sources that produce their whole result in one shot (catalog
/// tables, values lists).
#[derive(Debug)]
pub struct VecBatchIterator {
    rows: Vec<Row>,
    idx: usize,
    closed: bool,
}

impl VecBatchIterator {
    pub fn new(rows: Vec<Row>) -> Self {
        VecBatchIterator {
            rows,
            idx: 0,
            closed: false,
        }
    }
}

#[async_trait]
impl BatchIterator for VecBatchIterator {
    fn move_next(&mut self) -> bool {
        if self.idx < self.rows.len() {
            self.idx += 1;
            true
        } else {
            false
        }
    }

    fn current_row(&self) -> Option<&Row> {
        if self.idx == 0 {
            None
        } else {
            self.rows.get(self.idx - 1)
        }
    }

    fn all_loaded(&self) -> bool {
        true
    }

    async fn load_next_batch(&mut self) -> Result<(), CollectError> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    /// A no-op: the rows are already materialized and there is nothing left
    /// to cancel.
    fn kill(&mut self, _cause: CollectError) {
        self.closed = true;
    }

    fn move_to_start(&mut self) -> Result<(), CollectError> {
        self.idx = 0;
        Ok(())
    }
}
