//! Adapts a [`PagingIterator`] plus three callbacks borrowed from a
//! [`crate::receiver::CumulativePageBucketReceiver`] into the pull-based
//! [`BatchIterator`] contract.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::batch_iterator::BatchIterator;
use crate::error::{CollectError, JobKilled, ReceiverError};
use crate::kill_signal::KillSignal;
use crate::paging_iterator::{Need, Page, PagingIterator};
use crate::row::Row;

type FetchMore = Arc<dyn Fn(Option<usize>) -> oneshot::Receiver<Result<Page, ReceiverError>> + Send + Sync>;
type AllUpstreamsExhausted = Arc<dyn Fn() -> bool + Send + Sync>;
type Complete = Arc<dyn Fn(Result<(), ReceiverError>) + Send + Sync>;

pub struct BatchPagingIterator {
    merge: Box<dyn PagingIterator>,
    fetch_more: FetchMore,
    all_upstreams_exhausted: AllUpstreamsExhausted,
    complete: Complete,
    kill_signal: Arc<KillSignal>,
    pending_rows: VecDeque<Row>,
    current_row: Option<Row>,
    all_loaded: bool,
    closed: bool,
}

fn to_receiver_error(cause: &CollectError) -> ReceiverError {
    match cause {
        CollectError::JobKilled(j) => ReceiverError::JobKilled(j.clone()),
        other => ReceiverError::JobKilled(JobKilled::new(other.to_string())),
    }
}

impl BatchPagingIterator {
    pub(crate) fn new(
        merge: Box<dyn PagingIterator>,
        fetch_more: FetchMore,
        all_upstreams_exhausted: AllUpstreamsExhausted,
        complete: Complete,
        kill_signal: Arc<KillSignal>,
    ) -> Self {
        BatchPagingIterator {
            merge,
            fetch_more,
            all_upstreams_exhausted,
            complete,
            kill_signal,
            pending_rows: VecDeque::new(),
            current_row: None,
            all_loaded: false,
            closed: false,
        }
    }
}

#[async_trait]
impl BatchIterator for BatchPagingIterator {
    fn move_next(&mut self) -> bool {
        if let Some(row) = self.pending_rows.pop_front() {
            self.current_row = Some(row);
            true
        } else {
            self.current_row = None;
            false
        }
    }

    fn current_row(&self) -> Option<&Row> {
        self.current_row.as_ref()
    }

    fn all_loaded(&self) -> bool {
        self.all_loaded
    }

    async fn load_next_batch(&mut self) -> Result<(), CollectError> {
        if self.all_loaded || self.closed {
            return Ok(());
        }

        loop {
            if let Some(cause) = self.kill_signal.cause() {
                self.all_loaded = true;
                (self.complete)(Err(to_receiver_error(&cause)));
                return Err(cause);
            }

            let mut produced = false;
            let need;
            loop {
                match self.merge.next_row() {
                    Ok(row) => {
                        self.pending_rows.push_back(row);
                        produced = true;
                    }
                    Err(n) => {
                        need = n;
                        break;
                    }
                }
            }
            if produced {
                return Ok(());
            }

            if (self.all_upstreams_exhausted)() {
                self.all_loaded = true;
                (self.complete)(Ok(()));
                return Ok(());
            }

            let exhausted_bucket = match need {
                Need::AnyUpstream => None,
                Need::SpecificUpstream(k) => Some(k),
            };
            let rx = (self.fetch_more)(exhausted_bucket);

            let page = tokio::select! {
                biased;
                _ = self.kill_signal.notified() => {
                    let cause = self.kill_signal.cause().unwrap_or_else(|| CollectError::JobKilled(JobKilled::default()));
                    self.all_loaded = true;
                    (self.complete)(Err(to_receiver_error(&cause)));
                    return Err(cause);
                }
                res = rx => {
                    match res {
                        Ok(Ok(page)) => page,
                        Ok(Err(err)) => {
                            self.all_loaded = true;
                            (self.complete)(Err(err.clone()));
                            return Err(err.into());
                        }
                        Err(_) => {
                            let cause = self.kill_signal.cause().unwrap_or_else(|| CollectError::JobKilled(JobKilled::default()));
                            self.all_loaded = true;
                            (self.complete)(Err(to_receiver_error(&cause)));
                            return Err(cause);
                        }
                    }
                }
            };

            self.merge.accept_page(page);
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.pending_rows.clear();
    }

    fn kill(&mut self, cause: CollectError) {
        self.kill_signal.set(cause);
        self.closed = true;
    }
}
