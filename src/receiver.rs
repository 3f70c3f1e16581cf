//! `CumulativePageBucketReceiver`: merges N independently-pushed upstream
//! bucket streams into one pulled [`crate::batch_iterator::BatchIterator`].
//!
//! Two lock domains are kept disjoint:
//!
//! - `page_state` guards `buckets_by_idx`, `exhausted` and the current
//!   loading-page future slot - everything the page-completion predicate
//!   touches.
//! - `membership` guards the set of upstreams that have ever reported in and
//!   the stashed per-upstream listeners.
//!
//! Neither lock is ever held while the other is acquired, and neither is
//! ever held across an `.await` or while invoking a [`PageResultListener`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

use crate::batch_iterator::EmptyBatchIterator;
use crate::batch_paging_iterator::BatchPagingIterator;
use crate::bucket::{Bucket, KeyedBucket};
use crate::consumer::RowConsumer;
use crate::error::{CollectError, JobKilled, PhaseId, ReceiverError};
use crate::kill_signal::KillSignal;
use crate::paging_iterator::{Page, PagingIterator};

/// Told `true`/`false` by the receiver as it alternately wants more rows
/// from one upstream and wants it to pause.
pub trait PageResultListener: Send + Sync {
    fn need_more(&self, need_more: bool);
}

/// A type-directed row encoder supplied by the planner. The receiver never
/// looks inside one; it only threads the collection through to whatever
/// eventually serializes rows onto the wire.
pub type Streamer = Arc<dyn std::any::Any + Send + Sync>;

/// The interface a network handler drives as bucket pages arrive off the
/// wire.
#[async_trait]
pub trait PageBucketReceiver: Send + Sync {
    /// Delivers upstream `bucket_idx`'s contribution to the current page.
    /// `is_last` marks this as that upstream's final bucket.
    fn set_bucket(&self, bucket_idx: usize, rows: Bucket, is_last: bool, listener: Arc<dyn PageResultListener>);

    fn streamers(&self) -> &[Streamer];

    /// Resolves exactly once, with the terminal outcome of the phase.
    async fn completion_future(&self) -> Result<(), ReceiverError>;

    /// Currently a no-op; retained for interface symmetry with callers that
    /// poll the receiver between pushes.
    fn consume_rows(&self) {}

    /// Cancels the phase. `cause` defaults to a generic `JobKilled` if `None`.
    fn kill(&self, cause: Option<CollectError>);
}

pub(crate) struct PageState {
    buckets_by_idx: HashMap<usize, Bucket>,
    exhausted: HashSet<usize>,
    current_tx: Option<oneshot::Sender<Result<Page, ReceiverError>>>,
    current_rx: Option<oneshot::Receiver<Result<Page, ReceiverError>>>,
}

struct Membership {
    buckets: HashSet<usize>,
    listeners: HashMap<usize, Arc<dyn PageResultListener>>,
}

/// Dispatches the work of resolving a completed page's future off whatever
/// thread delivered the bucket that completed it, typically a network I/O
/// thread. Falls back to resolving inline if the pool rejects the task
/// (shutdown, saturation).
pub trait PageExecutor: Send + Sync {
    fn try_execute(&self, task: Box<dyn FnOnce() + Send>) -> Result<(), Box<dyn FnOnce() + Send>>;
}

/// Default executor: hands the task to the ambient tokio runtime's blocking
/// pool. Rejects (handing the task back) only if called outside a runtime.
#[derive(Debug, Default)]
pub struct TokioPageExecutor;

impl PageExecutor for TokioPageExecutor {
    fn try_execute(&self, task: Box<dyn FnOnce() + Send>) -> Result<(), Box<dyn FnOnce() + Send>> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(task);
                Ok(())
            }
            Err(_) => Err(task),
        }
    }
}

#[derive(Default)]
struct ProcessingState {
    result: OnceLock<Result<(), ReceiverError>>,
    notify: Notify,
}

impl ProcessingState {
    fn complete(&self, result: Result<(), ReceiverError>) {
        if self.result.set(result).is_ok() {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) -> Result<(), ReceiverError> {
        loop {
            let notified = self.notify.notified();
            if let Some(r) = self.result.get() {
                return r.clone();
            }
            notified.await;
        }
    }
}

pub struct CumulativePageBucketReceiver {
    node_name: Arc<str>,
    phase_id: PhaseId,
    num_buckets: usize,
    streamers: Vec<Streamer>,
    executor: Arc<dyn PageExecutor>,

    page_state: Mutex<PageState>,
    membership: Mutex<Membership>,

    first_fetch_more: AtomicBool,
    kill_signal: Arc<KillSignal>,
    processing: ProcessingState,
    /// Entered by every method that emits an event, so bucket arrival,
    /// duplicate/kill events, and page completion all carry `phase_id`/
    /// `node` without repeating them at every call site.
    span: tracing::Span,
}

impl CumulativePageBucketReceiver {
    /// Builds the receiver and immediately hands `row_consumer` either an
    /// [`EmptyBatchIterator`] (if `num_buckets == 0`) or a
    /// [`BatchPagingIterator`] wired to this receiver's callbacks.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_name: impl Into<Arc<str>>,
        phase_id: PhaseId,
        streamers: Vec<Streamer>,
        executor: Arc<dyn PageExecutor>,
        row_consumer: Box<dyn RowConsumer>,
        paging_iterator: Box<dyn PagingIterator>,
        num_buckets: usize,
    ) -> Arc<Self> {
        let node_name = node_name.into();
        let span = tracing::info_span!("page_bucket_receiver", %phase_id, node = %node_name, num_buckets);

        if num_buckets == 0 {
            let receiver = Arc::new(CumulativePageBucketReceiver {
                node_name,
                phase_id,
                num_buckets: 0,
                streamers,
                executor,
                page_state: Mutex::new(PageState {
                    buckets_by_idx: HashMap::new(),
                    exhausted: HashSet::new(),
                    current_tx: None,
                    current_rx: None,
                }),
                membership: Mutex::new(Membership {
                    buckets: HashSet::new(),
                    listeners: HashMap::new(),
                }),
                first_fetch_more: AtomicBool::new(false),
                kill_signal: Arc::new(KillSignal::default()),
                processing: ProcessingState::default(),
                span,
            });
            let _entered = receiver.span.enter();
            debug!("zero upstreams, completing immediately with an empty batch iterator");
            receiver.processing.complete(Ok(()));
            row_consumer.accept(Some(Box::new(EmptyBatchIterator::new())), None);
            drop(_entered);
            return receiver;
        }

        let (tx0, rx0) = oneshot::channel();
        let receiver = Arc::new(CumulativePageBucketReceiver {
            node_name,
            phase_id,
            num_buckets,
            streamers,
            executor,
            page_state: Mutex::new(PageState {
                buckets_by_idx: HashMap::new(),
                exhausted: HashSet::new(),
                current_tx: Some(tx0),
                current_rx: Some(rx0),
            }),
            membership: Mutex::new(Membership {
                buckets: HashSet::new(),
                listeners: HashMap::new(),
            }),
            first_fetch_more: AtomicBool::new(true),
            kill_signal: Arc::new(KillSignal::default()),
            processing: ProcessingState::default(),
            span,
        });

        let fetch_more = {
            let receiver = receiver.clone();
            Arc::new(move |exhausted_bucket: Option<usize>| receiver.fetch_more(exhausted_bucket))
        };
        let all_upstreams_exhausted = {
            let receiver = receiver.clone();
            Arc::new(move || receiver.all_upstreams_exhausted())
        };
        let complete = {
            let receiver = receiver.clone();
            Arc::new(move |result: Result<(), ReceiverError>| receiver.processing.complete(result))
        };

        let batch_iter = BatchPagingIterator::new(
            paging_iterator,
            fetch_more,
            all_upstreams_exhausted,
            complete,
            receiver.kill_signal.clone(),
        );
        row_consumer.accept(Some(Box::new(batch_iter)), None);
        receiver
    }

    /// Called by `BatchPagingIterator` when its merge reports `Need`.
    /// `exhausted_bucket` is `Some(k)` for `Need::SpecificUpstream(k)`,
    /// `None` for `Need::AnyUpstream`.
    pub(crate) fn fetch_more(&self, exhausted_bucket: Option<usize>) -> oneshot::Receiver<Result<Page, ReceiverError>> {
        let first = self.first_fetch_more.swap(false, Ordering::AcqRel);
        if first {
            let mut state = self.page_state.lock();
            return state
                .current_rx
                .take()
                .expect("current_rx installed at construction, taken at most once");
        }

        let (tx, rx) = oneshot::channel();

        let already_exhausted = exhausted_bucket.map_or(false, |k| {
            let state = self.page_state.lock();
            state.exhausted.contains(&k)
        });

        if exhausted_bucket.is_none() || already_exhausted {
            {
                let mut state = self.page_state.lock();
                state.current_tx = Some(tx);
            }
            let listeners: Vec<Arc<dyn PageResultListener>> = {
                let mut membership = self.membership.lock();
                membership.listeners.drain().map(|(_, v)| v).collect()
            };
            for listener in listeners {
                listener.need_more(true);
            }
        } else {
            let k = exhausted_bucket.expect("checked above");
            let known_buckets: Vec<usize> = {
                let membership = self.membership.lock();
                membership.buckets.iter().copied().collect()
            };
            {
                let mut state = self.page_state.lock();
                for other in known_buckets {
                    if other != k && !state.buckets_by_idx.contains_key(&other) {
                        state.buckets_by_idx.insert(other, Bucket::empty());
                    }
                }
                state.current_tx = Some(tx);
            }
            let listener = {
                let mut membership = self.membership.lock();
                membership.listeners.remove(&k)
            };
            if let Some(listener) = listener {
                listener.need_more(true);
            }
        }

        rx
    }

    pub(crate) fn all_upstreams_exhausted(&self) -> bool {
        if self.first_fetch_more.load(Ordering::Acquire) {
            return false;
        }
        let state = self.page_state.lock();
        state.exhausted.len() == self.num_buckets
    }

    fn dispatch_page_ready(&self, tx: oneshot::Sender<Result<Page, ReceiverError>>, page: Page) {
        let task: Box<dyn FnOnce() + Send> = Box::new(move || {
            let _ = tx.send(Ok(page));
        });
        if let Err(task) = self.executor.try_execute(task) {
            task();
        }
    }

    fn drain_listeners_false(&self) {
        let listeners: Vec<Arc<dyn PageResultListener>> = {
            let mut membership = self.membership.lock();
            membership.listeners.drain().map(|(_, v)| v).collect()
        };
        for listener in listeners {
            listener.need_more(false);
        }
    }

    fn fail(&self, err: ReceiverError) {
        let _entered = self.span.enter();
        warn!(error = %err, "page bucket receiver terminating with failure");
        let tx = {
            let mut state = self.page_state.lock();
            state.current_tx.take()
        };
        if let Some(tx) = tx {
            let _ = tx.send(Err(err.clone()));
        }
        self.processing.complete(Err(err));
        self.drain_listeners_false();
    }
}

#[async_trait]
impl PageBucketReceiver for CumulativePageBucketReceiver {
    fn set_bucket(&self, bucket_idx: usize, rows: Bucket, is_last: bool, listener: Arc<dyn PageResultListener>) {
        let _entered = self.span.enter();
        let already_terminal = self.kill_signal.is_killed();
        debug!(bucket_idx, rows = rows.len(), is_last, already_terminal, "bucket received");

        {
            let mut membership = self.membership.lock();
            membership.buckets.insert(bucket_idx);
            if is_last || already_terminal {
                drop(membership);
                listener.need_more(false);
            } else {
                membership.listeners.insert(bucket_idx, listener);
            }
        }

        if already_terminal {
            return;
        }

        let ready = {
            let mut state = self.page_state.lock();

            if state.buckets_by_idx.contains_key(&bucket_idx) {
                let err = ReceiverError::DuplicateBucket {
                    node: self.node_name.clone(),
                    phase_id: self.phase_id,
                    idx: bucket_idx,
                };
                drop(state);
                self.fail(err);
                return;
            }

            state.buckets_by_idx.insert(bucket_idx, rows);
            if is_last {
                state.exhausted.insert(bucket_idx);
            }

            if state.buckets_by_idx.len() == self.num_buckets {
                let drained: HashMap<usize, Bucket> = std::mem::take(&mut state.buckets_by_idx);
                let mut entries = Vec::with_capacity(self.num_buckets);
                for (k, bucket) in drained {
                    if state.exhausted.contains(&k) {
                        state.buckets_by_idx.insert(k, Bucket::empty());
                    }
                    entries.push(KeyedBucket::new(k, bucket));
                }
                let page = Page {
                    entries,
                    exhausted: state.exhausted.clone(),
                };
                let tx = state
                    .current_tx
                    .take()
                    .expect("current_tx present while a page is pending");
                Some((tx, page))
            } else {
                None
            }
        };

        if let Some((tx, page)) = ready {
            debug!(entries = page.entries.len(), "page complete, dispatching to merge");
            self.dispatch_page_ready(tx, page);
        }
    }

    fn streamers(&self) -> &[Streamer] {
        &self.streamers
    }

    async fn completion_future(&self) -> Result<(), ReceiverError> {
        self.processing.wait().await
    }

    fn kill(&self, cause: Option<CollectError>) {
        let _entered = self.span.enter();
        let cause = cause.unwrap_or_else(|| CollectError::JobKilled(JobKilled::default()));
        let won = self.kill_signal.set(cause.clone());
        if !won {
            debug!("kill called again, ignoring (already terminal)");
            return;
        }
        info!(cause = %cause, "page bucket receiver killed");
        let err = match cause {
            CollectError::JobKilled(j) => ReceiverError::JobKilled(j),
            other => ReceiverError::JobKilled(JobKilled::new(other.to_string())),
        };
        self.fail(err);
    }
}
