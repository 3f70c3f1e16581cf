//! `CollectTask`: the per-phase lifecycle state machine.
//!
//! Owns the resources a collect phase accumulates while it runs - searchers,
//! ram accounting - and drives them through `created -> prepared -> running
//! -> stopped`, with `kill` able to jump to `stopped` from any state. Its
//! completion future resolves exactly once, after cleanup, and never itself
//! propagates an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn, Instrument};

use crate::batch_iterator::BatchIterator;
use crate::consumer::RowConsumer;
use crate::error::{CollectError, JobKilled, PhaseId, SearcherId, TaskError};
use crate::kill_signal::KillSignal;
use crate::phase::Phase;
use crate::pool::ThreadPools;
use crate::ram_accounting::{CompletionState, RamAccounting};
use crate::row::Row;
use crate::searcher::Searcher;
use crate::source::CollectSource;

const CREATED: u8 = 0;
const PREPARED: u8 = 1;
const RUNNING: u8 = 2;
const STOPPED: u8 = 3;

/// The task's lifecycle state, as four values driven through a single
/// `AtomicU8` with compare-and-swap transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Prepared,
    Running,
    Stopped,
}

impl TaskState {
    fn from_u8(v: u8) -> TaskState {
        match v {
            CREATED => TaskState::Created,
            PREPARED => TaskState::Prepared,
            RUNNING => TaskState::Running,
            STOPPED => TaskState::Stopped,
            _ => unreachable!("only four states are ever stored"),
        }
    }
}

#[derive(Default)]
struct TaskCompletion {
    state: OnceLock<CompletionState>,
    notify: Notify,
}

impl TaskCompletion {
    fn complete(&self, state: CompletionState) {
        if self.state.set(state).is_ok() {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) -> CompletionState {
        loop {
            let notified = self.notify.notified();
            if let Some(state) = self.state.get() {
                return *state;
            }
            notified.await;
        }
    }
}

/// Forwards `kill` into the wrapped iterator via a shared `KillSignal`.
struct KillAwareIterator {
    inner: Box<dyn BatchIterator>,
    kill_signal: Arc<KillSignal>,
}

#[async_trait]
impl BatchIterator for KillAwareIterator {
    fn move_next(&mut self) -> bool {
        self.inner.move_next()
    }

    fn current_row(&self) -> Option<&Row> {
        self.inner.current_row()
    }

    fn all_loaded(&self) -> bool {
        self.inner.all_loaded()
    }

    async fn load_next_batch(&mut self) -> Result<(), CollectError> {
        if let Some(cause) = self.kill_signal.cause() {
            self.inner.kill(cause.clone());
            return Err(cause);
        }
        tokio::select! {
            biased;
            _ = self.kill_signal.notified() => {
                let cause = self.kill_signal.cause().expect("notified only after cause is set");
                self.inner.kill(cause.clone());
                Err(cause)
            }
            res = self.inner.load_next_batch() => res,
        }
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn kill(&mut self, cause: CollectError) {
        self.kill_signal.set(cause.clone());
        self.inner.kill(cause);
    }

    fn move_to_start(&mut self) -> Result<(), CollectError> {
        self.inner.move_to_start()
    }
}

/// Per-phase lifecycle, resource ownership, scheduling onto a thread pool,
/// completion future.
pub struct CollectTask {
    phase: Phase,
    source: Arc<dyn CollectSource>,
    ram_accounting: Arc<RamAccounting>,
    consumer: Arc<dyn RowConsumer>,
    thread_pools: Arc<ThreadPools>,

    state: AtomicU8,
    searchers: Mutex<HashMap<SearcherId, Box<dyn Searcher>>>,
    batch_iterator: Mutex<Option<Box<dyn BatchIterator>>>,
    kill_signal: Arc<KillSignal>,
    /// Guards against the consumer ever being delivered to twice: both
    /// `kill` (from `Created`/`Prepared`) and a failed `prepare` can reach
    /// for "hand the cause straight to the consumer", and they can race.
    delivered: AtomicU8,
    completion: Arc<TaskCompletion>,
    /// One span per phase, entered by every lifecycle method so the events
    /// they emit (state transitions, kill, cleanup) carry `phase_id`/
    /// `phase_name` without repeating them at every call site.
    span: tracing::Span,
}

impl CollectTask {
    /// Spawns the cleanup task that closes every registered searcher and the
    /// ram accounting once the consumer's completion future resolves. Must
    /// be called from within a `tokio` runtime.
    pub fn new(
        phase: Phase,
        source: Arc<dyn CollectSource>,
        ram_accounting: Arc<RamAccounting>,
        consumer: Arc<dyn RowConsumer>,
        thread_pools: Arc<ThreadPools>,
    ) -> Arc<Self> {
        let span = tracing::info_span!("collect_phase", phase_id = %phase.id(), phase_name = %phase.name());

        let task = Arc::new(CollectTask {
            phase,
            source,
            ram_accounting,
            consumer,
            thread_pools,
            state: AtomicU8::new(CREATED),
            searchers: Mutex::new(HashMap::new()),
            batch_iterator: Mutex::new(None),
            kill_signal: Arc::new(KillSignal::default()),
            delivered: AtomicU8::new(0),
            completion: Arc::new(TaskCompletion::default()),
            span,
        });

        let watcher = task.clone();
        let cleanup_span = watcher.span.clone();
        tokio::spawn(
            async move {
                // The consumer's own completion future may fail; this task's
                // never does. Cleanup runs identically on either branch, and
                // the failure itself was already observed by the consumer.
                let outcome = watcher.consumer.completion_future().await;
                debug!(ok = outcome.is_ok(), "consumer completion observed, releasing resources");

                let mut searchers = std::mem::take(&mut *watcher.searchers.lock());
                let closed = searchers.len();
                for (_, mut searcher) in searchers.drain() {
                    searcher.close();
                }
                let bytes_used = watcher.ram_accounting.close();
                info!(closed, bytes_used, "collect phase terminated");
                watcher.completion.complete(CompletionState { bytes_used });
            }
            .instrument(cleanup_span),
        );

        task
    }

    pub fn id(&self) -> PhaseId {
        self.phase.id()
    }

    pub fn name(&self) -> &Arc<str> {
        self.phase.name()
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Registers a shard-local searcher. Fails with `DuplicateSearcher` when
    /// `id` is already present; both the old and new handle are closed first.
    pub fn add_searcher(&self, id: SearcherId, searcher: Box<dyn Searcher>) -> Result<(), TaskError> {
        let _entered = self.span.enter();
        let mut searchers = self.searchers.lock();
        if let Some(mut existing) = searchers.remove(&id) {
            existing.close();
            let mut rejected = searcher;
            rejected.close();
            warn!(searcher_id = id, "duplicate searcher registration, closing both handles");
            return Err(TaskError::DuplicateSearcher { id });
        }
        searchers.insert(id, searcher);
        debug!(searcher_id = id, "searcher registered");
        Ok(())
    }

    /// Transitions `Created → Prepared` and asks `source` to build this
    /// phase's `BatchIterator`, honoring the consumer's `requires_scroll`
    /// flag. Idempotent: a non-`Created` state does no work.
    pub async fn prepare(&self) {
        if self
            .state
            .compare_exchange(CREATED, PREPARED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!(parent: &self.span, "phase prepared, building batch iterator");

        let support_move_to_start = self.consumer.requires_scroll();
        match self
            .source
            .get_iterator(&self.phase, self, support_move_to_start)
            .instrument(self.span.clone())
            .await
        {
            Ok(iterator) => {
                let killable = KillAwareIterator {
                    inner: iterator,
                    kill_signal: self.kill_signal.clone(),
                };
                *self.batch_iterator.lock() = Some(Box::new(killable));
            }
            Err(err) => {
                warn!(parent: &self.span, error = %err, "collect source failed to build iterator");
                self.deliver(None, Some(err));
                self.state.store(STOPPED, Ordering::Release);
            }
        }
    }

    /// Transitions `Prepared → Running` and submits the consumer onto the
    /// phase's thread pool. Fails with `MustPrepareFirst` from `Created`,
    /// `AlreadyStarted` once already running (or started-and-moved-past),
    /// and is a no-op from `Stopped` (a race with `kill`).
    pub fn start(&self) -> Result<(), TaskError> {
        let _entered = self.span.enter();
        match self
            .state
            .compare_exchange(PREPARED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                info!("phase started");
                let iterator = self.batch_iterator.lock().take();
                let consumer = self.consumer.clone();
                let delivered = self.ack_delivery();
                if delivered {
                    self.thread_pools.spawn_for(&self.phase, move || {
                        consumer.accept(iterator, None);
                    });
                }
                Ok(())
            }
            Err(CREATED) => Err(TaskError::MustPrepareFirst),
            Err(STOPPED) => Ok(()),
            Err(_) => Err(TaskError::AlreadyStarted),
        }
    }

    /// Cancels the phase. Atomically moves to `Stopped` and acts on the
    /// *previous* state: from `Created`/`Prepared`, hands `cause` directly
    /// to the consumer (the iterator was never started); from `Running`,
    /// forwards `cause` into the already-delivered iterator via the shared
    /// kill signal; from `Stopped`, a no-op. `cause` defaults to
    /// `JobKilled` when `None`.
    pub fn kill(&self, cause: Option<CollectError>) {
        let _entered = self.span.enter();
        let cause = cause.unwrap_or_else(|| CollectError::JobKilled(JobKilled::default()));
        self.kill_signal.set(cause.clone());
        let previous = self.state.swap(STOPPED, Ordering::AcqRel);
        info!(cause = %cause, from_state = previous, "phase killed");

        match previous {
            CREATED | PREPARED => {
                let iterator = self.batch_iterator.lock().take();
                if let Some(mut iterator) = iterator {
                    iterator.close();
                }
                self.deliver(None, Some(cause));
            }
            RUNNING | STOPPED => {
                // RUNNING: the consumer already owns the iterator; the
                // shared kill_signal set above is what unblocks it.
                // STOPPED: already terminal, nothing further to do.
            }
            _ => unreachable!("only four states are ever stored"),
        }
    }

    /// Resolves once the consumer's completion resolves and cleanup
    /// (searchers, ram accounting) has run. Never fails.
    pub async fn completion_future(&self) -> CompletionState {
        self.completion.wait().await
    }

    /// Delivers `(iterator, failure)` to the consumer exactly once, no
    /// matter which code path gets there first.
    fn deliver(&self, iterator: Option<Box<dyn BatchIterator>>, failure: Option<CollectError>) {
        if self.ack_delivery() {
            self.consumer.accept(iterator, failure);
        }
    }

    /// Claims the right to be the one call that delivers to the consumer.
    /// Returns `true` for the caller that won the race.
    fn ack_delivery(&self) -> bool {
        self.delivered.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}
