//! End-to-end walkthrough: a `CollectTask` whose `CollectSource` hands back
//! a `CumulativePageBucketReceiver`-backed iterator, driven by simulated
//! upstream peers pushing buckets from separate tasks. Exercises the full
//! wiring from task through receiver to consumer, not just either piece
//! in isolation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use collect_core::error::PhaseId;
use collect_core::paging_iterator::ConcatPagingIterator;
use collect_core::receiver::{CumulativePageBucketReceiver, PageBucketReceiver, PageResultListener, TokioPageExecutor};
use collect_core::{
    BatchIterator, Bucket, Cell, CollectError, CollectSource, CollectTask, Phase, RamAccounting, Row,
    RowConsumer, Searcher, ThreadPools,
};

fn row(n: i64) -> Row {
    Row::new(vec![Cell::I64(n)])
}

struct NoopListener;

impl PageResultListener for NoopListener {
    fn need_more(&self, _need_more: bool) {}
}

/// Forwards whatever iterator `CumulativePageBucketReceiver::new` hands it
/// straight back out through a oneshot, so `TwoUpstreamSource::get_iterator`
/// can return it as the phase's `BatchIterator` instead of driving it itself.
struct HandoffConsumer(Mutex<Option<tokio::sync::oneshot::Sender<Box<dyn BatchIterator>>>>);

#[async_trait]
impl RowConsumer for HandoffConsumer {
    fn accept(&self, iterator: Option<Box<dyn BatchIterator>>, _failure: Option<CollectError>) {
        if let Some(iterator) = iterator {
            if let Some(tx) = self.0.lock().take() {
                let _ = tx.send(iterator);
            }
        }
    }

    async fn completion_future(&self) -> Result<(), CollectError> {
        Ok(())
    }
}

/// A `CollectSource` that wires a fresh `CumulativePageBucketReceiver` for
/// every phase and spawns two "upstream" tasks that each push two pages.
struct TwoUpstreamSource;

#[async_trait]
impl CollectSource for TwoUpstreamSource {
    async fn get_iterator(
        &self,
        phase: &Phase,
        _task: &CollectTask,
        _support_move_to_start: bool,
    ) -> Result<Box<dyn BatchIterator>, CollectError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let receiver = CumulativePageBucketReceiver::new(
            "node-1",
            phase.id(),
            vec![],
            Arc::new(TokioPageExecutor),
            Box::new(HandoffConsumer(Mutex::new(Some(tx)))),
            Box::new(ConcatPagingIterator::new()),
            2,
        );

        for idx in 0..2usize {
            let receiver = receiver.clone();
            tokio::spawn(async move {
                receiver.set_bucket(idx, Bucket::new(vec![row(idx as i64 * 10)]), false, Arc::new(NoopListener));
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                receiver.set_bucket(idx, Bucket::new(vec![row(idx as i64 * 10 + 1)]), true, Arc::new(NoopListener));
            });
        }

        rx.await.map_err(|_| CollectError::Unsupported("iterator handoff"))
    }
}

/// Drains the iterator it's handed and records every row, resolving its own
/// completion future once exhausted.
#[derive(Default)]
struct CollectingConsumer {
    rows: Arc<Mutex<Vec<Row>>>,
    done: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CollectingConsumer {
    fn new() -> Self {
        CollectingConsumer::default()
    }

    fn rows(&self) -> Vec<Row> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl RowConsumer for CollectingConsumer {
    fn accept(&self, iterator: Option<Box<dyn BatchIterator>>, failure: Option<CollectError>) {
        let done = self.done.clone();
        let notify = self.notify.clone();
        let Some(mut iterator) = iterator else {
            let _ = failure;
            done.store(true, Ordering::Release);
            notify.notify_waiters();
            return;
        };
        let rows = self.rows.clone();
        tokio::spawn(async move {
            loop {
                if iterator.move_next() {
                    if let Some(r) = iterator.current_row() {
                        rows.lock().push(r.clone());
                    }
                    continue;
                }
                if iterator.all_loaded() {
                    done.store(true, Ordering::Release);
                    notify.notify_waiters();
                    return;
                }
                if iterator.load_next_batch().await.is_err() {
                    done.store(true, Ordering::Release);
                    notify.notify_waiters();
                    return;
                }
            }
        });
    }

    async fn completion_future(&self) -> Result<(), CollectError> {
        loop {
            let notified = self.notify.notified();
            if self.done.load(Ordering::Acquire) {
                return Ok(());
            }
            notified.await;
        }
    }
}

struct NoopSearcher(Arc<AtomicBool>);

impl Searcher for NoopSearcher {
    fn close(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn full_phase_lifecycle_merges_two_upstreams_and_closes_searchers() {
    let phase = Phase::NonRouted {
        id: PhaseId::new_v4(),
        name: Arc::from("two-upstream-merge"),
    };

    let consumer = Arc::new(CollectingConsumer::new());
    let searcher_closed = Arc::new(AtomicBool::new(false));

    let task = CollectTask::new(
        phase,
        Arc::new(TwoUpstreamSource),
        Arc::new(RamAccounting::new()),
        consumer.clone(),
        Arc::new(ThreadPools::current()),
    );
    task.add_searcher(1, Box::new(NoopSearcher(searcher_closed.clone()))).unwrap();

    task.prepare().await;
    task.start().unwrap();

    let completion = task.completion_future().await;
    assert_eq!(completion.bytes_used, 0);
    assert!(searcher_closed.load(Ordering::SeqCst));

    let mut rows = consumer.rows();
    rows.sort_by_key(|r| match r.get(0) {
        Some(Cell::I64(n)) => *n,
        _ => unreachable!(),
    });
    assert_eq!(rows, vec![row(0), row(1), row(10), row(11)]);
}

#[tokio::test]
async fn killing_task_before_start_still_releases_searchers() {
    let phase = Phase::NonRouted {
        id: PhaseId::new_v4(),
        name: Arc::from("killed-before-start"),
    };

    let consumer = Arc::new(CollectingConsumer::new());
    let searcher_closed = Arc::new(AtomicBool::new(false));

    let task = CollectTask::new(
        phase,
        Arc::new(TwoUpstreamSource),
        Arc::new(RamAccounting::new()),
        consumer.clone(),
        Arc::new(ThreadPools::current()),
    );
    task.add_searcher(1, Box::new(NoopSearcher(searcher_closed.clone()))).unwrap();

    task.prepare().await;
    task.kill(None);
    assert!(task.start().is_ok());

    task.completion_future().await;
    assert!(searcher_closed.load(Ordering::SeqCst));
    assert!(consumer.rows().is_empty());
}
