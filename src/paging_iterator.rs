//! The pluggable merge algorithm kept out of the receiver's scope: the
//! receiver does not implement the merge itself, it drives a pluggable
//! paging iterator that performs it. This module defines the seam
//! (`PagingIterator`, `Page`, `Need`) and ships two concrete strategies,
//! concat and sort-merge.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::bucket::KeyedBucket;
use crate::row::Row;

/// A freshly completed page: one [`KeyedBucket`] per upstream that has ever
/// sent data, plus the set of upstream indices known to be exhausted at the
/// moment this page was assembled. `exhausted` is what lets a merge
/// algorithm distinguish "this upstream's bucket is momentarily empty,
/// merging must wait for more" from "this upstream is done forever,
/// nothing it could still deliver can affect ordering".
#[derive(Debug, Clone)]
pub struct Page {
    pub entries: Vec<KeyedBucket<usize>>,
    pub exhausted: HashSet<usize>,
}

/// What a [`PagingIterator`] needs before it can produce another row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Need {
    /// No live upstream has buffered rows left; every upstream that hasn't
    /// declared exhaustion must supply its next page.
    AnyUpstream,
    /// Every upstream's contribution to the current page has been merged
    /// except this one; only it needs to supply more before merging can
    /// resume (the rest of the page may still have buffered rows waiting).
    SpecificUpstream(usize),
}

/// Given per-upstream row buckets, produces a merged row sequence.
///
/// Implementations buffer whatever rows they haven't yielded yet between
/// calls to [`Self::accept_page`]; `BatchPagingIterator` calls
/// [`Self::next_row`] until it gets a [`Need`], asks the receiver for more
/// accordingly, then feeds the resulting page back in.
pub trait PagingIterator: Send {
    /// Folds a newly arrived page into the iterator's internal buffers.
    fn accept_page(&mut self, page: Page);

    /// Pops the next row in merge order, or reports what's blocking
    /// further progress.
    fn next_row(&mut self) -> Result<Row, Need>;
}

/// Concatenates upstreams in ascending key order, preserving each bucket's
/// internal row order - the simplest merge discipline.
#[derive(Debug, Default)]
pub struct ConcatPagingIterator {
    buffered: VecDeque<Row>,
}

impl ConcatPagingIterator {
    pub fn new() -> Self {
        ConcatPagingIterator::default()
    }
}

impl PagingIterator for ConcatPagingIterator {
    fn accept_page(&mut self, mut page: Page) {
        page.entries.sort_by_key(|entry| entry.key);
        for entry in page.entries {
            self.buffered.extend(entry.bucket);
        }
    }

    fn next_row(&mut self) -> Result<Row, Need> {
        self.buffered.pop_front().ok_or(Need::AnyUpstream)
    }
}

/// A k-way merge across the buckets of the current page, ordered by a
/// caller-supplied comparator over rows.
pub struct SortMergePagingIterator {
    queues: HashMap<usize, VecDeque<Row>>,
    exhausted: HashSet<usize>,
    known_keys: BTreeSet<usize>,
    compare: Box<dyn Fn(&Row, &Row) -> Ordering + Send>,
}

impl SortMergePagingIterator {
    pub fn new(compare: impl Fn(&Row, &Row) -> Ordering + Send + 'static) -> Self {
        SortMergePagingIterator {
            queues: HashMap::new(),
            exhausted: HashSet::new(),
            known_keys: BTreeSet::new(),
            compare: Box::new(compare),
        }
    }
}

impl PagingIterator for SortMergePagingIterator {
    fn accept_page(&mut self, page: Page) {
        for entry in page.entries {
            self.known_keys.insert(entry.key);
            self.queues
                .entry(entry.key)
                .or_default()
                .extend(entry.bucket);
        }
        self.exhausted = page.exhausted;
    }

    fn next_row(&mut self) -> Result<Row, Need> {
        // A live upstream with nothing buffered blocks the merge: rows it
        // hasn't sent yet could still sort ahead of whatever we have.
        for key in &self.known_keys {
            let empty = self.queues.get(key).map_or(true, |q| q.is_empty());
            if empty && !self.exhausted.contains(key) {
                return Err(Need::SpecificUpstream(*key));
            }
        }

        let mut best_key: Option<usize> = None;
        for (key, queue) in &self.queues {
            let Some(row) = queue.front() else {
                continue;
            };
            best_key = match best_key {
                None => Some(*key),
                Some(current) => {
                    let current_row = self.queues[&current].front().expect("checked non-empty");
                    if (self.compare)(row, current_row) == Ordering::Less {
                        Some(*key)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        match best_key {
            Some(key) => Ok(self
                .queues
                .get_mut(&key)
                .expect("key came from queues")
                .pop_front()
                .expect("checked non-empty")),
            None => Err(Need::AnyUpstream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{Bucket, KeyedBucket};
    use crate::row::Cell;

    fn row(n: i64) -> Row {
        Row::new(vec![Cell::I64(n)])
    }

    fn page(entries: Vec<(usize, Vec<i64>)>, exhausted: &[usize]) -> Page {
        Page {
            entries: entries
                .into_iter()
                .map(|(k, vs)| KeyedBucket::new(k, Bucket::new(vs.into_iter().map(row).collect())))
                .collect(),
            exhausted: exhausted.iter().copied().collect(),
        }
    }

    fn by_i64(a: &Row, b: &Row) -> Ordering {
        let (Cell::I64(x), Cell::I64(y)) = (a.get(0).unwrap(), b.get(0).unwrap()) else {
            panic!("expected i64 cells")
        };
        x.cmp(y)
    }

    #[test]
    fn concat_preserves_key_then_bucket_order() {
        let mut it = ConcatPagingIterator::new();
        it.accept_page(page(vec![(1, vec![3, 4]), (0, vec![1, 2])], &[]));

        let mut out = Vec::new();
        while let Ok(r) = it.next_row() {
            out.push(r);
        }
        assert_eq!(out, vec![row(1), row(2), row(3), row(4)]);
    }

    #[test]
    fn sort_merge_interleaves_by_comparator() {
        let mut it = SortMergePagingIterator::new(by_i64);
        it.accept_page(page(vec![(0, vec![1, 3, 5]), (1, vec![2, 4, 6])], &[]));

        let mut out = Vec::new();
        loop {
            match it.next_row() {
                Ok(r) => out.push(r),
                Err(_) => break,
            }
        }
        assert_eq!(out, (1..=6).map(row).collect::<Vec<_>>());
    }

    #[test]
    fn sort_merge_blocks_on_specific_upstream() {
        let mut it = SortMergePagingIterator::new(by_i64);
        it.accept_page(page(vec![(0, vec![1]), (1, vec![2, 3])], &[]));

        assert_eq!(it.next_row().unwrap(), row(1));
        // upstream 0's single row is consumed; upstream 1 still has rows
        // buffered, but we must not skip ahead of a live upstream 0.
        assert_eq!(it.next_row(), Err(Need::SpecificUpstream(0)));
    }

    #[test]
    fn sort_merge_ignores_exhausted_empty_upstream() {
        let mut it = SortMergePagingIterator::new(by_i64);
        it.accept_page(page(vec![(0, vec![]), (1, vec![2, 3])], &[0]));

        assert_eq!(it.next_row().unwrap(), row(2));
        assert_eq!(it.next_row().unwrap(), row(3));
        assert_eq!(it.next_row(), Err(Need::AnyUpstream));
    }
}
