//! Per-thread sharded task table.
//!
//! Logically one hash set of tasks; physically `P` views of `B` buckets
//! each. During a superstep every worker inserts only into its own view, so
//! there is no write contention at all. At the superstep boundary
//! [`TaskTable::reconcile`] folds views `1..P` into view 0, bucket by
//! bucket: bucket `b` is computed from the task hash identically in every
//! view, so different buckets are independent and reconciliation
//! parallelizes at the granularity of hash residues.
//!
//! Buckets are lazily cleared: `lazy_clear` only drops the `used` flags and
//! sizes, leaving stale vectors in place. An unused bucket is logically
//! empty no matter what bytes it still holds; the next insert into it
//! clears the leftovers first. This keeps allocator traffic out of the
//! steady-state superstep loop.

use crate::contract::Task;
use crate::stdx::fast_range;
use ahash::RandomState;

/// Default bucket count; prime, so residues spread even if user hashes have
/// structure in their low bits.
pub const DEFAULT_BUCKETS: usize = 99_991;

/// One thread's private view of the table.
#[derive(Debug)]
pub struct TaskView<T> {
    buckets: Vec<Vec<T>>,
    used: Vec<bool>,
    size: usize,
    last_used: Option<usize>,
}

impl<T: Task> TaskView<T> {
    fn new(b: usize) -> Self {
        Self {
            buckets: (0..b).map(|_| Vec::new()).collect(),
            used: vec![false; b],
            size: 0,
            last_used: None,
        }
    }

    /// Logical entry count.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Highest bucket index touched since the last clear; bounds
    /// reconciliation work.
    #[inline]
    pub fn last_used(&self) -> Option<usize> {
        self.last_used
    }

    /// Marks every bucket unused without freeing anything.
    fn lazy_clear(&mut self) {
        self.used.fill(false);
        self.size = 0;
        self.last_used = None;
    }

    /// Like `lazy_clear`, but also swaps bucket storage away.
    fn soft_clear(&mut self) {
        for b in &mut self.buckets {
            *b = Vec::new();
        }
        self.lazy_clear();
    }

    /// Drops all capacity.
    fn release(&mut self) {
        self.buckets = Vec::new();
        self.used = Vec::new();
        self.size = 0;
        self.last_used = None;
    }

    /// Inserts into bucket `b`, clearing stale content first; merges into an
    /// equal entry if one is present.
    fn insert_at(&mut self, b: usize, task: T) {
        let bucket = &mut self.buckets[b];
        if !self.used[b] && !bucket.is_empty() {
            bucket.clear();
        }
        self.used[b] = true;
        self.last_used = Some(self.last_used.map_or(b, |l| l.max(b)));

        match bucket.iter_mut().find(|t| **t == task) {
            Some(held) => held.merge(task),
            None => {
                bucket.push(task);
                self.size += 1;
            }
        }
    }

    /// Folds bucket `b` of `src` into this view's bucket `b`; returns the
    /// number of entries that were new here.
    ///
    /// Safe to run concurrently for distinct `b`: it touches only
    /// per-bucket storage plus this view's `used[b]` slot. The view-level
    /// `size`/`last_used` are reconciled by the caller afterwards.
    fn merge_bucket(bucket: &mut Vec<T>, used: &mut bool, src: &TaskView<T>, b: usize) -> usize {
        if !src.used[b] {
            return 0;
        }

        if !*used && !bucket.is_empty() {
            bucket.clear();
        }
        *used = true;

        let mut added = 0;
        for entry in &src.buckets[b] {
            match bucket.iter_mut().find(|t| **t == *entry) {
                Some(held) => held.merge(entry.clone()),
                None => {
                    bucket.push(entry.clone());
                    added += 1;
                }
            }
        }
        added
    }

    /// Entries of one bucket, or `None` when the bucket is logically empty.
    pub(crate) fn bucket_entries(&self, b: usize) -> Option<&[T]> {
        if self.used[b] && !self.buckets[b].is_empty() {
            Some(&self.buckets[b])
        } else {
            None
        }
    }
}

/// Sharded hash set: `P` per-thread views over a common bucket geometry.
#[derive(Debug)]
pub struct TaskTable<T> {
    views: Vec<TaskView<T>>,
    hasher: RandomState,
    b: usize,
}

impl<T: Task> TaskTable<T> {
    /// Table with `p` views of `b` buckets each.
    pub fn new(b: usize, p: usize) -> Self {
        assert!(b > 0, "bucket count must be > 0");
        assert!(p > 0, "view count must be > 0");
        Self {
            views: (0..p).map(|_| TaskView::new(b)).collect(),
            hasher: RandomState::new(),
            b,
        }
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn num_buckets(&self) -> usize {
        self.b
    }

    /// Bucket index for a task; identical across all views by construction
    /// (one hasher per table).
    #[inline]
    pub fn bucket_of(&self, task: &T) -> usize {
        fast_range(self.hasher.hash_one(task), self.b as u64) as usize
    }

    /// Inserts into view `v` (the calling worker's own view).
    pub fn insert(&mut self, v: usize, task: T) {
        let b = self.bucket_of(&task);
        self.views[v].insert_at(b, task);
    }

    /// Splits the views into per-worker mutable handles for a parallel
    /// phase. Each handle inserts through the shared hasher into its own
    /// view.
    pub fn split_views(&mut self) -> (&RandomState, usize, &mut [TaskView<T>]) {
        (&self.hasher, self.b, &mut self.views)
    }

    /// Entry count of the master view (view 0).
    pub fn master_len(&self) -> usize {
        self.views[0].len()
    }

    /// The master view, for read-only bucket walks during a parallel phase.
    pub(crate) fn master_view(&self) -> &TaskView<T> {
        &self.views[0]
    }

    pub fn is_empty(&self) -> bool {
        self.views[0].is_empty()
    }

    /// Looks up a task in the master view.
    pub fn find(&self, probe: &T) -> Option<&T> {
        let view = &self.views[0];
        let b = self.bucket_of(probe);
        view.bucket_entries(b)?.iter().find(|t| **t == *probe)
    }

    /// Marks every bucket of every view unused; keeps allocations.
    pub fn lazy_clear(&mut self) {
        for v in &mut self.views {
            v.lazy_clear();
        }
    }

    /// Clears and drops bucket storage, keeping the geometry.
    pub fn soft_clear(&mut self) {
        for v in &mut self.views {
            v.soft_clear();
        }
    }

    /// Releases all memory; the table must be rebuilt before reuse.
    pub fn release(&mut self) {
        for v in &mut self.views {
            v.release();
        }
    }

    /// Highest bucket index used by any view.
    fn last_used_global(&self) -> Option<usize> {
        self.views.iter().filter_map(|v| v.last_used).max()
    }

    /// Folds views `1..P` into view 0 sequentially. The parallel executors
    /// use [`reconcile_parallel`](Self::reconcile_parallel); semantics are
    /// identical.
    pub fn reconcile(&mut self) {
        let Some(last) = self.last_used_global() else {
            return;
        };
        let (master, rest) = self.views.split_at_mut(1);
        let master = &mut master[0];

        let mut added = 0;
        let mut high = master.last_used;
        for b in 0..=last {
            let mut touched = false;
            for src in rest.iter() {
                added += TaskView::merge_bucket(
                    &mut master.buckets[b],
                    &mut master.used[b],
                    src,
                    b,
                );
                touched |= src.used[b];
            }
            if touched {
                high = Some(high.map_or(b, |h| h.max(b)));
            }
        }
        master.size += added;
        master.last_used = high;
    }

    /// Bucket-parallel reconcile over `workers` threads.
    ///
    /// The bucket range `[0, last_used_global]` is split into contiguous
    /// chunks; each worker owns a disjoint `&mut` slice of view 0's buckets
    /// and `used` flags, so no synchronization is needed inside the fold.
    /// Per-worker new-entry counts are summed into view 0's size at the end.
    pub fn reconcile_parallel(&mut self, workers: usize) {
        let Some(last) = self.last_used_global() else {
            return;
        };
        let span = last + 1;
        let workers = workers.clamp(1, span);
        if workers == 1 {
            self.reconcile();
            return;
        }

        let (master, rest) = self.views.split_at_mut(1);
        let master = &mut master[0];
        let bucket_slices = split_chunks(&mut master.buckets[..span], workers);
        let used_slices = split_chunks(&mut master.used[..span], workers);

        let rest = &rest[..];
        let mut results: Vec<(usize, Option<usize>)> = Vec::with_capacity(workers);

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            let mut offset = 0;
            for (buckets, used) in bucket_slices.into_iter().zip(used_slices) {
                let base = offset;
                offset += buckets.len();
                handles.push(scope.spawn(move || {
                    let mut added = 0;
                    let mut high: Option<usize> = None;
                    for (i, (bucket, used_flag)) in
                        buckets.iter_mut().zip(used.iter_mut()).enumerate()
                    {
                        let b = base + i;
                        let mut touched = *used_flag;
                        for src in rest {
                            added += TaskView::merge_bucket(bucket, used_flag, src, b);
                            touched |= src.used[b];
                        }
                        if touched {
                            high = Some(b);
                        }
                    }
                    (added, high)
                }));
            }
            for h in handles {
                results.push(h.join().expect("reconcile worker panicked"));
            }
        });

        let added: usize = results.iter().map(|(a, _)| a).sum();
        let high = results.iter().filter_map(|(_, h)| *h).max();
        master.size += added;
        master.last_used = match (master.last_used, high) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    /// Iterates the master view: buckets in index order, entries in bucket
    /// order, unused buckets skipped. Any mutation invalidates it (enforced
    /// by the borrow).
    pub fn iter_master(&self) -> MasterIter<'_, T> {
        MasterIter {
            view: &self.views[0],
            bucket: 0,
            pos: 0,
        }
    }
}

/// Splits a slice into `n` contiguous chunks whose lengths differ by at most
/// one.
fn split_chunks<E>(slice: &mut [E], n: usize) -> Vec<&mut [E]> {
    let len = slice.len();
    let base = len / n;
    let extra = len % n;
    let mut out = Vec::with_capacity(n);
    let mut rest = slice;
    for i in 0..n {
        let take = base + usize::from(i < extra);
        let (head, tail) = rest.split_at_mut(take);
        out.push(head);
        rest = tail;
    }
    out
}

/// Forward iterator over the master view.
pub struct MasterIter<'a, T> {
    view: &'a TaskView<T>,
    bucket: usize,
    pos: usize,
}

impl<'a, T: Task> Iterator for MasterIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let last = self.view.last_used?;
        while self.bucket <= last {
            if let Some(entries) = self.view.bucket_entries(self.bucket) {
                if self.pos < entries.len() {
                    let item = &entries[self.pos];
                    self.pos += 1;
                    return Some(item);
                }
            }
            self.bucket += 1;
            self.pos = 0;
        }
        None
    }
}

/// Insert handle used by the parallel executors: a worker's own view plus
/// the shared geometry.
pub(crate) struct ViewHandle<'a, T> {
    pub hasher: &'a RandomState,
    pub b: usize,
    pub view: &'a mut TaskView<T>,
}

impl<T: Task> ViewHandle<'_, T> {
    #[inline]
    pub fn insert(&mut self, task: T) {
        let b = fast_range(self.hasher.hash_one(&task), self.b as u64) as usize;
        self.view.insert_at(b, task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::PairTask;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn pt(a: u32, b: u32) -> PairTask {
        PairTask::new(a, b, 0)
    }

    #[test]
    fn insert_then_find() {
        let mut table: TaskTable<PairTask> = TaskTable::new(64, 2);
        table.insert(0, pt(1, 2));
        assert_eq!(table.master_len(), 1);
        assert!(table.find(&pt(2, 1)).is_some());
        assert!(table.find(&pt(3, 1)).is_none());
    }

    #[test]
    fn duplicate_insert_merges_not_grows() {
        let mut table: TaskTable<PairTask> = TaskTable::new(64, 1);
        table.insert(0, pt(1, 2));
        table.insert(0, pt(2, 1));
        assert_eq!(table.master_len(), 1);
        assert_eq!(table.find(&pt(1, 2)).unwrap().hits, 2);
    }

    #[test]
    fn reconcile_identity_same_task_in_every_view() {
        // The same task inserted in P views reconciles to one entry whose
        // merge ran P-1 times.
        let p = 4;
        let mut table: TaskTable<PairTask> = TaskTable::new(128, p);
        for v in 0..p {
            table.insert(v, pt(7, 9));
        }
        table.reconcile();
        assert_eq!(table.master_len(), 1);
        assert_eq!(table.find(&pt(7, 9)).unwrap().hits, p as u32);
    }

    #[test]
    fn reconcile_unions_disjoint_views() {
        let mut table: TaskTable<PairTask> = TaskTable::new(16, 3);
        table.insert(0, pt(0, 1));
        table.insert(1, pt(2, 3));
        table.insert(2, pt(4, 5));
        table.reconcile();
        assert_eq!(table.master_len(), 3);
        for probe in [pt(0, 1), pt(2, 3), pt(4, 5)] {
            assert!(table.find(&probe).is_some());
        }
    }

    #[test]
    fn reconcile_leaves_no_equal_pair_in_any_bucket() {
        let mut table: TaskTable<PairTask> = TaskTable::new(8, 4);
        // Small bucket count forces collisions.
        for v in 0..4 {
            for a in 0..10u32 {
                table.insert(v, pt(a, a + 1));
            }
        }
        table.reconcile();
        assert_eq!(table.master_len(), 10);

        let view = &table.views[0];
        for b in 0..table.b {
            if let Some(entries) = view.bucket_entries(b) {
                for (i, x) in entries.iter().enumerate() {
                    for y in &entries[i + 1..] {
                        assert_ne!(x, y, "equal entries left in bucket {b}");
                    }
                }
            }
        }
    }

    #[test]
    fn parallel_reconcile_matches_sequential() {
        let build = |table: &mut TaskTable<PairTask>| {
            for v in 0..table.num_views() {
                for a in 0..50u32 {
                    table.insert(v, pt(a % 13, (a * 7) % 13));
                }
            }
        };

        let mut seq: TaskTable<PairTask> = TaskTable::new(32, 4);
        build(&mut seq);
        seq.reconcile();

        let mut par: TaskTable<PairTask> = TaskTable::new(32, 4);
        build(&mut par);
        par.reconcile_parallel(3);

        assert_eq!(seq.master_len(), par.master_len());
        let collect = |t: &TaskTable<PairTask>| {
            let mut m: HashMap<(u32, u32), u32> = HashMap::new();
            for task in t.iter_master() {
                m.insert((task.a.min(task.b), task.a.max(task.b)), task.hits);
            }
            m
        };
        assert_eq!(collect(&seq), collect(&par));
    }

    #[test]
    fn lazy_clear_then_reuse_sees_empty_table() {
        let mut table: TaskTable<PairTask> = TaskTable::new(16, 2);
        table.insert(0, pt(1, 2));
        table.insert(1, pt(3, 4));
        table.reconcile();
        assert_eq!(table.master_len(), 2);

        table.lazy_clear();
        assert_eq!(table.master_len(), 0);
        assert!(table.find(&pt(1, 2)).is_none());
        assert_eq!(table.iter_master().count(), 0);

        // Stale vectors are cleared on the next touch of the bucket.
        table.insert(0, pt(1, 2));
        table.reconcile();
        assert_eq!(table.master_len(), 1);
        assert_eq!(table.find(&pt(1, 2)).unwrap().hits, 1);
    }

    #[test]
    fn iterator_walks_buckets_in_index_order() {
        let mut table: TaskTable<PairTask> = TaskTable::new(8, 1);
        for a in 0..20u32 {
            table.insert(0, pt(a, a + 100));
        }
        let mut last_bucket = 0;
        let mut seen = 0;
        let hasher_bucket: Vec<usize> = table
            .iter_master()
            .map(|t| table.bucket_of(t))
            .collect();
        for b in hasher_bucket {
            assert!(b >= last_bucket, "iterator went backwards");
            last_bucket = b;
            seen += 1;
        }
        assert_eq!(seen, 20);
    }

    #[test]
    fn soft_clear_and_release() {
        let mut table: TaskTable<PairTask> = TaskTable::new(16, 2);
        table.insert(0, pt(1, 2));
        table.soft_clear();
        assert!(table.is_empty());

        table.insert(0, pt(1, 2));
        table.release();
        assert_eq!(table.views[0].buckets.len(), 0);
    }

    proptest! {
        /// The multiset of equivalence classes after reconcile equals the
        /// union of the classes across all source views.
        #[test]
        fn reconcile_preserves_classes(
            inserts in prop::collection::vec((0usize..4, 0u32..12, 0u32..12), 0..200)
        ) {
            let mut table: TaskTable<PairTask> = TaskTable::new(16, 4);
            let mut expect: HashMap<(u32, u32), u32> = HashMap::new();
            for (v, a, b) in inserts {
                table.insert(v, pt(a, b));
                *expect.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
            table.reconcile();

            let mut got: HashMap<(u32, u32), u32> = HashMap::new();
            for task in table.iter_master() {
                let prev = got.insert((task.a.min(task.b), task.a.max(task.b)), task.hits);
                prop_assert!(prev.is_none(), "duplicate class in master view");
            }
            prop_assert_eq!(got, expect);
            prop_assert_eq!(table.master_len(), table.iter_master().count());
        }
    }
}
