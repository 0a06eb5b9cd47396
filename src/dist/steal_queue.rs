//! Goal-post split work queue shared by a peer's main worker and its
//! request listener.
//!
//! Per superstep the queue is refilled with a frozen task vector and three
//! cursors over it:
//!
//! ```text
//!   0 ........ curr ........ goal ................. hlp ........ len
//!              |— main's next batch —|  shared  |— carved tails —|
//! ```
//!
//! Invariant at every observation point: `curr ≤ goal ≤ hlp ≤ len`, and
//! only `[curr, hlp)` is still live. The main worker advances `curr` in
//! small batches; the listener answers steal requests by carving `[hlp−k,
//! hlp)` off the tail. The listener never reaches below the goal post
//! (`⌈LOCAL_FRACTION·len⌉`), so the prefix is always the main worker's, and
//! the main worker never reads past `hlp`, so carved tails are always the
//! thief's. The task storage itself is immutable for the whole superstep;
//! the single cursor lock covers index updates only.

use std::ops::Range;
use std::sync::{Mutex, RwLock};

/// Fraction of the queue reserved for the owning worker.
pub(crate) const LOCAL_FRACTION: f32 = 0.20;

/// Smallest batch worth moving: the main worker's claim granularity, and
/// the minimum live remainder a steal must leave behind.
pub(crate) const MIN_STEAL_BATCH: usize = 10;

#[derive(Debug, Clone, Copy)]
struct Cursors {
    curr: usize,
    goal: usize,
    hlp: usize,
}

/// The shared queue. One per peer in the unique distributed executor.
#[derive(Debug)]
pub(crate) struct StealQueue<T> {
    tasks: RwLock<Vec<T>>,
    cursors: Mutex<Cursors>,
}

impl<T> StealQueue<T> {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(Vec::new()),
            cursors: Mutex::new(Cursors {
                curr: 0,
                goal: 0,
                hlp: 0,
            }),
        }
    }

    /// Installs the superstep's task vector and resets the cursors.
    ///
    /// Must not race with steals; the executor guarantees that by fencing
    /// superstep boundaries with collectives on the main channel.
    pub fn refill(&self, tasks: Vec<T>) {
        let len = tasks.len();
        let goal = (LOCAL_FRACTION * len as f32).ceil() as usize;
        *self.tasks.write().expect("queue storage poisoned") = tasks;
        *self.cursors.lock().expect("queue cursors poisoned") = Cursors {
            curr: 0,
            goal: goal.min(len),
            hlp: len,
        };
    }

    /// Claims the main worker's next batch; `None` when the live region is
    /// drained.
    pub fn pop_batch(&self) -> Option<Range<usize>> {
        let mut c = self.cursors.lock().expect("queue cursors poisoned");
        if c.curr == c.hlp {
            return None;
        }
        let start = c.curr;
        c.curr = (c.curr + MIN_STEAL_BATCH).min(c.hlp);
        Some(start..c.curr)
    }

    /// Answers a steal request by carving a tail range, or refuses.
    ///
    /// The batch scales with how many peers are still active: with fraction
    /// `f = active/peers`, the carve is `⌈max(0.1·f, 0.01) · (hlp − goal)⌉`
    /// (generous while everyone is hungry, a trickle near termination). The
    /// carve is refused when it would cross the goal post or leave fewer
    /// than [`MIN_STEAL_BATCH`] live tasks to the owner.
    pub fn steal(&self, active: usize, peers: usize) -> Option<Range<usize>> {
        debug_assert!(peers > 0);
        let fraction = (0.1 * active as f32 / peers as f32).max(0.01);

        let mut c = self.cursors.lock().expect("queue cursors poisoned");
        let batch = ((c.hlp - c.goal) as f32 * fraction).ceil() as usize;
        let Some(start) = c.hlp.checked_sub(batch) else {
            return None;
        };
        // Refuse when the carve would invade the owner's share or leave it
        // less than one claim's worth of live work (the owner's cursor may
        // already sit past the carve start).
        if start <= c.goal || start < c.curr + MIN_STEAL_BATCH {
            return None;
        }
        let end = c.hlp;
        c.hlp = start;
        Some(start..end)
    }

    /// Runs `f` over a claimed range of the frozen storage.
    pub fn with_range<R>(&self, range: Range<usize>, f: impl FnOnce(&[T]) -> R) -> R {
        let guard = self.tasks.read().expect("queue storage poisoned");
        f(&guard[range])
    }

    /// Live task count, `hlp − curr`.
    pub fn live(&self) -> usize {
        let c = self.cursors.lock().expect("queue cursors poisoned");
        c.hlp - c.curr
    }

    /// Cursor snapshot `(curr, goal, hlp, len)`; invariant checks only.
    #[cfg(test)]
    pub fn cursors(&self) -> (usize, usize, usize, usize) {
        let c = self.cursors.lock().expect("queue cursors poisoned");
        let len = self.tasks.read().expect("queue storage poisoned").len();
        (c.curr, c.goal, c.hlp, len)
    }
}
