//! Per-peer machinery shared by both distributed executors: the passive
//! token bitmap, the victim-selection steal loop, and the binary-tree state
//! reduction that overlaps with stealing.
//!
//! # Tokens
//!
//! One bit per peer, set when that peer was observed to have nothing left to
//! give. Bits spread as gossip in `ASK` headers and as direct observations
//! from `NONE` answers; a peer also sets its own bit when it goes passive.
//! Within a superstep the bitmap only grows; the boundary resets it. All
//! updates go through a try-lock: a contender skips the update rather than
//! serializing the hot path, which is harmless because every piece of token
//! knowledge is advisory (a stale miss costs one extra `ASK`).
//!
//! # Reduction
//!
//! Peers form a binary tree (parent of `r` is `(r−1)/2`). Every peer owes
//! its parent exactly one contribution per superstep: the join of its own
//! state view and everything its children delivered. The contribution is
//! forwarded by whichever thread satisfies the condition last (the main
//! worker going passive, or the listener integrating the final child
//! payload), so reduction rides concurrently with stealing. An identity
//! contribution travels as an empty payload. The root's completion gates
//! the boundary broadcast, so no contribution can be lost to a race with
//! the end of the superstep.

use super::fabric::Endpoint;
use super::messaging::{recv_batch_from, send_object, send_raw};
use super::protocol::{
    fold_tokens, read_header, write_header, Request, ANS_TAG, RDC_TAG, REQ_TAG,
};
use crate::contract::{State, Task};
use crate::stdx::{DynamicBitSet, XorShift64};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

/// Reduction round state, guarded by the single per-peer reduction mutex.
struct Reduction<S> {
    /// Joined contributions: own view plus children subtrees.
    acc: S,
    /// Children that have not delivered yet.
    pending: usize,
    /// The main worker has folded its view in (it is passive).
    self_done: bool,
    /// Contribution forwarded (non-root) or round finished (root).
    sent: bool,
    complete: bool,
}

/// Snapshot of the last superstep, exposed for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepStats {
    /// Tasks scheduled globally for the next superstep.
    pub scheduled: i64,
    /// Tasks this peer processed from its own queues.
    pub processed_local: i64,
    /// Tasks this peer processed out of stolen batches.
    pub processed_remote: i64,
    /// Global sums from the boundary all-reduce.
    pub global_local: i64,
    pub global_remote: i64,
    /// Standard deviation of per-peer work as a percentage of the mean.
    pub imbalance_pct: f32,
    /// Whether the token bitmap was full at the boundary.
    pub tokens_full: bool,
    /// Cumulative `ASK` requests issued by this peer.
    pub asks_sent: u64,
}

/// State shared between a peer's main worker and its listener thread.
pub(crate) struct PeerCore<S> {
    rank: usize,
    size: usize,
    tokens: Mutex<DynamicBitSet>,
    passive: AtomicBool,
    asks_sent: AtomicU64,
    rdc: Mutex<Reduction<S>>,
    rdc_cv: Condvar,
}

impl<S: State> PeerCore<S> {
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            tokens: Mutex::new(DynamicBitSet::empty(size)),
            passive: AtomicBool::new(false),
            asks_sent: AtomicU64::new(0),
            rdc: Mutex::new(Reduction {
                acc: S::default(),
                pending: 0,
                self_done: false,
                sent: false,
                complete: false,
            }),
            rdc_cv: Condvar::new(),
        }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    fn parent(&self) -> usize {
        (self.rank - 1) / 2
    }

    fn child_count(&self) -> usize {
        [2 * self.rank + 1, 2 * self.rank + 2]
            .iter()
            .filter(|&&c| c < self.size)
            .count()
    }

    /// Number of peers not yet observed passive.
    pub fn active_peers(&self) -> usize {
        let tokens = self.tokens.lock().expect("token bitmap poisoned");
        self.size - tokens.count()
    }

    pub fn asks_sent(&self) -> u64 {
        self.asks_sent.load(Ordering::Relaxed)
    }

    /// Whether this peer has exhausted its own work and its candidates.
    pub fn is_passive(&self) -> bool {
        self.passive.load(Ordering::Acquire)
    }

    /// Whether every peer (including this one) is marked passive.
    pub fn tokens_full(&self) -> bool {
        self.tokens.lock().expect("token bitmap poisoned").is_full()
    }

    /// Boundary reset: bitmap cleared, fresh reduction round.
    pub fn reset_round(&self) {
        self.tokens.lock().expect("token bitmap poisoned").reset();
        self.passive.store(false, Ordering::Release);
        let mut r = self.rdc.lock().expect("reduction state poisoned");
        *r = Reduction {
            acc: S::default(),
            pending: self.child_count(),
            self_done: false,
            sent: false,
            complete: false,
        };
    }

    /// Folds an incoming header's token bits; skipped without blocking when
    /// the bitmap is contended.
    pub fn fold_header_tokens(&self, req: Request, token_bytes: &[u8], src: usize) {
        if let Ok(mut tokens) = self.tokens.try_lock() {
            fold_tokens(&mut tokens, req, token_bytes, src);
        }
    }

    /// Main-worker steal phase: draw random victims, skip known-passive
    /// ones, `ASK` the rest, process every positive answer through
    /// `on_batch`. Returns the number of stolen tasks processed.
    ///
    /// On return the candidate list is exhausted; the caller transitions to
    /// passive via [`mark_passive_and_contribute`](Self::mark_passive_and_contribute).
    pub fn steal_loop<T, F>(&self, bg: &Endpoint, rng: &mut XorShift64, mut on_batch: F) -> i64
    where
        T: Task,
        F: FnMut(Vec<T>) -> usize,
    {
        let mut candidates: Vec<usize> = (0..self.size).filter(|&r| r != self.rank).collect();
        let mut header = Vec::new();
        let mut count: i64 = 0;

        while !candidates.is_empty() {
            let pos = rng.next_usize(candidates.len());
            let victim = candidates[pos];

            // Advisory check; under contention assume the victim is active
            // and let the ASK find out.
            let victim_passive = self
                .tokens
                .try_lock()
                .map(|t| t.is_set(victim))
                .unwrap_or(false);
            if victim_passive {
                candidates.swap_remove(pos);
                continue;
            }

            {
                let tokens = self.tokens.lock().expect("token bitmap poisoned");
                write_header(&mut header, Request::Ask, Some(&tokens), self.size);
            }
            bg.send(victim, REQ_TAG, header.clone());
            self.asks_sent.fetch_add(1, Ordering::Relaxed);

            // Exactly one outstanding ASK, so the next ANS-tag header is the
            // victim's verdict.
            let (src, data) = bg.recv(ANS_TAG);
            let (req, token_bytes) =
                read_header(&data, self.size).expect("malformed steal answer header");
            self.fold_header_tokens(req, token_bytes, src);

            if req == Request::Ans {
                let batch: Vec<T> =
                    recv_batch_from(bg, src, ANS_TAG).expect("malformed stolen task batch");
                count += on_batch(batch) as i64;
            } else {
                candidates.swap_remove(pos);
            }
        }

        count
    }

    /// Marks this peer passive (flag + own token bit) and folds its state
    /// view into the reduction round, forwarding if the subtree is already
    /// complete.
    pub fn mark_passive_and_contribute(&self, view: &S, bg: &Endpoint) {
        self.passive.store(true, Ordering::Release);
        self.tokens
            .lock()
            .expect("token bitmap poisoned")
            .set(self.rank);

        let mut r = self.rdc.lock().expect("reduction state poisoned");
        r.acc.join(view);
        r.self_done = true;
        self.try_forward(&mut r, bg);
    }

    /// Listener path: integrates a child's contribution (possibly empty)
    /// and forwards when this peer's subtree is complete.
    pub fn integrate_child(&self, contribution: Option<S>, bg: &Endpoint) {
        let mut r = self.rdc.lock().expect("reduction state poisoned");
        if let Some(st) = contribution {
            r.acc.join(&st);
        }
        debug_assert!(r.pending > 0, "more child contributions than children");
        r.pending -= 1;
        self.try_forward(&mut r, bg);
    }

    fn try_forward(&self, r: &mut Reduction<S>, bg: &Endpoint) {
        if r.sent || !r.self_done || r.pending > 0 {
            return;
        }
        r.sent = true;

        if self.rank == 0 {
            r.complete = true;
            self.rdc_cv.notify_all();
            return;
        }

        let mut header = Vec::new();
        write_header(&mut header, Request::Rdc, None, self.size);
        bg.send(self.parent(), REQ_TAG, header);

        if r.acc == S::default() {
            // Identity contribution: header still owed for the accounting,
            // payload stays empty.
            send_raw(bg, self.parent(), RDC_TAG, &[]);
        } else {
            send_object(bg, self.parent(), RDC_TAG, &r.acc)
                .expect("state serialization failed in reduction");
        }
    }

    /// Root only: blocks until every subtree reported, then yields the
    /// reduced contribution.
    pub fn wait_complete(&self) -> S {
        debug_assert_eq!(self.rank, 0, "only the root waits for completion");
        let mut r = self.rdc.lock().expect("reduction state poisoned");
        while !r.complete {
            r = self
                .rdc_cv
                .wait(r)
                .expect("reduction state poisoned while waiting");
        }
        std::mem::take(&mut r.acc)
    }
}
