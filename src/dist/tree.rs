//! Distributed executor for unique (tree) search spaces.
//!
//! Each peer runs the main worker plus a request listener thread servicing
//! the background channel. The superstep's tasks live in a goal-post split
//! queue (`steal_queue`): the main worker drains from the
//! front in small batches while the listener carves steal answers off the
//! tail, scaled by how many peers are still hungry. When the local queue is
//! dry the worker turns thief; when its candidate list is exhausted it goes
//! passive and contributes its state view to the reduction tree.
//!
//! Children pushed during the superstep, including children of stolen
//! tasks, land in the executing peer's own next queue; nothing is shipped
//! home. The boundary all-reduces the four work counters, sanity-checks
//! `local + remote == total`, refills the queue, and broadcasts the reduced
//! state from the root.

use super::fabric::Endpoint;
use super::messaging::{
    allreduce_counters, bcast_counters, bcast_object, recv_object_from, send_batch, Counters,
};
use super::peer::{PeerCore, StepStats};
use super::protocol::{read_header, write_header, Request, ANS_TAG, RDC_TAG, REQ_TAG};
use super::steal_queue::StealQueue;
use crate::contract::{Context, Executor, State, Task};
use crate::logger::Logger;
use crate::stdx::XorShift64;
use crate::{log_debug, log_error, log_info};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Configuration for the distributed executors.
#[derive(Clone, Copy, Debug, Default)]
pub struct DistConfig {
    /// RNG seed; `None` draws entropy, `Some` makes victim selection (and
    /// listener probing) reproducible across runs.
    pub seed: Option<u64>,
}

struct TreeCtx<'a, T> {
    iter: u64,
    next: &'a mut Vec<T>,
}

impl<T: Task> Context<T> for TreeCtx<'_, T> {
    #[inline]
    fn iteration(&self) -> u64 {
        self.iter
    }

    #[inline]
    fn push(&mut self, task: T) {
        self.next.push(task);
    }
}

/// Distributed executor over a peer group; tree specialization.
pub struct TreeExecutor<T: Task> {
    ep: Endpoint,
    bg: Endpoint,
    core: Arc<PeerCore<T::State>>,
    queue: Arc<StealQueue<T>>,
    next: Vec<T>,
    gst: T::State,
    view: T::State,
    gcount: Counters,
    stats: StepStats,
    iter: u64,
    rng: XorShift64,
    listener: Option<JoinHandle<()>>,
    log: Logger,
}

impl<T: Task> TreeExecutor<T> {
    /// Builds the peer's executor from its fabric endpoint and starts the
    /// listener. Collective: every peer of the group must construct its
    /// executor before any can return (the constructor barriers).
    pub fn new(mut ep: Endpoint, cfg: DistConfig) -> Self {
        let rank = ep.rank();
        let size = ep.size();
        let log = Logger::new(rank);

        let mut seed_rng = match cfg.seed {
            Some(seed) => XorShift64::new(seed.wrapping_add(rank as u64)),
            None => XorShift64::from_entropy(),
        };
        let rng = seed_rng.fork();

        let bg = ep.dup();
        let core = Arc::new(PeerCore::new(rank, size));
        core.reset_round();
        let queue = Arc::new(StealQueue::new());

        let listener = {
            let bg = bg.clone();
            let core = Arc::clone(&core);
            let queue = Arc::clone(&queue);
            std::thread::Builder::new()
                .name(format!("scool-listener-{rank}"))
                .spawn(move || listener_main::<T>(bg, core, queue))
                .expect("failed to spawn listener thread")
        };

        ep.barrier();
        log_info!(log, "dist", "ready with {} ranks", size);

        Self {
            ep,
            bg,
            core,
            queue,
            next: Vec::new(),
            gst: T::State::default(),
            view: T::State::default(),
            gcount: [0; 4],
            stats: StepStats::default(),
            iter: 0,
            rng,
            listener: Some(listener),
            log,
        }
    }

    /// Last superstep's counter snapshot.
    pub fn stats(&self) -> StepStats {
        self.stats
    }

    fn process_local(&mut self) -> i64 {
        let mut count: i64 = 0;
        let mut ctx = TreeCtx {
            iter: self.iter,
            next: &mut self.next,
        };
        while let Some(range) = self.queue.pop_batch() {
            count += range.len() as i64;
            self.queue.with_range(range, |tasks| {
                for t in tasks {
                    t.process(&mut ctx, &mut self.view);
                }
            });
        }
        count
    }
}

/// Listener thread body: services steal requests against the shared queue
/// and integrates reduction payloads, until `FIN`.
fn listener_main<T: Task>(bg: Endpoint, core: Arc<PeerCore<T::State>>, queue: Arc<StealQueue<T>>) {
    let size = bg.size();
    let mut header = Vec::new();

    loop {
        let (src, data) = bg.recv(REQ_TAG);
        let (req, token_bytes) = read_header(&data, size).expect("malformed request header");
        core.fold_header_tokens(req, token_bytes, src);

        match req {
            Request::Fin => break,
            Request::Rdc => {
                let contribution =
                    recv_object_from::<T::State>(&bg, src, RDC_TAG).expect("malformed reduction payload");
                core.integrate_child(contribution, &bg);
            }
            Request::Ask => {
                // Batch size scales with the still-active fraction of the
                // group; the queue refuses when the carve would invade the
                // owner's share.
                let active = core.active_peers();
                match queue.steal(active, size) {
                    Some(range) => {
                        write_header(&mut header, Request::Ans, None, size);
                        bg.send(src, ANS_TAG, header.clone());
                        queue.with_range(range, |tasks| {
                            send_batch(&bg, src, ANS_TAG, tasks.iter().cloned())
                                .expect("task serialization failed in steal answer");
                        });
                    }
                    None => {
                        write_header(&mut header, Request::None, None, size);
                        bg.send(src, ANS_TAG, header.clone());
                    }
                }
            }
            Request::None | Request::Ans => {
                // Answers travel on ANS_TAG; seeing one here is a peer bug.
            }
        }
    }
}

impl<T: Task> Executor for TreeExecutor<T> {
    type Task = T;
    type State = T::State;

    fn init(&mut self, task: T, state: T::State) {
        self.init_many([task], state);
    }

    /// Every peer calls `init_many` with the same seed collection; rank 0
    /// keeps it, the others start empty and steal their share.
    fn init_many<I: IntoIterator<Item = T>>(&mut self, tasks: I, state: T::State) {
        let mut seeds: Vec<T> = Vec::new();
        if self.core.rank() == 0 {
            seeds.extend(tasks);
            self.gcount = [seeds.len() as i64, 0, 0, 0];
        } else {
            self.gcount = [0; 4];
        }
        self.queue.refill(seeds);
        self.next.clear();

        self.gst = state;
        self.view = self.gst.clone();
        self.view.identity();
        self.core.reset_round();

        // Early ASKs must find consistent queues on every peer.
        self.ep.barrier();
        bcast_counters(&self.ep, &mut self.gcount).expect("counter broadcast failed");
    }

    fn step(&mut self) -> u64 {
        let global_tasks = self.gcount[0];
        log_info!(
            self.log,
            "dist",
            "processing {} tasks, superstep {}",
            global_tasks,
            self.iter
        );

        let mut counts: Counters = [0; 4];

        counts[1] = self.process_local();
        // The live region is drained for good: the owner ran out and carved
        // tails only ever shrink it.
        debug_assert_eq!(self.queue.live(), 0);

        // A superstep with no work anywhere skips straight to passive; no
        // ASK is issued.
        counts[2] = if global_tasks > 0 {
            let core = Arc::clone(&self.core);
            let mut ctx = TreeCtx {
                iter: self.iter,
                next: &mut self.next,
            };
            let view = &mut self.view;
            core.steal_loop::<T, _>(&self.bg, &mut self.rng, |batch| {
                let n = batch.len();
                for t in &batch {
                    t.process(&mut ctx, view);
                }
                n
            })
        } else {
            0
        };
        self.core.mark_passive_and_contribute(&self.view, &self.bg);
        debug_assert!(self.core.is_passive());

        counts[0] = self.next.len() as i64;
        let local_work = counts[1] + counts[2];
        let mean = global_tasks as f64 / self.core.size() as f64;
        counts[3] = ((local_work as f64 - mean) * (local_work as f64 - mean)).round() as i64;

        let own_local = counts[1];
        let own_remote = counts[2];

        allreduce_counters(&self.ep, &mut counts).expect("counter all-reduce failed");
        self.gcount = counts;

        let processed = self.gcount[1] + self.gcount[2];
        if processed != global_tasks {
            log_error!(
                self.log,
                "dist",
                "task accounting mismatch: processed {} of {}",
                processed,
                global_tasks
            );
        }

        let sd = ((self.gcount[3] as f64) / self.core.size() as f64).sqrt();
        let imbalance_pct = if mean > 0.0 { (sd / mean * 100.0) as f32 } else { 0.0 };
        log_debug!(
            self.log,
            "dist",
            "local tasks: {}, remote tasks: {}, imbalance: {:.1}%",
            self.gcount[1],
            self.gcount[2],
            imbalance_pct
        );

        self.stats = StepStats {
            scheduled: self.gcount[0],
            processed_local: own_local,
            processed_remote: own_remote,
            global_local: self.gcount[1],
            global_remote: self.gcount[2],
            imbalance_pct,
            tokens_full: self.core.tokens_full(),
            asks_sent: self.core.asks_sent(),
        };

        // Queues must be in next-superstep shape on every peer before the
        // broadcast releases anyone into it.
        let next = std::mem::take(&mut self.next);
        self.queue.refill(next);

        if self.core.rank() == 0 {
            let reduced = self.core.wait_complete();
            self.gst.join(&reduced);
        }
        self.ep.barrier();
        bcast_object(&self.ep, &mut self.gst).expect("state broadcast failed");
        self.view = self.gst.clone();
        self.view.identity();
        self.core.reset_round();
        // Nobody may enter the next superstep (and start sending requests or
        // contributions) until every peer has reset its round state. All of
        // this superstep's reduction traffic was integrated before the root
        // broadcast, so the reset clobbers nothing.
        self.ep.barrier();

        self.iter += 1;
        self.gcount[0] as u64
    }

    fn iteration(&self) -> u64 {
        self.iter
    }

    fn state(&self) -> &T::State {
        &self.gst
    }

    fn log(&self) -> &Logger {
        &self.log
    }
}

impl<T: Task> Drop for TreeExecutor<T> {
    fn drop(&mut self) {
        self.ep.barrier();
        let mut header = Vec::new();
        write_header(&mut header, Request::Fin, None, self.core.size());
        self.bg.send(self.core.rank(), REQ_TAG, header);
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }
    }
}
