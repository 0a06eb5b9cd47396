//! Shared-memory executor for unique (tree) search spaces.
//!
//! *Current* and *next* are `P` per-worker sequences. Each superstep the
//! worker threads sweep the current sequences (every sequence is chunked
//! across all workers, so a skewed push pattern from the previous superstep
//! still spreads evenly) and push children into their own worker's next
//! sequence. No locks anywhere: a worker writes only its own sequence and
//! its own state view, both handed to it as exclusive borrows for the
//! lifetime of the phase.
//!
//! At the end of the phase state views are joined into the global view,
//! then every view is reassigned from the reduced global and its boundary
//! hook runs, so the next superstep's tasks observe exactly what the state
//! chooses to carry forward.

use crate::contract::{Context, Executor, State, Task};
use crate::log_info;
use crate::logger::Logger;

/// Knobs for the shared-memory executors.
///
/// Defaults are sane for benchmarks; profile before tuning `workers` down.
#[derive(Clone, Copy, Debug)]
pub struct SharedConfig {
    /// Number of worker threads.
    pub workers: usize,
}

impl SharedConfig {
    /// Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.workers > 0, "workers must be > 0");
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

pub(crate) struct SeqCtx<'a, T> {
    iter: u64,
    next: &'a mut Vec<T>,
}

impl<T: Task> Context<T> for SeqCtx<'_, T> {
    #[inline]
    fn iteration(&self) -> u64 {
        self.iter
    }

    #[inline]
    fn push(&mut self, task: T) {
        self.next.push(task);
    }
}

/// Thread-parallel executor for tree-shaped search spaces.
pub struct SharedTreeExecutor<T: Task> {
    cfg: SharedConfig,
    curr: Vec<Vec<T>>,
    next: Vec<Vec<T>>,
    sts: Vec<T::State>,
    gst: T::State,
    ntasks: u64,
    iter: u64,
    log: Logger,
}

impl<T: Task> SharedTreeExecutor<T> {
    pub fn new(cfg: SharedConfig) -> Self {
        cfg.validate();
        let p = cfg.workers;
        let log = Logger::new(0);
        log_info!(log, "shared", "ready with {} threads", p);
        Self {
            cfg,
            curr: (0..p).map(|_| Vec::new()).collect(),
            next: (0..p).map(|_| Vec::new()).collect(),
            sts: (0..p).map(|_| T::State::default()).collect(),
            gst: T::State::default(),
            ntasks: 0,
            iter: 0,
            log,
        }
    }

    fn reduce_state(&mut self) {
        for st in &self.sts {
            self.gst.join(st);
        }
        for st in &mut self.sts {
            *st = self.gst.clone();
            st.identity();
        }
    }
}

impl<T: Task> Default for SharedTreeExecutor<T> {
    fn default() -> Self {
        Self::new(SharedConfig::default())
    }
}

impl<T: Task> Executor for SharedTreeExecutor<T> {
    type Task = T;
    type State = T::State;

    fn init(&mut self, task: T, state: T::State) {
        self.init_many([task], state);
    }

    fn init_many<I: IntoIterator<Item = T>>(&mut self, tasks: I, state: T::State) {
        for q in &mut self.next {
            q.clear();
        }
        for q in &mut self.curr {
            q.clear();
        }
        self.ntasks = 0;
        for t in tasks {
            self.next[0].push(t);
            self.ntasks += 1;
        }
        self.gst = state;
        for st in &mut self.sts {
            *st = self.gst.clone();
            st.identity();
        }
    }

    fn step(&mut self) -> u64 {
        log_info!(
            self.log,
            "shared",
            "processing {} tasks, superstep {}",
            self.ntasks,
            self.iter
        );

        std::mem::swap(&mut self.curr, &mut self.next);

        let p = self.cfg.workers;
        let iter = self.iter;
        let curr = &self.curr;

        std::thread::scope(|scope| {
            for (w, (next_q, st)) in self.next.iter_mut().zip(self.sts.iter_mut()).enumerate() {
                scope.spawn(move || {
                    let mut ctx = SeqCtx { iter, next: next_q };
                    // Worker w takes slice [w·len/p, (w+1)·len/p) of every
                    // source sequence, so one overloaded sequence still
                    // spreads across all workers.
                    for seq in curr {
                        let len = seq.len();
                        let start = w * len / p;
                        let end = (w + 1) * len / p;
                        for t in &seq[start..end] {
                            t.process(&mut ctx, st);
                        }
                    }
                });
            }
        });

        self.reduce_state();

        for q in &mut self.curr {
            q.clear();
        }

        self.ntasks = self.next.iter().map(|q| q.len() as u64).sum();
        self.iter += 1;
        self.ntasks
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
