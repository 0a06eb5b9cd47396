//! Sequential executor: the reference implementation of the superstep loop.
//!
//! Efficient but deliberately basic: one thread, two task containers, one
//! state. Its `step` is the semantics the parallel backends must be
//! indistinguishable from (modulo processing order): process every current
//! task, let pushes land in *next*, run the state's boundary hook, swap,
//! count.
//!
//! The container shape is a type parameter: [`SerialTreeExecutor`] appends
//! (unique tasks, tree search), [`SerialGraphExecutor`] deduplicates and
//! merges (DAG search).

use crate::contract::{Context, Executor, State, Task};
use crate::log_info;
use crate::logger::Logger;
use crate::runtime::store::{SeqStore, SetStore, TaskStore};

/// Sequential executor over any task-container shape.
pub struct SerialExecutor<T: Task, Q: TaskStore<T>> {
    curr: Q,
    next: Q,
    /// The working view tasks process into.
    view: T::State,
    /// The persistent reduced state returned by `state()`.
    gst: T::State,
    iter: u64,
    log: Logger,
}

/// Sequential executor for unique (tree) search spaces.
pub type SerialTreeExecutor<T> = SerialExecutor<T, SeqStore<T>>;

/// Sequential executor for DAG search spaces; duplicate pushes merge.
pub type SerialGraphExecutor<T> = SerialExecutor<T, SetStore<T>>;

struct StepCtx<'a, T, Q> {
    iter: u64,
    next: &'a mut Q,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Task, Q: TaskStore<T>> Context<T> for StepCtx<'_, T, Q> {
    #[inline]
    fn iteration(&self) -> u64 {
        self.iter
    }

    #[inline]
    fn push(&mut self, task: T) {
        self.next.add(task);
    }
}

impl<T: Task, Q: TaskStore<T>> SerialExecutor<T, Q> {
    pub fn new() -> Self {
        Self {
            curr: Q::default(),
            next: Q::default(),
            view: T::State::default(),
            gst: T::State::default(),
            iter: 0,
            log: Logger::new(0),
        }
    }

    /// Number of tasks scheduled for the upcoming superstep.
    pub fn pending(&self) -> u64 {
        self.curr.len() as u64
    }
}

impl<T: Task, Q: TaskStore<T>> Default for SerialExecutor<T, Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task, Q: TaskStore<T>> Executor for SerialExecutor<T, Q> {
    type Task = T;
    type State = T::State;

    fn init(&mut self, task: T, state: T::State) {
        self.init_many([task], state);
    }

    fn init_many<I: IntoIterator<Item = T>>(&mut self, tasks: I, state: T::State) {
        self.curr.clear();
        self.next.clear();
        for t in tasks {
            self.curr.add(t);
        }
        self.gst = state;
        self.view = self.gst.clone();
        self.view.identity();
    }

    fn step(&mut self) -> u64 {
        log_info!(
            self.log,
            "serial",
            "processing {} tasks, superstep {}",
            self.curr.len(),
            self.iter
        );

        let mut next = std::mem::take(&mut self.next);
        {
            let mut ctx = StepCtx {
                iter: self.iter,
                next: &mut next,
                _marker: std::marker::PhantomData,
            };
            let view = &mut self.view;
            self.curr.for_each(|t| t.process(&mut ctx, view));
        }
        self.next = next;

        self.gst.join(&self.view);
        self.view = self.gst.clone();
        self.view.identity();

        std::mem::swap(&mut self.curr, &mut self.next);
        self.next.clear();
        self.iter += 1;

        self.curr.len() as u64
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
