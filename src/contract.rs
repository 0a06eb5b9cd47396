//! The user-facing contract: [`Task`], [`State`], [`Context`],
//! [`Partitioner`], and the [`Executor`] surface shared by every backend.
//!
//! These four traits are the only polymorphism across problem encodings.
//! Executors are generic over them and monomorphize; there is no dynamic
//! dispatch on the `process` path.
//!
//! A search is expressed as tasks that expand into child tasks and fold
//! results into a shared state. The runtime guarantees bulk-synchronous
//! semantics: children pushed during superstep `k` run in superstep `k+1`,
//! and state views are reduced at every superstep boundary.

use crate::logger::Logger;
use crate::wire::Wire;
use std::hash::Hash;

/// A unit of work in the search space.
///
/// Tasks are value objects: the runtime copies them freely between
/// containers, threads and peers, and assumes nothing about aliasing.
///
/// Requirements beyond the supertraits:
///
/// - `Hash`/`Eq` must agree (equal tasks hash equal); task deduplication
///   keys on them.
/// - [`Wire`] round-trips exactly: a task batch is a plain concatenation of
///   encodings split back apart by repeated decoding.
pub trait Task: Default + Clone + PartialEq + Eq + Hash + Wire + Send + Sync + 'static {
    /// The state type this task folds results into.
    type State: State;

    /// Processes the task: may push any number of children into `ctx` (they
    /// run next superstep) and may read or update the local state view.
    ///
    /// Tasks within one superstep run in unspecified order, possibly on
    /// different threads or peers; `process` must not depend on ordering and
    /// its state updates must commute.
    fn process<C: Context<Self>>(&self, ctx: &mut C, state: &mut Self::State);

    /// Combines two equal tasks generated along different paths.
    ///
    /// Called only when `self == other`. Must be commutative and
    /// associative: merging `a` into `b` and `b` into `a` must produce
    /// semantically equal tasks, whichever copy the runtime keeps.
    fn merge(&mut self, other: Self);
}

/// The shared state: a commutative monoid reduced across threads and peers.
///
/// `Default` must construct the identity element. `join` is the monoid
/// operator; the runtime applies it in unspecified order, so it must be
/// associative and commutative.
///
/// The runtime keeps one persistent global state plus a view per execution
/// unit. Tasks process into a view; at every superstep boundary the views
/// are joined into the global, each view is reassigned from the reduced
/// global, and `identity` runs on the view. The hook decides what a view
/// carries into the next superstep:
///
/// - Idempotent states (best-cost semilattices) leave it a no-op, so views
///   keep the reduced global, so tasks read current bounds.
/// - Accumulating states (sums, counters) reset to the identity element;
///   views then carry per-superstep deltas and the global total is exact
///   even though joins re-run every boundary.
pub trait State: Default + Clone + PartialEq + Wire + Send + 'static {
    /// Monoid operator: `self = self + other`.
    fn join(&mut self, other: &Self);

    /// Superstep-boundary hook run on views; see the trait docs.
    fn identity(&mut self) {}
}

/// Handle through which `process` talks to the runtime.
pub trait Context<T: Task> {
    /// Current superstep index, starting at 0.
    fn iteration(&self) -> u64;

    /// Schedules a child task for the next superstep.
    fn push(&mut self, task: T);
}

/// Assigns tasks to logical partitions.
///
/// In the distributed non-unique executor the partition keys the queue slot
/// (and thereby the preferred owner peer: `part(t) mod peers`); elsewhere it
/// is a collocation hint. Must be pure: equal tasks map to equal partitions,
/// on every peer.
pub trait Partitioner<T>: Clone + Send + 'static {
    fn part(&self, task: &T) -> u64;
}

/// Default partitioner: everything in partition 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModPartitioner;

impl<T> Partitioner<T> for ModPartitioner {
    #[inline]
    fn part(&self, _task: &T) -> u64 {
        0
    }
}

/// Adapter turning any `Fn(&T) -> u64` into a partitioner.
#[derive(Clone, Copy, Debug)]
pub struct FnPartitioner<F>(pub F);

impl<T, F> Partitioner<T> for FnPartitioner<F>
where
    F: Fn(&T) -> u64 + Clone + Send + 'static,
{
    #[inline]
    fn part(&self, task: &T) -> u64 {
        (self.0)(task)
    }
}

/// The executor surface shared by the sequential, shared-memory and
/// distributed backends.
///
/// The driving loop is the user's:
///
/// ```ignore
/// exec.init(seed, State::default());
/// while exec.step() > 0 {}
/// let result = exec.state();
/// ```
pub trait Executor {
    type Task: Task<State = Self::State>;
    type State: State;

    /// Seeds the first superstep with one task.
    fn init(&mut self, task: Self::Task, state: Self::State);

    /// Seeds the first superstep with a collection of tasks.
    fn init_many<I: IntoIterator<Item = Self::Task>>(&mut self, tasks: I, state: Self::State);

    /// Runs one superstep; returns the number of tasks scheduled for the
    /// next one. With an empty current set it returns 0 without invoking
    /// any task.
    fn step(&mut self) -> u64;

    /// Current superstep counter, starting at 0.
    fn iteration(&self) -> u64;

    /// The current reduced global state.
    fn state(&self) -> &Self::State;

    /// Per-peer logger.
    fn log(&self) -> &Logger;
}
