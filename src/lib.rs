//! SCoOL: bulk-synchronous exploration of large combinatorial search
//! spaces.
//!
//! A search is expressed as user-defined **tasks** that expand into child
//! tasks and fold results into a shared **state** (a commutative monoid).
//! The runtime executes them as a sequence of **supersteps**: every current
//! task is processed, children land in the next frontier, state views are
//! reduced, and the frontier swaps. Three interchangeable backends sit
//! behind one contract:
//!
//! - [`runtime::SerialExecutor`]: the sequential reference loop.
//! - [`runtime::SharedTreeExecutor`] / [`runtime::SharedGraphExecutor`]:
//!   thread-parallel supersteps; the DAG case deduplicates concurrently
//!   generated tasks through a per-thread sharded hash table with
//!   bucket-parallel reconciliation.
//! - [`dist::TreeExecutor`] / [`dist::GraphExecutor`]: peers over a
//!   message fabric with cooperative work stealing, a passive-token
//!   piggyback protocol that terminates the superstep without barriers over
//!   idle work, and a binary-tree state reduction overlapped with stealing.
//!
//! Tree vs. DAG: tree-shaped spaces generate each task once, so frontiers
//! are plain sequences. DAG-shaped spaces reach the same task along many
//! paths; frontiers are hash sets and duplicate pushes invoke the task's
//! `merge`.
//!
//! ```
//! use scool::contract::{Context, Executor, State, Task};
//! use scool::runtime::SerialTreeExecutor;
//! use scool::wire::{Reader, Sink, Wire, WireError};
//!
//! #[derive(Clone, Default, PartialEq, Eq, Hash)]
//! struct Count(u32);
//!
//! #[derive(Clone, Default, PartialEq)]
//! struct Sum(u64);
//!
//! impl Wire for Count {
//!     fn encode<S: Sink>(&self, s: &mut S) -> Result<(), WireError> { s.put_u32(self.0) }
//!     fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> { Ok(Count(r.get_u32()?)) }
//! }
//! impl Wire for Sum {
//!     fn encode<S: Sink>(&self, s: &mut S) -> Result<(), WireError> { s.put_u64(self.0) }
//!     fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> { Ok(Sum(r.get_u64()?)) }
//! }
//! impl State for Sum {
//!     fn join(&mut self, other: &Self) { self.0 += other.0; }
//!     fn identity(&mut self) { self.0 = 0; }
//! }
//! impl Task for Count {
//!     type State = Sum;
//!     fn process<C: Context<Self>>(&self, ctx: &mut C, state: &mut Sum) {
//!         state.0 += 1;
//!         if self.0 > 0 { ctx.push(Count(self.0 - 1)); }
//!     }
//!     fn merge(&mut self, _other: Self) {}
//! }
//!
//! let mut exec: SerialTreeExecutor<Count> = SerialTreeExecutor::new();
//! exec.init(Count(5), Sum::default());
//! while exec.step() > 0 {}
//! assert_eq!(exec.state().0, 6);
//! ```

pub mod contract;
pub mod dist;
pub mod logger;
pub mod runtime;
pub mod stdx;
#[cfg(test)]
pub mod test_utils;
pub mod wire;

pub use contract::{Context, Executor, FnPartitioner, ModPartitioner, Partitioner, State, Task};
pub use logger::{Level, Logger, LoggerError};
