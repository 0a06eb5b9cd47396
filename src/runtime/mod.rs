//! Single-process executors: sequential reference implementation,
//! thread-parallel tree and DAG backends, and the sharded task table that
//! powers the DAG case.
//!
//! All three expose the same [`crate::contract::Executor`] surface as the
//! distributed backends in [`crate::dist`]; a problem encoding moves between
//! them by changing one type name.

pub mod serial;
pub mod shared_graph;
pub mod shared_tree;
pub mod store;
pub mod table;

pub use serial::{SerialExecutor, SerialGraphExecutor, SerialTreeExecutor};
pub use shared_graph::SharedGraphExecutor;
pub use shared_tree::{SharedConfig, SharedTreeExecutor};
pub use store::{SeqStore, SetStore, TaskStore};
pub use table::{TaskTable, TaskView, DEFAULT_BUCKETS};
