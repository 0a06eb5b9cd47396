//! Distributed executors: peers over a rank/tag message fabric, cooperative
//! work stealing, passive-token termination, and a binary-tree state
//! reduction overlapped with the stealing phase.
//!
//! Module map:
//! - [`fabric`]: the point-to-point transport (ranks, tags, duplicated
//!   background channel, barrier).
//! - [`protocol`]: request ids and the fixed-size token-carrying header.
//! - [`messaging`]: framed object/batch transfer and the boundary
//!   collectives.
//! - [`peer`]: token bitmap, steal loop and reduction accounting shared by
//!   both specializations.
//! - `steal_queue`: the goal-post split queue of the unique case.
//! - [`tree`]: the unique (tree search) executor.
//! - [`graph`]: the non-unique (DAG search) executor with partitioned
//!   slots.

pub mod fabric;
pub mod graph;
pub mod messaging;
pub mod peer;
pub mod protocol;
mod steal_queue;
pub mod tree;

pub use fabric::{Endpoint, Fabric, Rank, Tag};
pub use graph::GraphExecutor;
pub use peer::StepStats;
pub use protocol::{Request, ANS_TAG, RDC_TAG, REQ_TAG};
pub use tree::{DistConfig, TreeExecutor};
