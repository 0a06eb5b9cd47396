//! Toy problem encodings shared by unit tests.
//!
//! These mirror the shapes real applications plug into the runtime: a
//! countdown task over a summing state (tree search), an unordered-pair task
//! with a merge counter (diamond DAG), and a best-cost semilattice state
//! (branch-and-bound). Kept out of the public API; tests only.

use crate::contract::{Context, State, Task};
use crate::wire::{Reader, Sink, Wire, WireError};
use std::hash::{Hash, Hasher};
use std::sync::Once;

/// Installs a tracing subscriber once per test binary so runtime log events
/// show up under `cargo test -- --nocapture` (level via `RUST_LOG`).
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Summing state over `u64`; identity element 0.
///
/// An accumulating monoid: `identity()` resets, so views carry only the
/// current superstep's delta and the global total stays exact.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct CountState {
    pub total: u64,
}

impl Wire for CountState {
    fn encode<S: Sink>(&self, sink: &mut S) -> Result<(), WireError> {
        sink.put_u64(self.total)
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            total: r.get_u64()?,
        })
    }
}

impl State for CountState {
    fn join(&mut self, other: &Self) {
        self.total += other.total;
    }

    fn identity(&mut self) {
        self.total = 0;
    }
}

/// Min-semilattice state: keeps the best (lowest) cost seen.
///
/// Idempotent under `join`, so re-reduction across peers and supersteps is
/// harmless; the shape branch-and-bound states take.
#[derive(Clone, Debug, PartialEq)]
pub struct BestState {
    pub best: i64,
}

impl Default for BestState {
    fn default() -> Self {
        Self { best: i64::MAX }
    }
}

impl Wire for BestState {
    fn encode<S: Sink>(&self, sink: &mut S) -> Result<(), WireError> {
        sink.put_i64(self.best)
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            best: r.get_i64()?,
        })
    }
}

impl State for BestState {
    fn join(&mut self, other: &Self) {
        self.best = self.best.min(other.best);
    }
}

/// Countdown task: `n` pushes `n-1` until 0, adding 1 to the state each
/// time. Seeding `n` yields `n+1` tasks over `n+1` supersteps and a final
/// total of `n+1`.
#[derive(Clone, Default, Debug, PartialEq, Eq, Hash)]
pub struct CountdownTask {
    pub n: u32,
}

impl Wire for CountdownTask {
    fn encode<S: Sink>(&self, sink: &mut S) -> Result<(), WireError> {
        sink.put_u32(self.n)
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self { n: r.get_u32()? })
    }
}

impl Task for CountdownTask {
    type State = CountState;

    fn process<C: Context<Self>>(&self, ctx: &mut C, state: &mut Self::State) {
        state.total += 1;
        if self.n > 0 {
            ctx.push(CountdownTask { n: self.n - 1 });
        }
    }

    fn merge(&mut self, _other: Self) {}
}

/// Unordered pair `{a, b}` with a merge counter: the diamond-DAG shape.
///
/// `Task{a,b}` pushes `Task{a, b+1}` and `Task{a+1, b}` while `a < limit`;
/// the two paths meeting at the same unordered pair exercise merge.
#[derive(Clone, Default, Debug)]
pub struct PairTask {
    pub a: u32,
    pub b: u32,
    pub hits: u32,
    pub limit: u32,
}

impl PairTask {
    pub fn new(a: u32, b: u32, limit: u32) -> Self {
        Self {
            a,
            b,
            hits: 1,
            limit,
        }
    }

    fn key(&self) -> (u32, u32) {
        (self.a.min(self.b), self.a.max(self.b))
    }
}

impl PartialEq for PairTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for PairTask {}

impl Hash for PairTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Wire for PairTask {
    fn encode<S: Sink>(&self, sink: &mut S) -> Result<(), WireError> {
        sink.put_u32(self.a)?;
        sink.put_u32(self.b)?;
        sink.put_u32(self.hits)?;
        sink.put_u32(self.limit)
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            a: r.get_u32()?,
            b: r.get_u32()?,
            hits: r.get_u32()?,
            limit: r.get_u32()?,
        })
    }
}

impl Task for PairTask {
    type State = CountState;

    fn process<C: Context<Self>>(&self, ctx: &mut C, state: &mut Self::State) {
        state.total += 1;
        if self.a < self.limit && self.b < self.limit {
            ctx.push(PairTask::new(self.a, self.b + 1, self.limit));
            ctx.push(PairTask::new(self.a + 1, self.b, self.limit));
        }
    }

    fn merge(&mut self, other: Self) {
        self.hits += other.hits;
    }
}

/// Task that burns a little CPU, records the best of a fixed cost, and
/// optionally pushes one child.
///
/// The spin makes steal races observable in tests without timers.
#[derive(Clone, Default, Debug, PartialEq, Eq, Hash)]
pub struct SpinTask {
    pub id: u32,
    pub cost: i64,
    /// Generations of children still to spawn; each task pushes one child
    /// with `fanout - 1`.
    pub fanout: u32,
}

impl SpinTask {
    pub fn new(id: u32, cost: i64, fanout: u32) -> Self {
        Self { id, cost, fanout }
    }
}

impl Wire for SpinTask {
    fn encode<S: Sink>(&self, sink: &mut S) -> Result<(), WireError> {
        sink.put_u32(self.id)?;
        sink.put_i64(self.cost)?;
        sink.put_u32(self.fanout)
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            id: r.get_u32()?,
            cost: r.get_i64()?,
            fanout: r.get_u32()?,
        })
    }
}

impl Task for SpinTask {
    type State = BestState;

    fn process<C: Context<Self>>(&self, ctx: &mut C, state: &mut Self::State) {
        let mut acc = self.id as u64 | 1;
        for i in 0..500u64 {
            acc = std::hint::black_box(acc.wrapping_mul(6364136223846793005).wrapping_add(i));
        }
        std::hint::black_box(acc);
        state.best = state.best.min(self.cost);
        if self.fanout > 0 {
            ctx.push(SpinTask::new(self.id, self.cost, self.fanout - 1));
        }
    }

    fn merge(&mut self, _other: Self) {}
}
