//! Small, self-contained primitives shared across the runtime.
//!
//! - `bitset`: fixed-width and runtime-sized bitsets. The fixed form carries
//!   the set algebra that subset-enumeration encodings need; the dynamic
//!   form is the passive-token bitmap gossiped between peers.
//! - `fastrange`: division-free reduction of hashes into bucket/peer ranges.
//! - `rng`: seeded XorShift64 for reproducible scheduling decisions.

pub mod bitset;
pub mod fastrange;
pub mod rng;

pub use bitset::{words_for_bits, BitSet, BitSetIter, DynamicBitSet};
pub use fastrange::fast_range;
pub use rng::XorShift64;
