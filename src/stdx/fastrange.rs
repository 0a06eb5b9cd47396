//! Multiply-high range reduction.
//!
//! Maps a 64-bit hash into `[0, p)` with one widening multiply instead of a
//! division. The task table uses it to pick buckets from task hashes and the
//! distributed executor to map partition keys onto peer ranks.
//!
//! Not the same function as `% p`: for uniform input the output is close to
//! uniform, but low-entropy input concentrates in the low buckets. Feed it
//! hashes, not raw keys.
//!
//! Reference: Lemire, "A fast alternative to the modulo reduction" (2016).

/// Reduces `word` into `[0, p)`.
///
/// Returns the high 64 bits of the 128-bit product `word * p`. For a
/// power-of-two `p` this is exactly the top `log2(p)` bits of `word`.
///
/// `p` must be non-zero (debug-asserted).
#[inline]
pub fn fast_range(word: u64, p: u64) -> u64 {
    debug_assert!(p > 0);
    (((word as u128) * (p as u128)) >> 64) as u64
}
