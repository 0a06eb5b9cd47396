//! Background-channel request protocol.
//!
//! Every background message starts with a fixed-size header: one request-id
//! byte followed by `⌈N/8⌉` bytes of the sender's passive-token bitmap. The
//! bitmap rides along on every `ASK` so knowledge of who has nothing left
//! spreads with the stealing traffic itself; no extra gossip messages exist.
//!
//! Receipt rules (applied by [`fold_tokens`] callers):
//! - `ASK`/`NONE`: OR the carried bitmap into the local one.
//! - `NONE` additionally sets the *sender's* bit: "I asked them and they
//!   had nothing".
//! - `FIN`/`RDC`/`ANS` carry zeroed token bytes and fold nothing.

use crate::stdx::DynamicBitSet;
use crate::wire::WireError;
use super::fabric::Tag;

/// Header tag for steal requests and shutdown.
pub const REQ_TAG: Tag = 101;
/// Tag for steal answers and their payloads.
pub const ANS_TAG: Tag = 102;
/// Tag for reduction payloads.
pub const RDC_TAG: Tag = 103;

/// Main-channel tag for the per-superstep counter all-reduce.
pub(crate) const COUNT_TAG: Tag = 1101;
/// Main-channel tag for broadcasts from rank 0.
pub(crate) const BCAST_TAG: Tag = 1102;

/// Request ids carried in the header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Request {
    /// Negative steal answer: nothing to give.
    None = 0,
    /// Shutdown; sent by a peer to itself only.
    Fin = 1,
    /// Steal request.
    Ask = 2,
    /// Positive steal answer; a task batch follows on [`ANS_TAG`].
    Ans = 3,
    /// Reduction contribution; a state payload follows on [`RDC_TAG`].
    Rdc = 4,
}

impl Request {
    fn from_byte(b: u8) -> Result<Self, WireError> {
        Ok(match b {
            0 => Request::None,
            1 => Request::Fin,
            2 => Request::Ask,
            3 => Request::Ans,
            4 => Request::Rdc,
            _ => return Err(WireError::Malformed("request id")),
        })
    }
}

/// Byte length of a header for `n_peers` peers.
#[inline]
pub fn header_len(n_peers: usize) -> usize {
    1 + n_peers.div_ceil(8)
}

/// Writes a header into `buf` (cleared first, capacity reused).
///
/// `tokens` is attached only when given; the executors pass it on `ASK` and
/// leave every other request's token bytes zeroed, so a header costs one
/// buffer fill and no allocation in steady state.
pub fn write_header(buf: &mut Vec<u8>, req: Request, tokens: Option<&DynamicBitSet>, n_peers: usize) {
    buf.clear();
    buf.resize(header_len(n_peers), 0);
    buf[0] = req as u8;
    if let Some(tokens) = tokens {
        debug_assert_eq!(tokens.bit_length(), n_peers);
        tokens.write_bytes(&mut buf[1..]);
    }
}

/// Splits a received header into its request id and raw token bytes.
pub fn read_header(data: &[u8], n_peers: usize) -> Result<(Request, &[u8]), WireError> {
    if data.len() != header_len(n_peers) {
        return Err(WireError::Malformed("header length"));
    }
    Ok((Request::from_byte(data[0])?, &data[1..]))
}

/// Applies the token receipt rule for a header received from `src`.
///
/// Folds the carried bits for `ASK`/`NONE`, and sets the sender's bit for
/// `NONE`. Other requests leave the bitmap untouched.
pub fn fold_tokens(tokens: &mut DynamicBitSet, req: Request, token_bytes: &[u8], src: usize) {
    match req {
        Request::Ask => tokens.or_bytes(token_bytes),
        Request::None => {
            tokens.or_bytes(token_bytes);
            tokens.set(src);
        }
        Request::Fin | Request::Ans | Request::Rdc => {}
    }
}
