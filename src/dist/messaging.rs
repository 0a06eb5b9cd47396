//! Serialized object transfer and the boundary collectives.
//!
//! Payload framing is a 4-byte signed little-endian length `L`, then, when
//! `L > 0`, `L` bytes of concatenated encodings with no separators. The
//! receiver splits a batch apart by decoding until the cursor is exhausted;
//! objects self-describe their extent through their [`Wire`] impls.
//!
//! The collectives here run on the main channel in lockstep call order
//! (every peer invokes the same collective at the same point of `step`), so
//! a single tag per purpose is enough. They are linear (gather to rank 0,
//! scatter back), which is the right shape for the peer counts an
//! in-process fabric hosts. The overlapped state reduction is *not* here;
//! that is the binary tree riding the background channel.

use super::fabric::{Endpoint, Rank, Tag};
use super::protocol::{BCAST_TAG, COUNT_TAG};
use crate::wire::{decode_batch, Reader, Sink, VecWriter, Wire, WireError};

/// Frames and sends one object.
pub fn send_object<T: Wire>(ep: &Endpoint, dst: Rank, tag: Tag, obj: &T) -> Result<(), WireError> {
    let mut w = VecWriter::new();
    w.put_i32(0)?;
    obj.encode(&mut w)?;
    let mut data = w.into_vec();
    let len = (data.len() - 4) as i32;
    data[..4].copy_from_slice(&len.to_le_bytes());
    ep.send(dst, tag, data);
    Ok(())
}

/// Sends a possibly-empty framed payload from already-encoded bytes.
pub fn send_raw(ep: &Endpoint, dst: Rank, tag: Tag, body: &[u8]) {
    let mut data = Vec::with_capacity(4 + body.len());
    data.extend_from_slice(&(body.len() as i32).to_le_bytes());
    data.extend_from_slice(body);
    ep.send(dst, tag, data);
}

/// Receives one framed object from `src`; `None` when the frame is empty.
pub fn recv_object_from<T: Wire>(
    ep: &Endpoint,
    src: Rank,
    tag: Tag,
) -> Result<Option<T>, WireError> {
    let data = ep.recv_from(src, tag);
    let mut r = Reader::new(&data);
    let len = r.get_i32()?;
    if len <= 0 {
        return Ok(None);
    }
    Ok(Some(T::decode(&mut r)?))
}

/// Frames and sends a batch of objects as one concatenation.
pub fn send_batch<T: Wire, I: IntoIterator<Item = T>>(
    ep: &Endpoint,
    dst: Rank,
    tag: Tag,
    batch: I,
) -> Result<(), WireError> {
    let mut w = VecWriter::new();
    w.put_i32(0)?;
    for obj in batch {
        obj.encode(&mut w)?;
    }
    let mut data = w.into_vec();
    let len = (data.len() - 4) as i32;
    data[..4].copy_from_slice(&len.to_le_bytes());
    ep.send(dst, tag, data);
    Ok(())
}

/// Receives a framed batch from `src`; empty frame decodes to an empty vec.
///
/// The payload vector is sized exactly by the length prefix before decoding.
pub fn recv_batch_from<T: Wire>(ep: &Endpoint, src: Rank, tag: Tag) -> Result<Vec<T>, WireError> {
    let data = ep.recv_from(src, tag);
    let mut r = Reader::new(&data);
    let len = r.get_i32()?;
    if len <= 0 {
        return Ok(Vec::new());
    }
    let body = r.take(len as usize)?;
    decode_batch(body)
}

/// Per-superstep counter block: total scheduled, locally processed,
/// remotely processed (stolen), squared deviation from the mean.
pub type Counters = [i64; 4];

fn encode_counters(c: &Counters) -> Vec<u8> {
    let mut w = VecWriter::new();
    for v in c {
        // Counter encoding failures cannot happen on a growing writer.
        v.encode(&mut w).expect("vec writer cannot overflow");
    }
    w.into_vec()
}

fn decode_counters(data: &[u8]) -> Result<Counters, WireError> {
    let mut r = Reader::new(data);
    let mut out = [0i64; 4];
    for v in &mut out {
        *v = i64::decode(&mut r)?;
    }
    Ok(out)
}

/// Sum all-reduce of the counter block across all peers.
///
/// Linear: gather at rank 0, sum, scatter the result. Doubles as a
/// synchronization point: every peer has finished its steal phase once
/// this returns.
pub fn allreduce_counters(ep: &Endpoint, counters: &mut Counters) -> Result<(), WireError> {
    let n = ep.size();
    if n < 2 {
        return Ok(());
    }

    if ep.rank() == 0 {
        for src in 1..n {
            let data = ep.recv_from(src, COUNT_TAG);
            let theirs = decode_counters(&data)?;
            for (mine, other) in counters.iter_mut().zip(theirs) {
                *mine += other;
            }
        }
        let data = encode_counters(counters);
        for dst in 1..n {
            ep.send(dst, COUNT_TAG, data.clone());
        }
    } else {
        ep.send(0, COUNT_TAG, encode_counters(counters));
        let data = ep.recv_from(0, COUNT_TAG);
        *counters = decode_counters(&data)?;
    }
    Ok(())
}

/// Broadcast of the counter block from rank 0.
pub fn bcast_counters(ep: &Endpoint, counters: &mut Counters) -> Result<(), WireError> {
    let n = ep.size();
    if n < 2 {
        return Ok(());
    }
    if ep.rank() == 0 {
        let data = encode_counters(counters);
        for dst in 1..n {
            ep.send(dst, COUNT_TAG, data.clone());
        }
    } else {
        let data = ep.recv_from(0, COUNT_TAG);
        *counters = decode_counters(&data)?;
    }
    Ok(())
}

/// Broadcast of one object from rank 0; every peer ends with rank 0's value.
pub fn bcast_object<T: Wire>(ep: &Endpoint, obj: &mut T) -> Result<(), WireError> {
    let n = ep.size();
    if n < 2 {
        return Ok(());
    }
    if ep.rank() == 0 {
        let mut w = VecWriter::new();
        obj.encode(&mut w)?;
        let data = w.into_vec();
        for dst in 1..n {
            ep.send(dst, BCAST_TAG, data.clone());
        }
    } else {
        let data = ep.recv_from(0, BCAST_TAG);
        let mut r = Reader::new(&data);
        *obj = T::decode(&mut r)?;
    }
    Ok(())
}
