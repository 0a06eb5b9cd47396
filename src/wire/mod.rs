//! Streaming serialization over byte vectors.
//!
//! Every steal answer and every reduction payload moves a batch of tasks or
//! a state snapshot through these buffers, so the layer is deliberately
//! thin: a [`Reader`] presents an existing byte slice as a cursor, a
//! [`VecWriter`] grows a vector on overflow, and a [`SliceWriter`] targets a
//! fixed byte range and fails the current send when it runs out of room.
//!
//! Objects implement [`Wire`]: little-endian primitives, no framing, no
//! field tags. A batch is the plain concatenation of encodings: the
//! receiver decodes repeatedly until the cursor is exhausted, which works
//! because every object's encoding describes its own extent.

use std::error::Error;
use std::fmt;

/// Errors from encoding or decoding.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum WireError {
    /// The reader ran out of bytes mid-object.
    UnexpectedEof,
    /// A fixed-range writer ran out of room; the send is aborted.
    Overflow,
    /// A decoded length or discriminant is outside its valid range.
    Malformed(&'static str),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::UnexpectedEof => write!(f, "unexpected end of input"),
            WireError::Overflow => write!(f, "serialization buffer overflow"),
            WireError::Malformed(what) => write!(f, "malformed field: {what}"),
        }
    }
}

impl Error for WireError {}

/// Byte sink consumed by [`Wire::encode`].
pub trait Sink {
    /// Appends raw bytes.
    fn put(&mut self, bytes: &[u8]) -> Result<(), WireError>;

    #[inline]
    fn put_u8(&mut self, v: u8) -> Result<(), WireError> {
        self.put(&[v])
    }

    #[inline]
    fn put_u32(&mut self, v: u32) -> Result<(), WireError> {
        self.put(&v.to_le_bytes())
    }

    #[inline]
    fn put_i32(&mut self, v: i32) -> Result<(), WireError> {
        self.put(&v.to_le_bytes())
    }

    #[inline]
    fn put_u64(&mut self, v: u64) -> Result<(), WireError> {
        self.put(&v.to_le_bytes())
    }

    #[inline]
    fn put_i64(&mut self, v: i64) -> Result<(), WireError> {
        self.put(&v.to_le_bytes())
    }

    #[inline]
    fn put_f64(&mut self, v: f64) -> Result<(), WireError> {
        self.put(&v.to_le_bytes())
    }
}

/// Growing writer over an owned or borrowed `Vec<u8>`.
#[derive(Debug, Default)]
pub struct VecWriter {
    buf: Vec<u8>,
}

impl VecWriter {
    /// Fresh writer with a small reserve; reuse across sends to amortize
    /// allocation.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
        }
    }

    /// Clears content, keeps capacity.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the writer, yielding the backing vector.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

impl Sink for VecWriter {
    #[inline]
    fn put(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}

/// Writer over a fixed byte range; overflow is an error, not a realloc.
#[derive(Debug)]
pub struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.pos
    }
}

impl Sink for SliceWriter<'_> {
    #[inline]
    fn put(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(WireError::Overflow);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

/// Read cursor over an existing byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Takes `n` raw bytes.
    #[inline]
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEof);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    #[inline]
    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    #[inline]
    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    #[inline]
    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    #[inline]
    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    #[inline]
    pub fn get_i64(&mut self) -> Result<i64, WireError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    #[inline]
    pub fn get_f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

/// Self-describing binary encoding.
///
/// `decode(encode(x)) == x`, and the decoder must consume exactly the bytes
/// the encoder produced; batch receivers rely on it to split
/// concatenations.
pub trait Wire: Sized {
    fn encode<S: Sink>(&self, sink: &mut S) -> Result<(), WireError>;
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError>;
}

macro_rules! wire_primitive {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Wire for $ty {
            #[inline]
            fn encode<S: Sink>(&self, sink: &mut S) -> Result<(), WireError> {
                sink.$put(*self)
            }

            #[inline]
            fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
                r.$get()
            }
        }
    };
}

wire_primitive!(u8, put_u8, get_u8);
wire_primitive!(u32, put_u32, get_u32);
wire_primitive!(i32, put_i32, get_i32);
wire_primitive!(u64, put_u64, get_u64);
wire_primitive!(i64, put_i64, get_i64);
wire_primitive!(f64, put_f64, get_f64);

// Length-prefixed vectors; enough for the common task payload shapes
// (byte blobs, index lists) without pulling in a derive framework.

impl Wire for Vec<u8> {
    fn encode<S: Sink>(&self, sink: &mut S) -> Result<(), WireError> {
        sink.put_u32(self.len() as u32)?;
        sink.put(self)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let n = r.get_u32()? as usize;
        Ok(r.take(n)?.to_vec())
    }
}

impl Wire for Vec<u32> {
    fn encode<S: Sink>(&self, sink: &mut S) -> Result<(), WireError> {
        sink.put_u32(self.len() as u32)?;
        for v in self {
            sink.put_u32(*v)?;
        }
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let n = r.get_u32()? as usize;
        if r.remaining() < n.saturating_mul(4) {
            return Err(WireError::UnexpectedEof);
        }
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(r.get_u32()?);
        }
        Ok(out)
    }
}

/// Encodes every item of `iter` into one concatenated buffer.
pub fn encode_batch<T: Wire, I: IntoIterator<Item = T>>(iter: I) -> Result<Vec<u8>, WireError> {
    let mut w = VecWriter::new();
    for item in iter {
        item.encode(&mut w)?;
    }
    Ok(w.into_vec())
}

/// Decodes objects from `data` until it is exhausted.
pub fn decode_batch<T: Wire>(data: &[u8]) -> Result<Vec<T>, WireError> {
    let mut r = Reader::new(data);
    let mut out = Vec::new();
    while !r.is_exhausted() {
        out.push(T::decode(&mut r)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn primitives_roundtrip() {
        let mut w = VecWriter::new();
        42u8.encode(&mut w).unwrap();
        0xDEAD_BEEFu32.encode(&mut w).unwrap();
        (-7i64).encode(&mut w).unwrap();
        1.5f64.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_slice());
        assert_eq!(u8::decode(&mut r).unwrap(), 42);
        assert_eq!(u32::decode(&mut r).unwrap(), 0xDEAD_BEEF);
        assert_eq!(i64::decode(&mut r).unwrap(), -7);
        assert_eq!(f64::decode(&mut r).unwrap(), 1.5);
        assert!(r.is_exhausted());
    }

    #[test]
    fn integers_are_little_endian() {
        let mut w = VecWriter::new();
        0x0102_0304u32.encode(&mut w).unwrap();
        assert_eq!(w.as_slice(), &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn reader_eof_is_an_error() {
        let mut r = Reader::new(&[1, 2]);
        assert_eq!(u32::decode(&mut r), Err(WireError::UnexpectedEof));
    }

    #[test]
    fn slice_writer_overflow_aborts() {
        let mut buf = [0u8; 6];
        let mut w = SliceWriter::new(&mut buf);
        w.put_u32(1).unwrap();
        assert_eq!(w.put_u32(2), Err(WireError::Overflow));
        assert_eq!(w.written(), 4);
    }

    #[test]
    fn vec_writer_reset_keeps_capacity() {
        let mut w = VecWriter::new();
        w.put(&[0u8; 512]).unwrap();
        w.reset();
        assert!(w.is_empty());
        w.put_u8(9).unwrap();
        assert_eq!(w.as_slice(), &[9]);
    }

    proptest! {
        #[test]
        fn u64_roundtrip(v in any::<u64>()) {
            let mut w = VecWriter::new();
            v.encode(&mut w).unwrap();
            let mut r = Reader::new(w.as_slice());
            prop_assert_eq!(u64::decode(&mut r).unwrap(), v);
        }

        #[test]
        fn byte_vec_roundtrip(v in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut w = VecWriter::new();
            v.clone().encode(&mut w).unwrap();
            let mut r = Reader::new(w.as_slice());
            prop_assert_eq!(Vec::<u8>::decode(&mut r).unwrap(), v);
            prop_assert!(r.is_exhausted());
        }

        #[test]
        fn equal_values_encode_to_equal_lengths(v in prop::collection::vec(any::<u32>(), 0..64)) {
            let a = encode_batch(v.clone()).unwrap();
            let b = encode_batch(v).unwrap();
            prop_assert_eq!(a.len(), b.len());
            prop_assert_eq!(a, b);
        }

        #[test]
        fn batch_concatenation_recovers_in_order(
            vals in prop::collection::vec(prop::collection::vec(any::<u32>(), 0..16), 0..16)
        ) {
            let data = encode_batch(vals.clone()).unwrap();
            let back: Vec<Vec<u32>> = decode_batch(&data).unwrap();
            prop_assert_eq!(back, vals);
        }
    }
}
