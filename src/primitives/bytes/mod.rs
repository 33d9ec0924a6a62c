#![forbid(unsafe_code)]
//! Order-preserving encoders and a checked slice cursor shared by the codec,
//! the binlog and the packed zset layer.

pub mod ord {
    //! Order-preserving encoders for numeric key fields.

    const U64_LEN: usize = core::mem::size_of::<u64>();
    const SIGN_BIT: u64 = 1 << 63;

    /// Appends `v` in big-endian order so byte order equals numeric order.
    pub fn push_u64_be(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Decodes a big-endian u64 from the first 8 bytes, if present.
    pub fn get_u64_be(src: &[u8]) -> Option<u64> {
        let head: [u8; U64_LEN] = src.get(..U64_LEN)?.try_into().ok()?;
        Some(u64::from_be_bytes(head))
    }

    /// Appends a signed i64 with the sign bit flipped so negatives sort first.
    pub fn push_i64_be(dst: &mut Vec<u8>, v: i64) {
        push_u64_be(dst, (v as u64) ^ SIGN_BIT);
    }

    /// Decodes a value written by [`push_i64_be`].
    pub fn get_i64_be(src: &[u8]) -> Option<i64> {
        get_u64_be(src).map(|flipped| (flipped ^ SIGN_BIT) as i64)
    }
}

pub mod buf {
    //! A slice-backed cursor whose reads fail instead of panicking.

    use core::fmt;

    use crate::types::{KvError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self.off.checked_add(n).filter(|end| *end <= self.buf.len());
            let Some(end) = end else {
                return Err(KvError::decode(format!(
                    "need {} bytes, {} remaining",
                    n,
                    self.remaining()
                )));
            };
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a big-endian u32.
        pub fn u32_be(&mut self) -> Result<u32> {
            let raw: [u8; 4] = self
                .take(4)?
                .try_into()
                .map_err(|_| KvError::decode("u32 width"))?;
            Ok(u32::from_be_bytes(raw))
        }

        /// Reads a big-endian u64.
        pub fn u64_be(&mut self) -> Result<u64> {
            let raw = self.take(8)?;
            super::ord::get_u64_be(raw).ok_or_else(|| KvError::decode("u64 width"))
        }

        /// Reads an order-preserving i64.
        pub fn i64_be(&mut self) -> Result<i64> {
            let raw = self.take(8)?;
            super::ord::get_i64_be(raw).ok_or_else(|| KvError::decode("i64 width"))
        }

        /// Takes everything left.
        pub fn rest(&mut self) -> &'a [u8] {
            let slice = &self.buf[self.off..];
            self.off = self.buf.len();
            slice
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}

/// Hex rendering of raw keys for log fields.
pub struct Dump<'a>(pub &'a [u8]);

impl core::fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        const MAX: usize = 64;
        if self.0.len() > MAX {
            write!(f, "{}..({} bytes)", hex::encode(&self.0[..MAX]), self.0.len())
        } else {
            f.write_str(&hex::encode(self.0))
        }
    }
}
