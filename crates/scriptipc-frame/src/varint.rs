//! Variable-length unsigned integers.
//!
//! Each byte carries 7 value bits, least significant group first. The high
//! bit (`0x80`) is set on every byte except the last.
//!
//! ```text
//!   300 = 0b10_0101100  ->  [0xAC, 0x02]
//! ```

use bytes::BufMut;
use scriptipc_transport::{Reader, Writer};

use crate::error::{FrameError, Result};

/// Longest encoding of a `u64` (`ceil(64 / 7)`).
pub const MAX_VARINT_LEN: usize = 10;

const CONTINUATION: u8 = 0x80;
const GROUP_MASK: u8 = 0x7f;

/// Varint-specific decode and encode failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VarintError {
    /// The destination could not hold the whole encoding.
    #[error("encoding needs {needed} bytes, {available} available")]
    EncodingTooLong { needed: usize, available: usize },

    /// The encoding needs bit positions at or beyond 64.
    #[error("malformed varint (shift overflow)")]
    Malformed,

    /// The input ended before a terminating byte.
    #[error("incomplete varint")]
    Incomplete,

    /// Ten bytes were read without a terminating byte.
    #[error("varint longer than {MAX_VARINT_LEN} bytes")]
    TooLong,
}

/// Number of bytes [`encode`] produces for `value`.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Encode `value` in its shortest form.
///
/// Returns the scratch array and the number of bytes used.
pub fn encode(mut value: u64) -> ([u8; MAX_VARINT_LEN], usize) {
    let mut out = [0u8; MAX_VARINT_LEN];
    let mut len = 0;
    loop {
        let mut byte = (value as u8) & GROUP_MASK;
        value >>= 7;
        if value != 0 {
            byte |= CONTINUATION;
        }
        out[len] = byte;
        len += 1;
        if value == 0 {
            return (out, len);
        }
    }
}

/// Append the encoding of `value` to `dst`.
pub fn encode_into<B: BufMut + ?Sized>(value: u64, dst: &mut B) -> std::result::Result<usize, VarintError> {
    let (bytes, len) = encode(value);
    if dst.remaining_mut() < len {
        return Err(VarintError::EncodingTooLong {
            needed: len,
            available: dst.remaining_mut(),
        });
    }
    dst.put_slice(&bytes[..len]);
    Ok(len)
}

/// Decode one varint from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed. Trailing bytes after
/// the terminating byte are ignored.
pub fn decode(bytes: &[u8]) -> std::result::Result<(u64, usize), VarintError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (index, &byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return Err(VarintError::Malformed);
        }
        let group = u64::from(byte & GROUP_MASK);
        // Tenth byte: only bit 63 is left.
        if shift == 63 && group > 1 {
            return Err(VarintError::Malformed);
        }
        value |= group << shift;
        if byte & CONTINUATION == 0 {
            return Ok((value, index + 1));
        }
        shift += 7;
    }
    Err(VarintError::Incomplete)
}

/// Read one varint, a byte at a time, without reading past its end.
///
/// End of stream before the first byte is [`FrameError::ConnectionClosed`];
/// after it, [`VarintError::Incomplete`].
pub fn read_next_varint<R: Reader + ?Sized>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    for index in 0..MAX_VARINT_LEN {
        let n = reader.read(&mut buf[index..=index])?;
        if n == 0 {
            return Err(if index == 0 {
                FrameError::ConnectionClosed
            } else {
                VarintError::Incomplete.into()
            });
        }
        if buf[index] & CONTINUATION == 0 {
            let (value, _) = decode(&buf[..=index])?;
            return Ok(value);
        }
    }
    Err(VarintError::TooLong.into())
}

/// Encode `value` and hand it to `writer` in one write.
pub fn write_varint<W: Writer + ?Sized>(writer: &mut W, value: u64) -> Result<()> {
    let (bytes, len) = encode(value);
    let written = writer.write(&bytes[..len])?;
    if written != len {
        return Err(FrameError::ShortWrite {
            requested: len,
            written,
        });
    }
    Ok(())
}
