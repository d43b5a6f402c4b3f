//! Buffered channel endpoints.
//!
//! Both endpoints borrow their storage from one caller-supplied I/O region,
//! split in half by [`split_io_buffer`]: the first half buffers the inbound
//! side, the second half the outbound side. Nothing here allocates.

use std::fmt;

use crate::error::{Result, TransportError};
use crate::fatal::FatalError;
use crate::traits::{Reader, Writer};

/// Smallest I/O region accepted for buffering.
pub const MIN_IO_BUFFER_LEN: usize = 1024;

/// Split an I/O region into `(read_half, write_half)`.
pub fn split_io_buffer(region: &mut [u8]) -> std::result::Result<(&mut [u8], &mut [u8]), FatalError> {
    let len = region.len();
    if len < MIN_IO_BUFFER_LEN {
        return Err(FatalError::IoBufferTooSmall {
            len,
            min: MIN_IO_BUFFER_LEN,
        });
    }
    if len % 2 != 0 {
        return Err(FatalError::IoBufferNotAligned { len });
    }
    Ok(region.split_at_mut(len / 2))
}

/// `pos <= filled <= storage.len()` must hold between calls.
struct Buffer<'r> {
    storage: &'r mut [u8],
    pos: usize,
    filled: usize,
}

impl<'r> Buffer<'r> {
    fn new(storage: &'r mut [u8]) -> Self {
        Self {
            storage,
            pos: 0,
            filled: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn check(&self) -> std::result::Result<(), FatalError> {
        if self.pos > self.filled || self.filled > self.capacity() {
            return Err(FatalError::BufferInvariant {
                pos: self.pos,
                filled: self.filled,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.filled = 0;
    }
}

/// Read side of a buffered endpoint.
///
/// Refills with exactly one underlying read when drained; short refills are
/// kept as they are, never retried here.
pub struct BufferedReader<'r, R> {
    inner: R,
    buf: Buffer<'r>,
}

impl<'r, R: Reader> BufferedReader<'r, R> {
    pub fn new(inner: R, storage: &'r mut [u8]) -> Self {
        Self {
            inner,
            buf: Buffer::new(storage),
        }
    }
}

impl<R> BufferedReader<'_, R> {
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Bytes read from the transport but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.buf.filled.saturating_sub(self.buf.pos)
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Reader> Reader for BufferedReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.buf.pos == self.buf.filled {
            let n = self.inner.read(self.buf.storage)?;
            self.buf.pos = 0;
            self.buf.filled = n;
        }
        self.buf.check()?;

        let n = out.len().min(self.buf.filled - self.buf.pos);
        out[..n].copy_from_slice(&self.buf.storage[self.buf.pos..self.buf.pos + n]);
        self.buf.pos += n;
        Ok(n)
    }
}

impl<R: fmt::Debug> fmt::Debug for BufferedReader<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedReader")
            .field("reader", &self.inner)
            .field(
                "buffer",
                &format_args!("{}/{}", self.buffered(), self.capacity()),
            )
            .finish()
    }
}

/// Write side of a buffered endpoint.
///
/// Small writes accumulate until `flush` or until the next write would not
/// fit. Writes larger than the whole buffer go straight to the transport.
pub struct BufferedWriter<'r, W> {
    inner: W,
    buf: Buffer<'r>,
}

impl<'r, W: Writer> BufferedWriter<'r, W> {
    pub fn new(inner: W, storage: &'r mut [u8]) -> Self {
        Self {
            inner,
            buf: Buffer::new(storage),
        }
    }

    fn flush_buf(&mut self) -> Result<()> {
        self.buf.check()?;
        let requested = self.buf.filled;
        if requested > 0 {
            let written = self.inner.write(&self.buf.storage[..requested])?;
            if written != requested {
                return Err(TransportError::FlushIncomplete { requested, written });
            }
        }
        self.buf.reset();
        Ok(())
    }
}

impl<W> BufferedWriter<'_, W> {
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Bytes waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buf.filled
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Writer> Writer for BufferedWriter<'_, W> {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.buf.filled + data.len() > self.capacity() {
            self.flush_buf()?;
        }
        if data.len() > self.capacity() {
            return self.inner.write(data);
        }

        let start = self.buf.filled;
        self.buf.storage[start..start + data.len()].copy_from_slice(data);
        self.buf.filled += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_buf()?;
        self.inner.flush()
    }
}

impl<W: fmt::Debug> fmt::Debug for BufferedWriter<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedWriter")
            .field("writer", &self.inner)
            .field(
                "buffer",
                &format_args!("{}/{}", self.buffered(), self.capacity()),
            )
            .finish()
    }
}
