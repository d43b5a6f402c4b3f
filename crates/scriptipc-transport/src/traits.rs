use crate::error::{Result, TransportError};

/// Source of bytes.
///
/// A single call may return fewer bytes than requested. `Ok(0)` on a
/// non-empty buffer means the stream has ended.
pub trait Reader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Sink of bytes.
pub trait Writer {
    /// Write `buf`, returning how many bytes the transport accepted.
    ///
    /// An empty `buf` is a no-op returning `0`.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Push any buffered bytes to the underlying transport.
    fn flush(&mut self) -> Result<()>;
}

/// Fill `buf` completely, looping over short reads.
///
/// The first failing read is propagated. End of stream before `buf` is full
/// is reported as [`TransportError::UnexpectedEof`].
pub fn read_exact<R: Reader + ?Sized>(reader: &mut R, mut buf: &mut [u8]) -> Result<()> {
    while !buf.is_empty() {
        let n = reader.read(buf)?;
        if n == 0 {
            return Err(TransportError::UnexpectedEof { missing: buf.len() });
        }
        buf = &mut buf[n..];
    }
    Ok(())
}

impl<T: Reader + ?Sized> Reader for &mut T {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        T::read(self, buf)
    }
}

impl<T: Writer + ?Sized> Writer for &mut T {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        T::write(self, buf)
    }

    #[inline]
    fn flush(&mut self) -> Result<()> {
        T::flush(self)
    }
}

impl Reader for &[u8] {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let amt = buf.len().min(self.len());
        let (head, tail) = self.split_at(amt);
        buf[..amt].copy_from_slice(head);
        *self = tail;
        Ok(amt)
    }
}

impl Writer for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
