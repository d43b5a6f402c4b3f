use std::fmt;

use tracing::trace;

use crate::error::{Result, TransportError};
use crate::fd::{Fd, FdRole};
use crate::syscalls::Syscalls;
use crate::traits::{Reader, Writer};

/// Unbuffered read end of a pipe; every `read` is one `raw_read` syscall.
pub struct PipeReader<S> {
    fd: Fd,
    sys: S,
}

impl<S: Syscalls> PipeReader<S> {
    /// Wrap a read-end descriptor. Odd descriptors are rejected.
    pub fn new(sys: S, fd: Fd) -> Result<Self> {
        if !fd.is_read_end() {
            return Err(TransportError::InvalidFdRole {
                fd,
                expected: FdRole::Read,
            });
        }
        Ok(Self { fd, sys })
    }

    pub fn fd(&self) -> Fd {
        self.fd
    }
}

impl<S: Syscalls> Reader for PipeReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.sys.raw_read(self.fd, buf)?;
        trace!(fd = %self.fd, requested = buf.len(), read = n, "pipe read");
        Ok(n)
    }
}

impl<S> fmt::Debug for PipeReader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeReader").field("fd", &self.fd).finish()
    }
}

/// Unbuffered write end of a pipe; `flush` is a no-op.
pub struct PipeWriter<S> {
    fd: Fd,
    sys: S,
}

impl<S: Syscalls> PipeWriter<S> {
    /// Wrap a write-end descriptor. Even descriptors are rejected.
    pub fn new(sys: S, fd: Fd) -> Result<Self> {
        if !fd.is_write_end() {
            return Err(TransportError::InvalidFdRole {
                fd,
                expected: FdRole::Write,
            });
        }
        Ok(Self { fd, sys })
    }

    pub fn fd(&self) -> Fd {
        self.fd
    }
}

impl<S: Syscalls> Writer for PipeWriter<S> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.sys.raw_write(self.fd, buf)?;
        trace!(fd = %self.fd, requested = buf.len(), written = n, "pipe write");
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S> fmt::Debug for PipeWriter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeWriter").field("fd", &self.fd).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimVm;

    #[test]
    fn rejects_descriptor_of_wrong_parity() {
        let vm = SimVm::new();
        let root = vm.root();
        let (r, w) = root.create_pipe().expect("pipe should be created");

        let err = PipeReader::new(root.clone(), w).expect_err("construction should fail");
        assert!(matches!(
            err,
            TransportError::InvalidFdRole {
                expected: FdRole::Read,
                ..
            }
        ));
        let err = PipeWriter::new(root, r).expect_err("construction should fail");
        assert!(matches!(
            err,
            TransportError::InvalidFdRole {
                expected: FdRole::Write,
                ..
            }
        ));
    }

    #[test]
    fn bytes_flow_from_writer_to_reader() {
        let vm = SimVm::new();
        let root = vm.root();
        let (r, w) = root.create_pipe().expect("pipe should be created");
        let mut reader = PipeReader::new(root.clone(), r).expect("construction should succeed");
        let mut writer = PipeWriter::new(root, w).expect("construction should succeed");

        assert_eq!(writer.write(b"").expect("write should succeed"), 0);
        assert_eq!(writer.write(b"ping").expect("write should succeed"), 4);
        writer.flush().expect("flush should succeed");

        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).expect("read should succeed");
        assert_eq!(&buf[..n], b"ping");
    }
}
