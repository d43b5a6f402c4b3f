use scriptipc_transport::{
    BufferedReader, BufferedWriter, Fd, PipeReader, PipeWriter, Reader, Syscalls, Writer,
};
use tracing::debug;

use crate::error::Result;

/// Inbound side of a [`Channel`].
#[derive(Debug)]
pub enum ChannelReader<'r, S> {
    Direct(PipeReader<S>),
    Buffered(BufferedReader<'r, PipeReader<S>>),
}

impl<S: Syscalls> ChannelReader<'_, S> {
    pub fn fd(&self) -> Fd {
        match self {
            ChannelReader::Direct(pipe) => pipe.fd(),
            ChannelReader::Buffered(buffered) => buffered.get_ref().fd(),
        }
    }
}

impl<S: Syscalls> Reader for ChannelReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> scriptipc_transport::Result<usize> {
        match self {
            ChannelReader::Direct(pipe) => pipe.read(buf),
            ChannelReader::Buffered(buffered) => buffered.read(buf),
        }
    }
}

/// Outbound side of a [`Channel`].
#[derive(Debug)]
pub enum ChannelWriter<'r, S> {
    Direct(PipeWriter<S>),
    Buffered(BufferedWriter<'r, PipeWriter<S>>),
}

impl<S: Syscalls> ChannelWriter<'_, S> {
    pub fn fd(&self) -> Fd {
        match self {
            ChannelWriter::Direct(pipe) => pipe.fd(),
            ChannelWriter::Buffered(buffered) => buffered.get_ref().fd(),
        }
    }
}

impl<S: Syscalls> Writer for ChannelWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> scriptipc_transport::Result<usize> {
        match self {
            ChannelWriter::Direct(pipe) => pipe.write(buf),
            ChannelWriter::Buffered(buffered) => buffered.write(buf),
        }
    }

    fn flush(&mut self) -> scriptipc_transport::Result<()> {
        match self {
            ChannelWriter::Direct(pipe) => pipe.flush(),
            ChannelWriter::Buffered(buffered) => buffered.flush(),
        }
    }
}

/// One bidirectional logical link made of two unidirectional pipes.
#[derive(Debug)]
pub struct Channel<'r, S> {
    reader: ChannelReader<'r, S>,
    writer: ChannelWriter<'r, S>,
}

impl<'r, S: Syscalls> Channel<'r, S> {
    /// Build a channel reading from `read_fd` and writing to `write_fd`.
    ///
    /// With `io_buffer`, the first half buffers the inbound side and the
    /// second half the outbound side.
    pub fn open(
        sys: &S,
        read_fd: Fd,
        write_fd: Fd,
        io_buffer: Option<(&'r mut [u8], &'r mut [u8])>,
    ) -> Result<Self> {
        let pipe_reader = PipeReader::new(sys.clone(), read_fd)?;
        let pipe_writer = PipeWriter::new(sys.clone(), write_fd)?;

        let buffered = io_buffer.is_some();
        let (reader, writer) = match io_buffer {
            Some((read_half, write_half)) => (
                ChannelReader::Buffered(BufferedReader::new(pipe_reader, read_half)),
                ChannelWriter::Buffered(BufferedWriter::new(pipe_writer, write_half)),
            ),
            None => (
                ChannelReader::Direct(pipe_reader),
                ChannelWriter::Direct(pipe_writer),
            ),
        };
        debug!(%read_fd, %write_fd, buffered, "channel opened");
        Ok(Self { reader, writer })
    }

    pub fn read_fd(&self) -> Fd {
        self.reader.fd()
    }

    pub fn write_fd(&self) -> Fd {
        self.writer.fd()
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.writer, ChannelWriter::Buffered(_))
    }

    /// Borrow both directions at once.
    pub fn parts_mut(&mut self) -> (&mut ChannelReader<'r, S>, &mut ChannelWriter<'r, S>) {
        (&mut self.reader, &mut self.writer)
    }
}

#[cfg(test)]
mod tests {
    use scriptipc_transport::{read_exact, FdRole, SimVm, TransportError};

    use super::*;
    use crate::error::PeerError;

    #[test]
    fn open_checks_descriptor_roles() {
        let vm = SimVm::new();
        let root = vm.root();
        let (r, w) = root.create_pipe().expect("pipe should be created");

        let err = Channel::open(&root, w, r, None).expect_err("open should fail");
        assert!(matches!(
            err,
            PeerError::Transport(TransportError::InvalidFdRole {
                expected: FdRole::Read,
                ..
            })
        ));
    }

    #[test]
    fn loopback_direct_and_buffered() {
        let vm = SimVm::new();
        let root = vm.root();

        let (r, w) = root.create_pipe().expect("pipe should be created");
        let mut direct = Channel::open(&root, r, w, None).expect("channel should open");
        assert!(!direct.is_buffered());
        assert_eq!((direct.read_fd(), direct.write_fd()), (r, w));

        let (reader, writer) = direct.parts_mut();
        writer.write(b"ping").expect("write should succeed");
        let mut buf = [0u8; 4];
        read_exact(reader, &mut buf).expect("read should succeed");
        assert_eq!(&buf, b"ping");

        let (r, w) = root.create_pipe().expect("pipe should be created");
        let mut io = vec![0u8; 1024];
        let (read_half, write_half) = io.split_at_mut(512);
        let mut buffered =
            Channel::open(&root, r, w, Some((read_half, write_half))).expect("channel should open");
        assert!(buffered.is_buffered());

        let (reader, writer) = buffered.parts_mut();
        writer.write(b"pong").expect("write should succeed");
        writer.flush().expect("flush should succeed");
        read_exact(reader, &mut buf).expect("read should succeed");
        assert_eq!(&buf, b"pong");
    }
}
