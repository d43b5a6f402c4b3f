use scriptipc_transport::{FatalError, TransportError};

use crate::varint::VarintError;

/// Errors that can occur while encoding, sending or receiving packets.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A varint field could not be decoded.
    #[error("invalid varint: {0}")]
    Varint(VarintError),

    /// The stream ended cleanly at a packet boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream ended in the middle of a packet header.
    #[error("connection closed mid-packet")]
    Truncated,

    /// The announced payload length does not fit in memory.
    #[error("payload length {len} exceeds addressable memory")]
    PayloadTooLarge { len: u64 },

    /// A varint reached the writer only partially.
    #[error("short varint write ({written} of {requested} bytes)")]
    ShortWrite { requested: usize, written: usize },

    /// Sending a request reached the writer only partially.
    #[error("failed to send request ({written} of {requested} bytes written)")]
    SendRequest { requested: usize, written: usize },

    /// Sending a response reached the writer only partially.
    #[error("failed to send response ({written} of {requested} bytes written)")]
    SendResponse { requested: usize, written: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl FrameError {
    /// The unrecoverable cause, if any.
    pub fn fatal(&self) -> Option<&FatalError> {
        match self {
            FrameError::Fatal(fatal) | FrameError::Transport(TransportError::Fatal(fatal)) => {
                Some(fatal)
            }
            _ => None,
        }
    }

    /// Whether this error must end the process.
    pub fn is_fatal(&self) -> bool {
        self.fatal().is_some()
    }
}

impl From<VarintError> for FrameError {
    fn from(err: VarintError) -> Self {
        match err {
            VarintError::Malformed => FrameError::Fatal(FatalError::VarintOverflow),
            other => FrameError::Varint(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
