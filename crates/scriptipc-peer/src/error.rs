use scriptipc_frame::FrameError;
use scriptipc_transport::{FatalError, TransportError};

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Unrecoverable condition.
    #[error("fatal: {0}")]
    Fatal(#[from] FatalError),

    /// A server process must inherit exactly one inbound and one outbound descriptor.
    #[error("expected 2 inherited descriptors, got {count}")]
    UnexpectedInheritedFdCount { count: usize },

    /// The server answered with a non-zero error code.
    #[error("remote error code {code}")]
    Remote { code: u64 },

    /// The client closed the channel between requests.
    #[error("peer disconnected")]
    Disconnected,

    /// A typed request could not be encoded.
    #[error("could not encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// A typed response could not be decoded.
    #[error("could not decode response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl PeerError {
    /// The unrecoverable cause, if any.
    pub fn fatal(&self) -> Option<&FatalError> {
        match self {
            PeerError::Fatal(fatal) | PeerError::Transport(TransportError::Fatal(fatal)) => {
                Some(fatal)
            }
            PeerError::Frame(frame) => frame.fatal(),
            _ => None,
        }
    }

    /// Whether this error must end the process.
    pub fn is_fatal(&self) -> bool {
        self.fatal().is_some()
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
