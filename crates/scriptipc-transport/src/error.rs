use crate::fatal::FatalError;
use crate::fd::{CodeHash, Fd, FdRole, HashKind, ProgramLocator};

/// Errors that can occur in pipe transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The descriptor's parity does not match the requested end.
    #[error("descriptor {fd} cannot be used as a {expected} end")]
    InvalidFdRole { fd: Fd, expected: FdRole },

    /// The descriptor is unknown or not owned by the calling process.
    #[error("invalid descriptor {0}")]
    InvalidFd(Fd),

    /// The peer closed its end of the pipe.
    #[error("other end of the pipe is closed")]
    OtherEndClosed,

    /// The stream ended before an exact-length read completed.
    #[error("unexpected end of stream ({missing} bytes missing)")]
    UnexpectedEof { missing: usize },

    /// A buffered flush reached the transport only partially.
    #[error("flush incomplete ({written} of {requested} bytes written)")]
    FlushIncomplete { requested: usize, written: usize },

    /// The program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: ProgramLocator,
        source: std::io::Error,
    },

    /// No program is known under this locator.
    #[error("unknown program {0}")]
    UnknownProgram(ProgramLocator),

    /// No dependency cell matches the code hash.
    #[error("no dependency with code hash {hash} ({kind})")]
    DependencyNotFound { hash: CodeHash, kind: HashKind },

    /// The spawned process was already waited on, or never existed.
    #[error("unknown process {0}")]
    UnknownProcess(u64),

    /// Unrecoverable condition detected by the I/O layer.
    #[error(transparent)]
    Fatal(#[from] FatalError),

    /// An OS-level I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error must end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
