use std::fmt;

use scriptipc_transport::{FatalError, TransportError};

use crate::error::FrameError;
use crate::varint::VarintError;

/// Well-known non-zero `error_code` values.
///
/// 1 to 9 mirror the VM's syscall error numbers; 20 to 28 are raised by the
/// IPC layer itself. Applications may use any other non-zero value for their
/// own failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ProtocolErrorCode {
    /// An index was out of bounds.
    IndexOutOfBound = 1,
    /// The requested item (for servers: the method) does not exist.
    ItemMissing = 2,
    /// A length did not fit the available storage.
    LengthNotEnough = 3,
    /// Data could not be decoded.
    InvalidData = 4,
    /// Waiting for a process failed.
    WaitFailure = 5,
    /// A descriptor was unusable.
    InvalidFd = 6,
    /// The peer closed its end of the pipe.
    OtherEndClosed = 7,
    /// The VM refused to spawn another process.
    MaxVmsSpawned = 8,
    /// The VM refused to create another descriptor.
    MaxFdsCreated = 9,
    /// Anything without a more specific code.
    Unknown = 20,
    /// A syscall failure without a more specific code.
    UnknownSysError = 21,
    /// The stream ended inside a packet.
    UnexpectedEof = 22,
    /// A varint field ended early.
    IncompleteVarint = 23,
    /// A varint needed more than 64 bits.
    VarintOverflow = 24,
    /// A varint field could not be read (more than ten bytes).
    ReadVarint = 25,
    /// A value could not be encoded.
    SerializeError = 26,
    /// A value could not be decoded by the application.
    DeserializeError = 27,
    /// Other transport failure.
    IoError = 28,
}

impl ProtocolErrorCode {
    /// Unknown method ids are answered with [`ProtocolErrorCode::ItemMissing`].
    pub const UNKNOWN_METHOD: Self = Self::ItemMissing;

    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn from_code(code: u64) -> Option<Self> {
        let known = match code {
            1 => Self::IndexOutOfBound,
            2 => Self::ItemMissing,
            3 => Self::LengthNotEnough,
            4 => Self::InvalidData,
            5 => Self::WaitFailure,
            6 => Self::InvalidFd,
            7 => Self::OtherEndClosed,
            8 => Self::MaxVmsSpawned,
            9 => Self::MaxFdsCreated,
            20 => Self::Unknown,
            21 => Self::UnknownSysError,
            22 => Self::UnexpectedEof,
            23 => Self::IncompleteVarint,
            24 => Self::VarintOverflow,
            25 => Self::ReadVarint,
            26 => Self::SerializeError,
            27 => Self::DeserializeError,
            28 => Self::IoError,
            _ => return None,
        };
        Some(known)
    }

    fn description(self) -> &'static str {
        match self {
            Self::IndexOutOfBound => "index out of bound",
            Self::ItemMissing => "item missing",
            Self::LengthNotEnough => "length not enough",
            Self::InvalidData => "invalid data",
            Self::WaitFailure => "wait failure",
            Self::InvalidFd => "invalid descriptor",
            Self::OtherEndClosed => "other end closed",
            Self::MaxVmsSpawned => "max vms spawned",
            Self::MaxFdsCreated => "max fds created",
            Self::Unknown => "unknown error",
            Self::UnknownSysError => "unknown syscall error",
            Self::UnexpectedEof => "unexpected end of stream",
            Self::IncompleteVarint => "incomplete varint",
            Self::VarintOverflow => "varint overflow",
            Self::ReadVarint => "varint read error",
            Self::SerializeError => "serialize error",
            Self::DeserializeError => "deserialize error",
            Self::IoError => "i/o error",
        }
    }
}

impl fmt::Display for ProtocolErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

impl From<ProtocolErrorCode> for u64 {
    fn from(code: ProtocolErrorCode) -> Self {
        code.code()
    }
}

impl From<&FrameError> for ProtocolErrorCode {
    fn from(err: &FrameError) -> Self {
        match err {
            FrameError::Varint(VarintError::Incomplete) => Self::IncompleteVarint,
            FrameError::Varint(VarintError::TooLong) => Self::ReadVarint,
            FrameError::Varint(VarintError::Malformed) => Self::VarintOverflow,
            FrameError::Varint(VarintError::EncodingTooLong { .. }) => Self::SerializeError,
            FrameError::PayloadTooLarge { .. } => Self::LengthNotEnough,
            FrameError::ConnectionClosed | FrameError::Truncated => Self::UnexpectedEof,
            FrameError::Fatal(fatal) => Self::from(fatal),
            FrameError::Transport(err) => Self::from(err),
            FrameError::ShortWrite { .. }
            | FrameError::SendRequest { .. }
            | FrameError::SendResponse { .. } => Self::IoError,
        }
    }
}

impl From<&TransportError> for ProtocolErrorCode {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::InvalidFd(_) | TransportError::InvalidFdRole { .. } => Self::InvalidFd,
            TransportError::OtherEndClosed => Self::OtherEndClosed,
            TransportError::UnexpectedEof { .. } => Self::UnexpectedEof,
            TransportError::Io(_) | TransportError::FlushIncomplete { .. } => Self::IoError,
            TransportError::DependencyNotFound { .. } | TransportError::UnknownProgram(_) => {
                Self::ItemMissing
            }
            TransportError::Fatal(fatal) => Self::from(fatal),
            _ => Self::UnknownSysError,
        }
    }
}

impl From<&FatalError> for ProtocolErrorCode {
    fn from(err: &FatalError) -> Self {
        match err {
            FatalError::AllocationFailed { .. } | FatalError::AllocationTooLarge { .. } => {
                Self::LengthNotEnough
            }
            FatalError::VarintOverflow => Self::VarintOverflow,
            FatalError::BufferInvariant { .. } => Self::IoError,
            _ => Self::Unknown,
        }
    }
}
