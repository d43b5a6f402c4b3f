use std::fmt;
use std::io;

use scriptipc_frame::FrameError;
use scriptipc_peer::PeerError;
use scriptipc_transport::{FatalError, TransportError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const NOT_FOUND: i32 = 127;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => NOT_FOUND,
        io::ErrorKind::BrokenPipe => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

/// Configuration rejected before any pipe exists; reported as bad usage.
pub fn config_error(context: &str, err: FatalError) -> CliError {
    CliError::new(USAGE, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Spawn { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        TransportError::UnknownProgram(_) | TransportError::DependencyNotFound { .. } => {
            CliError::new(NOT_FOUND, format!("{context}: {err}"))
        }
        TransportError::OtherEndClosed | TransportError::UnexpectedEof { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        TransportError::Fatal(fatal) => {
            CliError::new(fatal.exit_code(), format!("{context}: {fatal}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::Fatal(fatal) => {
            CliError::new(fatal.exit_code(), format!("{context}: {fatal}"))
        }
        FrameError::Varint(_) | FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed | FrameError::Truncated => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Fatal(fatal) => {
            CliError::new(fatal.exit_code(), format!("{context}: {fatal}"))
        }
        PeerError::UnexpectedInheritedFdCount { .. } => {
            CliError::new(USAGE, format!("{context}: {err} (serve must be spawned by a client)"))
        }
        PeerError::Remote { .. } | PeerError::Disconnected => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        PeerError::Encode(_) | PeerError::Decode(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}
