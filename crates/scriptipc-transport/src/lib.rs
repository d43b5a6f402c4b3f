//! Pipe transport for script VM processes.
//!
//! The lowest layer of scriptipc. It defines the VM capability set
//! ([`Syscalls`]), the byte-level [`Reader`]/[`Writer`] traits every upper
//! layer is generic over, raw and buffered pipe endpoints, and two
//! capability providers:
//! - [`SimVm`]: an in-process simulation of the VM, used by tests and demos
//! - [`HostSyscalls`]: real OS pipes and processes (unix)
//!
//! Unrecoverable conditions surface as [`FatalError`], carried inside
//! [`TransportError::Fatal`] until the process-level boundary handles them.

pub mod buffer;
pub mod error;
pub mod fatal;
pub mod fd;
pub mod pipe;
pub mod sim;
pub mod syscalls;
pub mod traits;

#[cfg(unix)]
pub mod unix;

pub use buffer::{split_io_buffer, BufferedReader, BufferedWriter, MIN_IO_BUFFER_LEN};
pub use error::{Result, TransportError};
pub use fatal::FatalError;
pub use fd::{CodeHash, Fd, FdRole, HashKind, ProcessId, ProgramLocator};
pub use pipe::{PipeReader, PipeWriter};
pub use sim::{SimExit, SimProcess, SimVm};
pub use syscalls::Syscalls;
pub use traits::{read_exact, Reader, Writer};

#[cfg(unix)]
pub use unix::{HostSyscalls, INHERITED_FDS_ENV};
