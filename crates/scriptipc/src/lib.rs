//! Request/response IPC between script VM processes over pipes.
//!
//! A client spawns a server program, hands it one inbound and one outbound
//! pipe, and exchanges varint-framed request/response packets with it.
//!
//! # Crate Structure
//!
//! - [`transport`]: VM capability set, pipe endpoints and buffering
//! - [`frame`]: varint codec, payload allocators and packet codec
//! - [`peer`]: channel setup, client calls and the serve loop (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use scriptipc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use scriptipc_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use scriptipc_peer::*;
}
