//! Wire layer for script-VM IPC.
//!
//! Every exchange is one request packet followed by one response packet:
//! - three varint header fields (version, method id or error code, payload length)
//! - the raw payload bytes
//!
//! Received payloads are stored by a pluggable [`Allocator`]: the two-slot
//! [`FixedRegionAllocator`] for heapless environments, or [`HeapAllocator`].

pub mod alloc;
pub mod codes;
pub mod error;
pub mod packet;
pub mod varint;

pub use alloc::{Allocator, Block, FixedRegionAllocator, HeapAllocator, PayloadAllocator, RawBlock};
pub use codes::ProtocolErrorCode;
pub use error::{FrameError, Result};
pub use packet::{
    receive_request, receive_response, send_error_code, send_request, send_response, Request,
    RequestRef, Response, ResponseRef, PROTOCOL_VERSION,
};
pub use varint::{decode, encode, encode_into, read_next_varint, write_varint, VarintError, MAX_VARINT_LEN};
