//! Request/response packets.
//!
//! Wire format, all integers varint-encoded:
//! ```text
//! ┌─────────┬──────────────────────┬─────────────┬─────────────────────┐
//! │ version │ method_id/error_code │ payload_len │ payload             │
//! │         │                      │             │ (payload_len bytes) │
//! └─────────┴──────────────────────┴─────────────┴─────────────────────┘
//! ```
//!
//! Received payloads are allocated from an [`Allocator`] and owned by the
//! receiver until released. A zero `payload_len` allocates nothing.

use scriptipc_transport::{read_exact, FatalError, Reader, Writer};
use tracing::trace;

use crate::alloc::{Allocator, Block};
use crate::error::{FrameError, Result};
use crate::varint::{read_next_varint, write_varint};

/// Version written into every packet this crate sends.
pub const PROTOCOL_VERSION: u64 = 0;

/// Outgoing request borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRef<'a> {
    pub version: u64,
    pub method_id: u64,
    pub payload: &'a [u8],
}

impl<'a> RequestRef<'a> {
    pub fn new(method_id: u64, payload: &'a [u8]) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            method_id,
            payload,
        }
    }
}

/// Outgoing response borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseRef<'a> {
    pub version: u64,
    pub error_code: u64,
    pub payload: &'a [u8],
}

impl<'a> ResponseRef<'a> {
    pub fn ok(payload: &'a [u8]) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            error_code: 0,
            payload,
        }
    }

    pub fn error(error_code: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            error_code,
            payload: &[],
        }
    }
}

/// A received request. The payload block belongs to the receiver.
#[derive(Debug, PartialEq, Eq)]
pub struct Request {
    pub version: u64,
    pub method_id: u64,
    pub payload: Option<Block>,
}

impl Request {
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Block::len)
    }

    /// Payload bytes, empty when there is none.
    pub fn payload<'a, A: Allocator + ?Sized>(&self, alloc: &'a A) -> &'a [u8] {
        match &self.payload {
            Some(block) => alloc.bytes(block),
            None => &[],
        }
    }

    /// Give the payload back to `alloc`.
    pub fn release<A: Allocator + ?Sized>(self, alloc: &mut A) -> std::result::Result<(), FatalError> {
        alloc.release_opt(self.payload)
    }
}

/// A response, either received or built by a handler for sending.
#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub version: u64,
    pub error_code: u64,
    pub payload: Option<Block>,
}

impl Response {
    /// Success without a payload.
    pub fn ok() -> Self {
        Self::error(0u64)
    }

    /// Failure with an application or protocol code and no payload.
    pub fn error(error_code: impl Into<u64>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            error_code: error_code.into(),
            payload: None,
        }
    }

    /// Success carrying an uninitialized payload of `len` bytes, to be
    /// filled through [`Allocator::bytes_mut`].
    pub fn allocate<A: Allocator + ?Sized>(
        alloc: &mut A,
        len: usize,
    ) -> std::result::Result<Self, FatalError> {
        Ok(Self {
            payload: allocate_payload(alloc, len)?,
            ..Self::ok()
        })
    }

    /// Success carrying a copy of `data`.
    pub fn with_payload<A: Allocator + ?Sized>(
        alloc: &mut A,
        data: &[u8],
    ) -> std::result::Result<Self, FatalError> {
        let response = Self::allocate(alloc, data.len())?;
        if let Some(block) = &response.payload {
            alloc.bytes_mut(block).copy_from_slice(data);
        }
        Ok(response)
    }

    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Block::len)
    }

    /// Payload bytes, empty when there is none.
    pub fn payload<'a, A: Allocator + ?Sized>(&self, alloc: &'a A) -> &'a [u8] {
        match &self.payload {
            Some(block) => alloc.bytes(block),
            None => &[],
        }
    }

    /// Borrowed view for [`send_response`].
    pub fn view<'a, A: Allocator + ?Sized>(&self, alloc: &'a A) -> ResponseRef<'a> {
        ResponseRef {
            version: self.version,
            error_code: self.error_code,
            payload: self.payload(alloc),
        }
    }

    /// Give the payload back to `alloc`.
    pub fn release<A: Allocator + ?Sized>(self, alloc: &mut A) -> std::result::Result<(), FatalError> {
        alloc.release_opt(self.payload)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Request,
    Response,
}

impl Direction {
    fn short_write(self, requested: usize, written: usize) -> FrameError {
        match self {
            Direction::Request => FrameError::SendRequest { requested, written },
            Direction::Response => FrameError::SendResponse { requested, written },
        }
    }
}

fn allocate_payload<A: Allocator + ?Sized>(
    alloc: &mut A,
    len: usize,
) -> std::result::Result<Option<Block>, FatalError> {
    if len == 0 {
        return Ok(None);
    }
    alloc
        .allocate(len)?
        .ok_or(FatalError::AllocationFailed { requested: len })
        .map(Some)
}

fn put_varint<W: Writer + ?Sized>(writer: &mut W, value: u64, direction: Direction) -> Result<()> {
    write_varint(writer, value).map_err(|err| match err {
        FrameError::ShortWrite { requested, written } => direction.short_write(requested, written),
        other => other,
    })
}

fn send_packet<W: Writer + ?Sized>(
    writer: &mut W,
    version: u64,
    second: u64,
    payload: &[u8],
    direction: Direction,
) -> Result<()> {
    put_varint(writer, version, direction)?;
    put_varint(writer, second, direction)?;
    put_varint(writer, payload.len() as u64, direction)?;
    if !payload.is_empty() {
        let written = writer.write(payload)?;
        if written != payload.len() {
            return Err(direction.short_write(payload.len(), written));
        }
    }
    writer.flush()?;
    Ok(())
}

/// Write a request and flush.
pub fn send_request<W: Writer + ?Sized>(writer: &mut W, request: &RequestRef<'_>) -> Result<()> {
    send_packet(
        writer,
        request.version,
        request.method_id,
        request.payload,
        Direction::Request,
    )?;
    trace!(
        method_id = request.method_id,
        payload_len = request.payload.len(),
        "request sent"
    );
    Ok(())
}

/// Write a response and flush.
pub fn send_response<W: Writer + ?Sized>(writer: &mut W, response: &ResponseRef<'_>) -> Result<()> {
    send_packet(
        writer,
        response.version,
        response.error_code,
        response.payload,
        Direction::Response,
    )?;
    trace!(
        error_code = response.error_code,
        payload_len = response.payload.len(),
        "response sent"
    );
    Ok(())
}

/// Send a payload-less response carrying only `error_code`.
pub fn send_error_code<W: Writer + ?Sized>(writer: &mut W, error_code: u64) -> Result<()> {
    send_response(writer, &ResponseRef::error(error_code))
}

/// Header fields after the first: end of stream here is mid-packet.
fn next_field<R: Reader + ?Sized>(reader: &mut R) -> Result<u64> {
    read_next_varint(reader).map_err(|err| match err {
        FrameError::ConnectionClosed => FrameError::Truncated,
        other => other,
    })
}

fn receive_payload<R: Reader + ?Sized, A: Allocator + ?Sized>(
    reader: &mut R,
    alloc: &mut A,
    len: u64,
) -> Result<Option<Block>> {
    let len = usize::try_from(len).map_err(|_| FrameError::PayloadTooLarge { len })?;
    let Some(block) = allocate_payload(alloc, len)? else {
        return Ok(None);
    };
    if let Err(err) = read_exact(reader, alloc.bytes_mut(&block)) {
        alloc.release(block)?;
        return Err(err.into());
    }
    Ok(Some(block))
}

/// Read one request, allocating its payload from `alloc`.
pub fn receive_request<R: Reader + ?Sized, A: Allocator + ?Sized>(
    reader: &mut R,
    alloc: &mut A,
) -> Result<Request> {
    let version = read_next_varint(reader)?;
    let method_id = next_field(reader)?;
    let payload_len = next_field(reader)?;
    let payload = receive_payload(reader, alloc, payload_len)?;
    trace!(method_id, payload_len, "request received");
    Ok(Request {
        version,
        method_id,
        payload,
    })
}

/// Read one response, allocating its payload from `alloc`.
pub fn receive_response<R: Reader + ?Sized, A: Allocator + ?Sized>(
    reader: &mut R,
    alloc: &mut A,
) -> Result<Response> {
    let version = read_next_varint(reader)?;
    let error_code = next_field(reader)?;
    let payload_len = next_field(reader)?;
    let payload = receive_payload(reader, alloc, payload_len)?;
    trace!(error_code, payload_len, "response received");
    Ok(Response {
        version,
        error_code,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{FixedRegionAllocator, HeapAllocator};
    use scriptipc_transport::{BufferedWriter, TransportError};

    fn grab<A: Allocator>(alloc: &mut A, len: usize) -> Block {
        alloc
            .allocate(len)
            .expect("allocation should succeed")
            .expect("a slot should be free")
    }

    fn sample_payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn request_round_trip() {
        let data = sample_payload(97);
        let mut wire = Vec::new();
        send_request(&mut wire, &RequestRef::new(1, &data)).expect("request should be sent");

        assert_eq!(&wire[..3], &[0x00, 0x01, 0x61]);
        assert_eq!(wire.len(), 3 + 97);

        let mut region = [0u8; 256];
        let mut alloc = FixedRegionAllocator::new(&mut region).expect("region should split");
        let mut reader: &[u8] = &wire;
        let request = receive_request(&mut reader, &mut alloc).expect("request should be received");

        assert_eq!(request.version, PROTOCOL_VERSION);
        assert_eq!(request.method_id, 1);
        assert_eq!(request.payload_len(), 97);
        assert_eq!(request.payload(&alloc), data.as_slice());
        assert!(reader.is_empty());

        request.release(&mut alloc).expect("release should succeed");
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn empty_payload_allocates_nothing() {
        let mut wire = Vec::new();
        send_response(&mut wire, &ResponseRef::error(9)).expect("response should be sent");
        assert_eq!(wire, vec![0x00, 0x09, 0x00]);

        let mut alloc = HeapAllocator::new();
        let mut reader: &[u8] = &wire;
        let response =
            receive_response(&mut reader, &mut alloc).expect("response should be received");
        assert_eq!(response.error_code, 9);
        assert!(!response.is_success());
        assert!(response.payload.is_none());
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn error_code_notice_wire_format() {
        let mut wire = Vec::new();
        send_error_code(&mut wire, 24).expect("error code should be sent");
        assert_eq!(wire, vec![0x00, 0x18, 0x00]);
    }

    #[test]
    fn response_payload_round_trip_through_allocator() {
        let mut alloc = HeapAllocator::new();
        let response =
            Response::with_payload(&mut alloc, b"sum").expect("payload should be allocated");
        assert!(response.is_success());

        let mut wire = Vec::new();
        send_response(&mut wire, &response.view(&alloc)).expect("response should be sent");
        response.release(&mut alloc).expect("release should succeed");

        let mut reader: &[u8] = &wire;
        let received =
            receive_response(&mut reader, &mut alloc).expect("response should be received");
        assert_eq!(received.payload(&alloc), b"sum");
        received.release(&mut alloc).expect("release should succeed");
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn truncated_payload_releases_block() {
        let data = sample_payload(40);
        let mut wire = Vec::new();
        send_request(&mut wire, &RequestRef::new(3, &data)).expect("request should be sent");
        wire.truncate(wire.len() - 10);

        let mut region = [0u8; 128];
        let mut alloc = FixedRegionAllocator::new(&mut region).expect("region should split");
        let mut reader: &[u8] = &wire;
        let err = receive_request(&mut reader, &mut alloc).expect_err("receive should fail");
        assert!(matches!(
            err,
            FrameError::Transport(TransportError::UnexpectedEof { missing: 10 })
        ));
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn end_of_stream_at_and_inside_header() {
        let mut alloc = HeapAllocator::new();

        let mut empty: &[u8] = &[];
        assert!(matches!(
            receive_request(&mut empty, &mut alloc),
            Err(FrameError::ConnectionClosed)
        ));

        let mut header_only: &[u8] = &[0x00];
        assert!(matches!(
            receive_request(&mut header_only, &mut alloc),
            Err(FrameError::Truncated)
        ));
    }

    #[test]
    fn exhausted_allocator_is_fatal() {
        let data = sample_payload(8);
        let mut wire = Vec::new();
        send_request(&mut wire, &RequestRef::new(1, &data)).expect("request should be sent");

        let mut region = [0u8; 32];
        let mut alloc = FixedRegionAllocator::new(&mut region).expect("region should split");
        let held_a = grab(&mut alloc, 1);
        let held_b = grab(&mut alloc, 1);

        let mut reader: &[u8] = &wire;
        let err = receive_request(&mut reader, &mut alloc).expect_err("receive should fail");
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            FrameError::Fatal(FatalError::AllocationFailed { requested: 8 })
        ));
        alloc.release(held_a).expect("release should succeed");
        alloc.release(held_b).expect("release should succeed");
    }

    #[test]
    fn huge_declared_length_fails_without_allocating() {
        let declared: u64 = 1 << 46;
        let mut wire = vec![0x00, 0x01];
        write_varint(&mut wire, declared).expect("varint should be written");

        let mut alloc = HeapAllocator::new();
        let mut reader: &[u8] = &wire;
        let err = receive_request(&mut reader, &mut alloc).expect_err("receive should fail");
        assert!(matches!(
            err,
            FrameError::Fatal(FatalError::AllocationFailed { requested })
                if requested as u64 == declared
        ));
        assert_eq!(alloc.live(), 0);
    }

    /// Accepts at most `limit` bytes per write and records everything.
    struct LimitedWriter {
        limit: usize,
        writes: Vec<Vec<u8>>,
    }

    impl Writer for LimitedWriter {
        fn write(&mut self, buf: &[u8]) -> scriptipc_transport::Result<usize> {
            let n = buf.len().min(self.limit);
            self.writes.push(buf[..n].to_vec());
            Ok(n)
        }

        fn flush(&mut self) -> scriptipc_transport::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_payload_write_fails_send() {
        let data = sample_payload(20);
        let mut writer = LimitedWriter {
            limit: 8,
            writes: Vec::new(),
        };
        assert!(matches!(
            send_request(&mut writer, &RequestRef::new(1, &data)),
            Err(FrameError::SendRequest {
                requested: 20,
                written: 8
            })
        ));

        let mut writer = LimitedWriter {
            limit: 1,
            writes: Vec::new(),
        };
        assert!(matches!(
            send_response(&mut writer, &ResponseRef::error(300)),
            Err(FrameError::SendResponse {
                requested: 2,
                written: 1
            })
        ));
    }

    #[test]
    fn buffered_packet_is_one_underlying_write() {
        let data = sample_payload(97);
        let mut storage = [0u8; 512];
        let mut writer = BufferedWriter::new(
            LimitedWriter {
                limit: usize::MAX,
                writes: Vec::new(),
            },
            &mut storage,
        );
        send_request(&mut writer, &RequestRef::new(1, &data)).expect("request should be sent");

        let sink = writer.get_ref();
        assert_eq!(sink.writes.len(), 1);
        assert_eq!(sink.writes[0].len(), 100);
    }
}
