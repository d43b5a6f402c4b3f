use scriptipc_frame::{receive_response, send_request, PayloadAllocator, RequestRef, Response};
use scriptipc_transport::{ProcessId, Syscalls};
use tracing::debug;

use crate::channel::Channel;
use crate::error::{PeerError, Result};
use crate::fatal::Terminator;

/// Client end of a channel to a spawned server.
///
/// One call at a time: each request is answered by exactly one response
/// before the next request is sent.
#[derive(Debug)]
pub struct Client<'r, S> {
    channel: Channel<'r, S>,
    alloc: PayloadAllocator<'r>,
    terminator: Terminator<S>,
    server: ProcessId,
}

impl<'r, S: Syscalls> Client<'r, S> {
    pub(crate) fn new(
        channel: Channel<'r, S>,
        alloc: PayloadAllocator<'r>,
        terminator: Terminator<S>,
        server: ProcessId,
    ) -> Self {
        Self {
            channel,
            alloc,
            terminator,
            server,
        }
    }

    /// Send `request` and wait for the response, whatever its error code.
    ///
    /// Fatal errors terminate the process.
    pub fn exchange(&mut self, request: &RequestRef<'_>) -> Result<Response> {
        let outcome = self.exchange_inner(request);
        self.terminator.check(outcome)
    }

    fn exchange_inner(&mut self, request: &RequestRef<'_>) -> Result<Response> {
        let (reader, writer) = self.channel.parts_mut();
        send_request(writer, request)?;
        let response = receive_response(reader, &mut self.alloc)?;
        Ok(response)
    }

    /// Call `method_id` with `payload`.
    ///
    /// A non-zero error code becomes [`PeerError::Remote`]; the response
    /// payload is released first. On success the caller owns the payload
    /// and gives it back with [`Client::release`].
    pub fn call(&mut self, method_id: u64, payload: &[u8]) -> Result<Response> {
        let response = self.exchange(&RequestRef::new(method_id, payload))?;
        if response.is_success() {
            return Ok(response);
        }

        let code = response.error_code;
        debug!(method_id, code, "call failed remotely");
        let released = response.release(&mut self.alloc).map_err(PeerError::from);
        self.terminator.check(released)?;
        Err(PeerError::Remote { code })
    }

    /// Payload bytes of a response received by this client.
    pub fn payload(&self, response: &Response) -> &[u8] {
        response.payload(&self.alloc)
    }

    /// Give a response payload back to the allocator.
    pub fn release(&mut self, response: Response) -> Result<()> {
        let released = response.release(&mut self.alloc).map_err(PeerError::from);
        self.terminator.check(released)
    }

    pub fn server_pid(&self) -> ProcessId {
        self.server
    }

    pub fn channel(&self) -> &Channel<'r, S> {
        &self.channel
    }

    pub fn allocator(&self) -> &PayloadAllocator<'r> {
        &self.alloc
    }

    pub fn terminator(&self) -> &Terminator<S> {
        &self.terminator
    }

    /// Number of response payloads not yet released.
    pub fn live_payloads(&self) -> usize {
        self.alloc.live()
    }
}
