use std::convert::Infallible;
use std::fmt;

use scriptipc_frame::{
    receive_request, send_error_code, send_response, Allocator, FrameError, PayloadAllocator,
    ProtocolErrorCode, Request, Response,
};
use scriptipc_transport::{FatalError, Syscalls};
use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::config::IpcConfig;
use crate::error::{PeerError, Result};
use crate::fatal::Terminator;
use crate::listener::adopt_server_channel;

/// Application logic behind a server.
///
/// Failures the client should see are expressed as a [`Response`] with a
/// non-zero error code. Only allocator failures may abort handling.
pub trait Handler<A: Allocator + ?Sized> {
    fn handle(&mut self, request: &Request, alloc: &mut A) -> std::result::Result<Response, FatalError>;
}

impl<A, F> Handler<A> for F
where
    A: Allocator + ?Sized,
    F: FnMut(&Request, &mut A) -> std::result::Result<Response, FatalError>,
{
    fn handle(&mut self, request: &Request, alloc: &mut A) -> std::result::Result<Response, FatalError> {
        self(request, alloc)
    }
}

/// Where the serve loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeState {
    AwaitingRequest,
    Dispatching,
    SendingResponse,
    Faulted,
}

impl fmt::Display for ServeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServeState::AwaitingRequest => "awaiting-request",
            ServeState::Dispatching => "dispatching",
            ServeState::SendingResponse => "sending-response",
            ServeState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Server end of a channel, adopted from inherited descriptors.
#[derive(Debug)]
pub struct Server<'r, S> {
    channel: Channel<'r, S>,
    alloc: PayloadAllocator<'r>,
    terminator: Terminator<S>,
    state: ServeState,
    served: u64,
}

impl<'r, S: Syscalls> Server<'r, S> {
    pub(crate) fn new(
        channel: Channel<'r, S>,
        alloc: PayloadAllocator<'r>,
        terminator: Terminator<S>,
    ) -> Self {
        Self {
            channel,
            alloc,
            terminator,
            state: ServeState::AwaitingRequest,
            served: 0,
        }
    }

    pub fn state(&self) -> ServeState {
        self.state
    }

    /// Requests answered so far.
    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn channel(&self) -> &Channel<'r, S> {
        &self.channel
    }

    pub fn terminator(&self) -> &Terminator<S> {
        &self.terminator
    }

    /// Answer requests until an error occurs.
    ///
    /// A clean close by the client ends the loop with
    /// [`PeerError::Disconnected`].
    pub fn serve<H: Handler<PayloadAllocator<'r>>>(&mut self, mut handler: H) -> Result<Infallible> {
        loop {
            self.serve_one(&mut handler)?;
        }
    }

    /// Receive one request, dispatch it and send the response.
    pub fn serve_one<H: Handler<PayloadAllocator<'r>>>(&mut self, handler: &mut H) -> Result<()> {
        let outcome = self.step(handler);
        if let Err(err) = &outcome {
            if !matches!(err, PeerError::Disconnected) {
                warn!(state = %self.state, error = %err, "serve loop faulted");
            }
            self.state = ServeState::Faulted;
        }
        outcome
    }

    fn step<H: Handler<PayloadAllocator<'r>>>(&mut self, handler: &mut H) -> Result<()> {
        self.state = ServeState::AwaitingRequest;
        let (reader, writer) = self.channel.parts_mut();

        let request = match receive_request(reader, &mut self.alloc) {
            Ok(request) => request,
            Err(FrameError::ConnectionClosed) => {
                debug!(served = self.served, "client closed channel");
                return Err(PeerError::Disconnected);
            }
            Err(err) => {
                let code = ProtocolErrorCode::from(&err);
                if let Err(notice) = send_error_code(writer, code.code()) {
                    debug!(error = %notice, "could not notify client of bad request");
                }
                return Err(err.into());
            }
        };

        self.state = ServeState::Dispatching;
        trace!(method_id = request.method_id, state = %self.state, "dispatching");
        let handled = handler.handle(&request, &mut self.alloc);
        request.release(&mut self.alloc)?;
        let response = handled?;

        self.state = ServeState::SendingResponse;
        let sent = send_response(writer, &response.view(&self.alloc));
        response.release(&mut self.alloc)?;
        sent?;

        self.served += 1;
        self.state = ServeState::AwaitingRequest;
        Ok(())
    }
}

/// Adopt the inherited channel and serve forever.
///
/// Fatal errors terminate the process through the configured handler. Any
/// other error ends the loop and is returned, [`PeerError::Disconnected`]
/// being the normal way out.
pub fn run_server<'r, S, H>(sys: &S, config: IpcConfig<'r>, handler: H) -> Result<Infallible>
where
    S: Syscalls,
    H: Handler<PayloadAllocator<'r>>,
{
    let terminator = Terminator::new(sys.clone(), config.panic_handler());
    let mut server = terminator.check(adopt_server_channel(sys, config))?;
    let outcome = server.serve(handler);
    terminator.check(outcome)
}

#[cfg(test)]
mod tests {
    use scriptipc_frame::{RequestRef, PROTOCOL_VERSION};
    use scriptipc_transport::{SimProcess, SimVm};

    use super::*;
    use crate::connector::establish_client_channel;

    const SUM: u64 = 1;

    fn sum_handler(
        request: &Request,
        alloc: &mut PayloadAllocator<'_>,
    ) -> std::result::Result<Response, FatalError> {
        if request.method_id != SUM {
            return Ok(Response::error(ProtocolErrorCode::UNKNOWN_METHOD));
        }
        let sum = request
            .payload(alloc)
            .iter()
            .fold(0u64, |acc, b| acc.wrapping_add(u64::from(*b)));
        Response::with_payload(alloc, &sum.to_le_bytes())
    }

    fn exit_code(result: Result<Infallible>) -> i32 {
        match result {
            Err(PeerError::Disconnected) => 0,
            Err(PeerError::UnexpectedInheritedFdCount { .. }) => 3,
            Err(_) => 1,
            Ok(never) => match never {},
        }
    }

    fn register_sum_server(vm: &SimVm, name: &str, region_len: usize) {
        vm.register_program(name, move |proc: SimProcess, _args| {
            let mut region = vec![0u8; region_len];
            let mut io = vec![0u8; 2048];
            let config = IpcConfig::new()
                .with_fixed_region(&mut region)
                .and_then(|config| config.with_io_buffer(&mut io))
                .expect("server config should build");
            exit_code(run_server(&proc, config, sum_handler))
        });
    }

    #[test]
    fn sum_scenario_over_eleven_calls() {
        let vm = SimVm::new();
        register_sum_server(&vm, "sum-server", 4096);
        let root = vm.root();

        let mut region = vec![0u8; 64];
        let mut io = vec![0u8; 1024];
        let config = IpcConfig::new()
            .with_fixed_region(&mut region)
            .and_then(|config| config.with_io_buffer(&mut io))
            .expect("client config should build");
        let mut client = establish_client_channel(&root, config, &"sum-server".into(), &[])
            .expect("server should spawn");
        assert!(client.channel().is_buffered());

        for i in 0..11usize {
            let data: Vec<u8> = (0..i * 97).map(|j| (j % 256) as u8).collect();
            let expected = data
                .iter()
                .fold(0u64, |acc, b| acc.wrapping_add(u64::from(*b)));

            let response = client.call(SUM, &data).expect("call should succeed");
            assert_eq!(response.version, PROTOCOL_VERSION);
            let bytes: [u8; 8] = client
                .payload(&response)
                .try_into()
                .expect("sum should be 8 bytes");
            assert_eq!(u64::from_le_bytes(bytes), expected, "iteration {i}");
            client.release(response).expect("release should succeed");
            assert_eq!(client.live_payloads(), 0);
        }

        let pid = client.server_pid();
        let write_fd = client.channel().write_fd();
        drop(client);
        root.close(write_fd).expect("close should succeed");
        assert_eq!(vm.wait(pid).expect("server should exit"), 0);
    }

    #[test]
    fn remote_error_code_is_surfaced() {
        let vm = SimVm::new();
        register_sum_server(&vm, "sum-server", 4096);
        let root = vm.root();
        let mut client = establish_client_channel(&root, IpcConfig::new(), &"sum-server".into(), &[])
            .expect("server should spawn");

        let response = client
            .exchange(&RequestRef::new(99, b"abc"))
            .expect("exchange should succeed");
        assert_eq!(
            response.error_code,
            ProtocolErrorCode::UNKNOWN_METHOD.code()
        );
        assert!(response.payload.is_none());
        client.release(response).expect("release should succeed");

        let err = client.call(99, b"abc").expect_err("call should fail");
        assert!(matches!(err, PeerError::Remote { code: 2 }));
        assert_eq!(client.live_payloads(), 0);

        // The server keeps serving after an application error.
        let ok = client.call(SUM, &[1, 2, 3]).expect("call should succeed");
        assert_eq!(client.payload(&ok), &6u64.to_le_bytes());
        client.release(ok).expect("release should succeed");
    }

    #[test]
    fn oversized_request_terminates_server_after_notice() {
        let vm = SimVm::new();
        register_sum_server(&vm, "tiny-server", 64);
        let root = vm.root();

        // Buffered, so the whole request reaches the pipe before the server
        // can fail on its header.
        let mut io = vec![0u8; 1024];
        let config = IpcConfig::new()
            .with_io_buffer(&mut io)
            .expect("client config should build");
        let mut client = establish_client_channel(&root, config, &"tiny-server".into(), &[])
            .expect("server should spawn");

        let err = client.call(SUM, &[0u8; 100]).expect_err("call should fail");
        assert!(matches!(
            err,
            PeerError::Remote { code } if code == ProtocolErrorCode::LengthNotEnough.code()
        ));

        let expected = FatalError::AllocationTooLarge {
            requested: 100,
            slot_size: 32,
        }
        .exit_code();
        assert_eq!(vm.wait(client.server_pid()).expect("server should exit"), expected);
    }

    #[test]
    fn server_without_inherited_channel_is_rejected() {
        let vm = SimVm::new();
        let root = vm.root();
        let err = adopt_server_channel(&root, IpcConfig::new()).expect_err("adoption should fail");
        assert!(matches!(
            err,
            PeerError::UnexpectedInheritedFdCount { count: 0 }
        ));
    }

    #[test]
    fn server_with_three_descriptors_is_rejected() {
        let vm = SimVm::new();
        register_sum_server(&vm, "sum-server", 4096);
        let root = vm.root();
        let (r1, w1) = root.create_pipe().expect("pipe should be created");
        let (r2, _w2) = root.create_pipe().expect("pipe should be created");
        let pid = root
            .spawn(&"sum-server".into(), &[], &[r1, w1, r2])
            .expect("spawn should succeed");
        assert_eq!(vm.wait(pid).expect("server should exit"), 3);
    }

    #[test]
    fn serve_one_tracks_state() {
        let vm = SimVm::new();
        let root = vm.root();

        // Drive a server in-process: the root plays both ends.
        let (server_read, client_write) = root.create_pipe().expect("pipe should be created");
        let (client_read, server_write) = root.create_pipe().expect("pipe should be created");
        let channel = Channel::open(&root, server_read, server_write, None)
            .expect("channel should open");
        let mut server = Server::new(
            channel,
            PayloadAllocator::heap(),
            Terminator::new(root.clone(), None),
        );
        let mut client = Channel::open(&root, client_read, client_write, None)
            .expect("channel should open");

        let (_, writer) = client.parts_mut();
        scriptipc_frame::send_request(writer, &RequestRef::new(SUM, &[5, 5]))
            .expect("send should succeed");

        let mut handler = sum_handler;
        server.serve_one(&mut handler).expect("serve should succeed");
        assert_eq!(server.state(), ServeState::AwaitingRequest);
        assert_eq!(server.served(), 1);

        let mut alloc = PayloadAllocator::heap();
        let (reader, _) = client.parts_mut();
        let response =
            scriptipc_frame::receive_response(reader, &mut alloc).expect("receive should succeed");
        assert_eq!(response.payload(&alloc), &10u64.to_le_bytes());
        response.release(&mut alloc).expect("release should succeed");

        root.close(client_write).expect("close should succeed");
        assert!(matches!(
            server.serve_one(&mut handler),
            Err(PeerError::Disconnected)
        ));
        assert_eq!(server.state(), ServeState::Faulted);
    }
}
