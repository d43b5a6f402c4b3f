use std::convert::Infallible;

use scriptipc_frame::{PayloadAllocator, ProtocolErrorCode, Request, Response};
use scriptipc_peer::{run_server, IpcConfig, PeerError};
use scriptipc_transport::{FatalError, HostSyscalls};
use tracing::info;

use crate::cmd::{HandlerKind, ServeArgs};
use crate::exit::{config_error, peer_error, CliResult, SUCCESS};

/// Method id answered by the `sum` handler.
pub const SUM_METHOD: u64 = 1;

/// Serve until the client closes the channel.
///
/// Never writes to stdout: it is shared with the spawning client.
pub fn run(args: ServeArgs) -> CliResult<i32> {
    let sys = HostSyscalls::new();
    let mut region = args.fixed_region.map(|len| vec![0u8; len]);
    let mut io_buffer = args.io_buffer.map(|len| vec![0u8; len]);

    let mut config = IpcConfig::new();
    if let Some(region) = region.as_deref_mut() {
        config = config
            .with_fixed_region(region)
            .map_err(|err| config_error("invalid --fixed-region", err))?;
    }
    if let Some(io_buffer) = io_buffer.as_deref_mut() {
        config = config
            .with_io_buffer(io_buffer)
            .map_err(|err| config_error("invalid --io-buffer", err))?;
    }

    info!(
        handler = ?args.handler,
        fixed_region = ?args.fixed_region,
        buffered = config.is_buffered(),
        "serving inherited channel"
    );
    let outcome = match args.handler {
        HandlerKind::Sum => run_server(&sys, config, sum),
        HandlerKind::Echo => run_server(&sys, config, echo),
    };
    finish(outcome)
}

fn finish(outcome: scriptipc_peer::Result<Infallible>) -> CliResult<i32> {
    match outcome {
        Ok(never) => match never {},
        Err(PeerError::Disconnected) => {
            info!("client disconnected");
            Ok(SUCCESS)
        }
        Err(err) => Err(peer_error("serve failed", err)),
    }
}

/// Add every byte of `data` to `total`, wrapping at `u64::MAX`.
pub fn accumulate_bytes(total: u64, data: &[u8]) -> u64 {
    data.iter()
        .fold(total, |acc, byte| acc.wrapping_add(u64::from(*byte)))
}

/// Byte sum of the payload as a little-endian u64.
pub fn sum(request: &Request, alloc: &mut PayloadAllocator<'_>) -> Result<Response, FatalError> {
    if request.method_id != SUM_METHOD {
        return Ok(Response::error(ProtocolErrorCode::UNKNOWN_METHOD));
    }
    let total = accumulate_bytes(0, request.payload(alloc));
    Response::with_payload(alloc, &total.to_le_bytes())
}

/// The request payload, unchanged.
pub fn echo(request: &Request, alloc: &mut PayloadAllocator<'_>) -> Result<Response, FatalError> {
    let data = request.payload(alloc).to_vec();
    Response::with_payload(alloc, &data)
}
