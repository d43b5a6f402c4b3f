use scriptipc_peer::{establish_client_channel, Client, IpcConfig};
use scriptipc_transport::{HostSyscalls, ProgramLocator};
use tracing::{debug, warn};

use crate::cmd::ServerTarget;
use crate::exit::{config_error, peer_error, transport_error, CliResult};
use crate::logging::LogSettings;

/// Spawn the target's server and return a client connected to it.
pub fn connect<'r>(
    sys: &HostSyscalls,
    target: &ServerTarget,
    io_buffer: Option<&'r mut [u8]>,
    logging: LogSettings,
) -> CliResult<Client<'r, HostSyscalls>> {
    let mut config = IpcConfig::new();
    if let Some(io_buffer) = io_buffer {
        config = config
            .with_io_buffer(io_buffer)
            .map_err(|err| config_error("invalid --io-buffer", err))?;
    }

    let program = ProgramLocator::new(target.program.to_string_lossy());
    let args = target.args(logging);
    debug!(%program, ?args, "spawning server");
    establish_client_channel(sys, config, &program, &args)
        .map_err(|err| peer_error(&format!("failed to start {program}"), err))
}

/// Close the client's descriptors and wait for the server to exit.
///
/// Closing the outbound pipe is what tells the server to stop.
pub fn shutdown(sys: &HostSyscalls, client: Client<'_, HostSyscalls>) -> CliResult<i32> {
    let pid = client.server_pid();
    let read_fd = client.channel().read_fd();
    let write_fd = client.channel().write_fd();
    if client.live_payloads() != 0 {
        warn!(live = client.live_payloads(), "closing with unreleased payloads");
    }
    drop(client);

    sys.close(write_fd)
        .map_err(|err| transport_error("close failed", err))?;
    sys.close(read_fd)
        .map_err(|err| transport_error("close failed", err))?;
    let code = sys
        .wait(pid)
        .map_err(|err| transport_error("wait failed", err))?;
    debug!(%pid, code, "server exited");
    Ok(code)
}
