use scriptipc_transport::Syscalls;
use tracing::debug;

use crate::channel::Channel;
use crate::config::IpcConfig;
use crate::error::{PeerError, Result};
use crate::fatal::Terminator;
use crate::server::Server;

/// Turn the descriptors inherited at spawn time into the server end of a
/// channel.
///
/// Exactly two descriptors are expected: inbound read end first, outbound
/// write end second.
pub fn adopt_server_channel<'r, S: Syscalls>(sys: &S, config: IpcConfig<'r>) -> Result<Server<'r, S>> {
    let fds = sys.inherited_fds()?;
    let &[read_fd, write_fd] = fds.as_slice() else {
        return Err(PeerError::UnexpectedInheritedFdCount { count: fds.len() });
    };
    debug!(%read_fd, %write_fd, "adopting inherited channel");

    let (alloc, io_buffer, panic_handler) = config.into_parts();
    let channel = Channel::open(sys, read_fd, write_fd, io_buffer)?;
    let terminator = Terminator::new(sys.clone(), panic_handler);
    Ok(Server::new(channel, alloc, terminator))
}
