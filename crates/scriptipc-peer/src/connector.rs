use scriptipc_transport::{CodeHash, HashKind, ProgramLocator, Syscalls};
use tracing::{debug, info};

use crate::channel::Channel;
use crate::client::Client;
use crate::config::IpcConfig;
use crate::error::Result;
use crate::fatal::Terminator;

/// Spawn `program` as a server and return the client end of its channel.
///
/// Two pipes are created. The server inherits `[inbound_read, outbound_write]`;
/// the caller keeps the opposite ends.
pub fn establish_client_channel<'r, S: Syscalls>(
    sys: &S,
    config: IpcConfig<'r>,
    program: &ProgramLocator,
    args: &[String],
) -> Result<Client<'r, S>> {
    let (alloc, io_buffer, panic_handler) = config.into_parts();

    let (local_read, remote_write) = sys.create_pipe()?;
    let (remote_read, local_write) = sys.create_pipe()?;
    debug!(%local_read, %local_write, %remote_read, %remote_write, "pipes created for server");

    let pid = sys.spawn(program, args, &[remote_read, remote_write])?;
    info!(%program, %pid, "server spawned");

    let channel = Channel::open(sys, local_read, local_write, io_buffer)?;
    let terminator = Terminator::new(sys.clone(), panic_handler);
    Ok(Client::new(channel, alloc, terminator, pid))
}

/// Like [`establish_client_channel`], locating the server program through
/// a dependency cell.
pub fn establish_client_channel_by_dependency<'r, S: Syscalls>(
    sys: &S,
    config: IpcConfig<'r>,
    code_hash: &CodeHash,
    hash_kind: HashKind,
    args: &[String],
) -> Result<Client<'r, S>> {
    let program = sys.resolve_dependency(code_hash, hash_kind)?;
    debug!(%code_hash, %hash_kind, %program, "dependency resolved");
    establish_client_channel(sys, config, &program, args)
}

#[cfg(test)]
mod tests {
    use scriptipc_frame::{Allocator, PayloadAllocator, Request, Response};
    use scriptipc_transport::{FatalError, SimVm, TransportError};

    use super::*;
    use crate::error::PeerError;
    use crate::server::run_server;

    fn echo(request: &Request, alloc: &mut PayloadAllocator<'_>) -> std::result::Result<Response, FatalError> {
        let len = request.payload_len();
        let response = Response::allocate(alloc, len)?;
        if let (Some(src), Some(dst)) = (&request.payload, &response.payload) {
            let data = alloc.bytes(src).to_vec();
            alloc.bytes_mut(dst).copy_from_slice(&data);
        }
        Ok(response)
    }

    fn register_echo(vm: &SimVm, name: &str) {
        vm.register_program(name, |proc, args| {
            let code = args.len() as i32;
            match run_server(&proc, IpcConfig::new(), echo) {
                Err(PeerError::Disconnected) => code,
                _ => -1,
            }
        });
    }

    #[test]
    fn spawned_server_inherits_opposite_ends() {
        let vm = SimVm::new();
        register_echo(&vm, "echo");
        let root = vm.root();

        let mut client = establish_client_channel(&root, IpcConfig::new(), &"echo".into(), &[])
            .expect("server should spawn");
        // First pipe is (2, 3), second (4, 5): the client keeps 2 and 5.
        assert_eq!(client.channel().read_fd().0, 2);
        assert_eq!(client.channel().write_fd().0, 5);

        let response = client.call(7, b"round trip").expect("call should succeed");
        assert_eq!(client.payload(&response), b"round trip");
        client.release(response).expect("release should succeed");
    }

    #[test]
    fn args_are_forwarded() {
        let vm = SimVm::new();
        register_echo(&vm, "echo");
        let root = vm.root();

        let args = vec!["--flag".to_string(), "value".to_string()];
        let client = establish_client_channel(&root, IpcConfig::new(), &"echo".into(), &args)
            .expect("server should spawn");
        let pid = client.server_pid();
        let write_fd = client.channel().write_fd();
        drop(client);
        root.close(write_fd).expect("close should succeed");
        assert_eq!(vm.wait(pid).expect("server should exit"), 2);
    }

    #[test]
    fn dependency_lookup_spawns_resolved_program() {
        let vm = SimVm::new();
        register_echo(&vm, "echo");
        let hash = CodeHash([0x11; 32]);
        vm.register_dependency(hash, HashKind::Type, "echo".into());
        let root = vm.root();

        let mut client = establish_client_channel_by_dependency(
            &root,
            IpcConfig::new(),
            &hash,
            HashKind::Type,
            &[],
        )
        .expect("server should spawn");
        let response = client.call(1, b"dep").expect("call should succeed");
        assert_eq!(client.payload(&response), b"dep");
        client.release(response).expect("release should succeed");

        let err = establish_client_channel_by_dependency(
            &root,
            IpcConfig::new(),
            &hash,
            HashKind::Data,
            &[],
        )
        .expect_err("missing dependency should fail");
        assert!(matches!(
            err,
            PeerError::Transport(TransportError::DependencyNotFound { .. })
        ));
    }

    #[test]
    fn unknown_program_fails_to_spawn() {
        let vm = SimVm::new();
        let err = establish_client_channel(&vm.root(), IpcConfig::new(), &"missing".into(), &[])
            .expect_err("channel setup should fail");
        assert!(matches!(
            err,
            PeerError::Transport(TransportError::UnknownProgram(_))
        ));
    }
}
