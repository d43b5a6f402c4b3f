//! Sum server and client running inside one simulated VM.
//!
//! Run with:
//!   cargo run --example sum-sim --features peer
//!
//! The same exchange between real processes:
//!   cargo run --features cli -- selftest --program target/debug/scriptipc \
//!     -- serve --handler sum --fixed-region 4096

use scriptipc::frame::{PayloadAllocator, ProtocolErrorCode, Request, Response};
use scriptipc::peer::{establish_client_channel, run_server, IpcConfig, PeerError};
use scriptipc::transport::{FatalError, SimProcess, SimVm};

const SUM: u64 = 1;

fn sum(request: &Request, alloc: &mut PayloadAllocator<'_>) -> Result<Response, FatalError> {
    if request.method_id != SUM {
        return Ok(Response::error(ProtocolErrorCode::UNKNOWN_METHOD));
    }
    let total = request
        .payload(alloc)
        .iter()
        .fold(0u64, |acc, b| acc.wrapping_add(u64::from(*b)));
    Response::with_payload(alloc, &total.to_le_bytes())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let vm = SimVm::new();
    vm.register_program("sum-server", |proc: SimProcess, _args| {
        let mut region = vec![0u8; 4096];
        let Ok(config) = IpcConfig::new().with_fixed_region(&mut region) else {
            return 2;
        };
        match run_server(&proc, config, sum) {
            Err(PeerError::Disconnected) => 0,
            Err(err) => {
                eprintln!("server stopped: {err}");
                1
            }
            Ok(never) => match never {},
        }
    });

    let root = vm.root();
    let mut region = vec![0u8; 64];
    let config = IpcConfig::new().with_fixed_region(&mut region)?;
    let mut client = establish_client_channel(&root, config, &"sum-server".into(), &[])?;
    eprintln!(
        "Server {} on fds {}/{}",
        client.server_pid(),
        client.channel().read_fd(),
        client.channel().write_fd()
    );

    for i in 0..11usize {
        let data: Vec<u8> = (0..i * 97).map(|j| (j % 256) as u8).collect();
        let response = client.call(SUM, &data)?;
        let bytes: [u8; 8] = client.payload(&response).try_into()?;
        eprintln!("{} bytes sum to {}", data.len(), u64::from_le_bytes(bytes));
        client.release(response)?;
    }

    match client.call(99, b"") {
        Err(PeerError::Remote { code }) => eprintln!("method 99 rejected with code {code}"),
        other => eprintln!("unexpected answer to method 99: {other:?}"),
    }

    let pid = client.server_pid();
    let write_fd = client.channel().write_fd();
    drop(client);
    root.close(write_fd)?;
    eprintln!("Server exited with {}", vm.wait(pid)?);
    Ok(())
}
