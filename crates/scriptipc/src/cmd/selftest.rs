use std::time::Instant;

use scriptipc_peer::PeerError;
use scriptipc_transport::HostSyscalls;
use tracing::{debug, info};

use crate::cmd::serve::{accumulate_bytes, SUM_METHOD};
use crate::cmd::session::{connect, shutdown};
use crate::cmd::SelftestArgs;
use crate::exit::{peer_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::logging::LogSettings;
use crate::output::{
    print_selftest, OutputFormat, SelftestFailure, SelftestOutput, SELFTEST_SCHEMA_ID,
};

/// Bytes added to the payload on each iteration.
const STEP: usize = 97;

/// Call the server's sum method `iterations` times with growing payloads and
/// check every answer.
pub fn run(args: SelftestArgs, format: OutputFormat, logging: LogSettings) -> CliResult<i32> {
    let sys = HostSyscalls::new();
    let mut io_buffer = args.target.io_buffer.map(|len| vec![0u8; len]);
    let mut client = connect(&sys, &args.target, io_buffer.as_deref_mut(), logging)?;

    let started = Instant::now();
    let mut passed = 0u32;
    let mut failures = Vec::new();
    for iteration in 0..args.iterations {
        let data = pattern(iteration as usize * STEP);
        let expected = accumulate_bytes(0, &data);

        let response = match client.call(SUM_METHOD, &data) {
            Ok(response) => response,
            Err(PeerError::Remote { code }) => {
                failures.push(SelftestFailure {
                    iteration,
                    reason: format!("server answered error code {code}"),
                });
                continue;
            }
            Err(err) => return Err(peer_error("call failed", err)),
        };

        match decode_sum(client.payload(&response)) {
            Some(sum) if sum == expected => passed += 1,
            Some(sum) => failures.push(SelftestFailure {
                iteration,
                reason: format!("expected sum {expected}, got {sum}"),
            }),
            None => failures.push(SelftestFailure {
                iteration,
                reason: format!("expected 8-byte sum, got {} bytes", response.payload_len()),
            }),
        }
        debug!(iteration, len = data.len(), "sum call checked");
        client
            .release(response)
            .map_err(|err| peer_error("release failed", err))?;
    }
    let elapsed = started.elapsed();

    let program = args.target.program.to_string_lossy();
    let out = SelftestOutput {
        schema_id: SELFTEST_SCHEMA_ID,
        program: &program,
        iterations: args.iterations,
        passed,
        failures,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        server_exit: Some(shutdown(&sys, client)?),
    };
    print_selftest(&out, format);
    info!(passed, failed = out.failures.len(), "selftest finished");

    if !out.failures.is_empty() {
        return Err(CliError::new(
            FAILURE,
            format!("{} of {} sum calls failed", out.failures.len(), out.iterations),
        ));
    }
    if out.server_exit != Some(SUCCESS) {
        return Err(CliError::new(
            FAILURE,
            format!("server exited with {:?}", out.server_exit),
        ));
    }
    Ok(SUCCESS)
}

/// `len` bytes counting up from zero, wrapping at 256.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

fn decode_sum(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = payload.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}
