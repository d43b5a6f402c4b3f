use std::fs;
use std::time::Instant;

use scriptipc_frame::RequestRef;
use scriptipc_transport::HostSyscalls;

use crate::cmd::session::{connect, shutdown};
use crate::cmd::CallArgs;
use crate::exit::{io_error, peer_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::logging::LogSettings;
use crate::output::{print_call, CallOutput, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat, logging: LogSettings) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let sys = HostSyscalls::new();
    let mut io_buffer = args.target.io_buffer.map(|len| vec![0u8; len]);
    let mut client = connect(&sys, &args.target, io_buffer.as_deref_mut(), logging)?;

    let started = Instant::now();
    let response = client
        .exchange(&RequestRef::new(args.method, &payload))
        .map_err(|err| peer_error("call failed", err))?;
    let elapsed = started.elapsed();

    let program = args.target.program.to_string_lossy();
    let response_payload = client.payload(&response).to_vec();
    let error_code = response.error_code;
    let mut out = CallOutput::new(
        &program,
        client.server_pid().0,
        args.method,
        error_code,
        &response_payload,
    );
    out.elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

    client
        .release(response)
        .map_err(|err| peer_error("release failed", err))?;
    out.server_exit = Some(shutdown(&sys, client)?);
    print_call(&out, &response_payload, format);

    if error_code != 0 {
        return Err(CliError::new(
            FAILURE,
            format!(
                "server answered with {}",
                out.error_name.as_deref().unwrap_or("an error")
            ),
        ));
    }
    Ok(SUCCESS)
}

fn resolve_payload(args: &CallArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
