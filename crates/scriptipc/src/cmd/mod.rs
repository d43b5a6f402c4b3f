use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::logging::LogSettings;
use crate::output::OutputFormat;

pub mod call;
pub mod selftest;
pub mod serve;
pub mod session;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve requests on the channel inherited from a spawning client.
    Serve(ServeArgs),
    /// Spawn a server, perform one call and print the response.
    Call(CallArgs),
    /// Run the sum scenario against a spawned server.
    Selftest(SelftestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, logging: LogSettings) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Call(args) => call::run(args, format, logging),
        Command::Selftest(args) => selftest::run(args, format, logging),
        Command::Version(args) => version::run(args),
    }
}

/// Built-in request handlers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum HandlerKind {
    /// Method 1 answers the payload's byte sum as a little-endian u64.
    Sum,
    /// Every method answers with the request payload.
    Echo,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Request handler.
    #[arg(long, value_enum, default_value = "echo")]
    pub handler: HandlerKind,
    /// Store payloads in a fixed region of this many bytes (two equal slots).
    #[arg(long, value_name = "BYTES")]
    pub fixed_region: Option<usize>,
    /// Buffer channel I/O through a region of this many bytes.
    #[arg(long, value_name = "BYTES")]
    pub io_buffer: Option<usize>,
}

/// How to reach the server program.
#[derive(Args, Debug)]
pub struct ServerTarget {
    /// Server program to spawn.
    #[arg(long, value_name = "PATH")]
    pub program: PathBuf,
    /// Buffer client channel I/O through a region of this many bytes.
    #[arg(long, value_name = "BYTES")]
    pub io_buffer: Option<usize>,
    /// Append this process's --log-format/--log-level to the server arguments.
    #[arg(long)]
    pub forward_logging: bool,
    /// Arguments passed to the server program.
    #[arg(last = true, value_name = "SERVER_ARGS")]
    pub server_args: Vec<String>,
}

impl ServerTarget {
    pub fn args(&self, logging: LogSettings) -> Vec<String> {
        if self.forward_logging {
            logging.forward_to(&self.server_args)
        } else {
            self.server_args.clone()
        }
    }
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub target: ServerTarget,
    /// Method id of the request.
    #[arg(long, short = 'm', default_value = "1")]
    pub method: u64,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SelftestArgs {
    #[command(flatten)]
    pub target: ServerTarget,
    /// Number of sum calls; call `i` carries `97 * i` bytes.
    #[arg(long, default_value = "11")]
    pub iterations: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
