use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use scriptipc_frame::ProtocolErrorCode;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Outcome of one `call`.
#[derive(Debug, Serialize)]
pub struct CallOutput<'a> {
    pub schema_id: &'a str,
    pub program: &'a str,
    pub server_pid: u64,
    pub method_id: u64,
    pub error_code: u64,
    pub error_name: Option<String>,
    pub payload_size: usize,
    pub payload: String,
    pub payload_hex: String,
    pub elapsed_us: u64,
    pub server_exit: Option<i32>,
}

pub const CALL_SCHEMA_ID: &str =
    "https://schemas.3leaps.dev/scriptipc/cli/v1/call-response.schema.json";

impl<'a> CallOutput<'a> {
    pub fn new(
        program: &'a str,
        server_pid: u64,
        method_id: u64,
        error_code: u64,
        payload: &[u8],
    ) -> Self {
        Self {
            schema_id: CALL_SCHEMA_ID,
            program,
            server_pid,
            method_id,
            error_code,
            error_name: error_name(error_code),
            payload_size: payload.len(),
            payload: payload_preview(payload),
            payload_hex: hex(payload),
            elapsed_us: 0,
            server_exit: None,
        }
    }
}

pub fn print_call(out: &CallOutput<'_>, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "STATUS", "SIZE", "ELAPSED", "PAYLOAD"])
                .add_row(vec![
                    out.method_id.to_string(),
                    status_label(out.error_code, out.error_name.as_deref()),
                    out.payload_size.to_string(),
                    format!("{}us", out.elapsed_us),
                    out.payload.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "method={} status={} size={} elapsed={}us payload={}",
                out.method_id,
                status_label(out.error_code, out.error_name.as_deref()),
                out.payload_size,
                out.elapsed_us,
                out.payload
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

/// Outcome of a `selftest` run.
#[derive(Debug, Serialize)]
pub struct SelftestOutput<'a> {
    pub schema_id: &'a str,
    pub program: &'a str,
    pub iterations: u32,
    pub passed: u32,
    pub failures: Vec<SelftestFailure>,
    pub elapsed_ms: u64,
    pub server_exit: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct SelftestFailure {
    pub iteration: u32,
    pub reason: String,
}

pub const SELFTEST_SCHEMA_ID: &str =
    "https://schemas.3leaps.dev/scriptipc/cli/v1/selftest-report.schema.json";

pub fn print_selftest(out: &SelftestOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ITERATIONS", "PASSED", "FAILED", "ELAPSED", "SERVER EXIT"])
                .add_row(vec![
                    out.iterations.to_string(),
                    out.passed.to_string(),
                    out.failures.len().to_string(),
                    format!("{}ms", out.elapsed_ms),
                    exit_label(out.server_exit),
                ]);
            println!("{table}");
            for failure in &out.failures {
                println!("iteration {}: {}", failure.iteration, failure.reason);
            }
        }
        OutputFormat::Pretty => {
            println!(
                "iterations={} passed={} failed={} elapsed={}ms server_exit={}",
                out.iterations,
                out.passed,
                out.failures.len(),
                out.elapsed_ms,
                exit_label(out.server_exit)
            );
            for failure in &out.failures {
                println!("  iteration {}: {}", failure.iteration, failure.reason);
            }
        }
    }
}

fn print_json<T: Serialize>(out: &T) {
    println!(
        "{}",
        serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn error_name(code: u64) -> Option<String> {
    if code == 0 {
        return None;
    }
    Some(match ProtocolErrorCode::from_code(code) {
        Some(known) => known.to_string(),
        None => format!("application error ({code})"),
    })
}

fn status_label(code: u64, name: Option<&str>) -> String {
    match name {
        Some(name) => name.to_string(),
        None if code == 0 => "ok".to_string(),
        None => code.to_string(),
    }
}

fn exit_label(code: Option<i32>) -> String {
    code.map_or_else(|| "-".to_string(), |code| code.to_string())
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            text.to_string()
        }
        _ => format!("<binary {} bytes>", payload.len()),
    }
}

fn hex(payload: &[u8]) -> String {
    payload.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_output_describes_payload() {
        let out = CallOutput::new("/bin/server", 7, 1, 0, &[0x26, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(out.payload_hex, "2601000000000000");
        assert_eq!(out.payload, "<binary 8 bytes>");
        assert_eq!(out.error_name, None);

        let text = CallOutput::new("/bin/server", 7, 1, 0, b"hello");
        assert_eq!(text.payload, "hello");
    }

    #[test]
    fn names_error_codes() {
        assert_eq!(error_name(2).as_deref(), Some("item missing (2)"));
        assert_eq!(error_name(900).as_deref(), Some("application error (900)"));
        assert_eq!(status_label(0, None), "ok");
    }
}
