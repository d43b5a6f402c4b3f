#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

use scriptipc::transport::INHERITED_FDS_ENV;

const BIN: &str = env!("CARGO_BIN_EXE_scriptipc");

fn scriptipc(args: &[&str]) -> Output {
    Command::new(BIN)
        .args(["--log-level", "error"])
        .args(args)
        .env_remove(INHERITED_FDS_ENV)
        .output()
        .expect("scriptipc should run")
}

fn json_stdout(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("stdout should be one json document")
}

#[test]
fn version_prints_package_version() {
    let output = scriptipc(&["version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("scriptipc {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn call_sum_server_returns_byte_sum() {
    let output = scriptipc(&[
        "--format", "json", "call", "--program", BIN, "--data", "abc", "--", "serve",
        "--handler", "sum", "--log-level", "error",
    ]);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let out = json_stdout(&output);
    assert_eq!(out["error_code"], 0);
    assert_eq!(out["method_id"], 1);
    assert_eq!(out["payload_size"], 8);
    assert_eq!(out["payload_hex"], "2601000000000000");
    assert_eq!(out["server_exit"], 0);
    assert!(out["schema_id"]
        .as_str()
        .is_some_and(|id| id.ends_with("call-response.schema.json")));
}

#[test]
fn call_unknown_method_reports_remote_error() {
    let output = scriptipc(&[
        "--format", "json", "call", "--program", BIN, "--method", "9", "--data", "abc", "--",
        "serve", "--handler", "sum", "--log-level", "error",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let out = json_stdout(&output);
    assert_eq!(out["error_code"], 2);
    assert_eq!(out["error_name"], "item missing (2)");
    assert_eq!(out["payload_size"], 0);
    assert_eq!(out["server_exit"], 0);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("item missing"));
}

#[test]
fn buffered_echo_round_trip() {
    let output = scriptipc(&[
        "--format", "json", "call", "--program", BIN, "--io-buffer", "1024", "--method", "7",
        "--data", "hello pipes", "--", "serve", "--handler", "echo", "--io-buffer", "2048",
        "--log-level", "error",
    ]);

    assert!(output.status.success());
    let out = json_stdout(&output);
    assert_eq!(out["payload"], "hello pipes");
    assert_eq!(out["payload_size"], 11);
    assert_eq!(out["server_exit"], 0);
}

#[test]
fn raw_format_writes_payload_bytes() {
    let output = scriptipc(&[
        "--format", "raw", "call", "--program", BIN, "--data", "verbatim", "--", "serve",
        "--handler", "echo", "--log-level", "error",
    ]);

    assert!(output.status.success());
    assert_eq!(output.stdout, b"verbatim");
}

#[test]
fn oversized_request_terminates_fixed_region_server() {
    let data = "x".repeat(100);
    let output = scriptipc(&[
        "--format", "json", "call", "--program", BIN, "--io-buffer", "1024", "--data", &data,
        "--", "serve", "--handler", "echo", "--fixed-region", "64", "--log-level", "error",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let out = json_stdout(&output);
    assert_eq!(out["error_code"], 3);
    assert_eq!(out["error_name"], "length not enough (3)");
    // AllocationTooLarge
    assert_eq!(out["server_exit"], 41);
}

#[test]
fn selftest_runs_sum_scenario_against_fixed_region_server() {
    let output = scriptipc(&[
        "--format", "json", "selftest", "--program", BIN, "--io-buffer", "1024", "--", "serve",
        "--handler", "sum", "--fixed-region", "4096", "--io-buffer", "2048", "--log-level",
        "error",
    ]);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let out = json_stdout(&output);
    assert_eq!(out["iterations"], 11);
    assert_eq!(out["passed"], 11);
    assert_eq!(out["failures"].as_array().map(Vec::len), Some(0));
    assert_eq!(out["server_exit"], 0);
}

#[test]
fn selftest_against_echo_server_reports_failures() {
    let output = scriptipc(&[
        "--format", "json", "selftest", "--program", BIN, "--iterations", "2", "--", "serve",
        "--handler", "echo", "--log-level", "error",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let out = json_stdout(&output);
    assert_eq!(out["passed"], 0);
    assert_eq!(out["failures"].as_array().map(Vec::len), Some(2));
    assert_eq!(out["server_exit"], 0);
}

#[test]
fn serve_without_client_is_usage_error() {
    let output = scriptipc(&["serve", "--handler", "sum"]);

    assert_eq!(output.status.code(), Some(64));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("expected 2 inherited descriptors, got 0"));
}

#[test]
fn missing_server_program_is_not_found() {
    let output = scriptipc(&[
        "call",
        "--program",
        "/nonexistent/scriptipc-server",
        "--data",
        "abc",
    ]);

    assert_eq!(output.status.code(), Some(127));
    assert!(output.stdout.is_empty());
}
