//! Integration tests for the `hwenergy` CLI binary.
//!
//! These cover argument parsing, help output, completions, and the error
//! paths that fail before any device is contacted.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `hwenergy` binary with env isolation.
fn hwenergy_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("hwenergy");
    cmd.env("HOME", "/tmp/hwenergy-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/hwenergy-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("HWENERGY_CONFIG")
        .env_remove("HWENERGY_OUTPUT")
        .env_remove("HWENERGY_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

/// Write a config file with the given body into `dir`.
fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

const DEVICES: &str = r#"
[[devices]]
name = "grid"
host = "127.0.0.1:9"
type = "p1meter"

[[devices]]
name = "pv"
host = "127.0.0.1:9"
type = "kwhmeter"
token = "ABCDEF"
"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = hwenergy_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = String::from_utf8_lossy(&output.stderr);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    hwenergy_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("pair")
            .and(predicate::str::contains("pair-one"))
            .and(predicate::str::contains("discover"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("battery")),
    );
}

#[test]
fn test_version_flag() {
    hwenergy_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hwenergy"));
}

#[test]
fn test_completions_bash() {
    hwenergy_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Argument validation ─────────────────────────────────────────────

#[test]
fn test_pair_requires_host() {
    hwenergy_cmd()
        .args(["pair", "--name", "evcc"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--host"));
}

#[test]
fn test_pair_rejects_invalid_name() {
    hwenergy_cmd()
        .args(["pair", "--name", "me@home", "--host", "127.0.0.1:9"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid name"));
}

#[test]
fn test_pair_one_rejects_long_name() {
    let name = "x".repeat(41);
    hwenergy_cmd()
        .args(["pair-one", "127.0.0.1:9", "--name", &name])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid name"));
}

#[test]
fn test_battery_rejects_unknown_mode() {
    hwenergy_cmd()
        .args(["battery", "grid", "turbo"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("turbo"));
}

// ── Configured devices ──────────────────────────────────────────────

#[test]
fn test_watch_unknown_device() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), DEVICES);

    hwenergy_cmd()
        .arg("--config")
        .arg(&config)
        .args(["watch", "battery"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("battery"));
}

#[test]
fn test_watch_without_token() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), DEVICES);

    hwenergy_cmd()
        .arg("--config")
        .arg(&config)
        .args(["watch", "grid"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No token"));
}

#[test]
fn test_battery_requires_grid_meter() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), DEVICES);

    hwenergy_cmd()
        .arg("--config")
        .arg(&config)
        .args(["battery", "pv", "zero"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does not support battery control"));
}

#[test]
fn test_missing_config_file_means_no_devices() {
    let dir = tempfile::tempdir().unwrap();

    hwenergy_cmd()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .args(["watch", "grid"])
        .assert()
        .code(4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_battery_falls_back_to_http_without_stream() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/batteries"))
        .and(header("authorization", "Bearer ABC123"))
        .and(body_json(json!({ "mode": "zero" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mode": "zero",
            "power_w": -320,
            "target_power_w": -320,
            "max_consumption_w": 1600,
            "max_production_w": 800
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Nothing listens on port 9, so the stream cannot come up.
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[[devices]]
name = "grid"
host = "127.0.0.1:9"
type = "p1meter"
token = "ABC123"
base_url = "{}"
"#,
            server.uri()
        ),
    );

    let assert = tokio::task::spawn_blocking(move || {
        hwenergy_cmd()
            .arg("--config")
            .arg(&config)
            .args(["--timeout", "2", "battery", "grid", "zero"])
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("Battery mode set to zero via http"));
    server.verify().await;
}

// ── Discovery ───────────────────────────────────────────────────────

#[test]
fn test_discover_unreachable_host_finds_nothing() {
    hwenergy_cmd()
        .args([
            "--timeout",
            "1",
            "discover",
            "--host",
            "127.0.0.1:9",
            "--scan-secs",
            "2",
        ])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("No devices found"));
}
