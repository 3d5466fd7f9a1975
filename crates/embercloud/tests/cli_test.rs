//! Integration tests for the `embercloud` binary.
//!
//! Argument parsing, help output, completions, config paths, and error
//! exit codes, all without reaching the vendor cloud.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// The binary with `EMBERCLOUD_*` cleared and config dirs pointed at `home`.
fn embercloud_cmd(home: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("embercloud");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("EMBERCLOUD_PROFILE")
        .env_remove("EMBERCLOUD_USERNAME")
        .env_remove("EMBERCLOUD_PASSWORD")
        .env_remove("EMBERCLOUD_OUTPUT")
        .env_remove("EMBERCLOUD_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_usage() {
    let home = tempfile::tempdir().unwrap();
    embercloud_cmd(home.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    embercloud_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("devices")
                .and(predicate::str::contains("watch"))
                .and(predicate::str::contains("set-temp"))
                .and(predicate::str::contains("shutdown-grill")),
        );
}

#[test]
fn completions_are_generated() {
    let home = tempfile::tempdir().unwrap();
    embercloud_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("embercloud"));
}

// ── Argument validation ─────────────────────────────────────────────

#[test]
fn set_temp_requires_a_number() {
    let home = tempfile::tempdir().unwrap();
    embercloud_cmd(home.path())
        .args(["set-temp", "grillA", "hot"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn unknown_output_format_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    embercloud_cmd(home.path())
        .args(["--output", "yaml", "devices"])
        .assert()
        .code(2);
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn config_path_lives_under_config_dir() {
    let home = tempfile::tempdir().unwrap();
    embercloud_cmd(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn missing_credentials_exit_with_auth_code() {
    let home = tempfile::tempdir().unwrap();
    embercloud_cmd(home.path())
        .arg("devices")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No credentials"));
}

#[test]
fn unknown_profile_exits_with_not_found() {
    let home = tempfile::tempdir().unwrap();
    embercloud_cmd(home.path())
        .args(["--profile", "cabin", "devices"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("cabin"));
}
