//! Integration tests for CLI commands

#![allow(deprecated)]

use assert_cmd::{assert::OutputAssertExt, cargo::CommandCargoExt};
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn veille() -> Command {
    let mut cmd = Command::cargo_bin("veille").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("OLLAMA_BASE_URL")
        .env_remove("OLLAMA_MODEL");
    cmd
}

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_help_lists_commands() {
    veille()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_config_prints_effective_toml() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "[search]\nmode = \"news\"\nregion = \"be-fr\"\n");

    veille()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("mode = \"news\""))
        .stdout(predicate::str::contains("region = \"be-fr\""))
        .stdout(predicate::str::contains("model = \"aya-expanse:8b-q8_0\""));
}

#[test]
fn test_cli_overrides_apply_before_printing() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "");

    veille()
        .args(["--config"])
        .arg(&path)
        .args(["--mode", "news", "--model", "llama3.2", "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mode = \"news\""))
        .stdout(predicate::str::contains("model = \"llama3.2\""));
}

#[test]
fn test_unsupported_mode_in_file_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "[search]\nmode = \"images\"\n");

    veille()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("images"));
}

#[test]
fn test_unsupported_mode_flag_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "");

    veille()
        .arg("--config")
        .arg(&path)
        .args(["--mode", "videos", "generate", "voitures"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("videos"));
}

#[test]
fn test_zero_max_results_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "[search]\nmax_results = 0\n");

    veille()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_results"));
}

#[test]
fn test_missing_config_file_is_an_error() {
    let tmp = TempDir::new().unwrap();

    veille()
        .arg("--config")
        .arg(tmp.path().join("absent.toml"))
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_generate_requires_a_query() {
    veille().arg("generate").assert().failure();
}

#[test]
fn test_generate_rejects_blank_query() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "[llm]\nprovider = \"scripted\"\n");

    veille()
        .arg("--config")
        .arg(&path)
        .args(["generate", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Query is empty"));
}
