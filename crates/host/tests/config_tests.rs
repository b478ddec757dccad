//! Integration tests for configuration parsing
//!
//! The host is a binary-only crate, so these tests parse the documented
//! file layout as plain TOML and check the shape the host expects.
//!
//! Run with: `cargo test -p host --test config_tests`

use std::fs;
use tempfile::tempdir;

const MINIMAL_HOST_CONFIG: &str = r#"
[host]
log_level = "info"
"#;

const FULL_HOST_CONFIG: &str = r#"
[host]
log_level = "debug"

[driver]
reject_unknown_speed = true
detach_kernel_driver = false

[usb]
poll_interval_ms = 250
"#;

#[test]
fn test_parse_minimal_host_config() {
    let config: toml::Value = toml::from_str(MINIMAL_HOST_CONFIG).unwrap();

    let host = config.get("host").unwrap();
    assert_eq!(host.get("log_level").unwrap().as_str().unwrap(), "info");
    assert!(config.get("driver").is_none());
    assert!(config.get("usb").is_none());
}

#[test]
fn test_parse_full_host_config() {
    let config: toml::Value = toml::from_str(FULL_HOST_CONFIG).unwrap();

    let host = config.get("host").unwrap();
    assert_eq!(host.get("log_level").unwrap().as_str().unwrap(), "debug");

    let driver = config.get("driver").unwrap();
    assert!(driver.get("reject_unknown_speed").unwrap().as_bool().unwrap());
    assert!(!driver.get("detach_kernel_driver").unwrap().as_bool().unwrap());

    let usb = config.get("usb").unwrap();
    assert_eq!(
        usb.get("poll_interval_ms").unwrap().as_integer().unwrap(),
        250
    );
}

#[test]
fn test_invalid_toml_rejected() {
    let result: Result<toml::Value, _> = toml::from_str("[host\nlog_level = ");
    assert!(result.is_err());
}

#[test]
fn test_config_file_round_trip_on_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("host.toml");
    fs::write(&path, FULL_HOST_CONFIG).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let config: toml::Value = toml::from_str(&content).unwrap();
    assert_eq!(
        config
            .get("usb")
            .and_then(|usb| usb.get("poll_interval_ms"))
            .and_then(|v| v.as_integer()),
        Some(250)
    );
}
