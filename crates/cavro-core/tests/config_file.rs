//! Tests for loading link configuration from disk

use std::io::Write;

use cavro_core::config::ConfigError;
use cavro_core::{LinkConfig, PortConfig, RetryPolicy};
use pretty_assertions::assert_eq;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{
            "port": {{ "baud_rate": 38400, "timeout_ms": 250, "max_attempts": 3 }},
            "retry": {{ "settle_delay_ms": 20 }},
            "addresses": [0, 1, 2]
        }}"#
    )
    .expect("write");

    let config = LinkConfig::from_file(file.path()).expect("load");
    assert_eq!(
        config,
        LinkConfig {
            port: PortConfig {
                baud_rate: 38400,
                timeout_ms: 250,
                max_attempts: 3,
            },
            retry: RetryPolicy {
                settle_delay_ms: 20,
                ..RetryPolicy::default()
            },
            addresses: vec![0, 1, 2],
        }
    );
}

#[test]
fn test_json_round_trip() {
    let config = LinkConfig::default();
    let json = config.to_json().expect("serialize");
    assert_eq!(LinkConfig::from_json_str(&json).expect("parse"), config);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    assert!(matches!(
        LinkConfig::from_file(dir.path().join("absent.json")),
        Err(ConfigError::Io(_))
    ));
}
