//! Link configuration
//!
//! Port settings, retry timing and optional JSON loading.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_MS};

/// Errors loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Serial settings for one physical port.
///
/// Every device sharing a port must use an equal `PortConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortConfig {
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-attempt read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Send/receive attempts per command
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PortConfig {
    /// Settings with the given baud rate and default timing
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }

    /// Settings used when probing for pumps: a slower timeout and two attempts
    pub fn discovery() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: 200,
            max_attempts: 2,
        }
    }

    /// Per-attempt read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Attempts per command, never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

fn default_settle_delay_ms() -> u64 {
    100
}

fn default_backoff_step_ms() -> u64 {
    50
}

fn default_fault_backoff_ms() -> u64 {
    200
}

/// Timing between the steps of a send/receive cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Pause between writing a frame and reading the reply
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Linear backoff step after silence or a corrupt reply
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    /// Fixed pause after a transport read/write fault
    #[serde(default = "default_fault_backoff_ms")]
    pub fault_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            backoff_step_ms: default_backoff_step_ms(),
            fault_backoff_ms: default_fault_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// No pauses at all (useful against in-memory transports)
    pub fn immediate() -> Self {
        Self {
            settle_delay_ms: 0,
            backoff_step_ms: 0,
            fault_backoff_ms: 0,
        }
    }

    /// Settle delay as a `Duration`
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Backoff after attempt `attempt` failed with silence or a corrupt frame
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_step_ms.saturating_mul(attempt as u64))
    }

    /// Backoff after attempt failed with a transport fault
    pub fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }

    /// Upper bound on the latency of one `send_command` call.
    ///
    /// Sum over attempts of settle delay, read timeout and the longest
    /// backoff that can follow that attempt.
    pub fn worst_case(&self, max_attempts: u32, read_timeout: Duration) -> Duration {
        (1..=max_attempts.max(1))
            .map(|n| {
                self.settle_delay() + read_timeout + self.backoff(n).max(self.fault_backoff())
            })
            .sum()
    }
}

/// Complete link settings, typically loaded from a JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Port settings
    #[serde(default)]
    pub port: PortConfig,
    /// Retry timing
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Candidate protocol addresses for discovery
    #[serde(default = "default_addresses")]
    pub addresses: Vec<u8>,
}

fn default_addresses() -> Vec<u8> {
    vec![0]
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: PortConfig::default(),
            retry: RetryPolicy::default(),
            addresses: default_addresses(),
        }
    }
}

impl LinkConfig {
    /// Parse from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_config_default() {
        let config = PortConfig::default();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_attempts_floor() {
        let config = PortConfig {
            max_attempts: 0,
            ..PortConfig::default()
        };
        assert_eq!(config.attempts(), 1);
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(3), Duration::from_millis(150));
    }

    #[test]
    fn test_worst_case_bound() {
        let policy = RetryPolicy {
            settle_delay_ms: 10,
            backoff_step_ms: 5,
            fault_backoff_ms: 0,
        };
        // (10 + 20 + 5) + (10 + 20 + 10)
        assert_eq!(
            policy.worst_case(2, Duration::from_millis(20)),
            Duration::from_millis(75)
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = LinkConfig::from_json_str(r#"{ "port": { "baud_rate": 38400 } }"#)
            .expect("Should parse");
        assert_eq!(config.port.baud_rate, 38400);
        assert_eq!(config.port.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.addresses, vec![0]);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            LinkConfig::from_json_str("{ port: }"),
            Err(ConfigError::Parse(_))
        ));
    }
}
