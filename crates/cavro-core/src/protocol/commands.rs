//! Probe commands
//!
//! The handful of read-only queries the transport layer itself issues.
//! Everything else is an opaque string built by the pump command layer.

use serde::{Deserialize, Serialize};

/// Read-only queries used to identify a pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeCommand {
    /// Report pump configuration ('?76')
    ReadConfiguration,

    /// Report firmware version ('&')
    FirmwareVersion,

    /// Query status only ('Q')
    QueryStatus,
}

impl ProbeCommand {
    /// Command string as sent inside the frame
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeCommand::ReadConfiguration => "?76",
            ProbeCommand::FirmwareVersion => "&",
            ProbeCommand::QueryStatus => "Q",
        }
    }

    /// Parse a command string back into a probe, if it is one
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "?76" => Some(ProbeCommand::ReadConfiguration),
            "&" => Some(ProbeCommand::FirmwareVersion),
            "Q" => Some(ProbeCommand::QueryStatus),
            _ => None,
        }
    }
}

impl AsRef<str> for ProbeCommand {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_strings() {
        assert_eq!(ProbeCommand::ReadConfiguration.as_str(), "?76");
        assert_eq!(ProbeCommand::FirmwareVersion.as_str(), "&");
        assert_eq!(ProbeCommand::QueryStatus.as_str(), "Q");
    }

    #[test]
    fn test_probe_parse() {
        assert_eq!(
            ProbeCommand::from_command("&"),
            Some(ProbeCommand::FirmwareVersion)
        );
        assert_eq!(ProbeCommand::from_command("A3000R"), None);
    }
}
