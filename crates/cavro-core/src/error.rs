//! Link errors
//!
//! Frame-level problems live in [`crate::protocol::DecodeError`] and never
//! leave the dispatcher. The types here are what callers see.

use thiserror::Error;

use crate::config::PortConfig;

/// Errors from the port registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A device asked to share a port with settings that differ from the
    /// ones it was opened with
    #[error("Port {port_id} is already registered with different settings ({existing:?}, requested {requested:?})")]
    Conflict {
        port_id: String,
        existing: PortConfig,
        requested: PortConfig,
    },

    #[error("Port {0} is not registered")]
    NotRegistered(String),

    #[error("Failed to open port {port_id}: {source}")]
    Open {
        port_id: String,
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    /// Whether this is a settings conflict on a shared port
    pub fn is_conflict(&self) -> bool {
        matches!(self, RegistryError::Conflict { .. })
    }
}

/// Errors from [`crate::Device::send_command`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No valid reply after exhausting every attempt
    #[error("No valid response after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Command cancelled")]
    Cancelled,

    /// The registry released the port (shutdown) while the device still existed
    #[error("Port {0} has been released")]
    PortReleased(String),
}

/// Errors from pump discovery
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Failed to enumerate ports: {0}")]
    Enumerate(#[source] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
