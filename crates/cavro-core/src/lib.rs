//! # cavro-core
//!
//! Transport layer for Tecan Cavro syringe pumps speaking the OEM protocol.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - OEM API frame encoding/decoding with XOR checksum validation
//! - Status byte decoding (busy flag and error codes)
//! - A port registry so daisy-chained pumps can share one serial line
//! - Command dispatch with retry and backoff
//! - Discovery of live pumps across ports and addresses
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cavro_core::{Device, PortConfig, PortRegistry};
//!
//! let registry = Arc::new(PortRegistry::serial());
//! let mut pump = Device::attach(&registry, "/dev/ttyUSB0", 0, PortConfig::default())?;
//!
//! let reply = pump.send_command("?76")?;
//! println!("configuration: {}", reply.data);
//! ```

pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use config::{LinkConfig, PortConfig, RetryPolicy};
pub use device::{CancelFlag, Device, DeviceId};
pub use discovery::{DiscoveredPump, DiscoveryScanner};
pub use error::{DiscoveryError, DispatchError, RegistryError};
pub use registry::PortRegistry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{LinkConfig, PortConfig, RetryPolicy};
    pub use crate::device::{CancelFlag, Device, DeviceId};
    pub use crate::discovery::{DiscoveredPump, DiscoveryScanner};
    pub use crate::error::{DiscoveryError, DispatchError, RegistryError};
    pub use crate::protocol::{ErrorCode, Frame, Response, Status};
    pub use crate::registry::PortRegistry;
    pub use crate::transport::{PortEnumerator, StaticPorts, Transport, TransportOpener};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
