//! Transport boundary
//!
//! The core only talks to a byte stream through [`Transport`]. Which
//! binding is used (desktop serial port, microcontroller UART, in-memory
//! bus) is decided by the [`TransportOpener`] handed to the registry.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PortConfig;

pub mod scripted;
pub mod serial;

pub use scripted::{Reply, ScriptedBus, ScriptedOpener, SimulatedPump};
pub use serial::{list_ports, PortInfo, SerialOpener, SerialPortEnumerator, SerialTransport};

/// A half-duplex byte stream to one physical port
pub trait Transport: Send {
    /// Write `bytes`, returning how many were written
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Read up to `max_bytes`, waiting at most `timeout`.
    ///
    /// Returns an empty buffer when nothing arrived before the timeout.
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> io::Result<Vec<u8>>;

    /// Release the underlying connection
    fn close(&mut self) -> io::Result<()>;

    /// Drop any bytes already waiting in the input buffer
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens transports for the port registry
pub trait TransportOpener: Send + Sync {
    /// Open `port_id` with `config`
    fn open(&self, port_id: &str, config: &PortConfig) -> io::Result<Box<dyn Transport>>;
}

/// Lists candidate physical ports for discovery
pub trait PortEnumerator {
    /// Port identifiers currently available, in scan order
    fn candidate_ports(&self) -> io::Result<Vec<String>>;
}

impl<T: PortEnumerator + ?Sized> PortEnumerator for &T {
    fn candidate_ports(&self) -> io::Result<Vec<String>> {
        (**self).candidate_ports()
    }
}

impl<T: PortEnumerator + ?Sized> PortEnumerator for Arc<T> {
    fn candidate_ports(&self) -> io::Result<Vec<String>> {
        (**self).candidate_ports()
    }
}

/// Fixed port list, as on microcontrollers where UART instances are
/// hardware-defined
#[derive(Debug, Clone, Default)]
pub struct StaticPorts {
    ports: Vec<String>,
}

impl StaticPorts {
    /// Enumerate exactly `ports`, in order
    pub fn new<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ports: ports.into_iter().map(Into::into).collect(),
        }
    }
}

impl PortEnumerator for StaticPorts {
    fn candidate_ports(&self) -> io::Result<Vec<String>> {
        Ok(self.ports.clone())
    }
}

/// EBUSY on POSIX systems
const EBUSY: i32 = 16;

/// Whether an open failure means another process holds the port
pub fn is_resource_busy(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ResourceBusy || err.raw_os_error() == Some(EBUSY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_ports_order() {
        let ports = StaticPorts::new(["uart0", "uart1"]);
        assert_eq!(
            ports.candidate_ports().expect("static list"),
            vec!["uart0".to_string(), "uart1".to_string()]
        );
    }

    #[test]
    fn test_resource_busy_detection() {
        assert!(is_resource_busy(&io::Error::from(io::ErrorKind::ResourceBusy)));
        assert!(is_resource_busy(&io::Error::from_raw_os_error(EBUSY)));
        assert!(!is_resource_busy(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}
