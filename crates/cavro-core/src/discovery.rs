//! Pump discovery
//!
//! Probes every candidate (port, address) pair with the read-configuration
//! and firmware-version queries and reports the pairs that answer.
//! Discovery is best effort: silence at an address just means no pump.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{PortConfig, RetryPolicy};
use crate::device::Device;
use crate::error::{DiscoveryError, DispatchError, RegistryError};
use crate::protocol::ProbeCommand;
use crate::registry::PortRegistry;
use crate::transport::{is_resource_busy, PortEnumerator};

/// A pump that answered during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPump {
    /// Physical port
    pub port_id: String,
    /// Protocol address
    pub address: u8,
    /// Reply to '?76'
    pub configuration: String,
    /// Reply to '&'
    pub firmware: String,
}

/// Scans ports from an enumerator for live pumps
pub struct DiscoveryScanner<E> {
    registry: Arc<PortRegistry>,
    enumerator: E,
    policy: RetryPolicy,
}

impl<E: PortEnumerator> DiscoveryScanner<E> {
    /// Scan the ports listed by `enumerator`, registering probes in `registry`
    pub fn new(registry: Arc<PortRegistry>, enumerator: E) -> Self {
        Self {
            registry,
            enumerator,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry timing used by probe devices
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Probe every port and address, one port after another.
    ///
    /// Results are ordered by port, then by address.
    ///
    /// # Panics
    ///
    /// Panics if an address is above [`crate::protocol::MAX_ADDRESS`].
    pub fn discover(
        &self,
        addresses: &[u8],
        config: &PortConfig,
    ) -> Result<Vec<DiscoveredPump>, DiscoveryError> {
        let ports = self
            .enumerator
            .candidate_ports()
            .map_err(DiscoveryError::Enumerate)?;

        let mut found = Vec::new();
        for port_id in &ports {
            found.extend(scan_port(
                &self.registry,
                self.policy,
                port_id,
                addresses,
                config,
            )?);
        }
        Ok(found)
    }

    /// Like [`DiscoveryScanner::discover`], scanning each port on its own
    /// thread. Addresses on one port are still probed one at a time and the
    /// result order is the same.
    pub fn discover_parallel(
        &self,
        addresses: &[u8],
        config: &PortConfig,
    ) -> Result<Vec<DiscoveredPump>, DiscoveryError> {
        let ports = self
            .enumerator
            .candidate_ports()
            .map_err(DiscoveryError::Enumerate)?;
        let registry = &self.registry;
        let policy = self.policy;

        let results: Vec<Result<Vec<DiscoveredPump>, DiscoveryError>> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = ports
                    .iter()
                    .map(|port_id| {
                        scope.spawn(move || scan_port(registry, policy, port_id, addresses, config))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                    })
                    .collect()
            });

        let mut found = Vec::new();
        for result in results {
            found.extend(result?);
        }
        Ok(found)
    }
}

fn scan_port(
    registry: &Arc<PortRegistry>,
    policy: RetryPolicy,
    port_id: &str,
    addresses: &[u8],
    config: &PortConfig,
) -> Result<Vec<DiscoveredPump>, DiscoveryError> {
    debug!(port = port_id, "checking port");
    let mut found = Vec::new();
    // Previous probe stays attached until the next one joins, so the port
    // is opened once per scan rather than once per address
    let mut resident: Option<Device> = None;

    for &address in addresses {
        let mut device = match Device::attach(registry, port_id, address, *config) {
            Ok(device) => device.with_retry_policy(policy),
            Err(RegistryError::Open { ref source, .. }) if is_resource_busy(source) => {
                warn!(port = port_id, "port held by another process, skipping");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        match probe(&mut device) {
            Ok(pump) => {
                info!(
                    port = port_id,
                    address,
                    configuration = %pump.configuration,
                    firmware = %pump.firmware,
                    "found pump"
                );
                found.push(pump);
            }
            Err(DispatchError::Timeout { .. }) => {
                debug!(port = port_id, address, "no pump at address");
            }
            Err(e) => return Err(e.into()),
        }
        resident = Some(device);
    }
    drop(resident);

    Ok(found)
}

fn probe(device: &mut Device) -> Result<DiscoveredPump, DispatchError> {
    let configuration = device
        .send_command(ProbeCommand::ReadConfiguration.as_str())?
        .data;
    let firmware = device
        .send_command(ProbeCommand::FirmwareVersion.as_str())?
        .data;

    Ok(DiscoveredPump {
        port_id: device.port_id().to_string(),
        address: device.address(),
        configuration,
        firmware,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScriptedOpener, SimulatedPump, StaticPorts};

    #[test]
    fn test_discover_single_pump() {
        let opener = Arc::new(ScriptedOpener::new());
        opener
            .bus("uart0")
            .add_pump(SimulatedPump::new(0, "3000", "XCalibur 1.0"));
        let registry = Arc::new(PortRegistry::with_opener(opener.clone()));

        let scanner = DiscoveryScanner::new(registry.clone(), StaticPorts::new(["uart0"]))
            .with_retry_policy(RetryPolicy::immediate());
        let found = scanner
            .discover(&[0], &PortConfig::discovery())
            .expect("discover");

        assert_eq!(
            found,
            vec![DiscoveredPump {
                port_id: "uart0".to_string(),
                address: 0,
                configuration: "3000".to_string(),
                firmware: "XCalibur 1.0".to_string(),
            }]
        );
        // Probe devices are gone and the port is closed again
        assert!(registry.port_ids().is_empty());
    }

    #[test]
    fn test_port_opened_once_per_scan() {
        let opener = Arc::new(ScriptedOpener::new());
        let bus = opener.bus("uart0");
        bus.add_pump(SimulatedPump::new(2, "3000", "XCalibur 1.0"));
        let registry = Arc::new(PortRegistry::with_opener(opener.clone()));

        let scanner = DiscoveryScanner::new(registry.clone(), StaticPorts::new(["uart0"]))
            .with_retry_policy(RetryPolicy::immediate());
        let found = scanner
            .discover(&[0, 1, 2, 3], &PortConfig::discovery())
            .expect("discover");

        assert_eq!(found.len(), 1);
        assert_eq!(bus.open_count(), 1);
        assert_eq!(bus.close_count(), 1);
        assert!(registry.port_ids().is_empty());
    }

    #[test]
    fn test_enumeration_failure_propagates() {
        struct Broken;
        impl PortEnumerator for Broken {
            fn candidate_ports(&self) -> std::io::Result<Vec<String>> {
                Err(std::io::Error::other("no ports"))
            }
        }

        let registry = Arc::new(PortRegistry::new(ScriptedOpener::new()));
        let scanner = DiscoveryScanner::new(registry, Broken);
        assert!(matches!(
            scanner.discover(&[0], &PortConfig::discovery()),
            Err(DiscoveryError::Enumerate(_))
        ));
    }
}
