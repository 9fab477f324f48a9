//! Tests for pump discovery

use std::io;
use std::sync::Arc;

use cavro_core::transport::{ScriptedOpener, SimulatedPump, StaticPorts};
use cavro_core::{
    DeviceId, DiscoveredPump, DiscoveryError, DiscoveryScanner, PortConfig, PortRegistry,
    RegistryError, RetryPolicy,
};
use pretty_assertions::assert_eq;

fn pump(port: &str, address: u8, configuration: &str, firmware: &str) -> DiscoveredPump {
    DiscoveredPump {
        port_id: port.to_string(),
        address,
        configuration: configuration.to_string(),
        firmware: firmware.to_string(),
    }
}

fn lab_bench() -> Arc<ScriptedOpener> {
    let opener = Arc::new(ScriptedOpener::new());
    let com1 = opener.bus("COM1");
    com1.add_pump(SimulatedPump::new(2, "3000", "XC 2.1"));
    com1.add_pump(SimulatedPump::new(0, "1000", "XC 2.0"));
    opener.bus("COM2");
    opener
        .bus("COM4")
        .add_pump(SimulatedPump::new(1, "5000", "XLP 1.3"));
    opener
}

fn scanner(
    opener: &Arc<ScriptedOpener>,
    ports: &[&str],
) -> (DiscoveryScanner<StaticPorts>, Arc<PortRegistry>) {
    let registry = Arc::new(PortRegistry::with_opener(opener.clone()));
    let scanner = DiscoveryScanner::new(registry.clone(), StaticPorts::new(ports.iter().copied()))
        .with_retry_policy(RetryPolicy::immediate());
    (scanner, registry)
}

#[test]
fn test_port_major_address_minor_order() {
    let opener = lab_bench();
    let (scanner, registry) = scanner(&opener, &["COM1", "COM2", "COM4"]);

    let found = scanner
        .discover(&[0, 1, 2], &PortConfig::discovery())
        .expect("discover");

    assert_eq!(
        found,
        vec![
            pump("COM1", 0, "1000", "XC 2.0"),
            pump("COM1", 2, "3000", "XC 2.1"),
            pump("COM4", 1, "5000", "XLP 1.3"),
        ]
    );
    assert!(registry.port_ids().is_empty());
}

#[test]
fn test_silent_addresses_use_every_attempt() {
    let opener = lab_bench();
    let (scanner, _) = scanner(&opener, &["COM2"]);

    let found = scanner
        .discover(&[0, 1], &PortConfig::discovery())
        .expect("discover");

    assert!(found.is_empty());
    // Two addresses, '?76' times out after two attempts each
    assert_eq!(opener.bus("COM2").write_count(), 4);
}

#[test]
fn test_busy_port_is_skipped() {
    let opener = lab_bench();
    opener.fail_open("COM3", io::ErrorKind::ResourceBusy);
    let (scanner, _) = scanner(&opener, &["COM1", "COM3", "COM4"]);

    let found = scanner
        .discover(&[0, 1], &PortConfig::discovery())
        .expect("busy port does not abort the scan");

    assert_eq!(
        found,
        vec![
            pump("COM1", 0, "1000", "XC 2.0"),
            pump("COM4", 1, "5000", "XLP 1.3"),
        ]
    );
}

#[test]
fn test_other_open_failures_propagate() {
    let opener = lab_bench();
    opener.fail_open("COM3", io::ErrorKind::PermissionDenied);
    let (scanner, _) = scanner(&opener, &["COM1", "COM3"]);

    match scanner.discover(&[0], &PortConfig::discovery()) {
        Err(DiscoveryError::Registry(RegistryError::Open { port_id, source })) => {
            assert_eq!(port_id, "COM3");
            assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
        }
        other => panic!("Expected open failure, got {:?}", other),
    }
}

#[test]
fn test_conflict_with_live_device_propagates() {
    let opener = lab_bench();
    let (scanner, registry) = scanner(&opener, &["COM1"]);
    registry
        .register(DeviceId::new(), "COM1", &PortConfig::with_baud_rate(38400))
        .expect("register");

    assert!(matches!(
        scanner.discover(&[0], &PortConfig::discovery()),
        Err(DiscoveryError::Registry(RegistryError::Conflict { .. }))
    ));
}

#[test]
fn test_discovery_shares_port_with_matching_device() {
    let opener = lab_bench();
    let (scanner, registry) = scanner(&opener, &["COM1"]);
    let resident = DeviceId::new();
    registry
        .register(resident, "COM1", &PortConfig::discovery())
        .expect("register");

    let found = scanner
        .discover(&[2], &PortConfig::discovery())
        .expect("discover");

    assert_eq!(found, vec![pump("COM1", 2, "3000", "XC 2.1")]);
    // The resident device keeps the port open
    assert_eq!(registry.members("COM1"), vec![resident]);
    assert_eq!(opener.bus("COM1").open_count(), 1);
}

#[test]
fn test_parallel_matches_sequential() {
    let opener = lab_bench();
    let ports = ["COM1", "COM2", "COM4"];

    let (sequential, _) = scanner(&opener, &ports);
    let expected = sequential
        .discover(&[0, 1, 2], &PortConfig::discovery())
        .expect("sequential");

    let (parallel, registry) = scanner(&opener, &ports);
    let found = parallel
        .discover_parallel(&[0, 1, 2], &PortConfig::discovery())
        .expect("parallel");

    assert_eq!(found, expected);
    assert!(registry.port_ids().is_empty());
    for port in ports {
        assert!(!opener.bus(port).saw_overlap());
    }
}

#[test]
fn test_parallel_propagates_errors() {
    let opener = lab_bench();
    opener.fail_open("COM9", io::ErrorKind::PermissionDenied);
    let (scanner, _) = scanner(&opener, &["COM1", "COM9"]);

    assert!(matches!(
        scanner.discover_parallel(&[0], &PortConfig::discovery()),
        Err(DiscoveryError::Registry(RegistryError::Open { .. }))
    ));
}
