//! Cavro Pump Finder
//!
//! Scans serial ports for Tecan Cavro pumps and prints what answers.
//!
//! Usage:
//!   cargo run --example find_pumps -- [OPTIONS]
//!
//! Options:
//!   --config FILE     Load link settings from a JSON file
//!   --baud RATE       Baud rate (default: 9600)
//!   --timeout MS      Per-attempt read timeout in ms (default: 200)
//!   --attempts N      Attempts per command (default: 2)
//!   --address LIST    Comma-separated protocol addresses (default: 0)
//!   --parallel        Scan ports concurrently
//!   --simulate        Scan a simulated bus instead of real ports
//!
//! Set RUST_LOG=cavro_core=debug to see every frame.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cavro_core::transport::{ScriptedOpener, SerialPortEnumerator, SimulatedPump};
use cavro_core::{DiscoveredPump, DiscoveryScanner, LinkConfig, PortConfig, PortRegistry};
use tracing_subscriber::EnvFilter;

struct Options {
    link: LinkConfig,
    parallel: bool,
    simulate: bool,
}

fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut link = LinkConfig {
        port: PortConfig::discovery(),
        ..LinkConfig::default()
    };
    let mut parallel = false;
    let mut simulate = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{name} needs a value"))
        };
        match arg.as_str() {
            "--config" | "-c" => {
                let path = value("--config")?;
                link = LinkConfig::from_file(&path)
                    .with_context(|| format!("loading {path}"))?;
            }
            "--baud" | "-b" => link.port.baud_rate = value("--baud")?.parse()?,
            "--timeout" | "-t" => link.port.timeout_ms = value("--timeout")?.parse()?,
            "--attempts" | "-n" => link.port.max_attempts = value("--attempts")?.parse()?,
            "--address" | "-a" => {
                link.addresses = value("--address")?
                    .split(',')
                    .map(|a| a.trim().parse::<u8>())
                    .collect::<Result<_, _>>()?;
            }
            "--parallel" => parallel = true,
            "--simulate" => simulate = true,
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other => bail!("unknown option {other}"),
        }
    }

    if let Some(bad) = link
        .addresses
        .iter()
        .find(|a| **a > cavro_core::protocol::MAX_ADDRESS)
    {
        bail!("address {bad} out of range");
    }

    Ok(Some(Options {
        link,
        parallel,
        simulate,
    }))
}

fn print_help() {
    println!("Cavro Pump Finder");
    println!();
    println!("Usage: find_pumps [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config FILE     Load link settings from a JSON file");
    println!("  --baud RATE       Baud rate (default: 9600)");
    println!("  --timeout MS      Per-attempt read timeout in ms (default: 200)");
    println!("  --attempts N      Attempts per command (default: 2)");
    println!("  --address LIST    Comma-separated protocol addresses (default: 0)");
    println!("  --parallel        Scan ports concurrently");
    println!("  --simulate        Scan a simulated bus instead of real ports");
}

fn scan<E: cavro_core::transport::PortEnumerator>(
    scanner: DiscoveryScanner<E>,
    options: &Options,
) -> Result<Vec<DiscoveredPump>> {
    let found = if options.parallel {
        scanner.discover_parallel(&options.link.addresses, &options.link.port)?
    } else {
        scanner.discover(&options.link.addresses, &options.link.port)?
    };
    Ok(found)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };

    let found = if options.simulate {
        let opener = Arc::new(ScriptedOpener::new());
        opener
            .bus("sim0")
            .add_pump(SimulatedPump::new(0, "3000", "XCalibur 1.0"));
        opener
            .bus("sim1")
            .add_pump(SimulatedPump::new(1, "1000", "XLP 6000 2.3"));
        let registry = Arc::new(PortRegistry::with_opener(opener.clone()));
        let scanner = DiscoveryScanner::new(registry, opener)
            .with_retry_policy(options.link.retry);
        scan(scanner, &options)?
    } else {
        let registry = Arc::new(PortRegistry::serial());
        let enumerator = SerialPortEnumerator::with_config(options.link.port);
        let scanner =
            DiscoveryScanner::new(registry, enumerator).with_retry_policy(options.link.retry);
        scan(scanner, &options)?
    };

    if found.is_empty() {
        println!("No pumps found.");
        return Ok(());
    }

    println!("{:<16} {:>7}  {:<20} FIRMWARE", "PORT", "ADDRESS", "CONFIGURATION");
    for pump in &found {
        println!(
            "{:<16} {:>7}  {:<20} {}",
            pump.port_id, pump.address, pump.configuration, pump.firmware
        );
    }
    Ok(())
}
