//! Serial port handling
//!
//! Desktop binding of [`Transport`] on top of the `serialport` crate.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::{PortEnumerator, Transport, TransportOpener};
use crate::config::PortConfig;

/// Polling interval while waiting for reply bytes
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
            ),
            _ => (None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
        }
    }
}

/// Sort key so that:
///  - COM ports come first (sorted numerically)
///  - then ttyUSB* ports (sorted numerically)
///  - then ttyACM* ports (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let numbered = [(0u8, "COM"), (1, "ttyUSB"), (2, "ttyACM")];
    for (rank, prefix) in numbered {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: USB adapters the API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port as 8N1 without flow control
pub fn open_port(name: &str, config: &PortConfig) -> io::Result<Box<dyn SerialPort>> {
    serialport::new(name, config.baud_rate)
        .timeout(config.read_timeout())
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(open_error)
}

/// Convert an open failure, keeping "held by someone else" recognisable.
///
/// `serialport` reports an exclusive lock held elsewhere as `NoDevice`,
/// which would otherwise turn into `NotFound`.
fn open_error(err: serialport::Error) -> io::Error {
    let description = err.description.to_ascii_lowercase();
    let locked = description.contains("lock") || description.contains("busy");
    match err.kind() {
        serialport::ErrorKind::NoDevice if locked => {
            io::Error::new(io::ErrorKind::ResourceBusy, err.description)
        }
        _ => io::Error::from(err),
    }
}

/// Time needed to shift `len` bytes out at `baud_rate` (10 bits per byte)
fn transmit_time(len: usize, baud_rate: u32) -> Duration {
    let baud = if baud_rate == 0 { 9600 } else { baud_rate };
    let bits = (len * 10) as u64;
    Duration::from_micros(bits * 1_000_000 / baud as u64)
}

/// Gap after the last received byte that ends a reply
fn inter_char_gap(timeout: Duration) -> Duration {
    (timeout / 4).clamp(Duration::from_millis(5), Duration::from_millis(50))
}

/// An open OS serial port
pub struct SerialTransport {
    name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open `name` with `config`
    pub fn open(name: &str, config: &PortConfig) -> io::Result<Self> {
        let port = open_port(name, config)?;
        Ok(Self {
            name: name.to_string(),
            baud_rate: config.baud_rate,
            port: Some(port),
        })
    }

    /// Port name this transport was opened on
    pub fn name(&self) -> &str {
        &self.name
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let wait = transmit_time(bytes.len(), self.baud_rate);
        let port = self.port_mut()?;
        // flush() may block in tcdrain, so wait out the transmission instead
        port.write_all(bytes)?;
        trace!(bytes = ?bytes, wait_us = wait.as_micros() as u64, "serial write");
        std::thread::sleep(wait);
        Ok(bytes.len())
    }

    fn read(&mut self, max_bytes: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        let gap = inter_char_gap(timeout);
        let port = self.port_mut()?;

        let mut response = Vec::with_capacity(max_bytes);
        let mut buffer = vec![0u8; max_bytes];
        let start = Instant::now();
        let mut last_data_time = start;

        while response.len() < max_bytes {
            if response.is_empty() && start.elapsed() > timeout {
                break;
            }
            if !response.is_empty() && last_data_time.elapsed() > gap {
                break;
            }

            let available = port.bytes_to_read().map_err(io::Error::from)? as usize;
            if available == 0 {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }

            let to_read = available.min(max_bytes - response.len());
            match port.read(&mut buffer[..to_read]) {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&buffer[..n]);
                    last_data_time = Instant::now();
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }

        trace!(bytes = ?response, elapsed_ms = start.elapsed().as_millis() as u64, "serial read");
        Ok(response)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            debug!(port = %self.name, "serial port closed");
        }
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port_mut()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

/// Opens [`SerialTransport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl TransportOpener for SerialOpener {
    fn open(&self, port_id: &str, config: &PortConfig) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(SerialTransport::open(port_id, config)?))
    }
}

/// Lists serial ports that can currently be opened.
///
/// Each port reported by [`list_ports`] is opened and closed again; ports
/// that fail to open are left out.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortEnumerator {
    config: PortConfig,
}

impl SerialPortEnumerator {
    /// Probe with `config` instead of the defaults
    pub fn with_config(config: PortConfig) -> Self {
        Self { config }
    }
}

impl PortEnumerator for SerialPortEnumerator {
    fn candidate_ports(&self) -> io::Result<Vec<String>> {
        let mut result = Vec::new();
        for info in list_ports() {
            match open_port(&info.name, &self.config) {
                Ok(port) => {
                    drop(port);
                    debug!(port = %info.name, "found active port");
                    result.push(info.name);
                }
                Err(e) => trace!(port = %info.name, error = %e, "port not usable"),
            }
        }
        Ok(result)
    }
}
