//! In-memory transport
//!
//! A scripted bus that stands in for a serial line: replies can be queued
//! one per write, or produced by simulated pumps listening on the bus.
//! Used by the test suite and for dry runs without hardware.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{PortEnumerator, Transport, TransportOpener};
use crate::config::PortConfig;
use crate::protocol::{decode, Decoded, Frame, ProbeCommand, ADDRESS_BASE};

/// What the bus does in answer to one write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Bytes returned by the next read
    Bytes(Vec<u8>),
    /// Nothing arrives before the read times out
    Silence,
    /// The next read fails
    ReadFault(io::ErrorKind),
    /// The write itself fails
    WriteFault(io::ErrorKind),
}

impl Reply {
    /// Reply carrying an encoded frame
    pub fn frame(frame: Frame) -> Self {
        Reply::Bytes(frame.into_bytes())
    }
}

/// A pump answering on a scripted bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedPump {
    /// Protocol address the pump listens on
    pub address: u8,
    /// Answer to '?76'
    pub configuration: String,
    /// Answer to '&'
    pub firmware: String,
    /// Status byte sent with every answer
    pub status_byte: u8,
}

impl SimulatedPump {
    /// An idle, error-free pump
    pub fn new(address: u8, configuration: &str, firmware: &str) -> Self {
        Self {
            address,
            configuration: configuration.to_string(),
            firmware: firmware.to_string(),
            status_byte: 0x60,
        }
    }

    /// Answer a written frame, or `None` if it is not addressed to this pump
    pub fn respond(&self, written: &[u8]) -> Option<Reply> {
        let Ok(Decoded::Response(request)) = decode(written) else {
            return None;
        };
        if request.address_byte != ADDRESS_BASE + self.address {
            return None;
        }

        let data = match ProbeCommand::from_command(&request.data) {
            Some(ProbeCommand::ReadConfiguration) => self.configuration.as_str(),
            Some(ProbeCommand::FirmwareVersion) => self.firmware.as_str(),
            _ => "",
        };
        Some(Reply::frame(Frame::reply(self.status_byte, data)))
    }
}

#[derive(Debug, Default)]
struct BusState {
    queued: VecDeque<Reply>,
    pumps: Vec<SimulatedPump>,
    pending: Option<Reply>,
    written: Vec<Vec<u8>>,
    reads: usize,
    opens: usize,
    closes: usize,
    overlapped: bool,
    response_delay: Duration,
}

/// Shared view of one scripted line
#[derive(Debug, Clone, Default)]
pub struct ScriptedBus {
    state: Arc<Mutex<BusState>>,
}

impl ScriptedBus {
    /// An empty, silent bus
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the answer to the next write. Queued replies win over pumps.
    pub fn push_reply(&self, reply: Reply) {
        self.state().queued.push_back(reply);
    }

    /// Attach a simulated pump to the line
    pub fn add_pump(&self, pump: SimulatedPump) {
        self.state().pumps.push(pump);
    }

    /// Delay applied before each read returns
    pub fn set_response_delay(&self, delay: Duration) {
        self.state().response_delay = delay;
    }

    /// Every frame written so far
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    /// Number of writes
    pub fn write_count(&self) -> usize {
        self.state().written.len()
    }

    /// Number of reads
    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    /// Number of transports opened on this bus
    pub fn open_count(&self) -> usize {
        self.state().opens
    }

    /// Number of transports closed on this bus
    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// A write landed while an earlier reply was still unread
    pub fn saw_overlap(&self) -> bool {
        self.state().overlapped
    }

    /// Open a transport on this bus
    pub fn transport(&self) -> ScriptedTransport {
        self.state().opens += 1;
        ScriptedTransport {
            bus: self.clone(),
            closed: false,
        }
    }
}

/// A [`Transport`] attached to a [`ScriptedBus`]
#[derive(Debug)]
pub struct ScriptedTransport {
    bus: ScriptedBus,
    closed: bool,
}

impl ScriptedTransport {
    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let mut state = self.bus.state();
        if state.pending.is_some() {
            state.overlapped = true;
        }
        state.written.push(bytes.to_vec());

        let reply = match state.queued.pop_front() {
            Some(reply) => reply,
            None => state
                .pumps
                .iter()
                .find_map(|pump| pump.respond(bytes))
                .unwrap_or(Reply::Silence),
        };

        if let Reply::WriteFault(kind) = reply {
            return Err(io::Error::new(kind, "scripted write fault"));
        }
        state.pending = Some(reply);
        Ok(bytes.len())
    }

    fn read(&mut self, max_bytes: usize, _timeout: Duration) -> io::Result<Vec<u8>> {
        self.ensure_open()?;
        let delay = self.bus.state().response_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.bus.state();
        state.reads += 1;
        match state.pending.take() {
            Some(Reply::Bytes(mut bytes)) => {
                bytes.truncate(max_bytes);
                Ok(bytes)
            }
            Some(Reply::ReadFault(kind)) => Err(io::Error::new(kind, "scripted read fault")),
            Some(Reply::Silence) | Some(Reply::WriteFault(_)) | None => Ok(Vec::new()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.bus.state().closes += 1;
        }
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.ensure_open()
    }
}

/// Opens [`ScriptedTransport`]s, one bus per port id
#[derive(Debug, Default)]
pub struct ScriptedOpener {
    buses: Mutex<BTreeMap<String, ScriptedBus>>,
    failures: Mutex<BTreeMap<String, io::ErrorKind>>,
}

impl ScriptedOpener {
    /// An opener with no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// The bus behind `port_id`, created on first use
    pub fn bus(&self, port_id: &str) -> ScriptedBus {
        self.buses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(port_id.to_string())
            .or_default()
            .clone()
    }

    /// Make every open of `port_id` fail with `kind`
    pub fn fail_open(&self, port_id: &str, kind: io::ErrorKind) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port_id.to_string(), kind);
    }
}

impl TransportOpener for ScriptedOpener {
    fn open(&self, port_id: &str, _config: &PortConfig) -> io::Result<Box<dyn Transport>> {
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(port_id)
            .copied();
        if let Some(kind) = failure {
            return Err(io::Error::new(kind, format!("cannot open {port_id}")));
        }
        Ok(Box::new(self.bus(port_id).transport()))
    }
}

impl PortEnumerator for ScriptedOpener {
    fn candidate_ports(&self) -> io::Result<Vec<String>> {
        let mut ports: Vec<String> = self
            .buses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ports.extend(
            self.failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned(),
        );
        ports.sort();
        ports.dedup();
        Ok(ports)
    }
}
