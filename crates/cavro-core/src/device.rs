//! Command dispatch
//!
//! A [`Device`] is one pump address on one port. It owns the send/receive
//! cycle: encode, write, settle, read, validate, and retry with backoff
//! until a valid frame comes back or the attempts run out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::{PortConfig, RetryPolicy};
use crate::error::{DispatchError, RegistryError};
use crate::protocol::{decode, DecodeError, Decoded, Frame, FrameCodec, Response, MAX_READ_BYTES};
use crate::registry::{PortHandle, PortRegistry};
use crate::transport::Transport;

/// Identifier of a device within a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// A fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cooperative cancellation for [`Device::send_command_cancellable`].
///
/// Checked before each attempt, never in the middle of a write.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not yet raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the flag has been raised
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a single attempt did not produce a response
#[derive(Error, Debug)]
pub enum AttemptFault {
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("invalid frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("no reply before timeout")]
    NoData,
}

impl AttemptFault {
    /// Transport faults back off by a fixed delay, everything else linearly
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, AttemptFault::Write(_) | AttemptFault::Read(_))
    }
}

/// Run one write/settle/read cycle and validate the reply
pub fn exchange(
    transport: &mut dyn Transport,
    frame: &Frame,
    settle_delay: Duration,
    read_timeout: Duration,
) -> Result<Response, AttemptFault> {
    if let Err(e) = transport.discard_input() {
        trace!(error = %e, "could not discard stale input");
    }

    let written = transport
        .write(frame.as_bytes())
        .map_err(AttemptFault::Write)?;
    if written != frame.len() {
        return Err(AttemptFault::Write(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {written} of {} bytes", frame.len()),
        )));
    }

    if !settle_delay.is_zero() {
        std::thread::sleep(settle_delay);
    }

    let raw = transport
        .read(MAX_READ_BYTES, read_timeout)
        .map_err(AttemptFault::Read)?;
    trace!(raw = ?raw, "reply bytes");

    match decode(&raw)? {
        Decoded::Response(response) => Ok(response),
        Decoded::NoData => Err(AttemptFault::NoData),
    }
}

/// One pump address on a shared port.
///
/// Registers with the [`PortRegistry`] on creation and deregisters when
/// dropped; the last device on a port closes it.
pub struct Device {
    id: DeviceId,
    port_id: String,
    config: PortConfig,
    policy: RetryPolicy,
    codec: FrameCodec,
    registry: Arc<PortRegistry>,
    handle: Weak<PortHandle>,
}

impl Device {
    /// Attach protocol `address` on `port_id` to the registry.
    ///
    /// # Panics
    ///
    /// Panics if `address` is above [`crate::protocol::MAX_ADDRESS`].
    pub fn attach(
        registry: &Arc<PortRegistry>,
        port_id: &str,
        address: u8,
        config: PortConfig,
    ) -> Result<Self, RegistryError> {
        let codec = FrameCodec::new(address);
        let id = DeviceId::new();

        registry.register(id, port_id, &config)?;
        let handle = match registry.handle_for(port_id) {
            Ok(handle) => handle,
            Err(e) => {
                registry.deregister(id, port_id);
                return Err(e);
            }
        };

        debug!(device = %id, port = port_id, address, "device attached");
        Ok(Self {
            id,
            port_id: port_id.to_string(),
            config,
            policy: RetryPolicy::default(),
            codec,
            registry: Arc::clone(registry),
            handle,
        })
    }

    /// Replace the retry timing
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Registry identifier
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Protocol address
    pub fn address(&self) -> u8 {
        self.codec.address()
    }

    /// Physical port
    pub fn port_id(&self) -> &str {
        &self.port_id
    }

    /// Port settings
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Retry timing
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Last frame sent by this device
    pub fn last_frame(&self) -> Option<&Frame> {
        self.codec.emit_repeat()
    }

    /// Send `command` and wait for a valid reply.
    ///
    /// The port stays locked for the whole call, retries included.
    pub fn send_command(&mut self, command: &str) -> Result<Response, DispatchError> {
        self.send_command_cancellable(command, &CancelFlag::new())
    }

    /// [`Device::send_command`] that gives up before the next attempt once
    /// `cancel` is raised
    pub fn send_command_cancellable(
        &mut self,
        command: &str,
        cancel: &CancelFlag,
    ) -> Result<Response, DispatchError> {
        let handle = self
            .handle
            .upgrade()
            .ok_or_else(|| DispatchError::PortReleased(self.port_id.clone()))?;
        let mut transport = handle.lock();
        if transport.is_closed() {
            debug!(port = %self.port_id, address = self.address(), "port released while waiting");
            return Err(DispatchError::PortReleased(self.port_id.clone()));
        }

        let max_attempts = self.config.attempts();
        let read_timeout = self.config.read_timeout();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                debug!(port = %self.port_id, address = self.address(), attempt, "command cancelled");
                return Err(DispatchError::Cancelled);
            }

            let repeat = if attempt > 1 {
                self.codec.emit_repeat().cloned()
            } else {
                None
            };
            let frame = repeat.unwrap_or_else(|| self.codec.encode(command).clone());
            debug!(port = %self.port_id, address = self.address(), attempt, frame = %frame, "sending frame");

            match exchange(
                &mut *transport,
                &frame,
                self.policy.settle_delay(),
                read_timeout,
            ) {
                Ok(response) => {
                    debug!(
                        port = %self.port_id,
                        address = self.address(),
                        attempt,
                        status = response.status_byte,
                        data = %response.data,
                        "response received"
                    );
                    return Ok(response);
                }
                Err(fault) => {
                    debug!(port = %self.port_id, address = self.address(), attempt, max_attempts, fault = %fault, "attempt failed");
                    if attempt < max_attempts {
                        let delay = if fault.is_transport_fault() {
                            self.policy.fault_backoff()
                        } else {
                            self.policy.backoff(attempt)
                        };
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        warn!(port = %self.port_id, address = self.address(), command, max_attempts, "no valid response");
        Err(DispatchError::Timeout {
            attempts: max_attempts,
        })
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("port_id", &self.port_id)
            .field("address", &self.codec.address())
            .field("config", &self.config)
            .finish()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.registry.deregister(self.id, &self.port_id);
        debug!(device = %self.id, port = %self.port_id, "device detached");
    }
}
