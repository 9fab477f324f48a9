//! Port registry
//!
//! Several pumps can hang off one RS-232 line. The registry opens each
//! physical port once, hands devices a non-owning reference to it and
//! closes it when the last device leaves.
//!
//! The registry is an ordinary value: create one per application (or per
//! test), share it behind an `Arc`, and drop it at shutdown to release
//! whatever is still open.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

use crate::config::PortConfig;
use crate::device::DeviceId;
use crate::error::RegistryError;
use crate::transport::{SerialOpener, Transport, TransportOpener};

struct HandleState {
    transport: Box<dyn Transport>,
    closed: bool,
}

/// The single open connection to one physical port.
///
/// Owned by the registry. Holding the guard from [`PortHandle::lock`] gives
/// exclusive use of the line.
pub struct PortHandle {
    port_id: String,
    state: Mutex<HandleState>,
}

impl PortHandle {
    fn new(port_id: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            port_id: port_id.to_string(),
            state: Mutex::new(HandleState {
                transport,
                closed: false,
            }),
        }
    }

    /// Port this handle is connected to
    pub fn port_id(&self) -> &str {
        &self.port_id
    }

    /// Take exclusive use of the line
    pub fn lock(&self) -> PortGuard<'_> {
        PortGuard {
            guard: self.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Whether the transport has been released
    pub fn is_closed(&self) -> bool {
        self.lock().is_closed()
    }

    fn close(&self) -> io::Result<()> {
        let mut guard = self.lock();
        if guard.guard.closed {
            return Ok(());
        }
        guard.guard.closed = true;
        guard.guard.transport.close()
    }
}

/// Exclusive access to a port's transport
pub struct PortGuard<'a> {
    guard: MutexGuard<'a, HandleState>,
}

impl PortGuard<'_> {
    /// Whether the registry released the port before this guard was taken
    pub fn is_closed(&self) -> bool {
        self.guard.closed
    }
}

impl Deref for PortGuard<'_> {
    type Target = dyn Transport;

    fn deref(&self) -> &Self::Target {
        &*self.guard.transport
    }
}

impl DerefMut for PortGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.guard.transport
    }
}

struct PortEntry {
    config: PortConfig,
    handle: Arc<PortHandle>,
    members: BTreeSet<DeviceId>,
}

/// Table of open ports and the devices using them
pub struct PortRegistry {
    opener: Arc<dyn TransportOpener>,
    ports: Mutex<HashMap<String, PortEntry>>,
}

impl PortRegistry {
    /// Create an empty registry that opens ports with `opener`
    pub fn new(opener: impl TransportOpener + 'static) -> Self {
        Self::with_opener(Arc::new(opener))
    }

    /// Create an empty registry sharing an existing opener
    pub fn with_opener(opener: Arc<dyn TransportOpener>) -> Self {
        Self {
            opener,
            ports: Mutex::new(HashMap::new()),
        }
    }

    /// Registry backed by OS serial ports
    pub fn serial() -> Self {
        Self::new(SerialOpener)
    }

    fn ports(&self) -> MutexGuard<'_, HashMap<String, PortEntry>> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach `device_id` to `port_id`, opening the port on first use.
    ///
    /// Fails with [`RegistryError::Conflict`] if the port is already open
    /// with a different `config`; the registry is left untouched.
    pub fn register(
        &self,
        device_id: DeviceId,
        port_id: &str,
        config: &PortConfig,
    ) -> Result<(), RegistryError> {
        let mut ports = self.ports();

        if let Some(entry) = ports.get_mut(port_id) {
            if entry.config != *config {
                return Err(RegistryError::Conflict {
                    port_id: port_id.to_string(),
                    existing: entry.config,
                    requested: *config,
                });
            }
            entry.members.insert(device_id);
            debug!(port = port_id, device = %device_id, members = entry.members.len(), "device joined port");
            return Ok(());
        }

        let transport = self
            .opener
            .open(port_id, config)
            .map_err(|source| RegistryError::Open {
                port_id: port_id.to_string(),
                source,
            })?;
        info!(port = port_id, baud = config.baud_rate, "port opened");

        ports.insert(
            port_id.to_string(),
            PortEntry {
                config: *config,
                handle: Arc::new(PortHandle::new(port_id, transport)),
                members: BTreeSet::from([device_id]),
            },
        );
        Ok(())
    }

    /// Detach `device_id` from `port_id`, closing the port if it was the
    /// last member. Unknown ids are ignored.
    pub fn deregister(&self, device_id: DeviceId, port_id: &str) {
        let mut ports = self.ports();
        let Some(entry) = ports.get_mut(port_id) else {
            return;
        };
        if !entry.members.remove(&device_id) {
            return;
        }
        debug!(port = port_id, device = %device_id, members = entry.members.len(), "device left port");

        if entry.members.is_empty() {
            if let Some(entry) = ports.remove(port_id) {
                close_handle(&entry.handle);
            }
        }
    }

    /// Non-owning reference to the handle of a registered port
    pub fn handle_for(&self, port_id: &str) -> Result<Weak<PortHandle>, RegistryError> {
        self.ports()
            .get(port_id)
            .map(|entry| Arc::downgrade(&entry.handle))
            .ok_or_else(|| RegistryError::NotRegistered(port_id.to_string()))
    }

    /// Devices currently attached to `port_id`
    pub fn members(&self, port_id: &str) -> Vec<DeviceId> {
        self.ports()
            .get(port_id)
            .map(|entry| entry.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Settings `port_id` was opened with
    pub fn config_for(&self, port_id: &str) -> Option<PortConfig> {
        self.ports().get(port_id).map(|entry| entry.config)
    }

    /// Whether `port_id` is currently open
    pub fn is_registered(&self, port_id: &str) -> bool {
        self.ports().contains_key(port_id)
    }

    /// All open ports
    pub fn port_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ports().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close every open port and forget all registrations
    pub fn release_all(&self) {
        let drained: Vec<PortEntry> = self.ports().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            if !entry.members.is_empty() {
                warn!(
                    port = entry.handle.port_id(),
                    members = entry.members.len(),
                    "releasing port with attached devices"
                );
            }
            close_handle(&entry.handle);
        }
    }
}

impl Drop for PortRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn close_handle(handle: &PortHandle) {
    match handle.close() {
        Ok(()) => info!(port = handle.port_id(), "port closed"),
        Err(e) => warn!(port = handle.port_id(), error = %e, "failed to close port"),
    }
}
