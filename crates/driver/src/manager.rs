//! Session manager
//!
//! Owns the table of live sessions, keyed by the device interface they are
//! bound to, and implements the attach / detach / bus reset lifecycle.
//! Lifecycle calls for one key are expected to be serialized by the caller.

use crate::buffer::{BufferAllocator, HeapAllocator};
use crate::endpoint::EndpointDescriptor;
use crate::error::AttachError;
use crate::identity::{Classification, DeviceIdentity, DeviceSpeed};
use crate::session::Session;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identity of one bound interface on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub bus: u8,
    pub address: u8,
    pub interface: u8,
}

impl DeviceKey {
    pub fn new(bus: u8, address: u8, interface: u8) -> Self {
        Self {
            bus,
            address,
            interface,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}.{}", self.bus, self.address, self.interface)
    }
}

/// Lifecycle state of a device key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unattached,
    Attaching,
    Attached,
    Detaching,
    ResetPending,
}

/// Result of a reset notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Nothing bound or no reset window to close; nothing changed
    Suppressed,
    /// The session was suspended (pre) or resumed (post)
    Allowed,
}

/// Attach policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Refuse devices whose negotiated speed is not low, full or high
    pub reject_unknown_speed: bool,
}

/// Table of sessions plus the allocator their buffers come from
pub struct SessionManager<D> {
    sessions: HashMap<DeviceKey, Session<D>>,
    allocator: Arc<dyn BufferAllocator>,
    options: ManagerOptions,
}

impl<D> SessionManager<D> {
    /// Create a manager allocating from the heap with default options
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(HeapAllocator), ManagerOptions::default())
    }

    pub fn with_allocator(allocator: Arc<dyn BufferAllocator>, options: ManagerOptions) -> Self {
        Self {
            sessions: HashMap::new(),
            allocator,
            options,
        }
    }

    pub fn options(&self) -> ManagerOptions {
        self.options
    }

    /// Bind a session to `key`
    ///
    /// Classifies the device first; nothing is allocated for a device that is
    /// not recognized. On success the session holds `device` until it is
    /// detached.
    pub fn attach(
        &mut self,
        key: DeviceKey,
        device: Arc<D>,
        identity: DeviceIdentity,
        endpoints: &[EndpointDescriptor],
    ) -> Result<&mut Session<D>, AttachError> {
        if self.sessions.contains_key(&key) {
            warn!("Attach for {} while a session is already bound", key);
            return Err(AttachError::AlreadyBound);
        }

        trace_transition(key, LifecycleState::Unattached, LifecycleState::Attaching);

        if let Err(e) = self.admit(&identity) {
            warn!("{} ({}): {}", key, identity, e);
            trace_transition(key, LifecycleState::Attaching, LifecycleState::Unattached);
            return Err(e);
        }

        let session = match Session::bind(device, identity, endpoints, &self.allocator) {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to attach {} ({}): {}", key, identity, e);
                trace_transition(key, LifecycleState::Attaching, LifecycleState::Unattached);
                return Err(e);
            }
        };

        info!("Attached {} ({})", key, identity);
        trace_transition(key, LifecycleState::Attaching, LifecycleState::Attached);
        Ok(self.sessions.entry(key).or_insert(session))
    }

    /// Decide whether a device may have a session built for it
    fn admit(&self, identity: &DeviceIdentity) -> Result<(), AttachError> {
        match identity.classify() {
            Some(Classification::Recognized) => {}
            Some(other) => {
                return Err(AttachError::UnsupportedDevice {
                    reason: other.rejection().unwrap_or("Model not yet supported"),
                });
            }
            None => {
                return Err(AttachError::UnsupportedDevice {
                    reason: "Device not in id table",
                });
            }
        }

        if self.options.reject_unknown_speed && identity.speed == DeviceSpeed::Unknown {
            return Err(AttachError::UnsupportedDevice {
                reason: "Unknown USB speed",
            });
        }

        Ok(())
    }

    /// Tear down the session bound to `key`
    ///
    /// Releases both buffers and the device reference. Returns `false` (and
    /// changes nothing) when no session is bound.
    pub fn detach(&mut self, key: &DeviceKey) -> bool {
        let Some(session) = self.sessions.remove(key) else {
            debug!("Detach for {} with no session bound", key);
            return false;
        };

        let from = state_of(&session);
        trace_transition(*key, from, LifecycleState::Detaching);
        drop(session);
        trace_transition(*key, LifecycleState::Detaching, LifecycleState::Unattached);
        info!("Detached {}", key);
        true
    }

    /// Detach every interface of one physical device
    ///
    /// Returns the keys whose sessions were released.
    pub fn detach_device(&mut self, bus: u8, address: u8) -> Vec<DeviceKey> {
        let keys = self.keys_for_device(bus, address);
        keys.into_iter().filter(|key| self.detach(key)).collect()
    }

    /// Keys bound on one physical device, sorted by interface
    pub fn keys_for_device(&self, bus: u8, address: u8) -> Vec<DeviceKey> {
        let mut keys: Vec<DeviceKey> = self
            .sessions
            .keys()
            .filter(|key| key.bus == bus && key.address == address)
            .copied()
            .collect();
        keys.sort();
        keys
    }

    /// Detach everything, as on driver unload
    pub fn detach_all(&mut self) -> usize {
        let keys: Vec<DeviceKey> = self.sessions.keys().copied().collect();
        keys.iter().filter(|key| self.detach(key)).count()
    }

    /// Prepare the session on `key` for a bus reset
    ///
    /// Records whether transfers were running, pauses them and holds the
    /// register lock until [`post_reset`](Self::post_reset).
    pub fn pre_reset(&mut self, key: &DeviceKey) -> ResetOutcome {
        let Some(session) = self.sessions.get_mut(key) else {
            return ResetOutcome::Suppressed;
        };

        if session.suspend_for_reset() {
            debug!("Suspended {} for bus reset", key);
            trace_transition(*key, LifecycleState::Attached, LifecycleState::ResetPending);
        } else {
            warn!("Pre-reset for {} while a reset is already pending", key);
        }
        ResetOutcome::Allowed
    }

    /// Close the reset window opened by [`pre_reset`](Self::pre_reset)
    pub fn post_reset(&mut self, key: &DeviceKey) -> ResetOutcome {
        let Some(session) = self.sessions.get_mut(key) else {
            return ResetOutcome::Suppressed;
        };

        if !session.resume_after_reset() {
            warn!("Post-reset for {} without a matching pre-reset", key);
            return ResetOutcome::Suppressed;
        }

        debug!(
            "Resumed {} after bus reset (running: {})",
            key,
            session.is_running()
        );
        trace_transition(*key, LifecycleState::ResetPending, LifecycleState::Attached);
        ResetOutcome::Allowed
    }

    /// Session bound to `key`, if any
    pub fn session(&self, key: &DeviceKey) -> Option<&Session<D>> {
        self.sessions.get(key)
    }

    pub fn session_mut(&mut self, key: &DeviceKey) -> Option<&mut Session<D>> {
        self.sessions.get_mut(key)
    }

    /// Observable lifecycle state of `key`
    pub fn state(&self, key: &DeviceKey) -> LifecycleState {
        self.sessions
            .get(key)
            .map_or(LifecycleState::Unattached, state_of)
    }

    /// Enable transfers on `key`. Returns `false` if nothing is bound.
    pub fn start_transfers(&mut self, key: &DeviceKey) -> bool {
        match self.sessions.get_mut(key) {
            Some(session) => {
                session.start_transfers();
                true
            }
            None => false,
        }
    }

    /// Disable transfers on `key`. Returns `false` if nothing is bound.
    pub fn stop_transfers(&mut self, key: &DeviceKey) -> bool {
        match self.sessions.get_mut(key) {
            Some(session) => {
                session.stop_transfers();
                true
            }
            None => false,
        }
    }

    /// Keys with a bound session, sorted
    pub fn keys(&self) -> Vec<DeviceKey> {
        let mut keys: Vec<DeviceKey> = self.sessions.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<D> Default for SessionManager<D> {
    fn default() -> Self {
        Self::new()
    }
}

fn state_of<D>(session: &Session<D>) -> LifecycleState {
    if session.is_suspended() {
        LifecycleState::ResetPending
    } else {
        LifecycleState::Attached
    }
}

fn trace_transition(key: DeviceKey, from: LifecycleState, to: LifecycleState) {
    debug!("{}: {:?} -> {:?}", key, from, to);
}
