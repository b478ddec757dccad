//! Summaries reported by the USB thread
//!
//! Sessions themselves never leave the USB thread; these are plain copies
//! of what the runtime side displays.

use driver::{Classification, DeviceIdentity, DeviceKey, EndpointDescriptor, Session};

/// Snapshot of a bound session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub key: DeviceKey,
    pub identity: DeviceIdentity,
    pub bulk_in: EndpointDescriptor,
    pub bulk_out: EndpointDescriptor,
    pub control: Option<EndpointDescriptor>,
    pub running: bool,
    pub suspended: bool,
}

impl SessionSummary {
    pub fn from_session<D>(key: DeviceKey, session: &Session<D>) -> Self {
        Self {
            key,
            identity: *session.identity(),
            bulk_in: *session.bulk_in().endpoint(),
            bulk_out: *session.bulk_out().endpoint(),
            control: session.control().copied(),
            running: session.is_running(),
            suspended: session.is_suspended(),
        }
    }
}

/// A device on the bus that appears in the id table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub bus: u8,
    pub address: u8,
    pub identity: DeviceIdentity,
    pub classification: Classification,
    /// Number of interfaces with a bound session
    pub bound_interfaces: usize,
}
