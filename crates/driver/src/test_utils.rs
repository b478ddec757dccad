//! Test utilities for the driver
//!
//! Mock devices, endpoint builders and fixtures shared by unit and
//! integration tests.
//!
//! # Example
//!
//! ```
//! use driver::test_utils::{bulk_in, identity_for};
//!
//! let ep = bulk_in(0x82, 64);
//! assert!(ep.is_bulk_in());
//! assert_eq!(identity_for(0x1d50, 0x6002).to_string(), "1d50:6002 v0105 full");
//! ```

use crate::buffer::CountingAllocator;
use crate::endpoint::{EndpointDescriptor, TransferKind};
use crate::identity::{DeviceIdentity, DeviceSpeed};
use crate::manager::{ManagerOptions, SessionManager};
use std::sync::Arc;

/// Stand-in for a host device object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    name: String,
}

impl MockDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Full-speed identity with revision 1.05
pub fn identity_for(vendor_id: u16, product_id: u16) -> DeviceIdentity {
    DeviceIdentity::new(vendor_id, product_id, 0x0105, DeviceSpeed::Full)
}

/// Bulk IN endpoint; bit 7 is set on the address if missing
pub fn bulk_in(address: u8, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor::new(address | 0x80, TransferKind::Bulk, max_packet_size)
}

/// Bulk OUT endpoint; bit 7 is cleared on the address
pub fn bulk_out(address: u8, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor::new(address & 0x7f, TransferKind::Bulk, max_packet_size)
}

pub fn control(address: u8, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor::new(address, TransferKind::Control, max_packet_size)
}

pub fn interrupt_in(address: u8, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor::new(address | 0x80, TransferKind::Other, max_packet_size)
}

/// Endpoint layout of an Ubertooth One: bulk in 0x82, bulk out 0x05
pub fn standard_endpoints() -> Vec<EndpointDescriptor> {
    vec![bulk_in(0x82, 64), bulk_out(0x05, 64)]
}

/// Manager backed by a counting allocator, returned alongside the counter
pub fn counting_manager() -> (SessionManager<MockDevice>, Arc<CountingAllocator>) {
    counting_manager_with(CountingAllocator::new())
}

/// Manager backed by the given counting allocator
pub fn counting_manager_with(
    allocator: CountingAllocator,
) -> (SessionManager<MockDevice>, Arc<CountingAllocator>) {
    let counter = Arc::new(allocator);
    let manager = SessionManager::with_allocator(counter.clone(), ManagerOptions::default());
    (manager, counter)
}
