//! Test utilities for ubertooth-host
//!
//! Mock summaries and async helpers shared by the common and host tests.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_session_summary;
//!
//! let summary = create_mock_session_summary(1, 4);
//! assert_eq!(summary.bulk_in.address, 0x82);
//! ```

use crate::usb_types::{DeviceSummary, SessionSummary};
use driver::{
    Classification, DeviceIdentity, DeviceKey, DeviceSpeed, EndpointDescriptor, TransferKind,
};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Summary of an idle Ubertooth One session on interface 0
pub fn create_mock_session_summary(bus: u8, address: u8) -> SessionSummary {
    SessionSummary {
        key: DeviceKey::new(bus, address, 0),
        identity: DeviceIdentity::new(0x1d50, 0x6002, 0x0105, DeviceSpeed::Full),
        bulk_in: EndpointDescriptor::new(0x82, TransferKind::Bulk, 64),
        bulk_out: EndpointDescriptor::new(0x05, TransferKind::Bulk, 64),
        control: None,
        running: false,
        suspended: false,
    }
}

/// Device summary for a table entry
pub fn create_mock_device_summary(
    address: u8,
    vendor_id: u16,
    product_id: u16,
    classification: Classification,
) -> DeviceSummary {
    DeviceSummary {
        bus: 1,
        address,
        identity: DeviceIdentity::new(vendor_id, product_id, 0x0105, DeviceSpeed::Full),
        classification,
        bound_interfaces: usize::from(classification == Classification::Recognized),
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
