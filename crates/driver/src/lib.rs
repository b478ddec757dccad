//! Ubertooth USB driver core
//!
//! This crate holds the part of the driver that decides whether an attached
//! device is one we can drive and, if so, owns the per-device session for the
//! lifetime of the physical attachment.
//!
//! - [`identity`] classifies a device from its descriptor fields against the
//!   static id table.
//! - [`manager`] builds, looks up, suspends and tears down sessions.
//! - [`interface`] is the named set of lifecycle operations an adapter
//!   (libusb, a kernel shim, a test harness) calls into.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use driver::test_utils::{MockDevice, identity_for, standard_endpoints};
//! use driver::{DeviceKey, SessionManager};
//!
//! let mut manager = SessionManager::new();
//! let key = DeviceKey::new(1, 4, 0);
//!
//! manager
//!     .attach(
//!         key,
//!         Arc::new(MockDevice::new("one")),
//!         identity_for(0x1d50, 0x6002),
//!         &standard_endpoints(),
//!     )
//!     .unwrap();
//!
//! assert!(manager.session(&key).is_some());
//! manager.detach(&key);
//! assert!(manager.session(&key).is_none());
//! ```

pub mod buffer;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod interface;
pub mod manager;
pub mod session;
pub mod test_utils;

pub use buffer::{BufferAllocator, CountingAllocator, HeapAllocator, TransferBuffer};
pub use endpoint::{Direction, EndpointDescriptor, TransferKind};
pub use error::{AllocError, AttachError, HostStatus};
pub use identity::{
    Classification, DEVICE_TABLE, DeviceIdEntry, DeviceIdentity, DeviceSpeed, is_supported_id,
    lookup,
};
pub use interface::{DRIVER_NAME, UsbDriver};
pub use manager::{DeviceKey, LifecycleState, ManagerOptions, ResetOutcome, SessionManager};
pub use session::{BulkPipe, Session};
