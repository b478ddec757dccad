//! USB subsystem
//!
//! Binds the driver core to libusb:
//! - Device wrapper translating rusb descriptors into driver types
//! - Hot-plug notifications filtered against the id table
//! - Worker thread running the libusb event loop and the session manager
//!
//! All libusb calls and every session lifecycle call happen on the worker
//! thread, which serializes them per device.

pub mod device;
pub mod hotplug;
pub mod worker;

pub use worker::{WorkerSettings, spawn_usb_worker};
