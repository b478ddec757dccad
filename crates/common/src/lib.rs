//! Common utilities for ubertooth-host
//!
//! This crate provides functionality shared around the driver core: the
//! error type, logging setup, summary types reported by the USB thread, and
//! the async channel bridge between the Tokio runtime and that thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use channel::{UsbBridge, UsbCommand, UsbEvent, UsbWorker, create_usb_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{DeviceSummary, SessionSummary};
