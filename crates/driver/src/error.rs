//! Driver error types

use thiserror::Error;

/// Failure to obtain a transfer buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Failed to allocate {requested} byte transfer buffer")]
pub struct AllocError {
    /// Size of the buffer that could not be allocated
    pub requested: usize,
}

/// Reasons an attach attempt is refused
///
/// Every variant is local to the attach call: partial allocations are
/// released before the error is returned and no session is retained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    /// The device classified as anything other than recognized
    #[error("Device not supported: {reason}")]
    UnsupportedDevice { reason: &'static str },

    /// A transfer buffer could not be allocated
    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] AllocError),

    /// The interface lacks a bulk-in or a bulk-out endpoint
    #[error("Endpoints not found (bulk in: {bulk_in}, bulk out: {bulk_out})")]
    EndpointsNotFound { bulk_in: bool, bulk_out: bool },

    /// A session is already bound to this device key
    #[error("A session is already bound to this device")]
    AlreadyBound,
}

/// Status surfaced to the host environment for a lifecycle call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    NotSupported,
    NoSuchDevice,
    OutOfMemory,
    Busy,
}

impl AttachError {
    /// Map to the status the host reports for its own attach call
    pub fn host_status(&self) -> HostStatus {
        match self {
            AttachError::UnsupportedDevice { .. } => HostStatus::NotSupported,
            AttachError::OutOfMemory(_) => HostStatus::OutOfMemory,
            AttachError::EndpointsNotFound { .. } => HostStatus::NoSuchDevice,
            AttachError::AlreadyBound => HostStatus::Busy,
        }
    }

    /// Whether a future attach of the same device may succeed
    ///
    /// Resource exhaustion and a still-bound session can clear up; the
    /// others are properties of the device itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, AttachError::OutOfMemory(_) | AttachError::AlreadyBound)
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HostStatus::NotSupported => "not supported",
            HostStatus::NoSuchDevice => "no such device",
            HostStatus::OutOfMemory => "out of memory",
            HostStatus::Busy => "device or resource busy",
        };
        f.write_str(s)
    }
}
