//! Per-device session
//!
//! A [`Session`] exists only for a device that passed classification and
//! exposed both a bulk-in and a bulk-out endpoint. It keeps the device alive
//! through a shared reference, owns one transfer buffer per bulk endpoint and
//! carries the state that has to survive a bus reset.

use crate::buffer::{BufferAllocator, TransferBuffer};
use crate::endpoint::EndpointDescriptor;
use crate::error::{AllocError, AttachError};
use crate::identity::DeviceIdentity;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// A bulk endpoint together with the buffer sized for it
#[derive(Debug)]
pub struct BulkPipe {
    endpoint: EndpointDescriptor,
    buffer: TransferBuffer,
}

impl BulkPipe {
    fn allocate(
        endpoint: EndpointDescriptor,
        allocator: &Arc<dyn BufferAllocator>,
    ) -> Result<Self, AllocError> {
        let buffer = TransferBuffer::allocate(allocator, usize::from(endpoint.max_packet_size))?;
        Ok(Self { endpoint, buffer })
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    pub fn buffer(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Buffer a transfer API fills or drains
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }
}

/// State held across a bus reset
struct SuspendedState {
    was_running: bool,
    /// `None` when an outside holder kept the lock inside a runtime
    _registers: Option<OwnedMutexGuard<()>>,
}

/// Session bound to one attached device interface
pub struct Session<D> {
    device: Arc<D>,
    identity: DeviceIdentity,
    bulk_in: BulkPipe,
    bulk_out: BulkPipe,
    control: Option<EndpointDescriptor>,
    running: bool,
    /// Held while device registers must not be touched
    registers: Arc<Mutex<()>>,
    suspended: Option<SuspendedState>,
}

impl<D> Session<D> {
    /// Build a session from the interface's endpoint list
    ///
    /// Scans `endpoints` once in descriptor order and keeps the first bulk-in,
    /// the first bulk-out and the first control endpoint, allocating a buffer
    /// for each bulk endpoint as it is found. On error everything allocated so
    /// far is released and the device reference is dropped.
    pub(crate) fn bind(
        device: Arc<D>,
        identity: DeviceIdentity,
        endpoints: &[EndpointDescriptor],
        allocator: &Arc<dyn BufferAllocator>,
    ) -> Result<Self, AttachError> {
        let mut bulk_in = None;
        let mut bulk_out = None;
        let mut control = None;

        for endpoint in endpoints {
            if bulk_in.is_none() && endpoint.is_bulk_in() {
                debug!(
                    "Bulk in endpoint {:#04x}, max packet {}",
                    endpoint.address, endpoint.max_packet_size
                );
                bulk_in = Some(BulkPipe::allocate(*endpoint, allocator)?);
            } else if bulk_out.is_none() && endpoint.is_bulk_out() {
                debug!(
                    "Bulk out endpoint {:#04x}, max packet {}",
                    endpoint.address, endpoint.max_packet_size
                );
                bulk_out = Some(BulkPipe::allocate(*endpoint, allocator)?);
            } else if control.is_none() && endpoint.is_control() {
                control = Some(*endpoint);
            }
        }

        match (bulk_in, bulk_out) {
            (Some(bulk_in), Some(bulk_out)) => Ok(Self {
                device,
                identity,
                bulk_in,
                bulk_out,
                control,
                running: false,
                registers: Arc::new(Mutex::new(())),
                suspended: None,
            }),
            (bulk_in, bulk_out) => Err(AttachError::EndpointsNotFound {
                bulk_in: bulk_in.is_some(),
                bulk_out: bulk_out.is_some(),
            }),
        }
    }

    /// Shared reference to the device this session observes
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn bulk_in(&self) -> &BulkPipe {
        &self.bulk_in
    }

    pub fn bulk_in_mut(&mut self) -> &mut BulkPipe {
        &mut self.bulk_in
    }

    pub fn bulk_out(&self) -> &BulkPipe {
        &self.bulk_out
    }

    pub fn bulk_out_mut(&mut self) -> &mut BulkPipe {
        &mut self.bulk_out
    }

    pub fn control(&self) -> Option<&EndpointDescriptor> {
        self.control.as_ref()
    }

    /// Whether transfer activity is currently enabled
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start_transfers(&mut self) {
        if self.suspended.is_some() {
            warn!("Ignoring transfer start during bus reset");
            return;
        }
        self.running = true;
    }

    pub fn stop_transfers(&mut self) {
        self.running = false;
    }

    /// Lock guarding device register access
    ///
    /// Held by the session itself for the whole reset window.
    pub fn register_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.registers)
    }

    /// Whether a bus reset is in progress
    pub fn is_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    /// Pause transfers and take the register lock ahead of a bus reset
    ///
    /// Returns `false` when a reset window is already open; the lock is not
    /// taken a second time. Safe to call from async context.
    pub(crate) fn suspend_for_reset(&mut self) -> bool {
        if self.suspended.is_some() {
            return false;
        }

        let was_running = self.running;
        self.stop_transfers();
        let guard = self.acquire_registers();
        self.suspended = Some(SuspendedState {
            was_running,
            _registers: guard,
        });
        true
    }

    /// Take the register lock for a reset window
    ///
    /// The lock is normally free and is taken without waiting. If a holder of
    /// [`register_lock`](Self::register_lock) has it, a plain thread waits for
    /// it; a thread driving a Tokio runtime cannot block, so the window opens
    /// without the guard and a warning is logged.
    fn acquire_registers(&self) -> Option<OwnedMutexGuard<()>> {
        if let Ok(guard) = Arc::clone(&self.registers).try_lock_owned() {
            return Some(guard);
        }

        if Handle::try_current().is_ok() {
            warn!("Register lock busy inside async context, resetting without it");
            return None;
        }

        debug!("Waiting for register lock before bus reset");
        Some(Arc::clone(&self.registers).blocking_lock_owned())
    }

    /// Release the register lock and restart transfers if they were running
    ///
    /// Returns `false` when no reset window was open.
    pub(crate) fn resume_after_reset(&mut self) -> bool {
        let Some(state) = self.suspended.take() else {
            return false;
        };

        let was_running = state.was_running;
        drop(state);
        if was_running {
            self.start_transfers();
        }
        true
    }
}

impl<D> fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("bulk_in", &self.bulk_in)
            .field("bulk_out", &self.bulk_out)
            .field("control", &self.control)
            .field("running", &self.running)
            .field("suspended", &self.suspended.is_some())
            .finish()
    }
}
