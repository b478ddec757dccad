//! Async channel bridge between Tokio runtime and USB thread

use crate::usb_types::{DeviceSummary, SessionSummary};
use async_channel::{Receiver, Sender, bounded};
use driver::{DeviceIdentity, DeviceKey, HostStatus, ResetOutcome};

/// Commands from Tokio runtime to USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// List bound sessions
    ListSessions {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Vec<SessionSummary>>,
    },

    /// List devices on the bus that match the id table
    ListDevices {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<crate::Result<Vec<DeviceSummary>>>,
    },

    /// Bus-reset a device, suspending its sessions around the reset
    ResetDevice {
        bus: u8,
        address: u8,
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<crate::Result<Vec<(DeviceKey, ResetOutcome)>>>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Lifecycle events from the USB thread
#[derive(Debug, Clone)]
pub enum UsbEvent {
    /// A session was bound
    SessionAttached {
        key: DeviceKey,
        identity: DeviceIdentity,
    },

    /// A matching device was refused
    AttachFailed {
        key: DeviceKey,
        identity: DeviceIdentity,
        status: HostStatus,
        /// Diagnostic message
        message: String,
    },

    /// A session was released
    SessionDetached { key: DeviceKey },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
    event_rx: Receiver<UsbEvent>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<UsbEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    pub(crate) cmd_rx: Receiver<UsbCommand>,
    /// Event sender (public for USB worker thread to access)
    pub event_tx: Sender<UsbEvent>,
}

impl UsbWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<UsbCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Send an event without blocking; dropped if nobody is listening
    pub fn send_event(&self, event: UsbEvent) -> crate::Result<()> {
        self.event_tx
            .try_send(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        UsbBridge { cmd_tx, event_rx },
        UsbWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_usb_bridge();

        // Spawn a thread to simulate USB worker
        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            matches!(cmd, UsbCommand::ListSessions { .. })
        });

        // Send command from async context
        let (tx, _rx) = tokio::sync::oneshot::channel();
        bridge
            .send_command(UsbCommand::ListSessions { response: tx })
            .await
            .unwrap();

        assert!(handle.join().unwrap());
    }
}
