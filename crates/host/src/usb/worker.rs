//! USB worker thread
//!
//! Dedicated thread owning the libusb context and the session manager. It
//! runs the libusb event loop, turns hot-plug notifications into attach and
//! detach calls, and answers commands from the Tokio runtime.

use crate::usb::device::UsbDevice;
use crate::usb::hotplug::{HotplugCallback, HotplugEvent};
use async_channel::{Receiver, Sender, unbounded};
use common::{DeviceSummary, SessionSummary, UsbCommand, UsbEvent, UsbWorker};
use driver::{
    CountingAllocator, DRIVER_NAME, DeviceKey, HostStatus, ManagerOptions, ResetOutcome,
    SessionManager, is_supported_id, lookup,
};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Settings the worker needs from configuration
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub options: ManagerOptions,
    pub detach_kernel_driver: bool,
    pub poll_interval: Duration,
}

/// USB worker thread
pub struct UsbWorkerThread {
    context: Context,
    manager: SessionManager<UsbDevice>,
    buffers: Arc<CountingAllocator>,
    worker: UsbWorker,
    hotplug_rx: Receiver<HotplugEvent>,
    _hotplug_registration: Option<Registration<Context>>,
    settings: WorkerSettings,
}

impl UsbWorkerThread {
    /// Create the worker and register for device notifications
    ///
    /// Devices already on the bus are queued as arrivals.
    pub fn new(worker: UsbWorker, settings: WorkerSettings) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let buffers = Arc::new(CountingAllocator::new());
        let manager = SessionManager::with_allocator(buffers.clone(), settings.options);
        let (hotplug_tx, hotplug_rx) = unbounded();

        let registration = if rusb::has_hotplug() {
            Some(register_hotplug(&context, hotplug_tx)?)
        } else {
            warn!("libusb has no hot-plug support, enumerating once");
            enumerate_devices(&context, &hotplug_tx)?;
            None
        };

        Ok(Self {
            context,
            manager,
            buffers,
            worker,
            hotplug_rx,
            _hotplug_registration: registration,
            settings,
        })
    }

    /// Run the event loop until a Shutdown command arrives
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        loop {
            while let Ok(event) = self.hotplug_rx.try_recv() {
                self.handle_hotplug(event);
            }

            match self.worker.try_recv_command() {
                Some(UsbCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Some(cmd) => self.handle_command(cmd),
                None => {}
            }

            match self.context.handle_events(Some(self.settings.poll_interval)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(self.settings.poll_interval);
                }
            }
        }

        let released = self.manager.detach_all();
        info!("{} deregistered, released {} session(s)", DRIVER_NAME, released);
        if self.buffers.outstanding() != 0 {
            error!(
                "{} transfer buffer(s) still outstanding after shutdown",
                self.buffers.outstanding()
            );
        }

        info!("USB worker thread stopped");
        Ok(())
    }

    fn handle_hotplug(&mut self, event: HotplugEvent) {
        match event {
            HotplugEvent::Arrived(device) => self.handle_device_arrived(device),
            HotplugEvent::Left { bus, address } => self.handle_device_left(bus, address),
        }
    }

    /// Attach every interface of a newly arrived device
    fn handle_device_arrived(&mut self, device: Device<Context>) {
        let usb = match UsbDevice::new(device) {
            Ok(usb) => usb,
            Err(e) => {
                warn!("Failed to read arrived device: {}", e);
                return;
            }
        };
        if !is_supported_id(usb.vendor_id(), usb.product_id()) {
            return;
        }

        let identity = usb.identity();
        debug!("Device arrived: {}", identity);

        let interfaces = match usb.interface_endpoints() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!("Failed to read configuration of {}: {}", identity, e);
                return;
            }
        };

        let usb = Arc::new(usb);
        for (number, endpoints) in interfaces {
            let key = DeviceKey::new(usb.bus_number(), usb.device_address(), number);

            if let Err(e) = self
                .manager
                .attach(key, Arc::clone(&usb), identity, &endpoints)
            {
                error!("{}: {} ({})", key, e, e.host_status());
                self.notify(UsbEvent::AttachFailed {
                    key,
                    identity,
                    status: e.host_status(),
                    message: e.to_string(),
                });
                continue;
            }

            if let Err(e) = usb.claim_interface(number, self.settings.detach_kernel_driver) {
                error!("{}: failed to claim interface: {}", key, e);
                self.manager.detach(&key);
                self.notify(UsbEvent::AttachFailed {
                    key,
                    identity,
                    status: HostStatus::Busy,
                    message: format!("Failed to claim interface {}: {}", number, e),
                });
                continue;
            }

            self.notify(UsbEvent::SessionAttached { key, identity });
        }
    }

    fn handle_device_left(&mut self, bus: u8, address: u8) {
        for key in self.manager.detach_device(bus, address) {
            self.notify(UsbEvent::SessionDetached { key });
        }
    }

    fn handle_command(&mut self, cmd: UsbCommand) {
        match cmd {
            UsbCommand::ListSessions { response } => {
                let sessions = self
                    .manager
                    .keys()
                    .into_iter()
                    .filter_map(|key| {
                        self.manager
                            .session(&key)
                            .map(|session| SessionSummary::from_session(key, session))
                    })
                    .collect();
                let _ = response.send(sessions);
            }

            UsbCommand::ListDevices { response } => {
                let _ = response.send(self.list_devices());
            }

            UsbCommand::ResetDevice {
                bus,
                address,
                response,
            } => {
                let _ = response.send(self.reset_device(bus, address));
            }

            UsbCommand::Shutdown => {
                // Handled in run()
            }
        }
    }

    /// Devices on the bus that match the id table
    fn list_devices(&self) -> common::Result<Vec<DeviceSummary>> {
        let devices = self
            .context
            .devices()
            .map_err(|e| common::Error::Usb(e.to_string()))?;

        let mut summaries = Vec::new();
        for device in devices.iter() {
            let Ok(usb) = UsbDevice::new(device) else {
                continue;
            };
            let Some(classification) = lookup(usb.vendor_id(), usb.product_id()) else {
                continue;
            };

            summaries.push(DeviceSummary {
                bus: usb.bus_number(),
                address: usb.device_address(),
                identity: usb.identity(),
                classification,
                bound_interfaces: self
                    .manager
                    .keys_for_device(usb.bus_number(), usb.device_address())
                    .len(),
            });
        }

        debug!("Listing {} matching devices", summaries.len());
        Ok(summaries)
    }

    /// Bus-reset one device with its sessions suspended around the reset
    fn reset_device(
        &mut self,
        bus: u8,
        address: u8,
    ) -> common::Result<Vec<(DeviceKey, ResetOutcome)>> {
        let keys = self.manager.keys_for_device(bus, address);
        let Some(usb) = keys
            .first()
            .and_then(|key| self.manager.session(key))
            .map(|session| Arc::clone(session.device()))
        else {
            return Err(common::Error::Usb(format!(
                "No session bound to {:03}:{:03}",
                bus, address
            )));
        };

        for key in &keys {
            self.manager.pre_reset(key);
        }

        let result = usb.reset();

        let outcomes = keys
            .iter()
            .map(|key| (*key, self.manager.post_reset(key)))
            .collect();

        result.map_err(|e| common::Error::Usb(format!("Reset failed: {}", e)))?;
        info!("Reset device {:03}:{:03}", bus, address);
        Ok(outcomes)
    }

    fn notify(&self, event: UsbEvent) {
        if let Err(e) = self.worker.send_event(event) {
            debug!("Event not delivered: {}", e);
        }
    }
}

fn register_hotplug(
    context: &Context,
    sender: Sender<HotplugEvent>,
) -> Result<Registration<Context>, rusb::Error> {
    let callback: Box<dyn Hotplug<Context>> = Box::new(HotplugCallback::new(sender));

    let registration = HotplugBuilder::new()
        .enumerate(true)
        .register(context, callback)?;

    debug!("Hot-plug callbacks registered");
    Ok(registration)
}

/// Queue every matching device currently on the bus as an arrival
fn enumerate_devices(context: &Context, sender: &Sender<HotplugEvent>) -> Result<(), rusb::Error> {
    for device in context.devices()?.iter() {
        let matches = device
            .device_descriptor()
            .map(|d| is_supported_id(d.vendor_id(), d.product_id()))
            .unwrap_or(false);
        if matches && sender.try_send(HotplugEvent::Arrived(device)).is_err() {
            warn!("Hot-plug queue closed during enumeration");
        }
    }
    Ok(())
}

/// Spawn the USB worker thread
///
/// The thread runs until a Shutdown command is received or setup fails.
pub fn spawn_usb_worker(
    worker: UsbWorker,
    settings: WorkerSettings,
) -> std::io::Result<std::thread::JoinHandle<Result<(), rusb::Error>>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let worker_thread = UsbWorkerThread::new(worker, settings)?;
            worker_thread.run()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_usb_bridge;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            options: ManagerOptions::default(),
            detach_kernel_driver: false,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_usb_worker_creation() {
        let (_bridge, worker) = create_usb_bridge();

        // USB context creation may fail without permissions
        match UsbWorkerThread::new(worker, settings()) {
            Ok(thread) => assert!(thread.manager.is_empty()),
            Err(e) => eprintln!("USB worker creation failed (expected without USB access): {}", e),
        }
    }

    #[test]
    fn test_reset_without_session() {
        let (_bridge, worker) = create_usb_bridge();
        let Ok(mut thread) = UsbWorkerThread::new(worker, settings()) else {
            return;
        };

        assert!(thread.reset_device(250, 250).is_err());
    }
}
