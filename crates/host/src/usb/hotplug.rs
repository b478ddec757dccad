//! Hot-plug notifications
//!
//! libusb invokes the callback from inside `handle_events` on the worker
//! thread; it only filters against the id table and queues the event for the
//! worker loop.

use async_channel::Sender;
use driver::is_supported_id;
use rusb::{Context, Device, Hotplug};
use tracing::{debug, warn};

/// Arrival or departure of a device
#[derive(Debug)]
pub enum HotplugEvent {
    Arrived(Device<Context>),
    Left { bus: u8, address: u8 },
}

/// Hot-plug callback handler
pub struct HotplugCallback {
    event_sender: Sender<HotplugEvent>,
}

impl HotplugCallback {
    pub fn new(event_sender: Sender<HotplugEvent>) -> Self {
        Self { event_sender }
    }
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        let matches = device
            .device_descriptor()
            .map(|d| is_supported_id(d.vendor_id(), d.product_id()))
            .unwrap_or(false);
        if !matches {
            return;
        }

        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if let Err(e) = self.event_sender.try_send(HotplugEvent::Arrived(device)) {
            warn!("Dropped hot-plug arrival: {}", e);
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        // Descriptors may already be gone; the worker ignores unknown devices
        let event = HotplugEvent::Left {
            bus: device.bus_number(),
            address: device.address(),
        };
        if let Err(e) = self.event_sender.try_send(event) {
            warn!("Dropped hot-plug departure: {}", e);
        }
    }
}
