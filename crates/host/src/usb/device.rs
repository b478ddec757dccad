//! USB device adapter
//!
//! Wraps a `rusb::Device` with its cached descriptor, translates descriptor
//! fields into the driver's identity and endpoint types, and owns the libusb
//! handle used to claim interfaces. Sessions hold this through an `Arc`; when
//! the last one goes away the interfaces are released.

use driver::{DeviceIdentity, DeviceSpeed, Direction, EndpointDescriptor, TransferKind};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Standard GET_DESCRIPTOR(DEVICE) request
const GET_DESCRIPTOR_REQUEST_TYPE: u8 = 0x80;
const GET_DESCRIPTOR: u8 = 0x06;
const DEVICE_DESCRIPTOR_VALUE: u16 = 0x0100;
const DEVICE_DESCRIPTOR_LEN: usize = 18;
const DESCRIPTOR_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Default)]
struct HandleState {
    handle: Option<DeviceHandle<Context>>,
    claimed_interfaces: Vec<u8>,
    /// Interfaces a kernel driver was detached from
    detached_interfaces: Vec<u8>,
}

/// USB device wrapper with cached descriptor
pub struct UsbDevice {
    device: Device<Context>,
    descriptor: DeviceDescriptor,
    state: Mutex<HandleState>,
}

impl UsbDevice {
    /// Create a new USB device wrapper
    ///
    /// Reads and caches the device descriptor.
    pub fn new(device: Device<Context>) -> Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;

        Ok(Self {
            device,
            descriptor,
            state: Mutex::new(HandleState::default()),
        })
    }

    pub fn bus_number(&self) -> u8 {
        self.device.bus_number()
    }

    pub fn device_address(&self) -> u8 {
        self.device.address()
    }

    pub fn vendor_id(&self) -> u16 {
        self.descriptor.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.descriptor.product_id()
    }

    /// Identity as the classifier sees it
    ///
    /// The revision is read from the raw device descriptor. If the device
    /// cannot be opened it falls back to libusb's decoded version, which is
    /// only exact for revisions made of decimal digits.
    pub fn identity(&self) -> DeviceIdentity {
        let revision = match self.read_bcd_device() {
            Ok(revision) => revision,
            Err(e) => {
                debug!("Reading raw bcdDevice failed ({}), using decoded version", e);
                bcd_device(self.descriptor.device_version())
            }
        };

        DeviceIdentity::new(
            self.descriptor.vendor_id(),
            self.descriptor.product_id(),
            revision,
            map_device_speed(self.device.speed()),
        )
    }

    /// bcdDevice exactly as the device reports it
    fn read_bcd_device(&self) -> Result<u16, rusb::Error> {
        let mut state = self.lock_state();
        self.ensure_open(&mut state)?;
        let handle = state.handle.as_ref().ok_or(rusb::Error::NoDevice)?;

        let mut raw = [0u8; DEVICE_DESCRIPTOR_LEN];
        let len = handle.read_control(
            GET_DESCRIPTOR_REQUEST_TYPE,
            GET_DESCRIPTOR,
            DEVICE_DESCRIPTOR_VALUE,
            0,
            &mut raw,
            DESCRIPTOR_TIMEOUT,
        )?;

        raw_bcd_device(&raw[..len]).ok_or(rusb::Error::Io)
    }

    /// Open the device unless a handle is already held
    fn ensure_open(&self, state: &mut HandleState) -> Result<(), rusb::Error> {
        if state.handle.is_none() {
            state.handle = Some(self.device.open()?);
            debug!(
                "Opened device {:03}:{:03}",
                self.bus_number(),
                self.device_address()
            );
        }
        Ok(())
    }

    /// Endpoints of every interface in the active configuration
    ///
    /// Uses alternate setting 0 and keeps descriptor order.
    pub fn interface_endpoints(&self) -> Result<Vec<(u8, Vec<EndpointDescriptor>)>, rusb::Error> {
        let config = self.device.active_config_descriptor()?;
        let mut interfaces = Vec::new();

        for interface in config.interfaces() {
            let Some(setting) = interface
                .descriptors()
                .find(|setting| setting.setting_number() == 0)
            else {
                debug!("Interface {} has no alternate setting 0", interface.number());
                continue;
            };

            let endpoints = setting
                .endpoint_descriptors()
                .map(|ep| map_endpoint(&ep))
                .collect();
            interfaces.push((interface.number(), endpoints));
        }

        Ok(interfaces)
    }

    /// Claim an interface, opening the device on first use
    pub fn claim_interface(
        &self,
        interface: u8,
        detach_kernel_driver: bool,
    ) -> Result<(), rusb::Error> {
        let mut state = self.lock_state();
        self.ensure_open(&mut state)?;
        let HandleState {
            handle,
            claimed_interfaces,
            detached_interfaces,
        } = &mut *state;
        let Some(handle) = handle.as_mut() else {
            return Err(rusb::Error::NoDevice);
        };

        if detach_kernel_driver {
            match handle.kernel_driver_active(interface) {
                Ok(true) => {
                    debug!("Detaching kernel driver from interface {}", interface);
                    handle.detach_kernel_driver(interface)?;
                    detached_interfaces.push(interface);
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        interface, e
                    );
                }
            }
        }

        handle.claim_interface(interface)?;
        claimed_interfaces.push(interface);
        debug!("Claimed interface {}", interface);
        Ok(())
    }

    /// Bus-reset the device
    ///
    /// Fails with `NoDevice` when nothing has been claimed yet.
    pub fn reset(&self) -> Result<(), rusb::Error> {
        let mut state = self.lock_state();
        let handle = state.handle.as_mut().ok_or(rusb::Error::NoDevice)?;

        handle.reset()?;
        debug!(
            "Reset device {:03}:{:03}",
            self.bus_number(),
            self.device_address()
        );
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for UsbDevice {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(mut handle) = state.handle.take() else {
            return;
        };

        for interface in state.claimed_interfaces.drain(..) {
            if let Err(e) = handle.release_interface(interface) {
                debug!("Failed to release interface {}: {}", interface, e);
            }
        }

        for interface in state.detached_interfaces.drain(..) {
            if let Err(e) = handle.attach_kernel_driver(interface) {
                warn!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                );
            }
        }

        debug!(
            "Closed device {:03}:{:03}",
            self.device.bus_number(),
            self.device.address()
        );
    }
}

/// Map rusb device speed to the driver's speed
pub fn map_device_speed(speed: rusb::Speed) -> DeviceSpeed {
    match speed {
        rusb::Speed::Low => DeviceSpeed::Low,
        rusb::Speed::Full => DeviceSpeed::Full,
        rusb::Speed::High => DeviceSpeed::High,
        _ => DeviceSpeed::Unknown,
    }
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferKind {
    match transfer_type {
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Control => TransferKind::Control,
        _ => TransferKind::Other,
    }
}

fn map_endpoint(ep: &rusb::EndpointDescriptor<'_>) -> EndpointDescriptor {
    EndpointDescriptor {
        address: ep.address(),
        direction: match ep.direction() {
            rusb::Direction::In => Direction::In,
            rusb::Direction::Out => Direction::Out,
        },
        transfer_kind: map_transfer_type(ep.transfer_type()),
        max_packet_size: ep.max_packet_size(),
    }
}

/// bcdDevice from a raw device descriptor, `None` if it is not one
fn raw_bcd_device(descriptor: &[u8]) -> Option<u16> {
    if descriptor.get(1) != Some(&0x01) {
        return None;
    }
    let bytes = descriptor.get(12..14)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Re-encode a version libusb decoded from bcdDevice
///
/// Exact only when each nibble was a decimal digit; libusb folds the two
/// high nibbles into one number, so e.g. 0x0a00 and 0x1000 both come back
/// as major 10.
fn bcd_device(version: rusb::Version) -> u16 {
    let major = u16::from(version.major()).min(99);
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | (u16::from(version.minor() & 0x0f) << 4)
        | u16::from(version.sub_minor() & 0x0f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_device_speed() {
        assert_eq!(map_device_speed(rusb::Speed::Low), DeviceSpeed::Low);
        assert_eq!(map_device_speed(rusb::Speed::Full), DeviceSpeed::Full);
        assert_eq!(map_device_speed(rusb::Speed::High), DeviceSpeed::High);
        assert_eq!(map_device_speed(rusb::Speed::Super), DeviceSpeed::Unknown);
        assert_eq!(map_device_speed(rusb::Speed::Unknown), DeviceSpeed::Unknown);
    }

    #[test]
    fn test_map_transfer_type() {
        assert_eq!(map_transfer_type(rusb::TransferType::Bulk), TransferKind::Bulk);
        assert_eq!(
            map_transfer_type(rusb::TransferType::Control),
            TransferKind::Control
        );
        assert_eq!(
            map_transfer_type(rusb::TransferType::Interrupt),
            TransferKind::Other
        );
        assert_eq!(
            map_transfer_type(rusb::TransferType::Isochronous),
            TransferKind::Other
        );
    }

    #[test]
    fn test_bcd_device_round_trip() {
        for raw in [0x0000, 0x0105, 0x1099, 0x0210] {
            assert_eq!(bcd_device(rusb::Version::from_bcd(raw)), raw);
        }
    }

    #[test]
    fn test_bcd_device_non_decimal_is_clamped() {
        // Not recoverable from the decoded form, but must stay in range
        assert_eq!(bcd_device(rusb::Version::from_bcd(0x0a00)), 0x1000);
        assert_eq!(bcd_device(rusb::Version::from_bcd(0xff00)), 0x9900);
    }

    fn device_descriptor(bcd_device: u16) -> [u8; DEVICE_DESCRIPTOR_LEN] {
        let [lo, hi] = bcd_device.to_le_bytes();
        [
            0x12, 0x01, 0x00, 0x02, 0xff, 0xff, 0xff, 0x40, 0x50, 0x1d, 0x02, 0x60, lo, hi, 0x01,
            0x02, 0x03, 0x01,
        ]
    }

    #[test]
    fn test_raw_bcd_device_keeps_every_bit() {
        for raw in [0x0105, 0x0a00, 0xffff, 0x00ab] {
            assert_eq!(raw_bcd_device(&device_descriptor(raw)), Some(raw));
        }
    }

    #[test]
    fn test_raw_bcd_device_rejects_short_or_foreign_descriptor() {
        let descriptor = device_descriptor(0x0a00);
        assert_eq!(raw_bcd_device(&descriptor[..13]), None);

        let mut config = descriptor;
        config[1] = 0x02;
        assert_eq!(raw_bcd_device(&config), None);
    }
}
