//! Driver interface seen by adapters
//!
//! An adapter owns the registration with whatever USB access layer it talks
//! to and forwards the four lifecycle notifications through [`UsbDriver`].

use crate::endpoint::EndpointDescriptor;
use crate::error::AttachError;
use crate::identity::{DEVICE_TABLE, DeviceIdEntry, DeviceIdentity};
use crate::manager::{DeviceKey, ResetOutcome, SessionManager};
use std::sync::Arc;

/// Name the driver registers under
pub const DRIVER_NAME: &str = "ubertooth";

/// Lifecycle operations invoked by the host environment
pub trait UsbDriver {
    /// Host-side handle to a physical device
    type Device;

    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    /// Devices the adapter should hand to this driver
    fn id_table(&self) -> &'static [DeviceIdEntry];

    /// A matching device appeared
    fn attach(
        &mut self,
        key: DeviceKey,
        device: Arc<Self::Device>,
        identity: DeviceIdentity,
        endpoints: &[EndpointDescriptor],
    ) -> Result<(), AttachError>;

    /// The device went away or the driver is unloading
    fn detach(&mut self, key: &DeviceKey);

    /// A bus reset is about to happen
    fn pre_reset(&mut self, key: &DeviceKey) -> ResetOutcome;

    /// The bus reset finished
    fn post_reset(&mut self, key: &DeviceKey) -> ResetOutcome;
}

impl<D> UsbDriver for SessionManager<D> {
    type Device = D;

    fn id_table(&self) -> &'static [DeviceIdEntry] {
        &DEVICE_TABLE
    }

    fn attach(
        &mut self,
        key: DeviceKey,
        device: Arc<D>,
        identity: DeviceIdentity,
        endpoints: &[EndpointDescriptor],
    ) -> Result<(), AttachError> {
        SessionManager::attach(self, key, device, identity, endpoints).map(|_| ())
    }

    fn detach(&mut self, key: &DeviceKey) {
        SessionManager::detach(self, key);
    }

    fn pre_reset(&mut self, key: &DeviceKey) -> ResetOutcome {
        SessionManager::pre_reset(self, key)
    }

    fn post_reset(&mut self, key: &DeviceKey) -> ResetOutcome {
        SessionManager::post_reset(self, key)
    }
}
