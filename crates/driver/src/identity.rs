//! Device identity classification
//!
//! Every device the driver can be handed is listed in [`DEVICE_TABLE`], each
//! row tagged with its support tier when the table is defined. Classifying a
//! device is a pure lookup.

use std::fmt;

/// Negotiated bus speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSpeed {
    /// Low speed - 1.5 Mbps
    Low,
    /// Full speed - 12 Mbps
    Full,
    /// High speed - 480 Mbps
    High,
    /// Anything else the host reports
    Unknown,
}

impl DeviceSpeed {
    /// Label used in the identity string
    pub fn label(self) -> &'static str {
        match self {
            DeviceSpeed::Low => "low",
            DeviceSpeed::Full => "full",
            DeviceSpeed::High => "high",
            DeviceSpeed::Unknown => "unknown speed",
        }
    }
}

impl fmt::Display for DeviceSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Support tier of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Ubertooth One, the only model sessions are built for
    Recognized,
    /// Ubertooth Zero and prototype ids
    UnrecognizedRevision,
    /// DFU bootloader
    BootloaderMode,
}

impl Classification {
    /// Diagnostic message when this tier refuses attach, `None` for recognized devices
    pub fn rejection(self) -> Option<&'static str> {
        match self {
            Classification::Recognized => None,
            Classification::UnrecognizedRevision => Some("Model not yet supported"),
            Classification::BootloaderMode => Some("Bootloader mode not yet supported"),
        }
    }
}

/// One row of the id table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub classification: Classification,
}

impl DeviceIdEntry {
    const fn new(vendor_id: u16, product_id: u16, classification: Classification) -> Self {
        Self {
            vendor_id,
            product_id,
            classification,
        }
    }
}

/// Devices the driver matches
pub const DEVICE_TABLE: [DeviceIdEntry; 5] = [
    DeviceIdEntry::new(0x1d50, 0x6000, Classification::UnrecognizedRevision),
    DeviceIdEntry::new(0x1d50, 0x6001, Classification::UnrecognizedRevision),
    DeviceIdEntry::new(0x1d50, 0x6002, Classification::Recognized),
    DeviceIdEntry::new(0x1d50, 0x6003, Classification::BootloaderMode),
    DeviceIdEntry::new(0xffff, 0x0004, Classification::UnrecognizedRevision),
];

/// Look up the classification of a vendor/product pair
pub fn lookup(vendor_id: u16, product_id: u16) -> Option<Classification> {
    DEVICE_TABLE
        .iter()
        .find(|entry| entry.vendor_id == vendor_id && entry.product_id == product_id)
        .map(|entry| entry.classification)
}

/// Whether the pair appears in the id table at all
pub fn is_supported_id(vendor_id: u16, product_id: u16) -> bool {
    lookup(vendor_id, product_id).is_some()
}

/// Read-only view of the descriptor fields of an attached device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice
    pub revision: u16,
    pub speed: DeviceSpeed,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16, revision: u16, speed: DeviceSpeed) -> Self {
        Self {
            vendor_id,
            product_id,
            revision,
            speed,
        }
    }

    /// Classify against [`DEVICE_TABLE`]
    ///
    /// Returns `None` for ids outside the table. Adapters never hand such
    /// devices to the driver, callers treat `None` as unsupported.
    pub fn classify(&self) -> Option<Classification> {
        lookup(self.vendor_id, self.product_id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} v{:04x} {}",
            self.vendor_id, self.product_id, self.revision, self.speed
        )
    }
}
