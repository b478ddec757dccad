//! Endpoint descriptors as the driver sees them

/// Endpoint direction relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Direction encoded in bit 7 of an endpoint address
    pub fn from_address(address: u8) -> Self {
        if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Transfer type, collapsed to what the driver distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Bulk,
    Control,
    /// Interrupt and isochronous
    Other,
}

/// Copy of one endpoint descriptor from the active interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub direction: Direction,
    pub transfer_kind: TransferKind,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    /// Build a descriptor, taking the direction from the address
    pub fn new(address: u8, transfer_kind: TransferKind, max_packet_size: u16) -> Self {
        Self {
            address,
            direction: Direction::from_address(address),
            transfer_kind,
            max_packet_size,
        }
    }

    pub fn is_bulk_in(&self) -> bool {
        self.transfer_kind == TransferKind::Bulk && self.direction == Direction::In
    }

    pub fn is_bulk_out(&self) -> bool {
        self.transfer_kind == TransferKind::Bulk && self.direction == Direction::Out
    }

    pub fn is_control(&self) -> bool {
        self.transfer_kind == TransferKind::Control
    }
}
