//! GATT schema model as reported by service discovery

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::PeripheralIdentity;

// ----------------------------------------------------------------------------
// Characteristic Capabilities
// ----------------------------------------------------------------------------

/// Declared properties of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Properties of the LED characteristic: read, write and indicate
    pub const fn read_write_indicate() -> Self {
        Self {
            read: true,
            write: true,
            write_without_response: false,
            notify: false,
            indicate: true,
        }
    }

    /// Check a single capability
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Read => self.read,
            Capability::Write => self.write,
            Capability::Indicate => self.indicate,
        }
    }
}

/// A capability the compatibility schema can require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Read,
    Write,
    Indicate,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::Indicate => "indicate",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Discovered Schema
// ----------------------------------------------------------------------------

/// A characteristic found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// A service found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    /// Find a characteristic of this service by UUID
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

// ----------------------------------------------------------------------------
// Characteristic Handle
// ----------------------------------------------------------------------------

/// Handle to the verified LED characteristic.
///
/// Only the compatibility check creates one; the controller drops it when
/// the link goes away, so holding a handle means the capabilities were
/// checked against this peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    peer: PeripheralIdentity,
    service: Uuid,
    characteristic: Uuid,
}

impl CharacteristicHandle {
    pub(crate) fn new(peer: PeripheralIdentity, service: Uuid, characteristic: Uuid) -> Self {
        Self {
            peer,
            service,
            characteristic,
        }
    }

    /// Peer the characteristic lives on
    pub fn peer(&self) -> &PeripheralIdentity {
        &self.peer
    }

    /// UUID of the owning service
    pub fn service(&self) -> Uuid {
        self.service
    }

    /// UUID of the characteristic
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    /// Whether an indication from `peer` on `characteristic` targets this handle
    pub fn matches(&self, peer: &PeripheralIdentity, characteristic: Uuid) -> bool {
        self.peer == *peer && self.characteristic == characteristic
    }
}
