//! Conversions between btleplug and the controller's transport model

use std::collections::BTreeSet;

use btleplug::api::{BDAddr, CharPropFlags, Characteristic, Service};
use btleplug::platform::PeripheralId;
use ledlink_core::{
    CharacteristicProperties, GattCharacteristic, GattService, PeripheralIdentity, TransportError,
};

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// Stable identity for a peripheral.
///
/// The MAC address where the platform exposes one; CoreBluetooth reports an
/// all-zero address, so fall back to the platform identifier there.
pub fn identity_for(address: BDAddr, id: &PeripheralId) -> PeripheralIdentity {
    if address.into_inner() == [0u8; 6] {
        PeripheralIdentity::new(format!("{:?}", id))
    } else {
        PeripheralIdentity::new(address.to_string())
    }
}

// ----------------------------------------------------------------------------
// GATT Model
// ----------------------------------------------------------------------------

pub fn to_properties(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

pub fn to_characteristic(characteristic: &Characteristic) -> GattCharacteristic {
    GattCharacteristic {
        uuid: characteristic.uuid,
        properties: to_properties(characteristic.properties),
    }
}

/// Convert a discovered service table
pub fn to_services(services: &BTreeSet<Service>) -> Vec<GattService> {
    services
        .iter()
        .map(|service| GattService {
            uuid: service.uuid,
            primary: service.primary,
            characteristics: service.characteristics.iter().map(to_characteristic).collect(),
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Error Mapping
// ----------------------------------------------------------------------------

/// Map a failure while establishing a link
pub fn link_error(err: btleplug::Error, peer: &PeripheralIdentity) -> TransportError {
    match err {
        btleplug::Error::DeviceNotFound => TransportError::PeripheralNotFound(peer.clone()),
        btleplug::Error::TimedOut(_) => TransportError::Timeout,
        btleplug::Error::PermissionDenied => {
            TransportError::Unavailable("Bluetooth permission denied".to_string())
        }
        other => TransportError::Rejected(other.to_string()),
    }
}

/// Map a failure of an operation on an established link
pub fn att_error(err: btleplug::Error, peer: &PeripheralIdentity) -> TransportError {
    match err {
        btleplug::Error::DeviceNotFound => TransportError::PeripheralNotFound(peer.clone()),
        btleplug::Error::NotConnected => TransportError::NotConnected,
        btleplug::Error::TimedOut(_) => TransportError::Timeout,
        btleplug::Error::PermissionDenied => {
            TransportError::Unavailable("Bluetooth permission denied".to_string())
        }
        other => TransportError::Att(other.to_string()),
    }
}

/// Case-insensitive advertised-name match
pub fn name_matches(name: Option<&str>, filter: &str) -> bool {
    name.is_some_and(|name| name.to_lowercase().contains(&filter.to_lowercase()))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
