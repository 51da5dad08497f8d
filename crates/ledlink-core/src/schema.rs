//! LED service contract and the compatibility check
//!
//! The peripheral must expose service `0xFFF0` with characteristic `0xFFF1`
//! supporting read, write and indicate. The check is pure: it looks only at
//! the discovered services and never performs I/O.

use uuid::Uuid;

use crate::error::{LedError, Result};
use crate::gatt::{Capability, CharacteristicHandle, GattService};
use crate::types::PeripheralIdentity;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// LED control service UUID (16-bit `0xFFF0` on the Bluetooth base UUID)
pub const LED_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FFF0_0000_1000_8000_00805F9B34FB);

/// LED state characteristic UUID (16-bit `0xFFF1` on the Bluetooth base UUID)
pub const LED_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000FFF1_0000_1000_8000_00805F9B34FB);

/// The contract a peripheral has to satisfy
pub const LED_SCHEMA: CompatibilitySchema = CompatibilitySchema {
    service: LED_SERVICE_UUID,
    characteristic: LED_CHARACTERISTIC_UUID,
    required: &[Capability::Read, Capability::Write, Capability::Indicate],
};

// ----------------------------------------------------------------------------
// Compatibility Verifier
// ----------------------------------------------------------------------------

/// Required service, characteristic and capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatibilitySchema {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub required: &'static [Capability],
}

impl CompatibilitySchema {
    /// Check the discovered services against this schema.
    ///
    /// On success returns the handle to the required characteristic; on
    /// failure the error says which part of the contract is missing.
    pub fn verify(
        &self,
        peer: &PeripheralIdentity,
        services: &[GattService],
    ) -> Result<CharacteristicHandle> {
        let service = services
            .iter()
            .find(|s| s.uuid == self.service)
            .ok_or(LedError::ServiceMissing(self.service))?;

        let characteristic = service
            .characteristic(self.characteristic)
            .ok_or(LedError::CharacteristicMissing(self.characteristic))?;

        let missing: Vec<Capability> = self
            .required
            .iter()
            .copied()
            .filter(|capability| !characteristic.properties.supports(*capability))
            .collect();
        if !missing.is_empty() {
            return Err(LedError::CapabilityMissing {
                characteristic: self.characteristic,
                missing,
            });
        }

        Ok(CharacteristicHandle::new(
            peer.clone(),
            service.uuid,
            characteristic.uuid,
        ))
    }

    /// Boolean form of [`CompatibilitySchema::verify`]
    pub fn is_compatible(&self, services: &[GattService]) -> bool {
        self.verify(&PeripheralIdentity::new(""), services).is_ok()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
