//! Domain types shared by the controller and its observers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LedError;

// ----------------------------------------------------------------------------
// Peripheral Identity
// ----------------------------------------------------------------------------

/// Transport-level address of a peripheral.
///
/// Opaque to the core: the BLE adapter fills it with the device address,
/// the simulated peripheral with whatever name the test picks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralIdentity(String);

impl PeripheralIdentity {
    /// Create an identity from an address string
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralIdentity {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for PeripheralIdentity {
    fn from(address: String) -> Self {
        Self(address)
    }
}

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Lifecycle state of the managed peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    DiscoveringServices,
    Ready,
    Incompatible,
    ConnectionFailed,
}

impl ConnectionState {
    /// Get current state name for logging
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::DiscoveringServices => "DiscoveringServices",
            ConnectionState::Ready => "Ready",
            ConnectionState::Incompatible => "Incompatible",
            ConnectionState::ConnectionFailed => "ConnectionFailed",
        }
    }

    /// Whether a link to the peer is held or being established
    pub fn holds_link(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::DiscoveringServices
                | ConnectionState::Ready
        )
    }

    /// Whether the current attempt is still waiting for its verdict
    pub fn is_verifying(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::DiscoveringServices
        )
    }

    /// Whether the attempt has finished (only disconnect/connect move on)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Ready
                | ConnectionState::Incompatible
                | ConnectionState::ConnectionFailed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

// ----------------------------------------------------------------------------
// Published Events
// ----------------------------------------------------------------------------

/// Emitted on the lifecycle channel for every state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub state: ConnectionState,
    pub peer: Option<PeripheralIdentity>,
}

/// The compatibility decision for one connection attempt.
///
/// Exactly one is published per `connect()` that starts an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub peer: PeripheralIdentity,
    pub is_compatible: bool,
    /// Why the peer was judged incompatible; `None` when compatible
    pub reason: Option<LedError>,
}

impl VerificationOutcome {
    pub(crate) fn compatible(peer: PeripheralIdentity) -> Self {
        Self {
            peer,
            is_compatible: true,
            reason: None,
        }
    }

    pub(crate) fn incompatible(peer: PeripheralIdentity, reason: LedError) -> Self {
        Self {
            peer,
            is_compatible: false,
            reason: Some(reason),
        }
    }
}

// ----------------------------------------------------------------------------
// LED Value Codec
// ----------------------------------------------------------------------------

/// Decode an LED payload: first byte, `0` is off, anything else is on.
///
/// Returns `None` for an empty payload.
pub fn decode_led(payload: &[u8]) -> Option<bool> {
    payload.first().map(|byte| *byte != 0)
}

/// Encode an LED value as the single byte the peripheral accepts
pub fn encode_led(on: bool) -> [u8; 1] {
    [u8::from(on)]
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_state_classification() {
        assert!(!ConnectionState::Disconnected.holds_link());
        assert!(ConnectionState::Ready.holds_link());
        assert!(ConnectionState::Ready.is_terminal());
        assert!(!ConnectionState::Ready.is_verifying());
        assert!(ConnectionState::DiscoveringServices.is_verifying());
        assert!(!ConnectionState::Incompatible.holds_link());
        assert!(ConnectionState::ConnectionFailed.is_terminal());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_led_codec() {
        assert_eq!(encode_led(true), [1]);
        assert_eq!(encode_led(false), [0]);
        assert_eq!(decode_led(&[0]), Some(false));
        assert_eq!(decode_led(&[]), None);
        // Only the first byte counts
        assert_eq!(decode_led(&[0, 1]), Some(false));
    }

    #[test]
    fn test_identity_display() {
        let peer = PeripheralIdentity::from("AA:BB:CC:DD:EE:FF");
        assert_eq!(peer.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(peer.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    proptest! {
        #[test]
        fn nonzero_first_byte_is_on(first in 1u8..=255, rest in proptest::collection::vec(any::<u8>(), 0..8)) {
            let mut payload = vec![first];
            payload.extend(rest);
            prop_assert_eq!(decode_led(&payload), Some(true));
        }
    }
}
