//! Error types for the LED controller

use thiserror::Error;
use uuid::Uuid;

use crate::gatt::Capability;
use crate::transport::TransportError;
use crate::types::{ConnectionState, PeripheralIdentity};

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Why a characteristic read or write did not complete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationFailure {
    #[error("operation timed out")]
    Timeout,

    #[error("characteristic handle absent")]
    HandleAbsent,

    #[error("peripheral returned an empty payload")]
    EmptyPayload,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors surfaced by the LED controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedError {
    #[error("Link establishment timed out")]
    LinkTimeout,

    #[error("Link rejected: {0}")]
    LinkRejected(String),

    #[error("Link lost: {0}")]
    LinkLost(String),

    #[error("Service discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Required service not found: {0}")]
    ServiceMissing(Uuid),

    #[error("Required characteristic not found: {0}")]
    CharacteristicMissing(Uuid),

    #[error("Characteristic {characteristic} lacks required capabilities: {}", capability_list(.missing))]
    CapabilityMissing {
        characteristic: Uuid,
        missing: Vec<Capability>,
    },

    #[error("No compatibility verdict before the deadline")]
    DeadlineElapsed,

    #[error("Read failed: {0}")]
    ReadFailed(OperationFailure),

    #[error("Write failed: {0}")]
    WriteFailed(OperationFailure),

    #[error("Failed to enable indications: {0}")]
    SubscribeFailed(String),

    #[error("Operation cancelled")]
    OperationCancelled,

    #[error("Already connecting to {current}")]
    AlreadyConnecting { current: PeripheralIdentity },

    #[error("Peripheral not ready (state: {0})")]
    NotReady(ConnectionState),

    #[error("Controller task has stopped")]
    ControllerClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, LedError>;

fn capability_list(missing: &[Capability]) -> String {
    missing
        .iter()
        .map(|capability| capability.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_message_lists_every_missing_capability() {
        let err = LedError::CapabilityMissing {
            characteristic: Uuid::nil(),
            missing: vec![Capability::Write, Capability::Indicate],
        };
        assert!(err.to_string().ends_with("write, indicate"));
    }

    #[test]
    fn test_transport_failure_is_wrapped() {
        let failure: OperationFailure = TransportError::NotConnected.into();
        assert_eq!(
            LedError::ReadFailed(failure).to_string(),
            "Read failed: peripheral not connected"
        );
    }
}
