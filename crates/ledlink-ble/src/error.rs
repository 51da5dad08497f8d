//! Error types for the BLE adapter

use ledlink_core::TransportError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BLE adapter
#[derive(Error, Debug)]
pub enum BleError {
    #[error("Failed to create BLE manager: {0}")]
    ManagerFailed(String),

    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Failed to scan: {0}")]
    ScanFailed(String),

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),

    #[error("Failed to get notifications stream: {0}")]
    NotificationStreamFailed(String),

    #[error("Invalid adapter configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for BLE adapter operations
pub type Result<T> = std::result::Result<T, BleError>;

impl From<BleError> for TransportError {
    fn from(err: BleError) -> Self {
        TransportError::Unavailable(err.to_string())
    }
}
