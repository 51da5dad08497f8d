//! Error handling for the ledlink CLI

use thiserror::Error;

use ledlink_core::PeripheralIdentity;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("LED controller error: {0}")]
    Led(#[from] ledlink_core::LedError),

    #[error("BLE error: {0}")]
    Ble(#[from] ledlink_ble::BleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("State persistence error: {0}")]
    StatePersistence(String),

    #[error("{peer} is not an LED peripheral: {reason}")]
    Incompatible {
        peer: PeripheralIdentity,
        reason: String,
    },

    #[error("No device given and none remembered; run `ledlink scan` first")]
    NoDevice,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
