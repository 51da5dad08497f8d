//! Bluetooth Low Energy adapter for the ledlink LED controller
//!
//! This crate connects [`ledlink_core::LedController`] to a real radio
//! through `btleplug` in the central role.
//!
//! - [`config`] - adapter selection and scan settings
//! - [`error`] - error types specific to the adapter
//! - [`protocol`] - conversions from btleplug types and errors
//! - [`discovery`] - adapter initialisation and scanning
//! - [`transport`] - the [`GattTransport`](ledlink_core::GattTransport) implementation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ledlink_ble::{initialize_adapter, BleAdapterConfig, BleTransport};
//! use ledlink_core::{ControllerConfig, LedController};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BleAdapterConfig::default();
//! let adapter = initialize_adapter(&config).await?;
//! let (transport, events) = BleTransport::new(adapter, config).await?;
//!
//! let (controller, _task) = LedController::spawn(transport, events, ControllerConfig::default())?;
//! let outcome = controller.connect_and_wait("AA:BB:CC:DD:EE:FF").await?;
//! println!("compatible: {}", outcome.is_compatible);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod transport;

pub use config::BleAdapterConfig;
pub use discovery::{initialize_adapter, BleScanner, ScannedDevice};
pub use error::{BleError, Result};
pub use transport::BleTransport;
