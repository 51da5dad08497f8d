//! Connection and compatibility core for a BLE LED-control peripheral
//!
//! This crate holds everything about talking to the LED peripheral that does
//! not depend on a particular Bluetooth stack:
//!
//! - [`controller`] - the [`LedController`] handle and its task
//! - [`schema`] - the LED service contract and the compatibility check
//! - [`transport`] - the [`GattTransport`] trait a host stack implements
//! - [`mock`] - an in-memory peripheral running the LED firmware
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ledlink_core::{mock::SimulatedPeripheral, ControllerConfig, LedController};
//!
//! # async fn example() -> ledlink_core::Result<()> {
//! let (peripheral, events) = SimulatedPeripheral::builder("sim-led").build();
//! let (controller, _task) =
//!     LedController::spawn(peripheral.clone(), events, ControllerConfig::default())?;
//!
//! let outcome = controller.connect_and_wait("sim-led").await?;
//! if outcome.is_compatible {
//!     controller.toggle().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod gatt;
mod logic;
pub mod mock;
pub mod schema;
pub mod transport;
pub mod types;

pub use config::ControllerConfig;
pub use controller::LedController;
pub use error::{LedError, OperationFailure, Result};
pub use gatt::{
    Capability, CharacteristicHandle, CharacteristicProperties, GattCharacteristic, GattService,
};
pub use logic::ControllerStats;
pub use schema::{CompatibilitySchema, LED_CHARACTERISTIC_UUID, LED_SCHEMA, LED_SERVICE_UUID};
pub use transport::{
    transport_event_channel, GattTransport, TransportError, TransportEvent,
    TransportEventReceiver, TransportEventSender,
};
pub use types::{
    decode_led, encode_led, ConnectionState, LifecycleEvent, PeripheralIdentity,
    VerificationOutcome,
};
