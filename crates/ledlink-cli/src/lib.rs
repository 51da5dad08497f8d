//! ledlink CLI library
//!
//! Command parsing, layered configuration, the remembered device and the
//! interactive session that sit on top of [`ledlink_core::LedController`].

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod state;

pub use app::{LedApp, SessionInput};
pub use cli::{Cli, Commands, LedSwitch};
pub use config::{AppConfig, ConfigError, SessionConfig};
pub use error::{CliError, Result};
pub use state::{DeviceStore, RememberedDevice};
