//! ledlink CLI configuration
//!
//! Configuration is layered with figment, lowest priority first:
//! - built-in defaults
//! - `ledlink.toml` in the working directory
//! - `~/.ledlink/config.toml`, or the file given with `--config`
//! - `LEDLINK_` environment variables, nested with `__`
//!   (`LEDLINK_SESSION__AUTO_RECONNECT=false`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use ledlink_ble::BleAdapterConfig;
use ledlink_core::ControllerConfig;

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "ledlink.toml";

/// Directory under the home directory holding config and remembered device
pub const DEFAULT_DATA_DIR: &str = ".ledlink";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the ledlink CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Controller timing
    pub controller: ControllerConfig,
    /// Host adapter and scanning
    pub ble: BleAdapterConfig,
    /// Interactive session behaviour
    pub session: SessionConfig,
}

/// Interactive session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reconnect to the remembered device after an unrequested disconnect
    pub auto_reconnect: bool,
    /// Delay before reconnecting
    pub reconnect_delay: Duration,
    /// Remember the last compatible device
    pub remember_device: bool,
    /// Where the remembered device is stored (defaults to `~/.ledlink`)
    pub data_dir: Option<PathBuf>,
    /// Prompt shown in interactive mode
    pub prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(2),
            remember_device: true,
            data_dir: None,
            prompt: "led> ".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load the layered configuration; `path` replaces the home config file
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(LOCAL_CONFIG_FILE));

        match path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(ConfigError::FileSystem(format!(
                        "Config file not found: {}",
                        path
                    )));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(home_config) = Self::default_config_path() {
                    figment = figment.merge(Toml::file(home_config));
                }
            }
        }

        Self::extract(figment.merge(Env::prefixed("LEDLINK_").split("__")))
    }

    /// Extract and validate a configuration from an assembled figment
    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.ledlink/config.toml`, if a home directory is known
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_DATA_DIR).join("config.toml"))
    }

    /// Directory holding the remembered device
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.session.data_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_DATA_DIR))
            .ok_or_else(|| ConfigError::Environment("No home directory".to_string()))
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        self.ble
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.session.auto_reconnect && self.session.reconnect_delay.is_zero() {
            return Err(ConfigError::Validation(
                "reconnect_delay must be greater than 0 when auto_reconnect is set".to_string(),
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("File system error: {0}")]
    FileSystem(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Loading(err.to_string())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
