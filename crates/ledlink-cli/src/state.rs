//! Remembered device persistence for the ledlink CLI

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ledlink_core::PeripheralIdentity;

use crate::error::{CliError, Result};

const DEVICE_FILE: &str = "device.toml";

/// The last peripheral that passed the compatibility check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberedDevice {
    pub identity: PeripheralIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RememberedDevice {
    pub fn new(identity: PeripheralIdentity, name: Option<String>) -> Self {
        Self { identity, name }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.identity.as_str())
    }
}

/// `device.toml` inside the data directory
#[derive(Debug, Clone)]
pub struct DeviceStore {
    path: PathBuf,
}

impl DeviceStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(DEVICE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the remembered device, if any
    pub fn load(&self) -> Result<Option<RememberedDevice>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            CliError::StatePersistence(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let device = toml::from_str(&contents)?;
        Ok(Some(device))
    }

    pub fn save(&self, device: &RememberedDevice) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CliError::StatePersistence(format!("Failed to create data directory: {}", e))
            })?;
        }

        let contents = toml::to_string_pretty(device)?;
        std::fs::write(&self.path, contents).map_err(|e| {
            CliError::StatePersistence(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        debug!("Remembered {} in {}", device.identity, self.path.display());
        Ok(())
    }

    /// Remove the remembered device; returns whether one was stored
    pub fn forget(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&self.path)?;
        info!("Forgot remembered device");
        Ok(true)
    }
}
