//! BLE adapter configuration

use std::time::Duration;

use crate::error::{BleError, Result};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the host BLE adapter
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BleAdapterConfig {
    /// How long a scan listens for advertisements
    pub scan_duration: Duration,
    /// Which host adapter to use when several are present
    pub adapter_index: usize,
    /// Only report advertisers whose name contains this (case-insensitive)
    pub name_filter: Option<String>,
    /// Report advertisers without a local name
    pub include_unnamed: bool,
}

impl Default for BleAdapterConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(5),
            adapter_index: 0,
            name_filter: None,
            include_unnamed: false,
        }
    }
}

impl BleAdapterConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set scan duration
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Select the host adapter
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set the advertised-name filter
    pub fn with_name_filter(mut self, filter: impl Into<String>) -> Self {
        self.name_filter = Some(filter.into());
        self
    }

    /// Include or exclude advertisers without a name
    pub fn with_include_unnamed(mut self, include: bool) -> Self {
        self.include_unnamed = include;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_duration.is_zero() {
            return Err(BleError::InvalidConfig(
                "scan_duration must be greater than 0".to_string(),
            ));
        }
        if self.name_filter.as_deref().is_some_and(str::is_empty) {
            return Err(BleError::InvalidConfig(
                "name_filter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = BleAdapterConfig::default();
        assert_eq!(config.scan_duration, Duration::from_secs(5));
        assert_eq!(config.adapter_index, 0);
        assert_eq!(config.name_filter, None);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_validation() {
        assert_err!(BleAdapterConfig::new()
            .with_scan_duration(Duration::ZERO)
            .validate());
        assert_err!(BleAdapterConfig::new().with_name_filter("").validate());
        assert_ok!(BleAdapterConfig::new().with_name_filter("LED").validate());
    }
}
