//! Controller configuration

use std::time::Duration;

use crate::error::{LedError, Result};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Timing and capacity settings for the LED controller
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Timeout for a single link establishment attempt
    pub link_timeout: Duration,
    /// Number of link establishment attempts before giving up
    pub link_attempts: u32,
    /// Fixed delay between link establishment attempts
    pub link_backoff: Duration,
    /// Absolute deadline for the compatibility verdict, armed at connect
    pub verification_deadline: Duration,
    /// Timeout applied to each read, write and subscribe
    pub operation_timeout: Duration,
    /// Capacity of the command queue and the broadcast channels
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            link_timeout: Duration::from_secs(5),
            link_attempts: 3,
            link_backoff: Duration::from_secs(2),
            verification_deadline: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(5),
            event_capacity: 32,
        }
    }
}

impl ControllerConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-attempt link timeout
    pub fn with_link_timeout(mut self, timeout: Duration) -> Self {
        self.link_timeout = timeout;
        self
    }

    /// Set the number of link attempts
    pub fn with_link_attempts(mut self, attempts: u32) -> Self {
        self.link_attempts = attempts;
        self
    }

    /// Set the delay between link attempts
    pub fn with_link_backoff(mut self, backoff: Duration) -> Self {
        self.link_backoff = backoff;
        self
    }

    /// Set the verdict deadline
    pub fn with_verification_deadline(mut self, deadline: Duration) -> Self {
        self.verification_deadline = deadline;
        self
    }

    /// Set the read/write/subscribe timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.link_attempts == 0 {
            return Err(LedError::InvalidConfig(
                "link_attempts must be greater than 0".to_string(),
            ));
        }
        if self.link_timeout.is_zero() {
            return Err(LedError::InvalidConfig(
                "link_timeout must be greater than 0".to_string(),
            ));
        }
        if self.verification_deadline.is_zero() {
            return Err(LedError::InvalidConfig(
                "verification_deadline must be greater than 0".to_string(),
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err(LedError::InvalidConfig(
                "operation_timeout must be greater than 0".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(LedError::InvalidConfig(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_link_policy() {
        let config = ControllerConfig::default();
        assert_eq!(config.link_timeout, Duration::from_secs(5));
        assert_eq!(config.link_attempts, 3);
        assert_eq!(config.link_backoff, Duration::from_secs(2));
        assert_eq!(config.verification_deadline, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        assert!(ControllerConfig::new().with_link_attempts(0).validate().is_err());
        assert!(ControllerConfig::new()
            .with_verification_deadline(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ControllerConfig::new().with_event_capacity(0).validate().is_err());
    }
}
