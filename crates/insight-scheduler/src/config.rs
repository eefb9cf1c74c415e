//! Scheduler configuration.

use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Scheduler-wide settings.
///
/// Individual jobs may override the timezone when they are registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone used when a job does not name one.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// How long shutdown waits for running jobs before stopping anyway.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl SchedulerConfig {
    #[cfg(feature = "jobs")]
    pub fn from_settings(settings: &insight_types::SchedulerSettings) -> Self {
        Self {
            default_timezone: settings.timezone.clone(),
            shutdown_timeout_secs: settings.shutdown_timeout_secs,
        }
    }

    pub fn parse_timezone(&self) -> Result<Tz, SchedulerError> {
        self.default_timezone
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(self.default_timezone.clone()))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.default_timezone, "UTC");
        assert_eq!(config.shutdown_timeout_secs, 30);
        assert_eq!(config.parse_timezone().unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn test_named_timezone() {
        let config = SchedulerConfig {
            default_timezone: "Europe/Berlin".to_string(),
            ..Default::default()
        };
        assert_eq!(config.parse_timezone().unwrap(), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn test_invalid_timezone() {
        let config = SchedulerConfig {
            default_timezone: "Mars/Olympus_Mons".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.parse_timezone(),
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_serde_defaults() {
        let config: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.default_timezone, "UTC");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    }

    #[cfg(feature = "jobs")]
    #[test]
    fn test_from_settings() {
        let settings = insight_types::SchedulerSettings {
            timezone: "America/New_York".to_string(),
            shutdown_timeout_secs: 5,
            ..Default::default()
        };
        let config = SchedulerConfig::from_settings(&settings);
        assert_eq!(config.default_timezone, "America/New_York");
        assert_eq!(config.shutdown_timeout_secs, 5);
    }
}
