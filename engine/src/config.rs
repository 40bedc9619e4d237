//! Configuration management for the monitoring engine
//!
//! Configuration is read from a TOML file, then overridden by
//! `SAAS_MONITOR_*` environment variables, then validated.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Longest accepted retention horizon (100 years)
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Longest accepted collection interval (one week)
pub const MAX_COLLECT_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Longest accepted slow query window (one week)
pub const MAX_SLOW_QUERY_WINDOW_MINUTES: u64 = 7 * 24 * 60;

/// Main configuration structure for the monitoring engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    /// Scheduling, retention and alerting
    pub monitoring: MonitoringConfig,

    /// Collection sweep tuning
    pub collection: CollectionConfig,

    /// Metric store location
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Engine telemetry
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Minutes between collection sweeps
    pub collect_interval_minutes: u64,

    /// Samples and log entries older than this many days are deleted
    pub retention_days: u32,

    /// Alert evaluation settings
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Master switch for the evaluation pass
    pub enabled: bool,

    /// CPU threshold in percent. Informational: validated and exposed to
    /// operators, but evaluation only uses the stored alert rules.
    pub cpu_threshold: f64,

    /// Memory threshold in percent. Informational, not read by evaluation.
    pub memory_threshold: f64,

    /// Disk threshold in percent. Informational, not read by evaluation.
    pub disk_threshold: f64,

    /// Connection utilization threshold in percent. Informational, not read
    /// by evaluation.
    pub connection_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// How many of the largest tables to report per source
    pub top_objects_limit: usize,

    /// Trailing window for slow query statistics
    pub slow_query_window_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (plain, json)
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Record engine counters in the prometheus registry
    pub enabled: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            collect_interval_minutes: 5,
            retention_days: 30,
            alerts: AlertsConfig::default(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: 80.0,
            memory_threshold: 85.0,
            disk_threshold: 90.0,
            connection_threshold: 80.0,
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            top_objects_limit: 20,
            slow_query_window_minutes: 60,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let path = dirs::data_dir()
            .map(|dir| dir.join("saas-monitor").join("monitor.db"))
            .unwrap_or_else(|| PathBuf::from("saas-monitor.db"));
        Self { path }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl MonitoringConfig {
    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_minutes.saturating_mul(60))
    }
}

impl CollectionConfig {
    pub fn slow_query_window(&self) -> Duration {
        Duration::from_secs(self.slow_query_window_minutes.saturating_mul(60))
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.to_string_lossy().to_string() })?;

        let config: MonitorConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Load defaults overridden by environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = MonitorConfig::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback order: file -> env -> defaults
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = MonitorConfig::default();

        if let Some(path) = config_path {
            if path.as_ref().exists() {
                config = MonitorConfig::from_file(path)?;
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SAAS_MONITOR_*` overrides resolved through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SAAS_MONITOR_COLLECT_INTERVAL_MINUTES") {
            self.monitoring.collect_interval_minutes = parse_override("SAAS_MONITOR_COLLECT_INTERVAL_MINUTES", value)?;
        }

        if let Some(value) = lookup("SAAS_MONITOR_RETENTION_DAYS") {
            self.monitoring.retention_days = parse_override("SAAS_MONITOR_RETENTION_DAYS", value)?;
        }

        if let Some(value) = lookup("SAAS_MONITOR_ALERTS_ENABLED") {
            self.monitoring.alerts.enabled = parse_override("SAAS_MONITOR_ALERTS_ENABLED", value)?;
        }

        if let Some(value) = lookup("SAAS_MONITOR_STORE_PATH") {
            self.store.path = PathBuf::from(value);
        }

        if let Some(value) = lookup("SAAS_MONITOR_LOG_LEVEL") {
            self.logging.level = value;
        }

        if let Some(value) = lookup("SAAS_MONITOR_LOG_FORMAT") {
            self.logging.format = value;
        }

        if let Some(value) = lookup("SAAS_MONITOR_TELEMETRY_ENABLED") {
            self.telemetry.enabled = parse_override("SAAS_MONITOR_TELEMETRY_ENABLED", value)?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.monitoring.collect_interval_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitoring.collect_interval_minutes".to_string(),
                value: "0".to_string(),
            });
        }

        if self.monitoring.collect_interval_minutes > MAX_COLLECT_INTERVAL_MINUTES {
            return Err(ConfigError::InvalidValue {
                field: "monitoring.collect_interval_minutes".to_string(),
                value: self.monitoring.collect_interval_minutes.to_string(),
            });
        }

        if self.monitoring.retention_days == 0 || self.monitoring.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::InvalidValue {
                field: "monitoring.retention_days".to_string(),
                value: self.monitoring.retention_days.to_string(),
            });
        }

        let alerts = &self.monitoring.alerts;
        for (field, value) in [
            ("monitoring.alerts.cpu_threshold", alerts.cpu_threshold),
            ("monitoring.alerts.memory_threshold", alerts.memory_threshold),
            ("monitoring.alerts.disk_threshold", alerts.disk_threshold),
            ("monitoring.alerts.connection_threshold", alerts.connection_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }

        if self.collection.slow_query_window_minutes == 0
            || self.collection.slow_query_window_minutes > MAX_SLOW_QUERY_WINDOW_MINUTES
        {
            return Err(ConfigError::InvalidValue {
                field: "collection.slow_query_window_minutes".to_string(),
                value: self.collection.slow_query_window_minutes.to_string(),
            });
        }

        if self.collection.top_objects_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collection.top_objects_limit".to_string(),
                value: "0".to_string(),
            });
        }

        if !matches!(self.logging.format.as_str(), "plain" | "json") {
            return Err(ConfigError::InvalidValue {
                field: "logging.format".to_string(),
                value: self.logging.format.clone(),
            });
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("saas-monitor").join("monitor.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::ValidationFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content)
            .map_err(|_| ConfigError::PermissionDenied { path: path.to_string_lossy().to_string() })?;

        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(field: &str, value: String) -> ConfigResult<T> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitoring.collect_interval_minutes, 5);
        assert_eq!(config.monitoring.retention_days, 30);
        assert_eq!(config.collection.top_objects_limit, 20);
        assert_eq!(config.monitoring.collect_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_config_validation() {
        let mut config = MonitorConfig::default();
        config.monitoring.retention_days = 0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.monitoring.collect_interval_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.monitoring.alerts.disk_threshold = 120.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "monitoring.alerts.disk_threshold"
        ));

        let mut config = MonitorConfig::default();
        config.collection.top_objects_limit = 0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upper_bounds() {
        let mut config = MonitorConfig::default();
        config.monitoring.retention_days = MAX_RETENTION_DAYS;
        assert!(config.validate().is_ok());
        config.monitoring.retention_days = 1_000_000_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "monitoring.retention_days"
        ));

        let mut config = MonitorConfig::default();
        config.monitoring.collect_interval_minutes = u64::MAX / 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "monitoring.collect_interval_minutes"
        ));
        // the accessor saturates instead of overflowing
        assert_eq!(config.monitoring.collect_interval(), Duration::from_secs(u64::MAX));

        let mut config = MonitorConfig::default();
        config.collection.slow_query_window_minutes = u64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(config.collection.slow_query_window(), Duration::from_secs(u64::MAX));

        config.collection.slow_query_window_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_operations() {
        let mut config = MonitorConfig::default();
        config.monitoring.retention_days = 7;
        config.store.path = PathBuf::from("/tmp/monitor-test.db");
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded = MonitorConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[monitoring]\ncollect_interval_minutes = 1\n").unwrap();

        let loaded = MonitorConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.monitoring.collect_interval_minutes, 1);
        assert_eq!(loaded.monitoring.retention_days, 30);
        assert!(loaded.monitoring.alerts.enabled);
    }

    #[test]
    fn test_missing_file() {
        let result = MonitorConfig::from_file("/nonexistent/monitor.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SAAS_MONITOR_RETENTION_DAYS", "14"),
            ("SAAS_MONITOR_ALERTS_ENABLED", "false"),
            ("SAAS_MONITOR_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = MonitorConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.monitoring.retention_days, 14);
        assert!(!config.monitoring.alerts.enabled);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.monitoring.collect_interval_minutes, 5);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = MonitorConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "SAAS_MONITOR_RETENTION_DAYS").then(|| "a month".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
