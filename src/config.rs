use crate::error::{RedlockError, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "redlock.toml";
pub const ENV_PREFIX: &str = "REDLOCK";

const DEFAULT_DRIFT_FACTOR: f64 = 0.01;
const DEFAULT_RETRY_COUNT: i64 = 10;
const DEFAULT_RETRY_DELAY_MS: u64 = 200;
const DEFAULT_RETRY_JITTER_MS: u64 = 100;
const DEFAULT_AUTOMATIC_EXTENSION_THRESHOLD_MS: u64 = 500;
const DEFAULT_DURATION_MS: u64 = 60_000;
const DEFAULT_NAME: &str = "locks";
const DEFAULT_DBNAME: &str = "redlock";
const DEFAULT_NODE_TIMEOUT_MS: u64 = 5_000;

/// Coordinator-wide settings. Treat as immutable once a coordinator is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedlockSettings {
    /// Fraction of the lease duration subtracted to absorb clock drift.
    pub drift_factor: f64,
    /// Retries after the first attempt; `-1` retries forever.
    pub retry_count: i64,
    pub retry_delay_ms: u64,
    /// Maximum random deviation (in either direction) added to `retry_delay_ms`.
    pub retry_jitter_ms: u64,
    /// Remaining lease time at which `using` renews the lock.
    pub automatic_extension_threshold_ms: u64,
    pub duration_ms: u64,
    pub name: String,
    pub dbname: String,
    /// Per-node response deadline inside one attempt; `0` waits indefinitely.
    pub node_timeout_ms: u64,
}

impl Default for RedlockSettings {
    fn default() -> Self {
        Self {
            drift_factor: DEFAULT_DRIFT_FACTOR,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            retry_jitter_ms: DEFAULT_RETRY_JITTER_MS,
            automatic_extension_threshold_ms: DEFAULT_AUTOMATIC_EXTENSION_THRESHOLD_MS,
            duration_ms: DEFAULT_DURATION_MS,
            name: DEFAULT_NAME.to_string(),
            dbname: DEFAULT_DBNAME.to_string(),
            node_timeout_ms: DEFAULT_NODE_TIMEOUT_MS,
        }
    }
}

/// Per-call overrides. Unset fields fall back to the coordinator's settings.
///
/// There is no `dbname` override; every call on a coordinator shares its
/// database namespace and only `name` can vary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsOverride {
    pub drift_factor: Option<f64>,
    pub retry_count: Option<i64>,
    pub retry_delay_ms: Option<u64>,
    pub retry_jitter_ms: Option<u64>,
    pub automatic_extension_threshold_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub name: Option<String>,
    pub node_timeout_ms: Option<u64>,
}

impl SettingsOverride {
    pub fn retry_count(count: i64) -> Self {
        Self {
            retry_count: Some(count),
            ..Self::default()
        }
    }
}

impl RedlockSettings {
    /// Loads settings from an optional TOML file, then applies `REDLOCK_*`
    /// environment variables on top.
    ///
    /// An explicit `path` must exist. Without one, `redlock.toml` in the
    /// current directory is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Toml).required(true),
            None => File::with_name(CONFIG_FILE_NAME)
                .format(FileFormat::Toml)
                .required(false),
        };

        let settings: RedlockSettings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| RedlockError::Config(format!("Failed to load settings: {e}")))?;

        settings.validate()?;
        log::debug!("Resolved lock settings: {settings:?}");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| RedlockError::Config(format!("Failed to serialize settings: {e}")))?;

        fs::write(path, contents)?;
        log::debug!("Saved settings to {path:?}");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.drift_factor.is_finite() || !(0.0..1.0).contains(&self.drift_factor) {
            return Err(RedlockError::Validation(format!(
                "drift_factor must be in [0, 1), got {}",
                self.drift_factor
            )));
        }
        if self.retry_count < -1 {
            return Err(RedlockError::Validation(format!(
                "retry_count must be -1 (unbounded) or non-negative, got {}",
                self.retry_count
            )));
        }
        if self.duration_ms == 0 {
            return Err(RedlockError::Validation(
                "duration_ms must be greater than zero".to_string(),
            ));
        }
        if self.name.is_empty() || self.dbname.is_empty() {
            return Err(RedlockError::Validation(
                "name and dbname must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns these settings with every field set in `overrides` replaced.
    pub fn layered(&self, overrides: &SettingsOverride) -> Result<Self> {
        let layered = Self {
            drift_factor: overrides.drift_factor.unwrap_or(self.drift_factor),
            retry_count: overrides.retry_count.unwrap_or(self.retry_count),
            retry_delay_ms: overrides.retry_delay_ms.unwrap_or(self.retry_delay_ms),
            retry_jitter_ms: overrides.retry_jitter_ms.unwrap_or(self.retry_jitter_ms),
            automatic_extension_threshold_ms: overrides
                .automatic_extension_threshold_ms
                .unwrap_or(self.automatic_extension_threshold_ms),
            duration_ms: overrides.duration_ms.unwrap_or(self.duration_ms),
            name: overrides.name.clone().unwrap_or_else(|| self.name.clone()),
            dbname: self.dbname.clone(),
            node_timeout_ms: overrides.node_timeout_ms.unwrap_or(self.node_timeout_ms),
        };
        layered.validate()?;
        Ok(layered)
    }

    /// Total attempts allowed by `retry_count`; `None` when unbounded.
    pub fn max_attempts(&self) -> Option<u64> {
        if self.retry_count == -1 {
            None
        } else {
            Some(self.retry_count.max(0) as u64 + 1)
        }
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        (self.node_timeout_ms > 0).then(|| Duration::from_millis(self.node_timeout_ms))
    }

    /// Safety margin for a lease: the drift share plus 2ms of store timer slop.
    pub fn drift_ms(&self, duration_ms: u64) -> i64 {
        (self.drift_factor * duration_ms as f64).round() as i64 + 2
    }

    /// Namespaced storage key for `resource`.
    pub fn resource_key(&self, resource: &str) -> String {
        format!("{}:{}:{resource}", self.dbname, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = RedlockSettings::default();
        assert_eq!(settings.drift_factor, 0.01);
        assert_eq!(settings.retry_count, 10);
        assert_eq!(settings.retry_delay_ms, 200);
        assert_eq!(settings.retry_jitter_ms, 100);
        assert_eq!(settings.automatic_extension_threshold_ms, 500);
        assert_eq!(settings.duration_ms, 60_000);
        assert_eq!(settings.resource_key("a"), "redlock:locks:a");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_layered_override() {
        let base = RedlockSettings::default();
        let overrides = SettingsOverride {
            retry_count: Some(0),
            name: Some("jobs".to_string()),
            ..SettingsOverride::default()
        };
        let layered = base.layered(&overrides).unwrap();
        assert_eq!(layered.retry_count, 0);
        assert_eq!(layered.name, "jobs");
        assert_eq!(layered.retry_delay_ms, base.retry_delay_ms);
        assert_eq!(layered.resource_key("a"), "redlock:jobs:a");
        // The base is untouched.
        assert_eq!(base.retry_count, 10);
    }

    #[test]
    fn test_layered_override_is_validated() {
        let base = RedlockSettings::default();
        let err = base
            .layered(&SettingsOverride::retry_count(-2))
            .unwrap_err();
        assert!(matches!(err, RedlockError::Validation(_)));
    }

    #[test]
    fn test_max_attempts() {
        let mut settings = RedlockSettings::default();
        assert_eq!(settings.max_attempts(), Some(11));
        settings.retry_count = 0;
        assert_eq!(settings.max_attempts(), Some(1));
        settings.retry_count = -1;
        assert_eq!(settings.max_attempts(), None);
    }

    #[test]
    fn test_drift() {
        let settings = RedlockSettings::default();
        assert_eq!(settings.drift_ms(1000), 12);
        assert_eq!(settings.drift_ms(60_000), 602);
        assert_eq!(settings.drift_ms(49), 2);
    }

    #[test]
    fn test_invalid_drift_factor() {
        let settings = RedlockSettings {
            drift_factor: f64::NAN,
            ..RedlockSettings::default()
        };
        assert!(settings.validate().is_err());
        let settings = RedlockSettings {
            drift_factor: 1.5,
            ..RedlockSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_save_and_load_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);

        let settings = RedlockSettings {
            retry_count: 3,
            name: "billing".to_string(),
            ..RedlockSettings::default()
        };
        settings.save(&path).unwrap();

        let loaded = RedlockSettings::load(Some(&path)).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    #[serial]
    fn test_partial_settings_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "retry_count = -1\nretry_jitter_ms = 0\n").unwrap();

        let loaded = RedlockSettings::load(Some(&path)).unwrap();
        assert_eq!(loaded.retry_count, -1);
        assert_eq!(loaded.retry_jitter_ms, 0);
        assert_eq!(loaded.duration_ms, DEFAULT_DURATION_MS);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "retry_delay_ms = 50\n").unwrap();

        unsafe {
            std::env::set_var("REDLOCK_RETRY_DELAY_MS", "75");
        }
        let loaded = RedlockSettings::load(Some(&path));
        unsafe {
            std::env::remove_var("REDLOCK_RETRY_DELAY_MS");
        }

        assert_eq!(loaded.unwrap().retry_delay_ms, 75);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = RedlockSettings::load(Some(&temp_dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, RedlockError::Config(_)));
    }

    #[test]
    #[serial]
    fn test_invalid_file_values_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "duration_ms = 0\n").unwrap();

        let err = RedlockSettings::load(Some(&path)).unwrap_err();
        assert!(matches!(err, RedlockError::Validation(_)));
    }
}
