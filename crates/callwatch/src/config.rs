//! Configuration management for callwatch.
//!
//! Configuration is layered with figment: built-in defaults, then an optional
//! TOML file, then `CALLWATCH_` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory name under the platform config dir.
const CONFIG_DIR_NAME: &str = "callwatch";

/// Upper bound for any debounce window or deferred-action delay.
const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Application configuration.
///
/// Precedence, highest first:
/// 1. Environment variables prefixed with `CALLWATCH_`, nested keys split on
///    `__` (e.g. `CALLWATCH_DEBOUNCE__SAME_STATE_WINDOW_MS=1500`)
/// 2. TOML config file at `~/.config/callwatch/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Debounce windows.
    pub debounce: DebounceConfig,
    /// History entry lifecycle.
    pub history: HistoryConfig,
    /// Notification timing.
    pub notifications: NotificationConfig,
    /// Student directory source.
    pub directory: DirectoryConfig,
    /// Event-processing service.
    pub service: ServiceConfig,
}

/// Debounce windows applied by `should_process_call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// A repeat of the previous state within this window is dropped.
    pub same_state_window_ms: u64,
    /// A change of state within this window is treated as flicker and dropped.
    pub state_change_window_ms: u64,
}

/// History entry lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Delay between handling an IDLE event and evicting the entry.
    pub eviction_delay_secs: u64,
    /// Entries whose last event is older than this are swept.
    pub max_age_minutes: u64,
    /// How often the service runs the age sweep.
    pub sweep_interval_secs: u64,
}

/// Notification timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Delay before the "call ended" notification is cleared.
    pub ended_clear_delay_secs: u64,
    /// Identical show requests within this window are suppressed.
    /// Set to 0 to disable.
    pub duplicate_window_ms: u64,
}

/// Student directory configuration.
///
/// `fixture_path` wins when set. Otherwise lookups go to the HTTP API at
/// `api_url`, authenticated with `token`; with either missing every lookup
/// fails as "not configured".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Base URL of the student directory API.
    pub api_url: Option<String>,
    /// Bearer token for the student directory API.
    pub token: Option<String>,
    /// JSON file mapping phone numbers to lookup responses.
    pub fixture_path: Option<PathBuf>,
    /// Timeout for one directory request.
    pub request_timeout_secs: u64,
}

/// Event-processing service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Capacity of the command queue between the event source and the monitor.
    pub queue_capacity: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            same_state_window_ms: 2000,
            state_change_window_ms: 500,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            eviction_delay_secs: 30,
            max_age_minutes: 60,
            sweep_interval_secs: 300,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            ended_clear_delay_secs: 10,
            duplicate_window_ms: 2000,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token: None,
            fixture_path: None,
            request_timeout_secs: 10,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("CALLWATCH_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.debounce.same_state_window_ms < self.debounce.state_change_window_ms {
            return Err(Error::config_validation(format!(
                "same_state_window_ms ({}) cannot be shorter than state_change_window_ms ({})",
                self.debounce.same_state_window_ms, self.debounce.state_change_window_ms
            )));
        }

        if self.history.max_age_minutes == 0 {
            return Err(Error::config_validation(
                "max_age_minutes must be greater than 0",
            ));
        }

        if self.history.sweep_interval_secs == 0 {
            return Err(Error::config_validation(
                "sweep_interval_secs must be greater than 0",
            ));
        }

        if self.directory.request_timeout_secs == 0 {
            return Err(Error::config_validation(
                "request_timeout_secs must be greater than 0",
            ));
        }

        if self.service.queue_capacity == 0 {
            return Err(Error::config_validation(
                "queue_capacity must be greater than 0",
            ));
        }

        let bounded = [
            ("same_state_window_ms", self.same_state_window()),
            ("state_change_window_ms", self.state_change_window()),
            ("eviction_delay_secs", self.eviction_delay()),
            ("max_age_minutes", self.max_history_age()),
            ("sweep_interval_secs", self.sweep_interval()),
            ("ended_clear_delay_secs", self.ended_clear_delay()),
            ("duplicate_window_ms", self.duplicate_window()),
            ("request_timeout_secs", self.request_timeout()),
        ];
        for (name, value) in bounded {
            if value > MAX_DELAY {
                return Err(Error::config_validation(format!(
                    "{name} cannot exceed 24 hours"
                )));
            }
        }

        Ok(())
    }

    /// Same-state debounce window.
    #[must_use]
    pub fn same_state_window(&self) -> Duration {
        Duration::from_millis(self.debounce.same_state_window_ms)
    }

    /// State-change flicker window.
    #[must_use]
    pub fn state_change_window(&self) -> Duration {
        Duration::from_millis(self.debounce.state_change_window_ms)
    }

    /// Delay before a finished call's history entry is evicted.
    #[must_use]
    pub fn eviction_delay(&self) -> Duration {
        Duration::from_secs(self.history.eviction_delay_secs)
    }

    /// Maximum age of a history entry before the sweep removes it.
    #[must_use]
    pub fn max_history_age(&self) -> Duration {
        Duration::from_secs(self.history.max_age_minutes.saturating_mul(60))
    }

    /// Interval between periodic sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.history.sweep_interval_secs)
    }

    /// Delay before the "call ended" notification is cleared.
    #[must_use]
    pub fn ended_clear_delay(&self) -> Duration {
        Duration::from_secs(self.notifications.ended_clear_delay_secs)
    }

    /// Duplicate notification suppression window.
    #[must_use]
    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.notifications.duplicate_window_ms)
    }

    /// Timeout for one student directory request.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.directory.request_timeout()
    }
}

impl DirectoryConfig {
    /// Timeout for one directory request.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.same_state_window(), Duration::from_millis(2000));
        assert_eq!(config.state_change_window(), Duration::from_millis(500));
        assert_eq!(config.eviction_delay(), Duration::from_secs(30));
        assert_eq!(config.max_history_age(), Duration::from_secs(60 * 60));
        assert_eq!(config.ended_clear_delay(), Duration::from_secs(10));
        assert_eq!(config.service.queue_capacity, 64);
    }

    #[test]
    fn test_default_directory_config() {
        let directory = DirectoryConfig::default();

        assert!(directory.api_url.is_none());
        assert!(directory.token.is_none());
        assert!(directory.fixture_path.is_none());
        assert_eq!(directory.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_inverted_windows() {
        let mut config = Config::default();
        config.debounce.same_state_window_ms = 100;
        config.debounce.state_change_window_ms = 500;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("same_state_window_ms"));
    }

    #[test]
    fn test_validate_zero_max_age() {
        let mut config = Config::default();
        config.history.max_age_minutes = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_age_minutes"));
    }

    #[test]
    fn test_validate_zero_sweep_interval() {
        let mut config = Config::default();
        config.history.sweep_interval_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("sweep_interval_secs"));
    }

    #[test]
    fn test_validate_sweep_interval_too_long() {
        let mut config = Config::default();
        config.history.sweep_interval_secs = u64::MAX;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("sweep_interval_secs"));

        config.history.sweep_interval_secs = 24 * 60 * 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_huge_sweep_interval() {
        figment::Jail::expect_with(|jail| {
            jail.set_env(
                "CALLWATCH_HISTORY__SWEEP_INTERVAL_SECS",
                "18446744073709551615",
            );

            let result = Config::load_from(Some(PathBuf::from("missing.toml")));
            assert!(matches!(result, Err(Error::ConfigValidation { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_validate_request_timeout() {
        let mut config = Config::default();
        config.directory.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.directory.request_timeout_secs = 2 * 24 * 60 * 60;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("request_timeout_secs"));
    }

    #[test]
    fn test_validate_zero_queue_capacity() {
        let mut config = Config::default();
        config.service.queue_capacity = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_delay_too_long() {
        let mut config = Config::default();
        config.history.eviction_delay_secs = 2 * 24 * 60 * 60;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("eviction_delay_secs"));
    }

    #[test]
    fn test_max_history_age_saturates() {
        let mut config = Config::default();
        config.history.max_age_minutes = u64::MAX;

        assert_eq!(config.max_history_age(), Duration::from_secs(u64::MAX));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("callwatch"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "callwatch.toml",
                r#"
                [debounce]
                same_state_window_ms = 3000

                [directory]
                api_url = "https://school.example/api/"
                "#,
            )?;

            let config = Config::load_from(Some(PathBuf::from("callwatch.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.debounce.same_state_window_ms, 3000);
            assert_eq!(config.debounce.state_change_window_ms, 500);
            assert_eq!(
                config.directory.api_url.as_deref(),
                Some("https://school.example/api/")
            );
            Ok(())
        });
    }

    #[test]
    fn test_load_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CALLWATCH_HISTORY__MAX_AGE_MINUTES", "15");

            let config = Config::load_from(Some(PathBuf::from("missing.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.history.max_age_minutes, 15);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[service]\nqueue_capacity = 0\n")?;

            let result = Config::load_from(Some(PathBuf::from("bad.toml")));
            assert!(matches!(result, Err(Error::ConfigValidation { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("same_state_window_ms"));
        assert!(json.contains("fixture_path"));
    }
}
