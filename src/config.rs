//! Configuration types for the cards service.

use crate::error::{CardsError, Result};
use crate::location::Position;
use crate::scheduler::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the cards service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CardsConfig {
    /// Cards server connection settings.
    pub server: ServerConfig,
    /// Card polling cadence.
    pub polling: PollingConfig,
    /// Dismissal retry cadence and retention.
    pub dismissal: DismissalConfig,
    /// Persistent store location.
    pub storage: StorageConfig,
    /// Fixed device location, when no platform provider is available.
    pub location: LocationConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Cards server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL; `notifications` and `dismiss` are resolved against it.
    pub base_url: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: 30,
        }
    }
}

/// Polling cadence for card updates.
///
/// Used when the server has not supplied an expiration time, and as the
/// backoff bounds after failed updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// First polling delay in seconds.
    pub initial_delay_secs: u64,
    /// Upper bound for the polling delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 5 * 60,
            max_delay_secs: 60 * 60,
        }
    }
}

impl PollingConfig {
    /// Backoff bounds for the `cards-update` series.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.initial_delay_secs, self.max_delay_secs)
    }
}

/// Dismissal retry cadence and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DismissalConfig {
    /// First retry delay in seconds after a failed dismissal request.
    pub retry_initial_delay_secs: u64,
    /// Upper bound for the retry delay in seconds.
    pub retry_max_delay_secs: u64,
    /// How long an acknowledged dismissal suppresses the card, in seconds.
    pub retention_secs: u64,
}

impl Default for DismissalConfig {
    fn default() -> Self {
        Self {
            retry_initial_delay_secs: 60,
            retry_max_delay_secs: 60 * 60,
            retention_secs: 20 * 60,
        }
    }
}

impl DismissalConfig {
    /// Backoff bounds for the `dismiss` series.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.retry_initial_delay_secs, self.retry_max_delay_secs)
    }

    /// Retention window in milliseconds.
    pub fn retention_ms(&self) -> u64 {
        self.retention_secs.saturating_mul(1000)
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// State file path. `None` uses [`crate::cards_dirs::state_file`].
    pub state_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective state file path.
    pub fn resolved_state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(crate::cards_dirs::state_file)
    }
}

/// Fixed device location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Latitude in degrees.
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    pub longitude: Option<f64>,
    /// Accuracy radius in meters.
    pub accuracy: Option<f64>,
}

impl LocationConfig {
    /// Configured position, if both coordinates are present.
    pub fn position(&self) -> Option<Position> {
        Some(Position {
            latitude: self.latitude?,
            longitude: self.longitude?,
            accuracy: self.accuracy.unwrap_or(0.0),
        })
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
    /// Directory for daily-rolling log files. `None` logs to stderr only.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            directory: None,
        }
    }
}

impl CardsConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CardsError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CardsError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::cards_dirs::config_file()
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Validates this configuration.
    ///
    /// Checks:
    /// - `server.base_url` is set and parses as an absolute URL
    /// - `request_timeout_secs` is greater than 0
    /// - every backoff has `0 < initial <= max`
    pub fn validate(&self) -> Result<()> {
        let base = self
            .server
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| CardsError::Config("server.base_url must be set".into()))?;
        url::Url::parse(base)
            .map_err(|e| CardsError::Config(format!("server.base_url is invalid: {e}")))?;

        if self.server.request_timeout_secs == 0 {
            return Err(CardsError::Config(
                "server.request_timeout_secs must be greater than 0".into(),
            ));
        }

        validate_backoff(
            "polling",
            self.polling.initial_delay_secs,
            self.polling.max_delay_secs,
        )?;
        validate_backoff(
            "dismissal.retry",
            self.dismissal.retry_initial_delay_secs,
            self.dismissal.retry_max_delay_secs,
        )?;
        Ok(())
    }
}

fn validate_backoff(section: &str, initial: u64, max: u64) -> Result<()> {
    if initial == 0 {
        return Err(CardsError::Config(format!(
            "{section} initial delay must be greater than 0"
        )));
    }
    if initial > max {
        return Err(CardsError::Config(format!(
            "{section} initial delay must be <= max delay"
        )));
    }
    Ok(())
}
