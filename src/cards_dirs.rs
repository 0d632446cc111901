//! Application directory paths for the cards service.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Environment Overrides
//!
//! - `NOW_CARDS_DATA_DIR` overrides [`data_dir`]
//! - `NOW_CARDS_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Used for persisted service state. Resolves to
/// `dirs::data_dir()/now-cards/` by default.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("NOW_CARDS_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("now-cards"))
        .unwrap_or_else(|| PathBuf::from("/tmp/now-cards-data"))
}

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/now-cards/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("NOW_CARDS_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("now-cards"))
        .unwrap_or_else(|| PathBuf::from("/tmp/now-cards-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Persisted key-value state (`data_dir()/state.json`).
#[must_use]
pub fn state_file() -> PathBuf {
    data_dir().join("state.json")
}
