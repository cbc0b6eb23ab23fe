//! Error types for configuration loading.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or validating `downbot.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required key `{0}`")]
    Missing(String),

    #[error("invalid url for `{key}` ({value}): {reason}")]
    InvalidUrl {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: String, reason: String },

    #[error("duplicate monitor id: {0}")]
    DuplicateMonitor(String),

    #[error("no monitors configured (set `primary_status_url` or add a [[monitor]] table)")]
    NoMonitors,
}
