//! Configuration error types.

use thiserror::Error;

/// Errors raised while locating, reading, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file could be located.
    #[error("config not found: {reason}")]
    NotFound { reason: String },

    /// The file exists but could not be read.
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// The YAML did not deserialize.
    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    /// The config parsed but its values are unusable.
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}
