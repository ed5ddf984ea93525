//! Configuration error types.

use std::fmt;

/// Error type for configuration resolution.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to parse an environment variable.
    Parse {
        key: String,
        value: String,
        error: String,
    },
    /// Invalid configuration value.
    Invalid { key: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse { key, value, error } => {
                write!(f, "failed to parse {}='{}': {}", key, value, error)
            }
            ConfigError::Invalid { key, message } => {
                write!(f, "invalid value for {}: {}", key, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
