//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required configuration file does not exist.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path of the missing file.
        path: PathBuf,
    },

    /// A configuration file exists but could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML input is malformed.
    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON input is malformed or does not match the schema.
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The input format is neither TOML nor JSON.
    #[error("unsupported configuration format '{0}', expected 'toml' or 'json'")]
    UnsupportedFormat(String),

    /// An environment variable names a setting that does not exist.
    #[error("{var} does not name a configuration setting")]
    UnknownSetting {
        /// The environment variable.
        var: String,
    },

    /// An environment variable value does not fit its setting.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParse {
        /// The environment variable.
        var: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A setting has an invalid value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the setting.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a file-not-found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a read error.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Creates an environment parse error.
    pub fn env_parse(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParse {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
