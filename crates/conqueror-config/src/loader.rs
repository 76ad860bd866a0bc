//! Layered configuration loading.

use std::env;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::{ConfigError, ConquerorConfig};

/// Builds a [`ConquerorConfig`] from layers applied in order:
///
/// 1. Defaults, or a preset
/// 2. Files and strings, TOML or JSON
/// 3. Environment variables named `PREFIX__SECTION__KEY`
///
/// A layer only overrides the settings it names. Every layer is checked
/// against the schema as it is applied, so a typo fails at the layer that
/// contains it.
///
/// # Example
///
/// ```no_run
/// use conqueror_config::ConfigLoader;
///
/// # fn main() -> Result<(), conqueror_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_production()
///     .with_optional_file("conqueror.toml")?
///     .with_env_prefix("ORDERS")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: ConquerorConfig,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Creates a loader starting from [`ConquerorConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to the defaults, discarding earlier layers.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = ConquerorConfig::default();
        self
    }

    /// Resets to [`ConquerorConfig::development`].
    ///
    /// ```
    /// use conqueror_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = ConquerorConfig::development();
        self
    }

    /// Resets to [`ConquerorConfig::production`].
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = ConquerorConfig::production();
        self
    }

    /// Applies a file. The format follows the extension, `.toml` or `.json`.
    ///
    /// # Errors
    ///
    /// Fails when the file is missing, unreadable, malformed, or names a
    /// setting that does not exist.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();

        tracing::debug!(path = %path.display(), "loading configuration file");
        self.with_string(&content, &format)
    }

    /// Like [`with_file`](Self::with_file), but a missing file is skipped.
    ///
    /// # Errors
    ///
    /// Fails when the file exists and cannot be applied.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Applies configuration text in `format`, `"toml"` or `"json"`.
    ///
    /// ```
    /// use conqueror_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[http_server]\nhttp_addr = \"127.0.0.1:3000\"\n", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.http_server.http_addr, "127.0.0.1:3000");
    /// assert_eq!(config.http_server.request_timeout_secs, 30);
    /// ```
    ///
    /// # Errors
    ///
    /// Fails on an unsupported format, malformed text, or unknown settings.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let layer = match format.to_lowercase().as_str() {
            "toml" => serde_json::to_value(toml::from_str::<toml::Table>(content)?)?,
            "json" => serde_json::from_str(content)?,
            _ => return Err(ConfigError::UnsupportedFormat(format.to_string())),
        };

        let mut merged = serde_json::to_value(&self.config)?;
        merge(&mut merged, layer);
        self.config = serde_json::from_value(merged)?;
        Ok(self)
    }

    /// Reads environment overrides from variables starting with
    /// `PREFIX__` when [`load`](Self::load) runs.
    ///
    /// `ORDERS__HTTP_SERVER__HTTP_ADDR=0.0.0.0:9000` sets
    /// `http_server.http_addr` for prefix `orders`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Loads variables from a `.env` file in the working directory, if any.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }
        self
    }

    /// Applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Fails when an override is malformed or the result does not pass
    /// [`ConquerorConfig::validate`].
    pub fn load(mut self) -> Result<ConquerorConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration as layered so far, skipping environment
    /// overrides and validation.
    #[must_use]
    pub fn load_unvalidated(self) -> ConquerorConfig {
        self.config
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        let mut vars: Vec<(String, String)> =
            env::vars().filter(|(k, _)| k.starts_with(&marker)).collect();
        vars.sort();

        for (key, value) in vars {
            self.apply_env_var(&key, &value, prefix)?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let path = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse(key, "invalid key format"))?;
        let parts: Vec<&str> = path.split("__").collect();

        let config = &mut self.config;
        match parts.as_slice() {
            ["HTTP_SERVER", "HTTP_ADDR"] => config.http_server.http_addr = value.to_string(),
            ["HTTP_SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.http_server.shutdown_timeout_secs = parse_int(key, value)?;
            }
            ["HTTP_SERVER", "REQUEST_TIMEOUT_SECS"] => {
                config.http_server.request_timeout_secs = parse_int(key, value)?;
            }

            ["HTTP_CLIENT", "BASE_URL"] => {
                config.http_client.base_url = non_empty(value).map(ToString::to_string);
            }
            ["HTTP_CLIENT", "TIMEOUT_SECS"] => {
                config.http_client.timeout_secs = match non_empty(value) {
                    Some(v) => Some(parse_int(key, v)?),
                    None => None,
                };
            }

            ["LOGGING", "ENABLED"] => config.logging.enabled = parse_flag(key, value)?,
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "JSON_FORMAT"] => config.logging.json_format = parse_flag(key, value)?,
            ["LOGGING", "SPAN_EVENTS"] => config.logging.span_events = parse_flag(key, value)?,
            ["LOGGING", "FILE_LINE_INFO"] => {
                config.logging.file_line_info = parse_flag(key, value)?;
            }
            ["LOGGING", "THREAD_IDS"] => config.logging.thread_ids = parse_flag(key, value)?,
            ["LOGGING", "INCLUDE_TARGET"] => {
                config.logging.include_target = parse_flag(key, value)?;
            }

            ["TRACING", "ENABLED"] => config.tracing.enabled = parse_flag(key, value)?,
            ["TRACING", "OTLP_ENDPOINT"] => config.tracing.otlp_endpoint = value.to_string(),
            ["TRACING", "SERVICE_NAME"] => config.tracing.service_name = value.to_string(),
            ["TRACING", "SERVICE_VERSION"] => config.tracing.service_version = value.to_string(),
            ["TRACING", "ENVIRONMENT"] => config.tracing.environment = value.to_string(),
            ["TRACING", "SAMPLE_RATIO"] => {
                config.tracing.sample_ratio = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse(key, "expected float"))?;
            }

            ["METRICS", "ENABLED"] => config.metrics.enabled = parse_flag(key, value)?,
            ["METRICS", "ADDR"] => config.metrics.addr = value.to_string(),

            _ => return Err(ConfigError::UnknownSetting { var: key.to_string() }),
        }

        Ok(())
    }
}

/// Recursively overlays `layer` onto `base`. Objects merge key by key,
/// anything else replaces.
fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                merge(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, layer) => *base = layer,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse(key, "expected boolean"))
}

fn parse_int(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse(key, "expected integer"))
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}
