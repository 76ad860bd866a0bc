//! The root configuration type.

use conqueror_http::{HttpClientConfig, HttpServerConfig};
use conqueror_telemetry::logging::create_env_filter;
use conqueror_telemetry::{LogConfig, MetricsConfig, TelemetryConfig, TracingConfig};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Complete configuration of a Conqueror service.
///
/// Every section may be omitted; missing sections and fields take their
/// defaults. Unknown fields are rejected.
///
/// # Example
///
/// ```
/// use conqueror_config::ConquerorConfig;
///
/// let config = ConquerorConfig::default();
/// assert_eq!(config.http_server.http_addr, "0.0.0.0:8080");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ConquerorConfig {
    /// HTTP server transport.
    #[serde(default)]
    pub http_server: HttpServerConfig,

    /// HTTP client transport.
    #[serde(default)]
    pub http_client: HttpClientConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LogConfig,

    /// Span export.
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Prometheus metrics.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ConquerorConfig {
    /// Creates a builder starting from the defaults.
    ///
    /// ```
    /// use conqueror_config::ConquerorConfig;
    /// use conqueror_http::HttpServerConfig;
    ///
    /// let config = ConquerorConfig::builder()
    ///     .http_server(HttpServerConfig {
    ///         http_addr: "127.0.0.1:3000".to_string(),
    ///         ..Default::default()
    ///     })
    ///     .build();
    ///
    /// assert_eq!(config.http_server.http_addr, "127.0.0.1:3000");
    /// ```
    #[must_use]
    pub fn builder() -> ConquerorConfigBuilder {
        ConquerorConfigBuilder::default()
    }

    /// Preset for local development: human-readable debug logs, loopback
    /// bind address.
    #[must_use]
    pub fn development() -> Self {
        Self {
            http_server: HttpServerConfig {
                http_addr: "127.0.0.1:8080".to_string(),
                ..HttpServerConfig::default()
            },
            logging: LogConfig::development(),
            ..Self::default()
        }
    }

    /// Preset for production: JSON logs and Prometheus metrics.
    #[must_use]
    pub fn production() -> Self {
        Self {
            logging: LogConfig::production(),
            metrics: MetricsConfig {
                enabled: true,
                ..MetricsConfig::default()
            },
            ..Self::default()
        }
    }

    /// Checks values serde cannot check.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending
    /// setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = self.http_server.socket_addr() {
            return Err(ConfigError::invalid_value(
                "http_server.http_addr",
                format!("invalid socket address '{}': {e}", self.http_server.http_addr),
            ));
        }

        if self.http_server.request_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "http_server.request_timeout_secs",
                "must be greater than zero",
            ));
        }

        if let Some(base_url) = &self.http_client.base_url {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ConfigError::invalid_value(
                    "http_client.base_url",
                    format!("'{base_url}' is not an http or https URL"),
                ));
            }
        }

        if self.logging.enabled {
            if let Err(e) = create_env_filter(&self.logging.level) {
                return Err(ConfigError::invalid_value("logging.level", e.to_string()));
            }
        }

        if !(0.0..=1.0).contains(&self.tracing.sample_ratio) {
            return Err(ConfigError::invalid_value(
                "tracing.sample_ratio",
                "must be between 0.0 and 1.0",
            ));
        }

        if self.metrics.enabled && self.metrics.addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "metrics.addr",
                format!("invalid socket address '{}'", self.metrics.addr),
            ));
        }

        Ok(())
    }

    /// The settings for [`init_telemetry`](conqueror_telemetry::init_telemetry).
    #[must_use]
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            logging: self.logging.clone(),
            tracing: self.tracing.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Builder for [`ConquerorConfig`].
#[derive(Debug, Default)]
pub struct ConquerorConfigBuilder {
    config: ConquerorConfig,
}

impl ConquerorConfigBuilder {
    /// Sets the HTTP server section.
    #[must_use]
    pub fn http_server(mut self, config: HttpServerConfig) -> Self {
        self.config.http_server = config;
        self
    }

    /// Sets the HTTP client section.
    #[must_use]
    pub fn http_client(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client = config;
        self
    }

    /// Sets the logging section.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.config.logging = config;
        self
    }

    /// Sets the tracing section.
    #[must_use]
    pub fn tracing(mut self, config: TracingConfig) -> Self {
        self.config.tracing = config;
        self
    }

    /// Sets the metrics section.
    #[must_use]
    pub fn metrics(mut self, config: MetricsConfig) -> Self {
        self.config.metrics = config;
        self
    }

    /// Returns the configuration without validating it.
    #[must_use]
    pub fn build(self) -> ConquerorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(ConquerorConfig::default().validate().is_ok());
        assert!(ConquerorConfig::development().validate().is_ok());
        assert!(ConquerorConfig::production().validate().is_ok());
    }

    #[test]
    fn test_development_preset() {
        let config = ConquerorConfig::development();
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json_format);
        assert_eq!(config.http_server.http_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_production_preset() {
        let config = ConquerorConfig::production();
        assert!(config.logging.json_format);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_invalid_http_addr() {
        let config = ConquerorConfig::builder()
            .http_server(HttpServerConfig {
                http_addr: "localhost".to_string(),
                ..HttpServerConfig::default()
            })
            .build();

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "http_server.http_addr"
        ));
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ConquerorConfig::builder()
            .http_client(HttpClientConfig {
                base_url: Some("orders:8080".to_string()),
                ..HttpClientConfig::default()
            })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_sample_ratio() {
        let config = ConquerorConfig::builder()
            .tracing(TracingConfig {
                sample_ratio: 1.5,
                ..TracingConfig::default()
            })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metrics_addr_checked_only_when_enabled() {
        let mut config = ConquerorConfig::default();
        config.metrics.addr = "nowhere".to_string();
        assert!(config.validate().is_ok());

        config.metrics.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result: Result<ConquerorConfig, _> = toml::from_str("[server]\nport = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_telemetry_sections_are_copied() {
        let config = ConquerorConfig::production();
        let telemetry = config.telemetry();
        assert_eq!(telemetry.logging, config.logging);
        assert!(telemetry.metrics.enabled);
    }
}
