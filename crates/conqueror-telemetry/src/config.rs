//! Combined telemetry settings.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::tracing::TracingConfig;

/// Settings for logging, span export and metrics, installed together by
/// [`init_telemetry`](crate::init_telemetry).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryConfig {
    /// Log subscriber settings.
    pub logging: LogConfig,
    /// OTLP span export settings.
    pub tracing: TracingConfig,
    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,
}

impl TelemetryConfig {
    /// Starts from the defaults: JSON logs at `info`, no exporters.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder(Self::default())
    }
}

/// Fluent construction of a [`TelemetryConfig`].
#[derive(Debug)]
pub struct TelemetryConfigBuilder(TelemetryConfig);

impl TelemetryConfigBuilder {
    /// Names the service in exported spans.
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.0.tracing.service_name = name.into();
        self
    }

    /// Versions the service in exported spans.
    #[must_use]
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.0.tracing.service_version = version.into();
        self
    }

    /// Replaces the log settings.
    #[must_use]
    pub fn logging(mut self, logging: LogConfig) -> Self {
        self.0.logging = logging;
        self
    }

    /// Turns span export on, sending to `endpoint`.
    #[must_use]
    pub fn otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.0.tracing.enabled = true;
        self.0.tracing.otlp_endpoint = endpoint.into();
        self
    }

    /// Turns the Prometheus listener on at `addr`.
    #[must_use]
    pub fn metrics_addr(mut self, addr: impl Into<String>) -> Self {
        self.0.metrics.enabled = true;
        self.0.metrics.addr = addr.into();
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        self.0
    }
}
