//! Telemetry errors.

use std::net::AddrParseError;
use thiserror::Error;

/// Errors raised while installing telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log filter directives do not parse.
    #[error("invalid log filter '{filter}': {source}")]
    InvalidFilter {
        /// The rejected directives.
        filter: String,
        /// Parser error.
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    /// Another global subscriber is already installed.
    #[error("cannot install log subscriber: {0}")]
    SubscriberInstalled(#[from] tracing_subscriber::util::TryInitError),

    /// The OTLP span exporter cannot be built.
    #[error("cannot build OTLP span exporter for {endpoint}: {reason}")]
    SpanExporter {
        /// The configured endpoint.
        endpoint: String,
        /// Why the exporter was rejected.
        reason: String,
    },

    /// The metrics listener address does not parse.
    #[error("invalid metrics address '{addr}': {source}")]
    InvalidMetricsAddr {
        /// The configured address.
        addr: String,
        /// Parser error.
        #[source]
        source: AddrParseError,
    },

    /// The Prometheus recorder cannot be installed.
    #[error("cannot install Prometheus recorder: {0}")]
    Recorder(#[from] metrics_exporter_prometheus::BuildError),
}
