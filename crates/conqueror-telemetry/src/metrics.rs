//! Prometheus metrics for Conqueror.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `conqueror_messages_total` | Counter | `message_type`, `transport`, `outcome` | Handled messages |
//! | `conqueror_message_duration_seconds` | Histogram | `message_type`, `transport` | Handler pipeline latency |
//! | `conqueror_in_flight_messages` | Gauge | - | Messages currently being handled |
//! | `conqueror_http_requests_total` | Counter | `path`, `status` | HTTP requests served |
//!
//! Recording functions are no-ops until a recorder is installed with
//! [`init_metrics`].

use crate::error::TelemetryError;
use crate::TelemetryResult;
use conqueror_core::TransportType;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

const MESSAGES_TOTAL: &str = "conqueror_messages_total";
const MESSAGE_DURATION: &str = "conqueror_message_duration_seconds";
const IN_FLIGHT: &str = "conqueror_in_flight_messages";
const HTTP_REQUESTS_TOTAL: &str = "conqueror_http_requests_total";

/// Settings of the Prometheus exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Export is off unless set.
    pub enabled: bool,
    /// Listen address of the `/metrics` scrape endpoint.
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_owned(),
        }
    }
}

/// Outcome label of a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The pipeline produced a response.
    Success,
    /// The pipeline failed.
    Failure,
    /// The pipeline was cancelled.
    Cancelled,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Installs the Prometheus recorder and spawns its scrape listener.
///
/// Must be called from within a Tokio runtime when enabled.
///
/// # Errors
///
/// Fails with [`TelemetryError::InvalidMetricsAddr`] when the listener
/// address does not parse, or [`TelemetryError::Recorder`] when another
/// recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let listener = config.addr.parse::<SocketAddr>().map_err(|source| {
        TelemetryError::InvalidMetricsAddr {
            addr: config.addr.clone(),
            source,
        }
    })?;

    PrometheusBuilder::new().with_http_listener(listener).install()?;

    describe_counter!(MESSAGES_TOTAL, "Messages that went through a handler pipeline");
    describe_histogram!(MESSAGE_DURATION, "Time spent in the handler pipeline");
    describe_gauge!(IN_FLIGHT, "Messages whose pipeline has not finished");
    describe_counter!(HTTP_REQUESTS_TOTAL, "Requests answered by the HTTP server");
    Ok(())
}

/// Counts a finished pipeline run and records its latency.
pub fn record_message(
    message_type: &'static str,
    transport_type: &TransportType,
    outcome: Outcome,
    duration: Duration,
) {
    let transport = transport_type.name().to_owned();
    histogram!(MESSAGE_DURATION, "message_type" => message_type, "transport" => transport.clone())
        .record(duration.as_secs_f64());
    counter!(
        MESSAGES_TOTAL,
        "message_type" => message_type,
        "transport" => transport,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Counts a response of the HTTP server.
pub fn record_http_request(path: &str, status_code: u16) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "path" => path.to_owned(),
        "status" => status_code.to_string()
    )
    .increment(1);
}

/// Holds one slot of the in-flight gauge.
#[derive(Debug)]
#[must_use = "the gauge drops back as soon as the guard is dropped"]
pub struct InFlightGuard(());

impl InFlightGuard {
    /// Raises the in-flight gauge until the guard is dropped.
    pub fn new() -> Self {
        gauge!(IN_FLIGHT).increment(1.0);
        Self(())
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT).decrement(1.0);
    }
}
