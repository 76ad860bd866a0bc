//! OpenTelemetry distributed tracing for Conqueror.
//!
//! Sets up OTLP span export and provides the W3C `traceparent` helpers the
//! HTTP transport uses to carry the trace id of a call chain across hops.
//!
//! # Example
//!
//! ```rust,ignore
//! use conqueror_telemetry::tracing::{TracingConfig, init_tracing};
//!
//! let config = TracingConfig::default();
//! let provider = init_tracing(&config)?;
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Settings of OTLP span export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TracingConfig {
    /// Export is off unless set.
    pub enabled: bool,
    /// gRPC endpoint of the collector.
    pub otlp_endpoint: String,
    /// `service.name` resource attribute.
    pub service_name: String,
    /// `service.version` resource attribute.
    pub service_version: String,
    /// `deployment.environment` resource attribute.
    pub environment: String,
    /// Share of new traces that are sampled; clamped to `0.0..=1.0`.
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "conqueror".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            sample_ratio: 1.0,
        }
    }
}

impl TracingConfig {
    /// Export enabled for `service_name`, sampling one trace in ten.
    #[must_use]
    pub fn production(service_name: &str, version: &str) -> Self {
        Self {
            enabled: true,
            service_name: service_name.into(),
            service_version: version.into(),
            environment: "production".into(),
            sample_ratio: 0.1,
            ..Self::default()
        }
    }
}

/// Starts OTLP span export and installs the W3C propagator.
///
/// Returns `Ok(None)` when tracing is disabled. Keep the returned provider
/// until shutdown so batched spans are flushed.
///
/// # Errors
///
/// Returns [`TelemetryError::SpanExporter`] if the exporter cannot be built.
pub fn init_tracing(config: &TracingConfig) -> TelemetryResult<Option<TracerProvider>> {
    if !config.enabled {
        return Ok(None);
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::SpanExporter {
            endpoint: config.otlp_endpoint.clone(),
            reason: e.to_string(),
        })?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(sampler_for(config.sample_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(service_resource(config))
        .build();

    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_tracer_provider(provider.clone());
    Ok(Some(provider))
}

fn service_resource(config: &TracingConfig) -> Resource {
    use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};

    Resource::new([
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, config.service_version.clone()),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ])
}

fn sampler_for(ratio: f64) -> Sampler {
    match ratio {
        r if r >= 1.0 => Sampler::AlwaysOn,
        r if r <= 0.0 => Sampler::AlwaysOff,
        r => Sampler::TraceIdRatioBased(r),
    }
}

fn is_hex_id(value: &str, len: usize) -> bool {
    value.len() == len
        && value.bytes().all(|b| b.is_ascii_hexdigit())
        && value.bytes().any(|b| b != b'0')
}

/// Builds a `traceparent` header value carrying `trace_id`.
///
/// A fresh parent span id is generated for every call. Returns `None` if
/// `trace_id` is not a non-zero 32-digit hex string.
///
/// # Example
///
/// ```
/// use conqueror_telemetry::tracing::{format_traceparent, parse_traceparent};
///
/// let trace_id = "4bf92f3577b34da6a3ce929d0e0e4736";
/// let header = format_traceparent(trace_id).unwrap();
/// assert_eq!(parse_traceparent(&header).as_deref(), Some(trace_id));
/// ```
#[must_use]
pub fn format_traceparent(trace_id: &str) -> Option<String> {
    if !is_hex_id(trace_id, 32) {
        return None;
    }
    let span_id = Uuid::new_v4().simple().to_string();
    Some(format!(
        "00-{}-{}-01",
        trace_id.to_ascii_lowercase(),
        &span_id[..16]
    ))
}

/// Extracts the trace id from a `traceparent` header value.
///
/// Returns `None` for malformed values, the reserved version `ff` and
/// all-zero ids.
#[must_use]
pub fn parse_traceparent(value: &str) -> Option<String> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let parent_id = parts.next()?;
    let flags = parts.next()?;

    if version.len() != 2
        || !version.bytes().all(|b| b.is_ascii_hexdigit())
        || version.eq_ignore_ascii_case("ff")
        || (version == "00" && parts.next().is_some())
        || !is_hex_id(trace_id, 32)
        || !is_hex_id(parent_id, 16)
        || flags.len() != 2
        || !flags.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return None;
    }

    Some(trace_id.to_ascii_lowercase())
}
