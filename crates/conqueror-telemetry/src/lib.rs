//! # Conqueror Telemetry
//!
//! Observability setup for services built on Conqueror:
//!
//! - **Logging**: `tracing-subscriber` output in JSON or human-readable form
//! - **Tracing**: OpenTelemetry span export over OTLP, W3C `traceparent` helpers
//! - **Metrics**: Prometheus counters and histograms for handled messages
//!
//! The messaging and HTTP crates emit events, spans and metrics
//! unconditionally. This crate decides where they go.
//!
//! # Example
//!
//! ```rust,ignore
//! use conqueror_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::builder()
//!         .service_name("orders")
//!         .otlp_endpoint("http://localhost:4317")
//!         .metrics_addr("0.0.0.0:9090")
//!         .build();
//!
//!     let _guard = init_telemetry(config).expect("telemetry");
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/conqueror-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, InFlightGuard, MetricsConfig, Outcome};
pub use tracing::{format_traceparent, init_tracing, parse_traceparent, TracingConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Keeps span export running. Dropping it flushes and stops the exporter.
pub struct TelemetryGuard {
    spans: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl TelemetryGuard {
    /// Wraps the provider returned by [`init_tracing`].
    #[must_use]
    pub fn new(spans: Option<opentelemetry_sdk::trace::TracerProvider>) -> Self {
        Self { spans }
    }

    /// Whether spans are being exported.
    #[must_use]
    pub fn is_tracing(&self) -> bool {
        self.spans.is_some()
    }
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("tracing", &self.is_tracing())
            .finish()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.spans.take() else {
            return;
        };
        let flushed = provider.force_flush().into_iter().filter(Result::is_err).count();
        if flushed > 0 {
            eprintln!("conqueror: {flushed} span processor(s) failed to flush");
        }
        if let Err(e) = provider.shutdown() {
            eprintln!("conqueror: span export shutdown failed: {e}");
        }
    }
}

/// Installs the log subscriber, then the metrics recorder, then span export.
///
/// # Errors
///
/// Stops at the first subsystem that fails; see [`TelemetryError`].
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    let guard = TelemetryGuard::new(init_tracing(&config.tracing)?);

    ::tracing::debug!(
        service = %config.tracing.service_name,
        tracing = guard.is_tracing(),
        metrics = config.metrics.enabled,
        "telemetry installed"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_guard_without_provider() {
        let guard = TelemetryGuard::new(None);
        assert!(!guard.is_tracing());
        drop(guard);
    }

    #[test]
    fn test_init_with_everything_disabled() {
        let config = TelemetryConfig {
            logging: LogConfig {
                enabled: false,
                ..LogConfig::default()
            },
            ..TelemetryConfig::default()
        };
        let guard = init_telemetry(config).unwrap();
        assert!(!guard.is_tracing());
    }
}
