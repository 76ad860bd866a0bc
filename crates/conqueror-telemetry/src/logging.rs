//! Structured logging for Conqueror services.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and either
//! JSON or human-readable output. Every pipeline stage in Conqueror logs
//! through `tracing`, so nothing is written until a subscriber is installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use conqueror_telemetry::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::development())?;
//!
//! tracing::info!(message_type = "CreateOrder", "handling message");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Settings of the global log subscriber.
///
/// Every field may be omitted when deserializing; omitted fields keep the
/// value from [`LogConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `false` leaves any existing subscriber alone.
    pub enabled: bool,
    /// `EnvFilter` directives, for example `warn,conqueror::message=debug`.
    pub level: String,
    /// One JSON object per event instead of the multi-line pretty form.
    pub json_format: bool,
    /// Also log when handler and middleware spans open and close.
    pub span_events: bool,
    /// Source file and line of each event.
    pub file_line_info: bool,
    /// Id of the emitting thread.
    pub thread_ids: bool,
    /// Module path of the emitting code.
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            thread_ids: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Pretty output at `debug` with span events and source locations.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            ..Self::default()
        }
    }

    /// JSON output at `info`; same as the default.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }
}

/// Installs the global log subscriber.
///
/// Does nothing when [`LogConfig::enabled`] is `false`.
///
/// # Errors
///
/// Fails if the filter directives do not parse or a global subscriber is
/// already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;
    tracing_subscriber::registry()
        .with(output_layer(config, filter))
        .try_init()?;
    Ok(())
}

fn output_layer(config: &LogConfig, filter: EnvFilter) -> Box<dyn Layer<Registry> + Send + Sync> {
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_span_events(span_events)
        .with_file(config.file_line_info)
        .with_line_number(config.file_line_info)
        .with_thread_ids(config.thread_ids)
        .with_target(config.include_target);

    if config.json_format {
        layer.json().with_filter(filter).boxed()
    } else {
        layer.pretty().with_filter(filter).boxed()
    }
}

/// Parses filter directives such as `info,conqueror::message=debug`.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] for malformed directives.
pub fn create_env_filter(directives: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(directives).map_err(|source| TelemetryError::InvalidFilter {
        filter: directives.to_string(),
        source,
    })
}
