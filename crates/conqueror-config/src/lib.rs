//! Typed configuration for services built on Conqueror.
//!
//! [`ConquerorConfig`] gathers the settings of the HTTP transport and the
//! telemetry stack. [`ConfigLoader`] layers defaults, TOML or JSON files,
//! and environment variables, rejecting unknown fields at every layer.
//!
//! # Example
//!
//! ```no_run
//! use conqueror_config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_dotenv()
//!     .with_optional_file("conqueror.toml")?
//!     .with_env_prefix("CONQUEROR")
//!     .load()?;
//!
//! let _guard = conqueror_telemetry::init_telemetry(config.telemetry())?;
//! # Ok(())
//! # }
//! ```
//!
//! # File format
//!
//! ```toml
//! [http_server]
//! http_addr = "0.0.0.0:8080"
//! shutdown_timeout_secs = 30
//! request_timeout_secs = 30
//!
//! [http_client]
//! timeout_secs = 10
//!
//! [logging]
//! level = "info,conqueror=debug"
//! json_format = true
//!
//! [tracing]
//! enabled = true
//! otlp_endpoint = "http://localhost:4317"
//! service_name = "orders"
//! sample_ratio = 0.5
//!
//! [metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//! ```

#![doc(html_root_url = "https://docs.rs/conqueror-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;

// Re-export main types at crate root
pub use config::{ConquerorConfig, ConquerorConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
