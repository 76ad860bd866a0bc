//! HTTP transport settings.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Settings for [`HttpServer`](crate::HttpServer).
///
/// # Example
///
/// ```
/// use conqueror_http::HttpServerConfig;
///
/// let config: HttpServerConfig = toml::from_str(r#"http_addr = "127.0.0.1:9000""#).unwrap();
/// assert_eq!(config.socket_addr().unwrap().port(), 9000);
/// assert_eq!(config.request_timeout_secs, 30);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HttpServerConfig {
    /// Bind address, e.g. `0.0.0.0:8080`.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// How long to wait for in-flight requests on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Upper bound for reading the body and running the handler.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl HttpServerConfig {
    /// Parses [`http_addr`](Self::http_addr).
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.http_addr.parse()
    }

    /// Returns the shutdown timeout as a [`Duration`].
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Returns the request timeout as a [`Duration`].
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

/// Settings for clients created with
/// [`use_http`](crate::HttpTransportBuilderExt::use_http).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HttpClientConfig {
    /// Base address used when a client does not name one.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout. `None` waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl HttpClientConfig {
    /// Builds a `reqwest` client honouring these settings.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = HttpServerConfig::default();
        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.socket_addr().is_ok());
    }

    #[test]
    fn test_invalid_addr() {
        let config = HttpServerConfig {
            http_addr: "not-an-addr".to_string(),
            ..HttpServerConfig::default()
        };
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<HttpServerConfig, _> = serde_json::from_str(r#"{"port": 80}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_client_config_from_json() {
        let config: HttpClientConfig =
            serde_json::from_str(r#"{"base_url": "http://orders:8080", "timeout_secs": 5}"#)
                .unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://orders:8080"));
        assert!(config.build_client().is_ok());
    }
}
