//! HTTP server errors.

use thiserror::Error;

/// Errors that stop an [`HttpServer`](crate::HttpServer).
///
/// Failures of individual requests never surface here; they become error
/// responses.
#[derive(Debug, Error)]
pub enum HttpServerError {
    /// The configured address is not a socket address.
    #[error("invalid bind address '{addr}': {reason}")]
    InvalidAddress {
        /// The configured address.
        addr: String,
        /// Why it does not parse.
        reason: String,
    },

    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that was tried.
        addr: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Any other I/O failure of the listener.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
