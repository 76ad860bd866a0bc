//! Reusable middleware stages.
//!
//! These are optional building blocks for message pipelines. None of them is
//! added automatically; handlers and call sites opt in through their pipeline
//! configuration.
//!
//! - [`logging`] - structured pre/post/error logging of every message
//! - [`timeout`] - cancel the rest of the chain after a deadline
//! - [`retry`] - re-run the rest of the chain on failure

pub mod logging;
pub mod retry;
pub mod timeout;

// Re-export main types
pub use logging::{
    LoggingErrorContext, LoggingMiddleware, LoggingPostExecutionContext,
    LoggingPreExecutionContext, PayloadLoggingStrategy,
};
pub use retry::RetryMiddleware;
pub use timeout::TimeoutMiddleware;
