//! Timeout middleware.
//!
//! Hands the rest of the chain a child of the incoming cancellation token and
//! cancels it once the deadline passes. The caller then receives
//! [`ConquerorError::Cancelled`].

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware};
use conqueror_core::{ConquerorError, ConquerorResult, Message};
use std::time::Duration;

/// Middleware bounding the execution time of the rest of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    /// Creates a timeout middleware with the given deadline.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Returns the deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Changes the deadline of an attached middleware.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl<M: Message> Middleware<M> for TimeoutMiddleware {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn execute<'a>(
        &'a self,
        ctx: MiddlewareContext<'a, M>,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>> {
        Box::pin(async move {
            let (message, token, next) = ctx.into_parts();
            let child = token.child_token();

            match tokio::time::timeout(self.timeout, next.run(message, child.clone())).await {
                Ok(result) => result,
                Err(_) => {
                    child.cancel();
                    tracing::warn!(
                        message_type = M::message_type_name(),
                        timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                        "message execution timed out"
                    );
                    Err(ConquerorError::Cancelled)
                }
            }
        })
    }
}
