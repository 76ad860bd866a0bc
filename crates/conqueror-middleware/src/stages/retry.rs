//! Retry middleware.
//!
//! Re-runs the rest of the chain with a clone of the original message when it
//! fails with a retryable error. Cancellation is never retried.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware};
use conqueror_core::{ConquerorError, ConquerorResult, Message};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type RetryPredicate = Arc<dyn Fn(&ConquerorError) -> bool + Send + Sync>;

/// Middleware retrying failed executions of the rest of the chain.
///
/// # Example
///
/// ```
/// use conqueror_core::ConquerorError;
/// use conqueror_middleware::RetryMiddleware;
/// use std::time::Duration;
///
/// let retry = RetryMiddleware::new(3)
///     .with_delay(Duration::from_millis(100))
///     .with_predicate(|err| matches!(err, ConquerorError::TransportFailed(_)));
/// assert_eq!(retry.max_attempts(), 3);
/// ```
#[derive(Clone)]
pub struct RetryMiddleware {
    max_attempts: u32,
    delay: Duration,
    predicate: RetryPredicate,
}

impl RetryMiddleware {
    /// Creates a retry middleware making at most `max_attempts` attempts.
    ///
    /// A value of zero is treated as one.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Duration::ZERO,
            predicate: Arc::new(|_| true),
        }
    }

    /// Waits `delay` between attempts.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Only retries errors for which `predicate` returns `true`.
    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ConquerorError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Changes the attempt limit of an attached middleware.
    pub fn set_max_attempts(&mut self, max_attempts: u32) {
        self.max_attempts = max_attempts.max(1);
    }

    /// Returns the attempt limit.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn should_retry(&self, error: &ConquerorError) -> bool {
        !matches!(error, ConquerorError::Cancelled) && (self.predicate)(error)
    }
}

impl fmt::Debug for RetryMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryMiddleware")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl<M: Message + Clone> Middleware<M> for RetryMiddleware {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn execute<'a>(
        &'a self,
        ctx: MiddlewareContext<'a, M>,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>> {
        Box::pin(async move {
            let (message, token, next) = ctx.into_parts();
            let mut attempt = 1;

            loop {
                match next.run(message.clone(), token.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(err) if attempt < self.max_attempts && self.should_retry(&err) => {
                        tracing::debug!(
                            message_type = M::message_type_name(),
                            attempt,
                            max_attempts = self.max_attempts,
                            error = %err,
                            "retrying message execution"
                        );
                        attempt += 1;
                        if !self.delay.is_zero() {
                            tokio::select! {
                                () = tokio::time::sleep(self.delay) => {}
                                () = token.cancelled() => return Err(ConquerorError::Cancelled),
                            }
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use conqueror_core::{ConquerorContext, ServiceProvider, TransportRole, TransportType};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone)]
    struct Flaky;

    impl Message for Flaky {
        type Response = u32;
    }

    #[derive(Debug, thiserror::Error)]
    #[error("flaky failure")]
    struct FlakyError;

    fn chain_failing_times(
        retry: RetryMiddleware,
        failures: u32,
    ) -> (crate::PipelineChain<Flaky>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let terminal_calls = Arc::clone(&calls);

        let mut p = Pipeline::new(
            ServiceProvider::empty(),
            ConquerorContext::new(),
            TransportType::in_process(TransportRole::Client),
        );
        p.use_middleware(retry);
        let chain = p.build(move |_, _| {
            let call = terminal_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                if call <= failures {
                    Err(ConquerorError::execution(FlakyError))
                } else {
                    Ok(call)
                }
            })
        });
        (chain, calls)
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (chain, calls) = chain_failing_times(RetryMiddleware::new(3), 2);

        let response = chain.execute(Flaky, CancellationToken::new()).await.unwrap();

        assert_eq!(response, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (chain, calls) = chain_failing_times(RetryMiddleware::new(2), 5);

        let err = chain.execute(Flaky, CancellationToken::new()).await.unwrap_err();

        assert!(err.downcast_ref::<FlakyError>().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_predicate_rejects_error() {
        let retry = RetryMiddleware::new(5).with_predicate(|err| err.downcast_ref::<FlakyError>().is_none());
        let (chain, calls) = chain_failing_times(retry, 5);

        assert!(chain.execute(Flaky, CancellationToken::new()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_attempts() {
        let retry = RetryMiddleware::new(2).with_delay(Duration::from_secs(1));
        let (chain, calls) = chain_failing_times(retry, 1);
        let start = tokio::time::Instant::now();

        assert_eq!(chain.execute(Flaky, CancellationToken::new()).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryMiddleware::new(0).max_attempts(), 1);
    }
}
