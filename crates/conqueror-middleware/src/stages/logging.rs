//! Message logging middleware.
//!
//! Writes one structured event before a message is handled, one after a
//! response is produced and one when the rest of the chain fails. Every
//! event carries the message id and trace id of the current context. Events
//! for remote transports also carry the transport name and role.
//!
//! # Log Events
//!
//! | Event | Default level | Fields |
//! |-------|---------------|--------|
//! | `Handling message` | `INFO` | `message_type`, `payload`, `message_id`, `trace_id` |
//! | `Handled message` | `INFO` | `message_type`, `payload`, `elapsed_ms`, `message_id`, `trace_id` |
//! | `Error while handling message` | `ERROR` | `message_type`, `error`, `elapsed_ms`, `message_id`, `trace_id` |
//!
//! Messages without fields and unit responses are logged without a payload.
//!
//! # Example
//!
//! ```
//! use conqueror_middleware::{LoggingMiddleware, PayloadLoggingStrategy};
//! use tracing::Level;
//!
//! #[derive(Debug, serde::Serialize)]
//! struct CreateUser {
//!     name: String,
//!     password: String,
//! }
//!
//! impl conqueror_core::Message for CreateUser {
//!     type Response = u64;
//! }
//!
//! let logging = LoggingMiddleware::<CreateUser>::new()
//!     .with_pre_execution_level(Level::DEBUG)
//!     .with_message_payload_strategy(PayloadLoggingStrategy::Omit)
//!     .with_pre_execution_hook(|ctx| {
//!         tracing::debug!(user = %ctx.message.name, "creating user");
//!         false
//!     });
//! # drop(logging);
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware};
use conqueror_core::{is_unit_response, ConquerorError, ConquerorResult, Message, TransportType};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Level;

const LOG_TARGET: &str = "conqueror::message";

macro_rules! event_at {
    ($level:expr, $($fields:tt)+) => {
        if $level == Level::ERROR {
            tracing::event!(target: LOG_TARGET, Level::ERROR, $($fields)+);
        } else if $level == Level::WARN {
            tracing::event!(target: LOG_TARGET, Level::WARN, $($fields)+);
        } else if $level == Level::INFO {
            tracing::event!(target: LOG_TARGET, Level::INFO, $($fields)+);
        } else if $level == Level::DEBUG {
            tracing::event!(target: LOG_TARGET, Level::DEBUG, $($fields)+);
        } else {
            tracing::event!(target: LOG_TARGET, Level::TRACE, $($fields)+);
        }
    };
}

fn enabled_at(level: Level) -> bool {
    if level == Level::ERROR {
        tracing::enabled!(target: LOG_TARGET, Level::ERROR)
    } else if level == Level::WARN {
        tracing::enabled!(target: LOG_TARGET, Level::WARN)
    } else if level == Level::INFO {
        tracing::enabled!(target: LOG_TARGET, Level::INFO)
    } else if level == Level::DEBUG {
        tracing::enabled!(target: LOG_TARGET, Level::DEBUG)
    } else {
        tracing::enabled!(target: LOG_TARGET, Level::TRACE)
    }
}

/// How message and response payloads are rendered into log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadLoggingStrategy {
    /// Do not log the payload.
    Omit,
    /// Log the payload's `Debug` representation.
    Raw,
    /// Log the payload as compact JSON.
    #[default]
    MinimalJson,
    /// Log the payload as pretty-printed JSON.
    IndentedJson,
}

impl PayloadLoggingStrategy {
    fn render<T: Serialize + fmt::Debug>(self, value: &T) -> Option<String> {
        let rendered = match self {
            Self::Omit => return None,
            Self::Raw => return Some(format!("{value:?}")),
            Self::MinimalJson => serde_json::to_string(value),
            Self::IndentedJson => serde_json::to_string_pretty(value),
        };

        match rendered {
            Ok(json) => Some(json),
            Err(err) => Some(format!("<unserializable payload: {err}>")),
        }
    }
}

/// What a pre-execution hook sees.
#[derive(Debug)]
pub struct LoggingPreExecutionContext<'a, M> {
    /// The level the event would be written at.
    pub level: Level,
    /// The id of the message, or `unknown`.
    pub message_id: &'a str,
    /// The trace id of the call chain.
    pub trace_id: &'a str,
    /// The transport the pipeline runs on.
    pub transport_type: &'a TransportType,
    /// The message about to be handled.
    pub message: &'a M,
}

/// What a post-execution hook sees.
#[derive(Debug)]
pub struct LoggingPostExecutionContext<'a, R> {
    /// The level the event would be written at.
    pub level: Level,
    /// The id of the message, or `unknown`.
    pub message_id: &'a str,
    /// The trace id of the call chain.
    pub trace_id: &'a str,
    /// The transport the pipeline runs on.
    pub transport_type: &'a TransportType,
    /// The response produced by the rest of the chain.
    pub response: &'a R,
    /// Time spent in the rest of the chain.
    pub elapsed: Duration,
}

/// What an error hook sees.
#[derive(Debug)]
pub struct LoggingErrorContext<'a> {
    /// The level the event would be written at.
    pub level: Level,
    /// The id of the message, or `unknown`.
    pub message_id: &'a str,
    /// The trace id of the call chain.
    pub trace_id: &'a str,
    /// The transport the pipeline runs on.
    pub transport_type: &'a TransportType,
    /// The error raised by the rest of the chain.
    pub error: &'a ConquerorError,
    /// Time spent in the rest of the chain.
    pub elapsed: Duration,
}

type PreHook<M> = Arc<dyn Fn(&LoggingPreExecutionContext<'_, M>) -> bool + Send + Sync>;
type PostHook<R> = Arc<dyn Fn(&LoggingPostExecutionContext<'_, R>) -> bool + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&LoggingErrorContext<'_>) -> bool + Send + Sync>;
type MessageStrategyFn<M> = Arc<dyn Fn(&M) -> PayloadLoggingStrategy + Send + Sync>;
type ResponseStrategyFn<R> = Arc<dyn Fn(&R) -> PayloadLoggingStrategy + Send + Sync>;

/// Middleware logging every message passing through a pipeline.
///
/// A hook returning `false` suppresses the corresponding event; it can write
/// its own event instead. Errors are always returned unchanged, whatever the
/// error hook decides.
pub struct LoggingMiddleware<M: Message> {
    pre_execution_level: Level,
    post_execution_level: Level,
    error_level: Level,
    message_payload_strategy: PayloadLoggingStrategy,
    response_payload_strategy: PayloadLoggingStrategy,
    message_payload_strategy_fn: Option<MessageStrategyFn<M>>,
    response_payload_strategy_fn: Option<ResponseStrategyFn<M::Response>>,
    pre_execution_hook: Option<PreHook<M>>,
    post_execution_hook: Option<PostHook<M::Response>>,
    error_hook: Option<ErrorHook>,
}

impl<M: Message> LoggingMiddleware<M> {
    /// Creates a logging middleware with default levels and JSON payloads.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pre_execution_level: Level::INFO,
            post_execution_level: Level::INFO,
            error_level: Level::ERROR,
            message_payload_strategy: PayloadLoggingStrategy::MinimalJson,
            response_payload_strategy: PayloadLoggingStrategy::MinimalJson,
            message_payload_strategy_fn: None,
            response_payload_strategy_fn: None,
            pre_execution_hook: None,
            post_execution_hook: None,
            error_hook: None,
        }
    }

    /// Sets the level of the event written before the message is handled.
    #[must_use]
    pub fn with_pre_execution_level(mut self, level: Level) -> Self {
        self.set_pre_execution_level(level);
        self
    }

    /// Sets the level of the event written after a response is produced.
    #[must_use]
    pub fn with_post_execution_level(mut self, level: Level) -> Self {
        self.set_post_execution_level(level);
        self
    }

    /// Sets the level of the event written on failure.
    #[must_use]
    pub fn with_error_level(mut self, level: Level) -> Self {
        self.set_error_level(level);
        self
    }

    /// Sets how the message payload is rendered.
    #[must_use]
    pub fn with_message_payload_strategy(mut self, strategy: PayloadLoggingStrategy) -> Self {
        self.set_message_payload_strategy(strategy);
        self
    }

    /// Sets how the response payload is rendered.
    #[must_use]
    pub fn with_response_payload_strategy(mut self, strategy: PayloadLoggingStrategy) -> Self {
        self.set_response_payload_strategy(strategy);
        self
    }

    /// Chooses the message payload strategy per message.
    ///
    /// Takes precedence over [`with_message_payload_strategy`](Self::with_message_payload_strategy).
    #[must_use]
    pub fn with_message_payload_strategy_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&M) -> PayloadLoggingStrategy + Send + Sync + 'static,
    {
        self.message_payload_strategy_fn = Some(Arc::new(f));
        self
    }

    /// Chooses the response payload strategy per response.
    #[must_use]
    pub fn with_response_payload_strategy_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&M::Response) -> PayloadLoggingStrategy + Send + Sync + 'static,
    {
        self.response_payload_strategy_fn = Some(Arc::new(f));
        self
    }

    /// Installs a hook called before the pre-execution event.
    #[must_use]
    pub fn with_pre_execution_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LoggingPreExecutionContext<'_, M>) -> bool + Send + Sync + 'static,
    {
        self.pre_execution_hook = Some(Arc::new(hook));
        self
    }

    /// Installs a hook called before the post-execution event.
    #[must_use]
    pub fn with_post_execution_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LoggingPostExecutionContext<'_, M::Response>) -> bool + Send + Sync + 'static,
    {
        self.post_execution_hook = Some(Arc::new(hook));
        self
    }

    /// Installs a hook called before the error event.
    #[must_use]
    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LoggingErrorContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Changes the pre-execution level of an attached middleware.
    pub fn set_pre_execution_level(&mut self, level: Level) {
        self.pre_execution_level = level;
    }

    /// Changes the post-execution level of an attached middleware.
    pub fn set_post_execution_level(&mut self, level: Level) {
        self.post_execution_level = level;
    }

    /// Changes the error level of an attached middleware.
    pub fn set_error_level(&mut self, level: Level) {
        self.error_level = level;
    }

    /// Changes the message payload strategy of an attached middleware.
    pub fn set_message_payload_strategy(&mut self, strategy: PayloadLoggingStrategy) {
        self.message_payload_strategy = strategy;
    }

    /// Changes the response payload strategy of an attached middleware.
    pub fn set_response_payload_strategy(&mut self, strategy: PayloadLoggingStrategy) {
        self.response_payload_strategy = strategy;
    }

    /// Returns the pre-execution level.
    #[must_use]
    pub const fn pre_execution_level(&self) -> Level {
        self.pre_execution_level
    }

    /// Returns the message payload strategy.
    #[must_use]
    pub const fn message_payload_strategy(&self) -> PayloadLoggingStrategy {
        self.message_payload_strategy
    }
}

impl<M> LoggingMiddleware<M>
where
    M: Message + Serialize + fmt::Debug,
    M::Response: Serialize + fmt::Debug,
{
    fn log_pre_execution(&self, ctx: &LoggingPreExecutionContext<'_, M>) {
        if let Some(hook) = &self.pre_execution_hook {
            if !hook(ctx) {
                return;
            }
        }

        if !enabled_at(ctx.level) {
            return;
        }

        let strategy = self
            .message_payload_strategy_fn
            .as_ref()
            .map_or(self.message_payload_strategy, |f| f(ctx.message));
        let payload = strategy
            .render(ctx.message)
            .filter(|json| !is_empty_payload(json));
        let (transport, role) = transport_fields(ctx.transport_type);

        event_at!(
            ctx.level,
            message_type = M::message_type_name(),
            transport,
            role,
            payload = payload.as_deref(),
            message_id = ctx.message_id,
            trace_id = ctx.trace_id,
            "Handling message"
        );
    }

    fn log_post_execution(&self, ctx: &LoggingPostExecutionContext<'_, M::Response>) {
        if let Some(hook) = &self.post_execution_hook {
            if !hook(ctx) {
                return;
            }
        }

        if !enabled_at(ctx.level) {
            return;
        }

        let payload = if is_unit_response::<M::Response>() {
            None
        } else {
            self.response_payload_strategy_fn
                .as_ref()
                .map_or(self.response_payload_strategy, |f| f(ctx.response))
                .render(ctx.response)
        };
        let (transport, role) = transport_fields(ctx.transport_type);

        event_at!(
            ctx.level,
            message_type = M::message_type_name(),
            transport,
            role,
            payload = payload.as_deref(),
            elapsed_ms = ctx.elapsed.as_secs_f64() * 1000.0,
            message_id = ctx.message_id,
            trace_id = ctx.trace_id,
            "Handled message"
        );
    }

    fn log_error(&self, ctx: &LoggingErrorContext<'_>) {
        if let Some(hook) = &self.error_hook {
            if !hook(ctx) {
                return;
            }
        }

        let (transport, role) = transport_fields(ctx.transport_type);

        event_at!(
            ctx.level,
            message_type = M::message_type_name(),
            transport,
            role,
            error = %ctx.error,
            elapsed_ms = ctx.elapsed.as_secs_f64() * 1000.0,
            message_id = ctx.message_id,
            trace_id = ctx.trace_id,
            "Error while handling message"
        );
    }
}

fn is_empty_payload(json: &str) -> bool {
    matches!(json, "null" | "{}")
}

fn transport_fields(transport_type: &TransportType) -> (Option<&str>, Option<String>) {
    if transport_type.is_in_process() {
        (None, None)
    } else {
        (
            Some(transport_type.name()),
            Some(transport_type.role().to_string()),
        )
    }
}

impl<M: Message> Default for LoggingMiddleware<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Clone for LoggingMiddleware<M> {
    fn clone(&self) -> Self {
        Self {
            pre_execution_level: self.pre_execution_level,
            post_execution_level: self.post_execution_level,
            error_level: self.error_level,
            message_payload_strategy: self.message_payload_strategy,
            response_payload_strategy: self.response_payload_strategy,
            message_payload_strategy_fn: self.message_payload_strategy_fn.clone(),
            response_payload_strategy_fn: self.response_payload_strategy_fn.clone(),
            pre_execution_hook: self.pre_execution_hook.clone(),
            post_execution_hook: self.post_execution_hook.clone(),
            error_hook: self.error_hook.clone(),
        }
    }
}

impl<M: Message> fmt::Debug for LoggingMiddleware<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingMiddleware")
            .field("pre_execution_level", &self.pre_execution_level)
            .field("post_execution_level", &self.post_execution_level)
            .field("error_level", &self.error_level)
            .field("message_payload_strategy", &self.message_payload_strategy)
            .field("response_payload_strategy", &self.response_payload_strategy)
            .finish_non_exhaustive()
    }
}

impl<M> Middleware<M> for LoggingMiddleware<M>
where
    M: Message + Serialize + fmt::Debug,
    M::Response: Serialize + fmt::Debug,
{
    fn name(&self) -> &'static str {
        "logging"
    }

    fn execute<'a>(
        &'a self,
        ctx: MiddlewareContext<'a, M>,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>> {
        Box::pin(async move {
            let context = ctx.conqueror_context();
            let transport_type = ctx.transport_type();
            let message_id = context
                .message_id()
                .map_or_else(|| "unknown".to_string(), |id| id.to_string());
            let trace_id = context.trace_id();

            self.log_pre_execution(&LoggingPreExecutionContext {
                level: self.pre_execution_level,
                message_id: &message_id,
                trace_id: &trace_id,
                transport_type,
                message: ctx.message(),
            });

            let start = Instant::now();
            let result = ctx.proceed().await;
            let elapsed = start.elapsed();

            match &result {
                Ok(response) => self.log_post_execution(&LoggingPostExecutionContext {
                    level: self.post_execution_level,
                    message_id: &message_id,
                    trace_id: &trace_id,
                    transport_type,
                    response,
                    elapsed,
                }),
                Err(error) => self.log_error(&LoggingErrorContext {
                    level: self.error_level,
                    message_id: &message_id,
                    trace_id: &trace_id,
                    transport_type,
                    error,
                    elapsed,
                }),
            }

            result
        })
    }
}
