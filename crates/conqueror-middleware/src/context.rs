//! Middleware context.
//!
//! The [`MiddlewareContext`] is what a middleware sees of an invocation: the
//! message, the cancellation token, where the pipeline runs, the services of
//! the current scope, the [`ConquerorContext`] and the continuation.

use crate::middleware::{BoxFuture, Next};
use conqueror_core::{ConquerorContext, ConquerorResult, Message, ServiceProvider, TransportType};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Per-middleware view of an invocation.
///
/// The message and token are owned by the context, so a middleware can
/// replace either before handing them on.
pub struct MiddlewareContext<'a, M: Message> {
    message: M,
    cancellation_token: CancellationToken,
    next: Next<'a, M>,
}

impl<'a, M: Message> MiddlewareContext<'a, M> {
    pub(crate) const fn new(
        message: M,
        cancellation_token: CancellationToken,
        next: Next<'a, M>,
    ) -> Self {
        Self {
            message,
            cancellation_token,
            next,
        }
    }

    /// Returns the message.
    pub const fn message(&self) -> &M {
        &self.message
    }

    /// Returns the message for modification.
    pub fn message_mut(&mut self) -> &mut M {
        &mut self.message
    }

    /// Replaces the message that [`proceed`](Self::proceed) will pass on.
    pub fn set_message(&mut self, message: M) {
        self.message = message;
    }

    /// Returns the cancellation token.
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Replaces the cancellation token that [`proceed`](Self::proceed) will pass on.
    pub fn set_cancellation_token(&mut self, cancellation_token: CancellationToken) {
        self.cancellation_token = cancellation_token;
    }

    /// Returns the transport this pipeline executes on.
    pub fn transport_type(&self) -> &'a TransportType {
        &self.next.chain().transport_type
    }

    /// Returns the services of the current scope.
    pub fn service_provider(&self) -> &'a ServiceProvider {
        &self.next.chain().service_provider
    }

    /// Returns the context of the current call chain.
    pub fn conqueror_context(&self) -> &'a ConquerorContext {
        &self.next.chain().conqueror_context
    }

    /// Returns the continuation.
    pub const fn next_handle(&self) -> Next<'a, M> {
        self.next
    }

    /// Runs the rest of the chain with an explicit message and token.
    ///
    /// May be called any number of times. Each call re-executes every
    /// following middleware and the terminal.
    pub fn next(
        &self,
        message: M,
        cancellation_token: CancellationToken,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>> {
        self.next.run(message, cancellation_token)
    }

    /// Runs the rest of the chain with the current message and token.
    pub fn proceed(self) -> BoxFuture<'a, ConquerorResult<M::Response>> {
        self.next.run(self.message, self.cancellation_token)
    }

    /// Consumes the context, returning the message.
    pub fn into_message(self) -> M {
        self.message
    }

    /// Splits the context into its message, token and continuation.
    pub fn into_parts(self) -> (M, CancellationToken, Next<'a, M>) {
        (self.message, self.cancellation_token, self.next)
    }
}

impl<M: Message + fmt::Debug> fmt::Debug for MiddlewareContext<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareContext")
            .field("message", &self.message)
            .field("transport_type", self.transport_type())
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .finish_non_exhaustive()
    }
}
