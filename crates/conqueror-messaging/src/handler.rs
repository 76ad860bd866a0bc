//! Message handler trait and handler context.
//!
//! A handler produces the response for one message type. It may declare the
//! server-side pipeline for that message through
//! [`MessageHandler::configure_pipeline`], which runs on every invocation
//! before the handler itself is called.
//!
//! # Example
//!
//! ```
//! use conqueror_core::{ConquerorResult, Message};
//! use conqueror_messaging::{HandlerContext, MessageHandler};
//! use conqueror_middleware::{Pipeline, TimeoutMiddleware};
//! use std::time::Duration;
//!
//! struct GetBalance {
//!     account: u64,
//! }
//!
//! impl Message for GetBalance {
//!     type Response = i64;
//! }
//!
//! struct GetBalanceHandler;
//!
//! impl MessageHandler<GetBalance> for GetBalanceHandler {
//!     async fn handle(&self, message: GetBalance, _ctx: &HandlerContext) -> ConquerorResult<i64> {
//!         Ok(i64::try_from(message.account).unwrap_or_default() * 10)
//!     }
//!
//!     fn configure_pipeline(pipeline: &mut Pipeline<GetBalance>) {
//!         pipeline.use_middleware(TimeoutMiddleware::new(Duration::from_secs(2)));
//!     }
//! }
//! ```

use crate::client::MessageClient;
use conqueror_core::{
    ConquerorContext, ConquerorResult, Message, MessageId, ServiceProvider, TransportType,
};
use conqueror_middleware::{BoxFuture, Pipeline};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Handles messages of type `M`.
///
/// One type may implement `MessageHandler` for several message types; each
/// is registered separately.
pub trait MessageHandler<M: Message>: Send + Sync + 'static {
    /// Produces the response for `message`.
    fn handle(
        &self,
        message: M,
        ctx: &HandlerContext,
    ) -> impl Future<Output = ConquerorResult<M::Response>> + Send;

    /// Attaches the server-side middlewares for `M`.
    ///
    /// Called once per invocation with a fresh pipeline, so it must not keep
    /// state between calls.
    fn configure_pipeline(pipeline: &mut Pipeline<M>) {
        let _ = pipeline;
    }
}

/// Object-safe form of [`MessageHandler`].
pub(crate) trait DynMessageHandler<M: Message>: Send + Sync {
    fn handle_dyn<'a>(
        &'a self,
        message: M,
        ctx: &'a HandlerContext,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>>;
}

impl<M: Message, H: MessageHandler<M>> DynMessageHandler<M> for H {
    fn handle_dyn<'a>(
        &'a self,
        message: M,
        ctx: &'a HandlerContext,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>> {
        Box::pin(self.handle(message, ctx))
    }
}

/// What a handler sees of its invocation.
#[derive(Clone)]
pub struct HandlerContext {
    conqueror_context: ConquerorContext,
    transport_type: TransportType,
    service_provider: ServiceProvider,
    cancellation_token: CancellationToken,
}

impl HandlerContext {
    /// Creates a handler context.
    #[must_use]
    pub fn new(
        conqueror_context: ConquerorContext,
        transport_type: TransportType,
        service_provider: ServiceProvider,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            conqueror_context,
            transport_type,
            service_provider,
            cancellation_token,
        }
    }

    /// Returns the context of the current call chain.
    pub const fn conqueror_context(&self) -> &ConquerorContext {
        &self.conqueror_context
    }

    /// Returns the transport the message arrived through.
    pub const fn transport_type(&self) -> &TransportType {
        &self.transport_type
    }

    /// Returns the services of the current scope.
    pub const fn service_provider(&self) -> &ServiceProvider {
        &self.service_provider
    }

    /// Returns the cancellation token passed by the innermost middleware.
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Returns the id of the message being handled.
    pub fn message_id(&self) -> Option<MessageId> {
        self.conqueror_context.message_id()
    }

    /// Returns the trace id of the call chain.
    pub fn trace_id(&self) -> String {
        self.conqueror_context.trace_id()
    }

    /// Returns a client for sending a nested message from this handler.
    ///
    /// The nested call is a child of this handler's context.
    #[must_use]
    pub fn message_client<N: Message>(&self) -> MessageClient<N> {
        MessageClient::new(self.service_provider.clone())
            .with_context(self.conqueror_context.clone())
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("transport_type", &self.transport_type)
            .field("message_id", &self.message_id())
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .finish_non_exhaustive()
    }
}
