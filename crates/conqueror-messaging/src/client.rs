//! Message clients.
//!
//! A [`MessageClient`] sends one message type. Every call runs in a child of
//! the caller's context: downstream and bidirectional data flow into the
//! call, upstream and bidirectional data flow back out once it completes.
//!
//! ```text
//! caller ctx ──fork──► client pipeline ──► transport ──► handler pipeline ──► handler
//!      ▲                                                                        │
//!      └──────────────────────────────── merge ◄────────────────────────────────┘
//! ```

use crate::transport::{InProcessTransport, TransportSender};
use conqueror_core::{
    ConquerorContext, ConquerorContextAccessor, ConquerorResult, Message, MessageId,
    ServiceProvider,
};
use conqueror_middleware::Pipeline;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type ConfigurePipeline<M> = Arc<dyn Fn(&mut Pipeline<M>) + Send + Sync>;
type TransportFactory<M> =
    Arc<dyn Fn(&TransportBuilder<'_>) -> Arc<dyn TransportSender<M>> + Send + Sync>;

/// Entry point for creating message clients.
///
/// # Example
///
/// ```
/// use conqueror_core::{Message, ServiceCollection};
/// use conqueror_messaging::{MessageClients, MessageHandlerRegistration};
///
/// struct Add(u32, u32);
///
/// impl Message for Add {
///     type Response = u32;
/// }
///
/// let mut services = ServiceCollection::new();
/// services.add_message_handler_delegate::<Add, _, _>(|Add(a, b), _ctx| async move { Ok(a + b) });
/// let provider = services.build_provider();
///
/// let clients = MessageClients::new(&provider);
/// let sum = tokio_test::block_on(clients.for_message::<Add>().handle(Add(2, 3))).unwrap();
/// assert_eq!(sum, 5);
/// ```
#[derive(Debug, Clone)]
pub struct MessageClients {
    service_provider: ServiceProvider,
}

impl MessageClients {
    /// Creates clients resolving services from `service_provider`.
    #[must_use]
    pub fn new(service_provider: &ServiceProvider) -> Self {
        Self {
            service_provider: service_provider.clone(),
        }
    }

    /// Returns a client for `M` using the in-process transport.
    #[must_use]
    pub fn for_message<M: Message>(&self) -> MessageClient<M> {
        MessageClient::new(self.service_provider.clone())
    }
}

/// What a transport factory gets to build the transport for one call.
#[derive(Debug, Clone, Copy)]
pub struct TransportBuilder<'a> {
    service_provider: &'a ServiceProvider,
    conqueror_context: &'a ConquerorContext,
}

impl<'a> TransportBuilder<'a> {
    /// Creates a builder for a call made in `conqueror_context`.
    #[must_use]
    pub const fn new(
        service_provider: &'a ServiceProvider,
        conqueror_context: &'a ConquerorContext,
    ) -> Self {
        Self {
            service_provider,
            conqueror_context,
        }
    }

    /// Returns the services of the calling scope.
    #[must_use]
    pub const fn service_provider(&self) -> &'a ServiceProvider {
        self.service_provider
    }

    /// Returns the context of the call being built.
    #[must_use]
    pub const fn conqueror_context(&self) -> &'a ConquerorContext {
        self.conqueror_context
    }

    /// Sends to a handler registered in this process.
    #[must_use]
    pub fn use_in_process<M: Message>(&self) -> Arc<dyn TransportSender<M>> {
        Arc::new(InProcessTransport)
    }
}

/// Sends messages of type `M`.
pub struct MessageClient<M: Message> {
    service_provider: ServiceProvider,
    conqueror_context: Option<ConquerorContext>,
    configure_pipeline: Option<ConfigurePipeline<M>>,
    transport: Option<TransportFactory<M>>,
}

impl<M: Message> MessageClient<M> {
    /// Creates an in-process client without client-side middlewares.
    #[must_use]
    pub fn new(service_provider: ServiceProvider) -> Self {
        Self {
            service_provider,
            conqueror_context: None,
            configure_pipeline: None,
            transport: None,
        }
    }

    /// Makes calls children of `conqueror_context`.
    ///
    /// Without an explicit context a call is a child of the ambient context,
    /// or of a new context if there is none.
    #[must_use]
    pub fn with_context(mut self, conqueror_context: ConquerorContext) -> Self {
        self.conqueror_context = Some(conqueror_context);
        self
    }

    /// Sets the client-side pipeline, called with a fresh pipeline per call.
    #[must_use]
    pub fn with_pipeline<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut Pipeline<M>) + Send + Sync + 'static,
    {
        self.configure_pipeline = Some(Arc::new(configure));
        self
    }

    /// Sets the transport factory, called once per call.
    #[must_use]
    pub fn with_transport<F>(mut self, factory: F) -> Self
    where
        F: Fn(&TransportBuilder<'_>) -> Arc<dyn TransportSender<M>> + Send + Sync + 'static,
    {
        self.transport = Some(Arc::new(factory));
        self
    }

    /// Sends `message` and waits for its response.
    ///
    /// The call runs on a fork of the context given to
    /// [`with_context`](Self::with_context), or else of the ambient context
    /// installed by [`ConquerorContextAccessor::scope`]. Without either, a
    /// fresh root context is used and nothing flows back to the caller. In
    /// particular, a context returned by
    /// [`ConquerorContextAccessor::get_or_create`] outside a `scope` is not
    /// ambient; pass it with `with_context`.
    ///
    /// # Errors
    ///
    /// Returns whatever the client pipeline, the transport or the handler
    /// returns.
    pub async fn handle(&self, message: M) -> ConquerorResult<M::Response> {
        self.handle_with_token(message, CancellationToken::new())
            .await
    }

    /// Sends `message`, giving up once `cancellation_token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns whatever the client pipeline, the transport or the handler
    /// returns.
    pub async fn handle_with_token(
        &self,
        message: M,
        cancellation_token: CancellationToken,
    ) -> ConquerorResult<M::Response> {
        let parent = self
            .conqueror_context
            .clone()
            .or_else(ConquerorContextAccessor::current)
            .unwrap_or_default();
        let context = parent.fork();
        context.set_message_id(MessageId::new());

        let sender = match &self.transport {
            Some(factory) => factory(&TransportBuilder::new(&self.service_provider, &context)),
            None => Arc::new(InProcessTransport),
        };

        let mut pipeline = Pipeline::new(
            self.service_provider.clone(),
            context.clone(),
            sender.transport_type(),
        );
        if let Some(configure) = &self.configure_pipeline {
            configure(&mut pipeline);
        }

        let provider = self.service_provider.clone();
        let terminal_context = context.clone();
        let chain = pipeline.build(move |message, token| {
            let sender = Arc::clone(&sender);
            let provider = provider.clone();
            let context = terminal_context.clone();
            Box::pin(async move { sender.send(message, &provider, &context, token).await })
        });

        let result = ConquerorContextAccessor::scope(
            Some(context.clone()),
            chain.execute(message, cancellation_token),
        )
        .await;
        context.merge_into(&parent);
        result
    }
}

impl<M: Message> Clone for MessageClient<M> {
    fn clone(&self) -> Self {
        Self {
            service_provider: self.service_provider.clone(),
            conqueror_context: self.conqueror_context.clone(),
            configure_pipeline: self.configure_pipeline.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<M: Message> fmt::Debug for MessageClient<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageClient")
            .field("message_type", &M::message_type_name())
            .field("has_context", &self.conqueror_context.is_some())
            .field("has_pipeline", &self.configure_pipeline.is_some())
            .field("has_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MessageHandlerRegistration;
    use conqueror_core::{ConquerorError, Scope, ServiceCollection, TransportRole};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    struct Echo(String);

    impl Message for Echo {
        type Response = String;
    }

    fn provider() -> ServiceProvider {
        let mut services = ServiceCollection::new();
        services.add_message_handler_delegate::<Echo, _, _>(|Echo(text), _ctx| async move {
            Ok(text.to_uppercase())
        });
        services.build_provider()
    }

    #[tokio::test]
    async fn test_handle_in_process() {
        let client = MessageClients::new(&provider()).for_message::<Echo>();
        assert_eq!(client.handle(Echo("hi".into())).await.unwrap(), "HI");
    }

    #[tokio::test]
    async fn test_client_pipeline_sees_client_role() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let recorded = Arc::clone(&seen);

        let client = MessageClient::<Echo>::new(provider()).with_pipeline(move |pipeline| {
            *recorded.lock() = Some(pipeline.transport_type().role());
        });
        client.handle(Echo("x".into())).await.unwrap();

        assert_eq!(*seen.lock(), Some(TransportRole::Client));
    }

    #[tokio::test]
    async fn test_transport_factory_called_per_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);

        let client = MessageClient::<Echo>::new(provider()).with_transport(move |builder| {
            counted.fetch_add(1, Ordering::SeqCst);
            assert!(builder.conqueror_context().message_id().is_some());
            builder.use_in_process()
        });
        client.handle(Echo("a".into())).await.unwrap();
        client.handle(Echo("b".into())).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_explicit_context_receives_upstream_data() {
        let mut services = ServiceCollection::new();
        services.add_message_handler_delegate::<Echo, _, _>(|Echo(text), ctx| async move {
            ctx.conqueror_context()
                .upstream_context_data()
                .set("echoed", text.clone(), Scope::InProcess);
            Ok(text)
        });
        let parent = ConquerorContext::new();

        MessageClient::<Echo>::new(services.build_provider())
            .with_context(parent.clone())
            .handle(Echo("up".into()))
            .await
            .unwrap();

        assert_eq!(parent.upstream_context_data().get_str("echoed"), Some("up"));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let token = CancellationToken::new();
        token.cancel();

        let err = MessageClients::new(&provider())
            .for_message::<Echo>()
            .handle_with_token(Echo("late".into()), token)
            .await
            .unwrap_err();

        assert!(matches!(err, ConquerorError::Cancelled));
    }
}
