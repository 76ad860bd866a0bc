//! Handler registry.
//!
//! The [`MessageHandlerRegistry`] maps each message type to at most one
//! handler. It lives in the [`ServiceCollection`] as a singleton and is
//! filled through the [`MessageHandlerRegistration`] extension methods.
//!
//! Registering a handler for a message type that already has one replaces
//! the earlier registration in a single step. If the replaced handler was
//! bound in the service collection and no other message type still uses it,
//! that binding is removed as well.
//!
//! ```text
//! add_message_handler::<Ping, H1>()        Ping → Type(H1)      services: H1
//! add_message_handler::<Ping, H2>()        Ping → Type(H2)      services: H2
//! add_message_handler_delegate::<Ping>()   Ping → Delegate      services: -
//! ```

use crate::handler::{DynMessageHandler, HandlerContext, MessageHandler};
use conqueror_core::{
    ConquerorContext, ConquerorContextAccessor, ConquerorError, ConquerorResult, Injectable,
    InjectionError, Lifetime, Message, MessageId, ServiceCollection, ServiceProvider,
    TransportType,
};
use conqueror_middleware::{BoxFuture, Pipeline, Terminal};
use conqueror_telemetry::{metrics::record_message, InFlightGuard, Outcome};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

type ResolveHandler<M> =
    Arc<dyn Fn(&ServiceProvider) -> Result<Arc<dyn DynMessageHandler<M>>, InjectionError> + Send + Sync>;
type HandlerFuture<M> = BoxFuture<'static, ConquerorResult<<M as Message>::Response>>;
type ConfigurePipeline<M> = Arc<dyn Fn(&mut Pipeline<M>) + Send + Sync>;
type HandlerDelegate<M> = Arc<dyn Fn(M, HandlerContext) -> HandlerFuture<M> + Send + Sync>;

/// How a message type is bound to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerBinding {
    /// A handler type constructed by the service provider.
    Type,
    /// A handler type constructed by a user factory.
    Factory,
    /// A single handler instance.
    Instance,
    /// A closure.
    Delegate,
}

/// A read-only view of one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegistration {
    /// The type name of the message.
    pub message_type: &'static str,
    /// How the handler is bound.
    pub binding: HandlerBinding,
    /// The handler type name, absent for delegates.
    pub handler_type: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HandlerType {
    id: TypeId,
    name: &'static str,
}

impl HandlerType {
    fn of<H: 'static>() -> Self {
        Self {
            id: TypeId::of::<H>(),
            name: std::any::type_name::<H>(),
        }
    }
}

struct Registration {
    message_type: &'static str,
    binding: HandlerBinding,
    handler_type: Option<HandlerType>,
    invoker: Arc<dyn Any + Send + Sync>,
}

enum HandlerSource<M: Message> {
    Service(ResolveHandler<M>),
    Delegate(HandlerDelegate<M>),
}

/// Runs the server side of one message type: context fork, handler
/// pipeline, handler, merge.
pub struct HandlerInvoker<M: Message> {
    source: HandlerSource<M>,
    configure_pipeline: Option<ConfigurePipeline<M>>,
}

impl<M: Message> HandlerInvoker<M> {
    fn for_service<H: MessageHandler<M>>(resolve: ResolveHandler<M>) -> Self {
        Self {
            source: HandlerSource::Service(resolve),
            configure_pipeline: Some(Arc::new(H::configure_pipeline)),
        }
    }

    /// Handles `message` below `parent`.
    ///
    /// The handler runs in a child of `parent` which is merged back when the
    /// pipeline completes, whether it succeeded or not. The child keeps the
    /// message id of `parent` if it has one and gets a new one otherwise.
    pub async fn invoke(
        &self,
        message: M,
        service_provider: &ServiceProvider,
        parent: &ConquerorContext,
        transport_type: TransportType,
        cancellation_token: CancellationToken,
    ) -> ConquerorResult<M::Response> {
        let context = parent.fork();
        let message_id = match context.message_id() {
            Some(id) => id,
            None => {
                let id = MessageId::new();
                context.set_message_id(id);
                id
            }
        };

        let _in_flight = InFlightGuard::new();
        let start = Instant::now();
        tracing::debug!(
            message_type = M::message_type_name(),
            transport = %transport_type,
            message_id = %message_id,
            "handling message"
        );

        let result = async {
            let mut pipeline = Pipeline::new(
                service_provider.clone(),
                context.clone(),
                transport_type.clone(),
            );
            if let Some(configure) = &self.configure_pipeline {
                configure(&mut pipeline);
            }

            let terminal = self.terminal(service_provider, &context, &transport_type)?;
            let chain = pipeline.build(terminal);
            ConquerorContextAccessor::scope(
                Some(context.clone()),
                chain.execute(message, cancellation_token),
            )
            .await
        }
        .await;

        context.merge_into(parent);

        let elapsed = start.elapsed();
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(ConquerorError::Cancelled) => Outcome::Cancelled,
            Err(_) => Outcome::Failure,
        };
        record_message(M::message_type_name(), &transport_type, outcome, elapsed);
        tracing::debug!(
            message_type = M::message_type_name(),
            transport = %transport_type,
            message_id = %message_id,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            success = result.is_ok(),
            "handled message"
        );

        result
    }

    fn terminal(
        &self,
        service_provider: &ServiceProvider,
        context: &ConquerorContext,
        transport_type: &TransportType,
    ) -> ConquerorResult<Terminal<M>> {
        let context = context.clone();
        let transport_type = transport_type.clone();
        let provider = service_provider.clone();

        match &self.source {
            HandlerSource::Service(resolve) => {
                let handler = resolve(service_provider)?;
                Ok(Box::new(move |message: M, token: CancellationToken| -> HandlerFuture<M> {
                    let handler = Arc::clone(&handler);
                    let ctx = HandlerContext::new(
                        context.clone(),
                        transport_type.clone(),
                        provider.clone(),
                        token,
                    );
                    Box::pin(async move {
                        if ctx.cancellation_token().is_cancelled() {
                            return Err(ConquerorError::Cancelled);
                        }
                        handler.handle_dyn(message, &ctx).await
                    })
                }))
            }
            HandlerSource::Delegate(delegate) => {
                let delegate = Arc::clone(delegate);
                Ok(Box::new(move |message: M, token: CancellationToken| -> HandlerFuture<M> {
                    if token.is_cancelled() {
                        return Box::pin(async { Err(ConquerorError::Cancelled) });
                    }
                    let ctx = HandlerContext::new(
                        context.clone(),
                        transport_type.clone(),
                        provider.clone(),
                        token,
                    );
                    delegate(message, ctx)
                }))
            }
        }
    }
}

impl<M: Message> fmt::Debug for HandlerInvoker<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            HandlerSource::Service(_) => "service",
            HandlerSource::Delegate(_) => "delegate",
        };
        f.debug_struct("HandlerInvoker")
            .field("message_type", &M::message_type_name())
            .field("source", &source)
            .finish_non_exhaustive()
    }
}

/// Registered handlers, keyed by message type.
#[derive(Default)]
pub struct MessageHandlerRegistry {
    registrations: RwLock<HashMap<TypeId, Registration>>,
}

impl MessageHandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a handler is registered for `M`.
    #[must_use]
    pub fn contains<M: Message>(&self) -> bool {
        self.registrations.read().contains_key(&TypeId::of::<M>())
    }

    /// Returns how the handler for `M` is bound.
    #[must_use]
    pub fn binding_of<M: Message>(&self) -> Option<HandlerBinding> {
        self.registrations
            .read()
            .get(&TypeId::of::<M>())
            .map(|registration| registration.binding)
    }

    /// Returns the handler type name for `M`, if it is not a delegate.
    #[must_use]
    pub fn handler_type_of<M: Message>(&self) -> Option<&'static str> {
        self.registrations
            .read()
            .get(&TypeId::of::<M>())
            .and_then(|registration| registration.handler_type)
            .map(|handler_type| handler_type.name)
    }

    /// Returns all registrations, ordered by message type name.
    #[must_use]
    pub fn registrations(&self) -> Vec<HandlerRegistration> {
        let mut all: Vec<_> = self
            .registrations
            .read()
            .values()
            .map(|registration| HandlerRegistration {
                message_type: registration.message_type,
                binding: registration.binding,
                handler_type: registration.handler_type.map(|handler_type| handler_type.name),
            })
            .collect();
        all.sort_by_key(|registration| registration.message_type);
        all
    }

    /// Returns the number of registered message types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    /// Returns the invoker for `M`.
    #[must_use]
    pub fn invoker<M: Message>(&self) -> Option<Arc<HandlerInvoker<M>>> {
        let invoker = Arc::clone(&self.registrations.read().get(&TypeId::of::<M>())?.invoker);
        invoker.downcast::<HandlerInvoker<M>>().ok()
    }

    /// Stores the registration for `M`.
    ///
    /// Returns the handler type that no registration uses any more, if the
    /// replaced registration left one behind.
    fn insert<M: Message>(
        &self,
        binding: HandlerBinding,
        handler_type: Option<HandlerType>,
        invoker: HandlerInvoker<M>,
    ) -> Option<HandlerType> {
        let mut registrations = self.registrations.write();
        let replaced = registrations.insert(
            TypeId::of::<M>(),
            Registration {
                message_type: M::message_type_name(),
                binding,
                handler_type,
                invoker: Arc::new(invoker),
            },
        );

        let stale = replaced?.handler_type?;
        let still_used = registrations
            .values()
            .any(|registration| registration.handler_type.map(|t| t.id) == Some(stale.id));
        (!still_used).then_some(stale)
    }
}

impl fmt::Debug for MessageHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandlerRegistry")
            .field("registrations", &self.registrations())
            .finish()
    }
}

fn registry_of(services: &mut ServiceCollection) -> Arc<MessageHandlerRegistry> {
    if let Some(registry) = services.get_instance::<MessageHandlerRegistry>() {
        return registry;
    }
    let registry = Arc::new(MessageHandlerRegistry::new());
    services.add_singleton(Arc::clone(&registry));
    registry
}

fn register<M: Message>(
    services: &mut ServiceCollection,
    binding: HandlerBinding,
    handler_type: Option<HandlerType>,
    invoker: HandlerInvoker<M>,
) {
    let registry = registry_of(services);
    if let Some(stale) = registry.insert(binding, handler_type, invoker) {
        services.remove_by_id(stale.id);
        tracing::trace!(
            message_type = M::message_type_name(),
            handler = stale.name,
            "removed replaced handler binding"
        );
    }
    tracing::trace!(
        message_type = M::message_type_name(),
        binding = ?binding,
        "registered message handler"
    );
}

fn resolve_from_services<M: Message, H: MessageHandler<M>>() -> ResolveHandler<M> {
    Arc::new(|provider: &ServiceProvider| {
        provider
            .resolve_required::<H>()
            .map(|handler| handler as Arc<dyn DynMessageHandler<M>>)
    })
}

/// Handler registration methods for [`ServiceCollection`].
///
/// # Example
///
/// ```
/// use conqueror_core::{ConquerorResult, Lifetime, Message, ServiceCollection};
/// use conqueror_messaging::{HandlerBinding, MessageHandlerRegistration, MessageHandlerRegistry};
///
/// struct Ping;
///
/// impl Message for Ping {
///     type Response = &'static str;
/// }
///
/// let mut services = ServiceCollection::new();
/// services.add_message_handler_delegate::<Ping, _, _>(|_ping, _ctx| async { Ok("pong") });
///
/// let registry = services.get_instance::<MessageHandlerRegistry>().unwrap();
/// assert_eq!(registry.binding_of::<Ping>(), Some(HandlerBinding::Delegate));
/// ```
pub trait MessageHandlerRegistration {
    /// Registers `H` as the handler for `M`, constructed by the provider.
    fn add_message_handler<M, H>(&mut self, lifetime: Lifetime) -> &mut Self
    where
        M: Message,
        H: MessageHandler<M> + Injectable;

    /// Registers `H` as the handler for `M`, constructed by `factory`.
    fn add_message_handler_factory<M, H, F>(&mut self, lifetime: Lifetime, factory: F) -> &mut Self
    where
        M: Message,
        H: MessageHandler<M>,
        F: Fn(&ServiceProvider) -> Result<H, InjectionError> + Send + Sync + 'static;

    /// Registers a single instance as the handler for `M`.
    fn add_message_handler_instance<M, H>(&mut self, handler: H) -> &mut Self
    where
        M: Message,
        H: MessageHandler<M>;

    /// Registers a closure as the handler for `M`.
    fn add_message_handler_delegate<M, F, Fut>(&mut self, handler: F) -> &mut Self
    where
        M: Message,
        F: Fn(M, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConquerorResult<M::Response>> + Send + 'static;

    /// Registers a closure as the handler for `M` together with its pipeline.
    fn add_message_handler_delegate_with_pipeline<M, F, Fut, P>(
        &mut self,
        handler: F,
        configure_pipeline: P,
    ) -> &mut Self
    where
        M: Message,
        F: Fn(M, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConquerorResult<M::Response>> + Send + 'static,
        P: Fn(&mut Pipeline<M>) + Send + Sync + 'static;
}

impl MessageHandlerRegistration for ServiceCollection {
    fn add_message_handler<M, H>(&mut self, lifetime: Lifetime) -> &mut Self
    where
        M: Message,
        H: MessageHandler<M> + Injectable,
    {
        self.add_injectable::<H>(lifetime);
        register(
            self,
            HandlerBinding::Type,
            Some(HandlerType::of::<H>()),
            HandlerInvoker::for_service::<H>(resolve_from_services::<M, H>()),
        );
        self
    }

    fn add_message_handler_factory<M, H, F>(&mut self, lifetime: Lifetime, factory: F) -> &mut Self
    where
        M: Message,
        H: MessageHandler<M>,
        F: Fn(&ServiceProvider) -> Result<H, InjectionError> + Send + Sync + 'static,
    {
        self.add_factory(lifetime, factory);
        register(
            self,
            HandlerBinding::Factory,
            Some(HandlerType::of::<H>()),
            HandlerInvoker::for_service::<H>(resolve_from_services::<M, H>()),
        );
        self
    }

    fn add_message_handler_instance<M, H>(&mut self, handler: H) -> &mut Self
    where
        M: Message,
        H: MessageHandler<M>,
    {
        self.add_singleton(Arc::new(handler));
        register(
            self,
            HandlerBinding::Instance,
            Some(HandlerType::of::<H>()),
            HandlerInvoker::for_service::<H>(resolve_from_services::<M, H>()),
        );
        self
    }

    fn add_message_handler_delegate<M, F, Fut>(&mut self, handler: F) -> &mut Self
    where
        M: Message,
        F: Fn(M, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConquerorResult<M::Response>> + Send + 'static,
    {
        register_delegate(self, handler, None);
        self
    }

    fn add_message_handler_delegate_with_pipeline<M, F, Fut, P>(
        &mut self,
        handler: F,
        configure_pipeline: P,
    ) -> &mut Self
    where
        M: Message,
        F: Fn(M, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConquerorResult<M::Response>> + Send + 'static,
        P: Fn(&mut Pipeline<M>) + Send + Sync + 'static,
    {
        register_delegate(self, handler, Some(Arc::new(configure_pipeline)));
        self
    }
}

fn register_delegate<M, F, Fut>(
    services: &mut ServiceCollection,
    handler: F,
    configure_pipeline: Option<ConfigurePipeline<M>>,
) where
    M: Message,
    F: Fn(M, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConquerorResult<M::Response>> + Send + 'static,
{
    let delegate: HandlerDelegate<M> = Arc::new(move |message: M, ctx: HandlerContext| -> HandlerFuture<M> {
        Box::pin(handler(message, ctx))
    });
    register(
        services,
        HandlerBinding::Delegate,
        None,
        HandlerInvoker {
            source: HandlerSource::Delegate(delegate),
            configure_pipeline,
        },
    );
}
