//! Mutable middleware pipeline.
//!
//! A [`Pipeline`] collects the middlewares for one invocation of one message
//! type. Builder callbacks append entries with [`Pipeline::use_middleware`] or
//! [`Pipeline::use_fn`], adjust existing entries with [`Pipeline::configure`]
//! and drop them with [`Pipeline::without`].
//!
//! Configuration is applied to the entries present at the time of the call:
//!
//! ```text
//! use(A) → use(B) → configure::<A>(..)  // mutates the A added first
//! use(A) → without::<A>() → use(A)      // only the second A runs
//! ```
//!
//! [`Pipeline::build`] freezes the entries together with a terminal (the
//! transport sender on the client side, the handler on the server side) into
//! a [`PipelineChain`], which runs them by position.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, FnMiddleware, Middleware, Next};
use conqueror_core::{ConquerorContext, ConquerorResult, Message, ServiceProvider, TransportType};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// The end of a chain, invoked after the last middleware.
pub type Terminal<M> = Box<
    dyn Fn(M, CancellationToken) -> BoxFuture<'static, ConquerorResult<<M as Message>::Response>>
        + Send
        + Sync,
>;

/// An ordered, mutable list of middlewares for one message type.
///
/// # Example
///
/// ```
/// use conqueror_core::{ConquerorContext, Message, ServiceProvider, TransportRole, TransportType};
/// use conqueror_middleware::{LoggingMiddleware, Pipeline, TimeoutMiddleware};
/// use std::time::Duration;
///
/// #[derive(Debug, serde::Serialize)]
/// struct Ping;
///
/// impl Message for Ping {
///     type Response = ();
/// }
///
/// let mut pipeline = Pipeline::<Ping>::new(
///     ServiceProvider::empty(),
///     ConquerorContext::new(),
///     TransportType::in_process(TransportRole::Server),
/// );
/// pipeline
///     .use_middleware(LoggingMiddleware::new())
///     .use_middleware(TimeoutMiddleware::new(Duration::from_secs(5)))
///     .configure::<TimeoutMiddleware>(|timeout| timeout.set_timeout(Duration::from_secs(1)));
///
/// assert_eq!(pipeline.names(), vec!["logging", "timeout"]);
/// pipeline.without::<LoggingMiddleware<Ping>>();
/// assert_eq!(pipeline.len(), 1);
/// ```
pub struct Pipeline<M: Message> {
    middlewares: Vec<Box<dyn Middleware<M>>>,
    transport_type: TransportType,
    service_provider: ServiceProvider,
    conqueror_context: ConquerorContext,
}

impl<M: Message> Pipeline<M> {
    /// Creates an empty pipeline for an invocation.
    #[must_use]
    pub fn new(
        service_provider: ServiceProvider,
        conqueror_context: ConquerorContext,
        transport_type: TransportType,
    ) -> Self {
        Self {
            middlewares: Vec::new(),
            transport_type,
            service_provider,
            conqueror_context,
        }
    }

    /// Appends a middleware.
    pub fn use_middleware<T: Middleware<M>>(&mut self, middleware: T) -> &mut Self {
        self.middlewares.push(Box::new(middleware));
        self
    }

    /// Appends an inline middleware defined by a closure.
    pub fn use_fn<F>(&mut self, name: &'static str, func: F) -> &mut Self
    where
        F: for<'a> Fn(MiddlewareContext<'a, M>) -> BoxFuture<'a, ConquerorResult<M::Response>>
            + Send
            + Sync
            + 'static,
    {
        self.use_middleware(FnMiddleware::new(name, func))
    }

    /// Applies `configure` to every attached middleware of type `T`, in order.
    ///
    /// Middlewares added afterwards are not affected.
    pub fn configure<T: Middleware<M>>(&mut self, mut configure: impl FnMut(&mut T)) -> &mut Self {
        for entry in &mut self.middlewares {
            if let Some(middleware) = (**entry).as_any_mut().downcast_mut::<T>() {
                configure(middleware);
            }
        }
        self
    }

    /// Removes every attached middleware of type `T`.
    pub fn without<T: Middleware<M>>(&mut self) -> &mut Self {
        self.middlewares.retain(|entry| !(**entry).as_any().is::<T>());
        self
    }

    /// Removes every attached middleware with the given name.
    pub fn without_named(&mut self, name: &str) -> &mut Self {
        self.middlewares.retain(|entry| entry.name() != name);
        self
    }

    /// Returns `true` if a middleware of type `T` is attached.
    #[must_use]
    pub fn contains<T: Middleware<M>>(&self) -> bool {
        self.middlewares
            .iter()
            .any(|entry| (**entry).as_any().is::<T>())
    }

    /// Returns the number of attached middlewares.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Returns `true` if no middleware is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Iterates over the attached middlewares in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Middleware<M>> {
        self.middlewares.iter().map(|entry| &**entry)
    }

    /// Returns the names of the attached middlewares in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(|middleware| middleware.name()).collect()
    }

    /// Returns the transport this pipeline will execute on.
    pub const fn transport_type(&self) -> &TransportType {
        &self.transport_type
    }

    /// Returns the services of the current scope.
    pub const fn service_provider(&self) -> &ServiceProvider {
        &self.service_provider
    }

    /// Returns the context of the current call chain.
    pub const fn conqueror_context(&self) -> &ConquerorContext {
        &self.conqueror_context
    }

    /// Freezes the pipeline into an executable chain ending in `terminal`.
    pub fn build<F>(self, terminal: F) -> PipelineChain<M>
    where
        F: Fn(M, CancellationToken) -> BoxFuture<'static, ConquerorResult<M::Response>>
            + Send
            + Sync
            + 'static,
    {
        PipelineChain {
            state: ChainState {
                middlewares: self.middlewares,
                terminal: Box::new(terminal),
                transport_type: self.transport_type,
                service_provider: self.service_provider,
                conqueror_context: self.conqueror_context,
            },
        }
    }
}

impl<M: Message> fmt::Debug for Pipeline<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("middlewares", &self.names())
            .field("transport_type", &self.transport_type)
            .finish_non_exhaustive()
    }
}

pub(crate) struct ChainState<M: Message> {
    pub(crate) middlewares: Vec<Box<dyn Middleware<M>>>,
    pub(crate) terminal: Terminal<M>,
    pub(crate) transport_type: TransportType,
    pub(crate) service_provider: ServiceProvider,
    pub(crate) conqueror_context: ConquerorContext,
}

/// A built pipeline, ready to execute.
///
/// The chain is immutable. Executing it starts at the first middleware;
/// each middleware's continuation points at the next position.
pub struct PipelineChain<M: Message> {
    state: ChainState<M>,
}

impl<M: Message> PipelineChain<M> {
    /// Executes the chain.
    pub fn execute(
        &self,
        message: M,
        cancellation_token: CancellationToken,
    ) -> BoxFuture<'_, ConquerorResult<M::Response>> {
        Next::new(&self.state, 0).run(message, cancellation_token)
    }

    /// Returns the number of middlewares in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.middlewares.len()
    }

    /// Returns `true` if the chain goes straight to the terminal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.middlewares.is_empty()
    }

    #[cfg(test)]
    pub(crate) const fn state(&self) -> &ChainState<M> {
        &self.state
    }
}

impl<M: Message> fmt::Debug for PipelineChain<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.state.middlewares.iter().map(|m| m.name()).collect();
        f.debug_struct("PipelineChain")
            .field("middlewares", &names)
            .field("transport_type", &self.state.transport_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conqueror_core::{ConquerorError, TransportRole};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    struct TestMessage {
        payload: i32,
    }

    impl Message for TestMessage {
        type Response = i32;
    }

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records its name before and after calling the rest of the chain.
    struct Tracking {
        label: String,
        log: Log,
    }

    impl Middleware<TestMessage> for Tracking {
        fn name(&self) -> &'static str {
            "tracking"
        }

        fn execute<'a>(
            &'a self,
            ctx: MiddlewareContext<'a, TestMessage>,
        ) -> BoxFuture<'a, ConquerorResult<i32>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("{}:pre", self.label));
                let response = ctx.proceed().await;
                self.log.lock().unwrap().push(format!("{}:post", self.label));
                response
            })
        }
    }

    struct Other;

    impl Middleware<TestMessage> for Other {
        fn execute<'a>(
            &'a self,
            ctx: MiddlewareContext<'a, TestMessage>,
        ) -> BoxFuture<'a, ConquerorResult<i32>> {
            ctx.proceed()
        }
    }

    fn pipeline() -> Pipeline<TestMessage> {
        Pipeline::new(
            ServiceProvider::empty(),
            ConquerorContext::new(),
            TransportType::in_process(TransportRole::Server),
        )
    }

    fn tracking(label: &str, log: &Log) -> Tracking {
        Tracking {
            label: label.to_string(),
            log: Arc::clone(log),
        }
    }

    fn handler(log: Log) -> impl Fn(TestMessage, CancellationToken) -> BoxFuture<'static, ConquerorResult<i32>> {
        move |message, _| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push("handler".to_string());
                Ok(message.payload + 1)
            })
        }
    }

    #[tokio::test]
    async fn test_executes_in_attachment_order() {
        let log = Log::default();
        let mut p = pipeline();
        p.use_middleware(tracking("a", &log))
            .use_middleware(tracking("b", &log));

        let chain = p.build(handler(Arc::clone(&log)));
        let response = chain
            .execute(TestMessage { payload: 10 }, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response, 11);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:pre", "b:pre", "handler", "b:post", "a:post"]
        );
    }

    #[tokio::test]
    async fn test_empty_pipeline_calls_terminal() {
        let log = Log::default();
        let chain = pipeline().build(handler(Arc::clone(&log)));

        assert!(chain.is_empty());
        let response = chain
            .execute(TestMessage { payload: 1 }, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response, 2);
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);
    }

    #[tokio::test]
    async fn test_configure_applies_to_all_instances_present() {
        let log = Log::default();
        let mut p = pipeline();
        p.use_middleware(tracking("first", &log))
            .use_middleware(Other)
            .use_middleware(tracking("second", &log))
            .configure::<Tracking>(|m| m.label.push_str("-configured"))
            .use_middleware(tracking("third", &log));

        let chain = p.build(handler(Arc::clone(&log)));
        chain
            .execute(TestMessage { payload: 0 }, CancellationToken::new())
            .await
            .unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries[..3],
            ["first-configured:pre", "second-configured:pre", "third:pre"]
        );
    }

    #[tokio::test]
    async fn test_configure_without_match_is_noop() {
        let mut p = pipeline();
        p.use_middleware(Other).configure::<Tracking>(|_| panic!("not attached"));
        assert_eq!(p.len(), 1);
    }

    #[tokio::test]
    async fn test_without_removes_all_instances() {
        let log = Log::default();
        let mut p = pipeline();
        p.use_middleware(tracking("a", &log))
            .use_middleware(Other)
            .use_middleware(tracking("b", &log))
            .without::<Tracking>();

        assert_eq!(p.len(), 1);
        assert!(p.contains::<Other>());
        assert!(!p.contains::<Tracking>());
    }

    #[tokio::test]
    async fn test_add_remove_add_keeps_last() {
        let log = Log::default();
        let mut p = pipeline();
        p.use_middleware(tracking("removed", &log))
            .without::<Tracking>()
            .use_middleware(tracking("readded", &log));

        let chain = p.build(handler(Arc::clone(&log)));
        chain
            .execute(TestMessage { payload: 0 }, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["readded:pre", "handler", "readded:post"]
        );
    }

    #[tokio::test]
    async fn test_without_named_removes_inline_middleware() {
        let mut p = pipeline();
        p.use_fn("inline", |ctx| ctx.proceed())
            .use_middleware(Other)
            .without_named("inline");

        assert_eq!(p.names(), vec!["Other"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let log = Log::default();
        let mut p = pipeline();
        p.use_fn("cache", |_ctx| Box::pin(async { Ok(42) }))
            .use_middleware(tracking("skipped", &log));

        let chain = p.build(handler(Arc::clone(&log)));
        let response = chain
            .execute(TestMessage { payload: 0 }, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response, 42);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutate_message_and_response() {
        let mut p = pipeline();
        p.use_fn("double", |mut ctx| {
            Box::pin(async move {
                ctx.message_mut().payload *= 2;
                let response = ctx.proceed().await?;
                Ok(response * 10)
            })
        });

        let chain = p.build(handler(Log::default()));
        let response = chain
            .execute(TestMessage { payload: 5 }, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response, 110);
    }

    #[tokio::test]
    async fn test_retry_reexecutes_downstream() {
        let log = Log::default();
        let mut p = pipeline();
        p.use_fn("retry", |ctx| {
            Box::pin(async move {
                let first = ctx
                    .next(ctx.message().clone(), ctx.cancellation_token().clone())
                    .await;
                assert!(first.is_ok());
                ctx.proceed().await
            })
        })
        .use_middleware(tracking("a", &log))
        .use_middleware(tracking("b", &log));

        let chain = p.build(handler(Arc::clone(&log)));
        chain
            .execute(TestMessage { payload: 0 }, CancellationToken::new())
            .await
            .unwrap();

        let pre: Vec<_> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.ends_with(":pre"))
            .cloned()
            .collect();
        assert_eq!(pre, vec!["a:pre", "b:pre", "a:pre", "b:pre"]);
    }

    #[tokio::test]
    async fn test_error_propagates_unchanged() {
        #[derive(Debug, thiserror::Error)]
        #[error("boom")]
        struct Boom;

        let log = Log::default();
        let mut p = pipeline();
        p.use_middleware(tracking("outer", &log)).use_fn("fail", |_ctx| {
            Box::pin(async { Err(ConquerorError::execution(Boom)) })
        });

        let chain = p.build(handler(Arc::clone(&log)));
        let err = chain
            .execute(TestMessage { payload: 0 }, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<Boom>().is_some());
        assert_eq!(*log.lock().unwrap(), vec!["outer:pre", "outer:post"]);
    }

    #[test]
    fn test_iteration_and_debug() {
        let mut p = pipeline();
        p.use_middleware(Other).use_fn("inline", |ctx| ctx.proceed());

        assert_eq!(p.iter().count(), 2);
        assert_eq!(p.names(), vec!["Other", "inline"]);
        assert!(format!("{p:?}").contains("inline"));
    }
}
