//! Core middleware trait and types.
//!
//! This module defines the [`Middleware`] trait that all pipeline entries
//! implement, and [`Next`], the continuation that runs the rest of a chain.
//!
//! # Example
//!
//! ```
//! use conqueror_core::{ConquerorResult, Message};
//! use conqueror_middleware::{BoxFuture, Middleware, MiddlewareContext};
//!
//! struct Audit;
//!
//! impl<M: Message> Middleware<M> for Audit {
//!     fn name(&self) -> &'static str {
//!         "audit"
//!     }
//!
//!     fn execute<'a>(
//!         &'a self,
//!         ctx: MiddlewareContext<'a, M>,
//!     ) -> BoxFuture<'a, ConquerorResult<M::Response>> {
//!         Box::pin(async move {
//!             tracing::info!(transport = %ctx.transport_type(), "before");
//!             let response = ctx.proceed().await;
//!             tracing::info!("after");
//!             response
//!         })
//!     }
//! }
//! ```

use crate::context::MiddlewareContext;
use crate::pipeline::ChainState;
use conqueror_core::{short_type_name, ConquerorResult, Message};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// A boxed future, as returned by middlewares and terminals.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Upcasting to [`Any`], implemented for every type.
///
/// Lets a pipeline find its middlewares by concrete type.
pub trait AsAny: Any {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Returns `self` as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A unit of cross-cutting logic wrapping message execution.
///
/// A middleware instance belongs to exactly one pipeline build. It is created
/// when the pipeline is configured and dropped after the invocation finishes,
/// so it may hold per-invocation configuration but nothing that must outlive
/// the call.
pub trait Middleware<M: Message>: AsAny + Send + Sync {
    /// Returns the name of this middleware, used for logging and inspection.
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }

    /// Executes the middleware.
    ///
    /// Call [`MiddlewareContext::next`] or [`MiddlewareContext::proceed`] to
    /// run the remainder of the chain.
    fn execute<'a>(&'a self, ctx: MiddlewareContext<'a, M>)
        -> BoxFuture<'a, ConquerorResult<M::Response>>;
}

/// Continuation running the rest of a chain from a fixed position.
///
/// `Next` is `Copy`; each [`run`](Self::run) executes every remaining
/// middleware and the terminal again.
pub struct Next<'a, M: Message> {
    chain: &'a ChainState<M>,
    index: usize,
}

impl<M: Message> Clone for Next<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Message> Copy for Next<'_, M> {}

impl<'a, M: Message> Next<'a, M> {
    pub(crate) const fn new(chain: &'a ChainState<M>, index: usize) -> Self {
        Self { chain, index }
    }

    pub(crate) const fn chain(&self) -> &'a ChainState<M> {
        self.chain
    }

    /// Returns the number of middlewares left before the terminal.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.chain.middlewares.len().saturating_sub(self.index)
    }

    /// Runs the remainder of the chain with the given message and token.
    pub fn run(
        self,
        message: M,
        cancellation_token: CancellationToken,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>> {
        match self.chain.middlewares.get(self.index) {
            Some(middleware) => {
                tracing::trace!(
                    middleware = middleware.name(),
                    position = self.index,
                    "executing middleware"
                );
                let next = Next::new(self.chain, self.index + 1);
                middleware.execute(MiddlewareContext::new(message, cancellation_token, next))
            }
            None => (self.chain.terminal)(message, cancellation_token),
        }
    }
}

impl<M: Message> fmt::Debug for Next<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &self.remaining())
            .finish()
    }
}

type MiddlewareFn<M> = Box<
    dyn for<'a> Fn(MiddlewareContext<'a, M>) -> BoxFuture<'a, ConquerorResult<<M as Message>::Response>>
        + Send
        + Sync,
>;

/// A middleware defined by a closure.
///
/// # Example
///
/// ```ignore
/// pipeline.use_fn("timing", |ctx| Box::pin(async move {
///     let start = Instant::now();
///     let response = ctx.proceed().await;
///     tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "done");
///     response
/// }));
/// ```
pub struct FnMiddleware<M: Message> {
    name: &'static str,
    func: MiddlewareFn<M>,
}

impl<M: Message> FnMiddleware<M> {
    /// Creates a new closure-based middleware.
    pub fn new<F>(name: &'static str, func: F) -> Self
    where
        F: for<'a> Fn(MiddlewareContext<'a, M>) -> BoxFuture<'a, ConquerorResult<M::Response>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            func: Box::new(func),
        }
    }
}

impl<M: Message> Middleware<M> for FnMiddleware<M> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute<'a>(
        &'a self,
        ctx: MiddlewareContext<'a, M>,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>> {
        (self.func)(ctx)
    }
}

impl<M: Message> fmt::Debug for FnMiddleware<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
