//! # Conqueror Middleware
//!
//! Middleware pipeline for the Conqueror messaging framework.
//!
//! A [`Pipeline`] is an ordered, mutable list of middlewares attached to one
//! message type. It is built fresh for every invocation: first by the
//! handler's pipeline configuration on the receiving side, or by the call
//! site's builder callback on the sending side. Once built it is turned into
//! a [`PipelineChain`] and executed as a chain of responsibility.
//!
//! ## Execution Model
//!
//! ```text
//! caller → A → B → C → terminal (transport or handler)
//!        ←   ←   ←   ←
//! ```
//!
//! Each middleware receives a [`MiddlewareContext`] and may:
//!
//! - pass the message through by calling `next` once
//! - replace the message or cancellation token before calling `next`
//! - change the response after `next` returns
//! - short-circuit by not calling `next` at all
//! - call `next` several times, re-running the rest of the chain each time
//!
//! Errors propagate to the caller unchanged.
//!
//! ## Example
//!
//! ```
//! use conqueror_core::{ConquerorContext, Message, ServiceProvider, TransportRole, TransportType};
//! use conqueror_middleware::Pipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Double(u32);
//!
//! impl Message for Double {
//!     type Response = u32;
//! }
//!
//! # tokio_test::block_on(async {
//! let mut pipeline = Pipeline::<Double>::new(
//!     ServiceProvider::empty(),
//!     ConquerorContext::new(),
//!     TransportType::in_process(TransportRole::Server),
//! );
//! pipeline.use_fn("add-one", |mut ctx| {
//!     Box::pin(async move {
//!         ctx.message_mut().0 += 1;
//!         ctx.proceed().await
//!     })
//! });
//!
//! let chain = pipeline.build(|message: Double, _token| Box::pin(async move { Ok(message.0 * 2) }));
//! let response = chain.execute(Double(4), CancellationToken::new()).await.unwrap();
//! assert_eq!(response, 10);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/conqueror-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod stages;

// Re-export main types at crate root
pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, FnMiddleware, Middleware, Next};
pub use pipeline::{Pipeline, PipelineChain, Terminal};
pub use stages::{LoggingMiddleware, PayloadLoggingStrategy, RetryMiddleware, TimeoutMiddleware};
pub use tokio_util::sync::CancellationToken;
