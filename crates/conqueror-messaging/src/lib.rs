//! # Conqueror Messaging
//!
//! Handlers, the handler registry and message clients for the Conqueror
//! messaging framework.
//!
//! Handlers are registered on a [`ServiceCollection`](conqueror_core::ServiceCollection)
//! through [`MessageHandlerRegistration`], at most one per message type.
//! Messages are sent through a [`MessageClient`], which runs the client-side
//! pipeline, hands the message to a [`TransportSender`] and merges the
//! context data written on the way back into the caller's context.
//!
//! ## Context Flow
//!
//! ```text
//!                 downstream, bidirectional
//! caller ───────────────────────────────────────► handler
//!        ◄───────────────────────────────────────
//!                 upstream, bidirectional
//! ```
//!
//! ## Example
//!
//! ```
//! use conqueror_core::{ConquerorResult, Lifetime, Message, Scope, ServiceCollection};
//! use conqueror_core::{Injectable, InjectionError, ServiceProvider};
//! use conqueror_messaging::{HandlerContext, MessageClients, MessageHandler, MessageHandlerRegistration};
//!
//! struct Greet {
//!     name: String,
//! }
//!
//! impl Message for Greet {
//!     type Response = String;
//! }
//!
//! struct GreetHandler;
//!
//! impl Injectable for GreetHandler {
//!     fn inject(_provider: &ServiceProvider) -> Result<Self, InjectionError> {
//!         Ok(Self)
//!     }
//! }
//!
//! impl MessageHandler<Greet> for GreetHandler {
//!     async fn handle(&self, message: Greet, ctx: &HandlerContext) -> ConquerorResult<String> {
//!         let greeting = ctx
//!             .conqueror_context()
//!             .downstream_context_data()
//!             .get_str("greeting")
//!             .unwrap_or("Hello")
//!             .to_string();
//!         Ok(format!("{greeting}, {}!", message.name))
//!     }
//! }
//!
//! let mut services = ServiceCollection::new();
//! services.add_message_handler::<Greet, GreetHandler>(Lifetime::Scoped);
//! let provider = services.build_provider();
//!
//! # tokio_test::block_on(async {
//! let ctx = conqueror_core::ConquerorContext::new();
//! ctx.downstream_context_data().set("greeting", "Hi", Scope::InProcess);
//!
//! let reply = MessageClients::new(&provider)
//!     .for_message::<Greet>()
//!     .with_context(ctx)
//!     .handle(Greet { name: "Ada".into() })
//!     .await
//!     .unwrap();
//! assert_eq!(reply, "Hi, Ada!");
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/conqueror-messaging/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod handler;
pub mod registry;
pub mod transport;

// Re-export main types at crate root
pub use client::{MessageClient, MessageClients, TransportBuilder};
pub use handler::{HandlerContext, MessageHandler};
pub use registry::{
    HandlerBinding, HandlerInvoker, HandlerRegistration, MessageHandlerRegistration,
    MessageHandlerRegistry,
};
pub use transport::{dispatch, InProcessTransport, TransportSender};
