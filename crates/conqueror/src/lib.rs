//! # Conqueror
//!
//! **Commands and queries with middleware pipelines and context propagation**
//!
//! Conqueror sends typed messages to exactly one handler, in process or over
//! HTTP, through configurable middleware pipelines on both ends:
//!
//! - **Handlers**: one per message type, registered as types, factories,
//!   instances or closures
//! - **Pipelines**: ordered middlewares, reconfigurable per call, with
//!   logging, retry and timeout built in
//! - **Context data**: string values flowing downstream, upstream or both
//!   ways, optionally across transports
//! - **Trace and message ids**: one trace id per call chain, one message id
//!   per sent message
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conqueror::prelude::*;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct CreateOrderCommand { items: u32 }
//!
//! impl Message for CreateOrderCommand {
//!     type Response = u32;
//! }
//!
//! impl HttpMessage for CreateOrderCommand {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_env_prefix("ORDERS").load()?;
//!     let _telemetry = conqueror::telemetry::init_telemetry(config.telemetry())?;
//!
//!     let mut services = ServiceCollection::new();
//!     services.add_message_handler_delegate::<CreateOrderCommand, _, _>(|cmd, _ctx| async move {
//!         Ok(cmd.items * 100)
//!     });
//!
//!     let mut endpoints = HttpEndpointRegistry::new();
//!     endpoints.map::<CreateOrderCommand>()?;
//!
//!     HttpServer::new(config.http_server, services.build_provider(), endpoints)
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Call Flow
//!
//! ```text
//! MessageClient → client pipeline → transport ─── wire ───┐
//!                                                         ↓
//! response ← merge upstream ← client pipeline ← handler pipeline → handler
//! ```

#![doc(html_root_url = "https://docs.rs/conqueror/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use conqueror_core as core;

// Re-export middleware types
pub use conqueror_middleware as middleware;

// Re-export handler and client types
pub use conqueror_messaging as messaging;

// Re-export the HTTP transport
pub use conqueror_http as http;

// Re-export observability setup
pub use conqueror_telemetry as telemetry;

// Re-export configuration
pub use conqueror_config as config;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use conqueror::prelude::*;
/// ```
pub mod prelude {
    pub use conqueror_core::{
        ConquerorContext, ConquerorContextAccessor, ConquerorError, ConquerorResult,
        DataDirection, Message, MessageId, Scope, TransportRole, TransportType, UnitResponse,
    };

    // Re-export DI types
    pub use conqueror_core::di::{
        Inject, Injectable, InjectionError, Lifetime, ServiceCollection, ServiceProvider,
    };

    // Re-export pipeline types
    pub use conqueror_middleware::{
        BoxFuture, CancellationToken, LoggingMiddleware, Middleware, MiddlewareContext, Pipeline,
        RetryMiddleware, TimeoutMiddleware,
    };

    // Re-export handler and client types
    pub use conqueror_messaging::{
        HandlerContext, MessageClient, MessageClients, MessageHandler, MessageHandlerRegistration,
        TransportBuilder, TransportSender,
    };

    // Re-export HTTP transport types
    pub use conqueror_http::{
        HttpEndpointRegistry, HttpMessage, HttpMessageKind, HttpServer, HttpServerConfig,
        HttpTransportBuilderExt, ShutdownSignal,
    };

    // Re-export configuration types
    pub use conqueror_config::{ConfigLoader, ConquerorConfig};
}
