//! # Conqueror HTTP
//!
//! HTTP transport for the Conqueror messaging framework.
//!
//! - [`HttpServer`] exposes registered handlers as JSON endpoints (hyper)
//! - [`HttpTransportClient`] sends messages to such a server (reqwest)
//! - [`codec`] carries context data in the `conqueror-context` header
//! - [`HttpMessage`] derives method and path from the message type
//!
//! ## Wire Format
//!
//! | Message kind | Request                          | Success response        |
//! |--------------|----------------------------------|-------------------------|
//! | command      | `POST /api/commands/{name}` JSON | `200` JSON, `204` unit  |
//! | query        | `GET /api/queries/{name}?query`  | `200` JSON              |
//!
//! A failed request answers with the error envelope
//! `{"error":{"code":..,"message":..}}`; the client turns any non-success
//! status into [`ConquerorError::TransportFailed`](conqueror_core::ConquerorError::TransportFailed)
//! carrying status and body.

#![doc(html_root_url = "https://docs.rs/conqueror-http/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod server;
pub mod shutdown;

/// Transport name used by both ends of the HTTP transport.
pub const HTTP_TRANSPORT_NAME: &str = "http";

// Re-export main types at crate root
pub use client::{HttpTransportBuilderExt, HttpTransportClient};
pub use codec::{CONQUEROR_CONTEXT_HEADER, CONQUEROR_MESSAGE_ID_HEADER};
pub use config::{HttpClientConfig, HttpServerConfig};
pub use error::HttpServerError;
pub use message::{HttpMessage, HttpMessageKind};
pub use server::{BoundHttpServer, HttpEndpoint, HttpEndpointRegistry, HttpServer, HttpResponse};
pub use shutdown::{RequestTracker, ShutdownSignal};
