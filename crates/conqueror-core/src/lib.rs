//! # Conqueror Core
//!
//! Core types for the Conqueror messaging framework.
//!
//! This crate provides the foundational types shared by the pipeline, the
//! handler dispatch and the transports:
//!
//! - [`ContextData`] - Ordered key/value store with transport scopes
//! - [`ConquerorContext`] - Per-call-chain handle holding the three context data stores
//! - [`ConquerorContextAccessor`] - Task-local ambient context storage
//! - [`MessageId`] / [`new_trace_id`] - Correlation identifiers
//! - [`TransportType`] - Transport name and role tagging a pipeline execution
//! - [`Message`] - Marker trait for dispatchable messages
//! - [`ServiceCollection`] / [`ServiceProvider`] - Scoped service resolution
//! - [`ConquerorError`] - Standard error type

#![doc(html_root_url = "https://docs.rs/conqueror-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod accessor;
mod context;
mod context_data;
pub mod di;
mod error;
mod ids;
mod message;
mod transport;

pub use accessor::{ConquerorContextAccessor, ContextGuard};
pub use context::{ConquerorContext, DataDirection};
pub use context_data::{ContextData, ContextValue, Scope};
pub use di::{Inject, Injectable, InjectionError, Lifetime, ServiceCollection, ServiceProvider};
pub use error::{
    ConquerorError, ConquerorResult, ContextDataFormatError, ErrorCategory, ErrorDetail,
    ErrorEnvelope, TransportFailure,
};
pub use ids::{ambient_trace_id, new_trace_id, MessageId};
pub use message::{is_unit_response, short_type_name, Message, UnitResponse};
pub use transport::{TransportRole, TransportType, IN_PROCESS_TRANSPORT_NAME};
