//! Error types for Conqueror.
//!
//! This module provides [`ConquerorError`], the error type returned by every
//! pipeline, handler and transport.
//!
//! Errors raised by user code travel as [`ConquerorError::Execution`] and are
//! never rewrapped on the way back to the caller, so the original error can
//! always be recovered with [`ConquerorError::downcast_ref`].

use crate::di::InjectionError;
use crate::transport::TransportType;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`ConquerorError`].
pub type ConquerorResult<T> = Result<T, ConquerorError>;

/// Categories of errors for classification and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input such as badly formatted context data.
    Validation,
    /// No handler for the requested message.
    NotFound,
    /// The operation was cancelled.
    Cancelled,
    /// Invalid registrations or missing services.
    Configuration,
    /// Failures in user code or the framework itself.
    Internal,
    /// A remote transport failed.
    External,
}

impl ErrorCategory {
    /// Returns the default HTTP status code for this error category.
    #[must_use]
    pub fn default_status_code(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            // 499 "client closed request"
            Self::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
            }
            Self::Configuration | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::External => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Context data received from a transport could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} (in '{input}')")]
pub struct ContextDataFormatError {
    /// The offending input.
    pub input: String,
    /// What is wrong with it.
    pub reason: String,
}

impl ContextDataFormatError {
    /// Creates a new format error.
    pub fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// A message could not be delivered through a remote transport.
///
/// A failure with a [`status_code`](Self::status_code) means the remote side
/// answered with a non-success status. Without one, the request never
/// completed and [`source`](std::error::Error::source) holds the cause.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportFailure {
    message: String,
    /// The transport the message was sent through.
    pub transport_type: TransportType,
    /// The type name of the message being sent.
    pub message_type: &'static str,
    /// The status code of the response, if one was received.
    pub status_code: Option<u16>,
    /// The raw body of the failed response, if one was received.
    pub response_content: Option<String>,
    /// The underlying fault, if the request did not complete.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportFailure {
    /// A remote side answered with a non-success status.
    pub fn status(
        transport_type: TransportType,
        message_type: &'static str,
        status_code: u16,
        response_content: impl Into<String>,
    ) -> Self {
        Self {
            message: format!(
                "{transport_type} transport failed for message '{message_type}' with status {status_code}"
            ),
            transport_type,
            message_type,
            status_code: Some(status_code),
            response_content: Some(response_content.into()),
            source: None,
        }
    }

    /// The request failed before a response was received.
    pub fn fault(
        transport_type: TransportType,
        message_type: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let source = source.into();
        Self {
            message: format!(
                "{transport_type} transport failed for message '{message_type}': {source}"
            ),
            transport_type,
            message_type,
            status_code: None,
            response_content: None,
            source: Some(source),
        }
    }
}

/// Standard error type for Conqueror.
///
/// # Example
///
/// ```
/// use conqueror_core::{ConquerorError, ErrorCategory};
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("out of stock")]
/// struct OutOfStock;
///
/// let err = ConquerorError::execution(OutOfStock);
/// assert_eq!(err.category(), ErrorCategory::Internal);
/// assert!(err.downcast_ref::<OutOfStock>().is_some());
/// ```
#[derive(Error, Debug)]
pub enum ConquerorError {
    /// A handler or service registration is invalid.
    #[error("Invalid registration: {message}")]
    InvalidRegistration {
        /// Human-readable error message.
        message: String,
    },

    /// No handler is registered for a message type.
    #[error("No handler registered for message type '{message_type}'")]
    HandlerNotRegistered {
        /// The message type name.
        message_type: &'static str,
    },

    /// Context data received from a transport is malformed.
    #[error("Badly formatted context data: {0}")]
    InvalidContextData(#[from] ContextDataFormatError),

    /// An operation was attempted in a state that does not allow it.
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Human-readable error message.
        message: String,
    },

    /// The operation was cancelled.
    #[error("Operation was cancelled")]
    Cancelled,

    /// A remote transport failed.
    #[error(transparent)]
    TransportFailed(#[from] TransportFailure),

    /// A required service could not be resolved.
    #[error(transparent)]
    Injection(#[from] InjectionError),

    /// An error raised by a handler or middleware.
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

impl ConquerorError {
    /// Creates an invalid registration error.
    pub fn invalid_registration(message: impl Into<String>) -> Self {
        Self::InvalidRegistration {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps an error raised by user code.
    pub fn execution(error: impl Into<anyhow::Error>) -> Self {
        Self::Execution(error.into())
    }

    /// Returns the user error if it is of type `E`.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Execution(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Returns the transport failure, if this is one.
    #[must_use]
    pub fn as_transport_failure(&self) -> Option<&TransportFailure> {
        match self {
            Self::TransportFailed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRegistration { .. } | Self::Injection(_) => ErrorCategory::Configuration,
            Self::HandlerNotRegistered { .. } => ErrorCategory::NotFound,
            Self::InvalidContextData(_) => ErrorCategory::Validation,
            Self::InvalidOperation { .. } | Self::Execution(_) => ErrorCategory::Internal,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::TransportFailed(_) => ErrorCategory::External,
        }
    }

    /// Returns the HTTP status code for this error.
    ///
    /// A transport failure carrying a remote error status keeps that status.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        if let Self::TransportFailed(TransportFailure {
            status_code: Some(code),
            ..
        }) = self
        {
            if let Ok(status) = StatusCode::from_u16(*code) {
                if status.is_client_error() || status.is_server_error() {
                    return status;
                }
            }
        }
        self.category().default_status_code()
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRegistration { .. } => "INVALID_REGISTRATION",
            Self::HandlerNotRegistered { .. } => "HANDLER_NOT_REGISTERED",
            Self::InvalidContextData(_) => "INVALID_CONTEXT_DATA",
            Self::InvalidOperation { .. } => "INVALID_OPERATION",
            Self::Cancelled => "CANCELLED",
            Self::TransportFailed(_) => "TRANSPORT_FAILED",
            Self::Injection(_) => "INJECTION_FAILED",
            Self::Execution(_) => "EXECUTION_FAILED",
        }
    }

    /// Converts this error to a serializable error envelope.
    #[must_use]
    pub fn to_envelope(&self, message_id: Option<&str>) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                category: self.category(),
            },
            message_id: message_id.map(ToString::to_string),
        }
    }
}

/// Serializable error envelope for HTTP responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorDetail,
    /// The message ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Error detail within an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Error category.
    pub category: ErrorCategory,
}
