//! HTTP metadata for messages.
//!
//! A message becomes reachable over HTTP by implementing [`HttpMessage`].
//! The defaults derive everything from the type name:
//!
//! | Message type        | Method | Path                      |
//! |---------------------|--------|---------------------------|
//! | `CreateOrderCommand`| POST   | `/api/commands/createOrder` |
//! | `GetOrderQuery`     | GET    | `/api/queries/getOrder`     |
//! | `Ping`              | POST   | `/api/commands/ping`        |

use conqueror_core::{is_unit_response, Message};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Whether a message changes state or only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMessageKind {
    /// Changes state. Sent as `POST` with a JSON body.
    Command,
    /// Reads state. Sent as `GET` with a query string unless configured
    /// otherwise.
    Query,
}

impl HttpMessageKind {
    /// Returns the path segment below `/api`.
    #[must_use]
    pub const fn path_segment(self) -> &'static str {
        match self {
            Self::Command => "commands",
            Self::Query => "queries",
        }
    }

    const fn type_suffix(self) -> &'static str {
        match self {
            Self::Command => "Command",
            Self::Query => "Query",
        }
    }
}

/// A message that can be sent over HTTP.
///
/// # Example
///
/// ```
/// use conqueror_core::Message;
/// use conqueror_http::{HttpMessage, HttpMessageKind};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct GetOrderQuery {
///     id: u64,
/// }
///
/// impl Message for GetOrderQuery {
///     type Response = String;
/// }
///
/// impl HttpMessage for GetOrderQuery {
///     const KIND: HttpMessageKind = HttpMessageKind::Query;
/// }
///
/// assert_eq!(GetOrderQuery::path(), "/api/queries/getOrder");
/// assert_eq!(GetOrderQuery::http_method(), http::Method::GET);
/// ```
pub trait HttpMessage: Message + Serialize + DeserializeOwned
where
    Self::Response: Serialize + DeserializeOwned,
{
    /// Whether this is a command or a query.
    const KIND: HttpMessageKind = HttpMessageKind::Command;

    /// Sends a query as `POST` with a JSON body instead of a query string.
    const QUERY_USES_POST: bool = false;

    /// The request path.
    fn path() -> String {
        conventional_path(Self::KIND, Self::message_type_name())
    }

    /// The request method.
    fn http_method() -> Method {
        match Self::KIND {
            HttpMessageKind::Query if !Self::QUERY_USES_POST => Method::GET,
            _ => Method::POST,
        }
    }

    /// The status of a successful response.
    fn success_status() -> StatusCode {
        if is_unit_response::<Self::Response>() {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::OK
        }
    }
}

/// Derives the conventional path for a message type name.
///
/// The `Command` or `Query` suffix matching `kind` is dropped and the first
/// letter lower-cased. A name that consists only of the suffix is kept.
///
/// ```
/// use conqueror_http::message::{conventional_path, HttpMessageKind};
///
/// assert_eq!(conventional_path(HttpMessageKind::Command, "TestCommand"), "/api/commands/test");
/// assert_eq!(conventional_path(HttpMessageKind::Query, "ListUsers"), "/api/queries/listUsers");
/// ```
#[must_use]
pub fn conventional_path(kind: HttpMessageKind, type_name: &str) -> String {
    let name = type_name
        .strip_suffix(kind.type_suffix())
        .filter(|stripped| !stripped.is_empty())
        .unwrap_or(type_name);

    let mut chars = name.chars();
    let lower_camel = chars.next().map_or_else(String::new, |first| {
        first.to_lowercase().chain(chars).collect()
    });

    format!("/api/{}/{}", kind.path_segment(), lower_camel)
}
