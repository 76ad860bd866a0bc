//! Correlation identifiers.
//!
//! A trace id spans a whole logical operation and stays fixed across nested
//! calls and transport hops. A [`MessageId`] is minted per message hop.

use opentelemetry::trace::TraceContextExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a single message hop, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines for consecutive hops of
/// one trace sorted.
///
/// # Example
///
/// ```
/// use conqueror_core::MessageId;
///
/// let id = MessageId::new();
/// println!("Message ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new unique message ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<MessageId> for Uuid {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Generates a random trace id as 32 lowercase hex digits.
#[must_use]
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Returns the trace id of the active OpenTelemetry span, if one is valid.
#[must_use]
pub fn ambient_trace_id() -> Option<String> {
    let current = opentelemetry::Context::current();
    let span = current.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_new_generates_unique_ids() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_message_id_serialization() {
        let id = MessageId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn test_message_id_parses_display_form() {
        let id = MessageId::new();
        assert_eq!(id.to_string().parse::<MessageId>().unwrap(), id);
        assert!("not-a-uuid".parse::<MessageId>().is_err());
    }

    #[test]
    fn test_new_trace_id_format() {
        let id = new_trace_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, new_trace_id());
    }

    #[test]
    fn test_no_ambient_trace_id_without_span() {
        assert_eq!(ambient_trace_id(), None);
    }

    #[test]
    fn test_ambient_trace_id_from_remote_span() {
        use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

        let span_context = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let attached = opentelemetry::Context::current()
            .with_remote_span_context(span_context)
            .attach();

        assert_eq!(
            ambient_trace_id().as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );

        drop(attached);
        assert_eq!(ambient_trace_id(), None);
    }
}
