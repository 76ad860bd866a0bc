//! Message traits.

use serde::{Deserialize, Serialize};
use std::any::TypeId;

/// A typed request dispatched through a handler pipeline.
///
/// Commands and queries are both messages; the transport metadata that
/// distinguishes them lives with the transports.
///
/// # Example
///
/// ```
/// use conqueror_core::Message;
///
/// #[derive(Debug, Clone)]
/// struct AddItem {
///     name: String,
/// }
///
/// impl Message for AddItem {
///     type Response = u64;
/// }
///
/// assert_eq!(AddItem::message_type_name(), "AddItem");
/// ```
pub trait Message: Send + Sync + 'static {
    /// The response produced by the handler.
    type Response: Send + 'static;

    /// A short, human-readable name used in logs and routes.
    fn message_type_name() -> &'static str
    where
        Self: Sized,
    {
        short_type_name::<Self>()
    }
}

/// The response of messages that produce no value.
///
/// Serializes as JSON `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitResponse;

/// Returns `true` if `R` signals "no response" (`UnitResponse` or `()`).
#[must_use]
pub fn is_unit_response<R: 'static>() -> bool {
    let id = TypeId::of::<R>();
    id == TypeId::of::<UnitResponse>() || id == TypeId::of::<()>()
}

/// Returns the unqualified name of `T`, without module path or generics.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
