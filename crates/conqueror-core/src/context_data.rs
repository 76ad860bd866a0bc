//! Context data store.
//!
//! A [`ContextData`] is an ordered map from string keys to values tagged with a
//! [`Scope`]. Each [`ConquerorContext`](crate::ConquerorContext) owns three of
//! them, one per propagation direction.
//!
//! # Example
//!
//! ```
//! use conqueror_core::{ContextData, Scope};
//!
//! let mut data = ContextData::new();
//! data.set("tenant", "acme", Scope::AcrossTransports);
//! data.set_object("retries", 3_u32, Scope::InProcess);
//!
//! assert_eq!(data.get::<String>("tenant").as_deref(), Some("acme"));
//! assert_eq!(data.get::<u32>("retries"), Some(3));
//! assert_eq!(data.get::<u64>("retries"), None);
//! ```

use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Determines whether an entry may leave the current process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The entry is only visible to in-process executions.
    #[default]
    InProcess,
    /// The entry is additionally propagated across transport boundaries.
    AcrossTransports,
}

/// A value stored in a [`ContextData`] instance.
///
/// String values are the only kind a transport can encode; object values
/// stay inside the process regardless of their scope.
#[derive(Clone)]
pub enum ContextValue {
    /// A string value.
    Str(String),
    /// An arbitrary shared object.
    Object(Arc<dyn Any + Send + Sync>),
}

impl ContextValue {
    /// Returns the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Object(_) => None,
        }
    }

    /// Returns a reference to the value if it is of type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Str(s) => (s as &dyn Any).downcast_ref::<T>(),
            Self::Object(obj) => obj.downcast_ref::<T>(),
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl PartialEq for ContextValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<&String> for ContextValue {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

/// Ordered key/value store with per-entry [`Scope`].
///
/// Keys are unique. Setting an existing key replaces its value and scope but
/// keeps its position in the iteration order.
///
/// The store does no synchronization of its own; the owning context guards it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextData {
    entries: IndexMap<String, (ContextValue, Scope)>,
}

impl ContextData {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value, overwriting any existing entry for `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>, scope: Scope) {
        self.entries.insert(key.into(), (value.into(), scope));
    }

    /// Sets an arbitrary object value.
    pub fn set_object<T: Any + Send + Sync>(
        &mut self,
        key: impl Into<String>,
        value: T,
        scope: Scope,
    ) {
        self.set(key, ContextValue::Object(Arc::new(value)), scope);
    }

    /// Returns a clone of the value for `key` if it exists and is a `T`.
    ///
    /// A missing key and a value of another type both yield `None`.
    #[must_use]
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .and_then(|(value, _)| value.downcast_ref::<T>())
            .cloned()
    }

    /// Returns the string value for `key`, if present and a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|(value, _)| value.as_str())
    }

    /// Returns the raw value for `key`.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Returns the scope of the entry for `key`.
    #[must_use]
    pub fn scope_of(&self, key: &str) -> Option<Scope> {
        self.entries.get(key).map(|(_, scope)| *scope)
    }

    /// Returns `true` if an entry exists for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes the entry for `key`, returning whether one existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    /// Iterates over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue, Scope)> {
        self.entries
            .iter()
            .map(|(key, (value, scope))| (key.as_str(), value, *scope))
    }

    /// Iterates over the entries with the given scope.
    pub fn where_scope_is(&self, scope: Scope) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.iter()
            .filter(move |(_, _, s)| *s == scope)
            .map(|(key, value, _)| (key, value))
    }

    /// Iterates over string entries that may cross a transport boundary.
    pub fn transferable(&self) -> impl Iterator<Item = (&str, &str)> {
        self.where_scope_is(Scope::AcrossTransports)
            .filter_map(|(key, value)| value.as_str().map(|v| (key, v)))
    }

    /// Copies every entry of `other` into this store, overwriting on collision.
    pub fn merge_from(&mut self, other: &ContextData) {
        for (key, (value, scope)) in &other.entries {
            self.entries.insert(key.clone(), (value.clone(), *scope));
        }
    }

    /// Replays onto this store the edits that turned `before` into `after`.
    ///
    /// Entries that `after` added or changed are set here and entries of
    /// `before` missing from `after` are removed here. Every other entry of
    /// this store is left alone.
    pub fn apply_diff(&mut self, before: &ContextData, after: &ContextData) {
        for key in before.entries.keys() {
            if !after.entries.contains_key(key) {
                self.entries.shift_remove(key);
            }
        }
        for (key, entry) in &after.entries {
            if before.entries.get(key) != Some(entry) {
                self.entries.insert(key.clone(), entry.clone());
            }
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
