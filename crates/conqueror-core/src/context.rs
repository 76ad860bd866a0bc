//! The per-call-chain context.
//!
//! A [`ConquerorContext`] owns three [`ContextData`] stores:
//!
//! - **downstream** data flows from a caller into everything it calls
//! - **upstream** data flows from a callee back out to its callers
//! - **bidirectional** data, once set, is visible everywhere afterwards
//!
//! Direction is realised with child contexts. Every client and handler
//! boundary runs on a [`fork`](ConquerorContext::fork) of the caller's context,
//! which receives copies of the downstream and bidirectional stores. When the
//! boundary completes, the child is [merged](ConquerorContext::merge_into) back:
//! its upstream entries are copied into the parent, and the sets and removals
//! it made to the bidirectional store since the fork are replayed onto the
//! parent's. Concurrent siblings therefore only overwrite the keys they touched.
//!
//! # Example
//!
//! ```
//! use conqueror_core::{ConquerorContext, Scope};
//!
//! let root = ConquerorContext::new();
//! root.downstream_context_data().set("tenant", "acme", Scope::InProcess);
//!
//! let child = root.fork();
//! assert_eq!(child.downstream_context_data().get_str("tenant"), Some("acme"));
//!
//! child.upstream_context_data().set("cost", "12", Scope::InProcess);
//! child.merge_into(&root);
//! assert_eq!(root.upstream_context_data().get_str("cost"), Some("12"));
//! assert_eq!(root.trace_id(), child.trace_id());
//! ```

use crate::context_data::ContextData;
use crate::error::{ConquerorError, ConquerorResult};
use crate::ids::{ambient_trace_id, new_trace_id, MessageId};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Selects one of the three context data stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataDirection {
    /// Caller to callee.
    Downstream,
    /// Callee to caller.
    Upstream,
    /// Both directions.
    Bidirectional,
}

#[derive(Debug, Default)]
struct TraceState {
    id: Option<String>,
    observed: bool,
}

struct ContextInner {
    downstream: Mutex<ContextData>,
    upstream: Mutex<ContextData>,
    bidirectional: Mutex<ContextData>,
    // Bidirectional data as of the fork or the last merge.
    bidirectional_base: Mutex<ContextData>,
    // Shared by every fork so the whole chain agrees on one trace id.
    trace: Arc<Mutex<TraceState>>,
    message_id: Mutex<Option<MessageId>>,
}

/// Handle to the context of one logical call chain.
///
/// Cloning the handle shares the underlying context. Use
/// [`fork`](Self::fork) to create a child context.
///
/// The store accessors return lock guards. Do not hold two guards for the
/// same store at once, and do not hold a guard across an `.await`.
#[derive(Clone)]
pub struct ConquerorContext {
    inner: Arc<ContextInner>,
}

impl ConquerorContext {
    /// Creates a root context with empty stores and no trace id yet.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(
            ContextData::new(),
            ContextData::new(),
            Arc::new(Mutex::new(TraceState::default())),
            None,
        )
    }

    fn with_parts(
        downstream: ContextData,
        bidirectional: ContextData,
        trace: Arc<Mutex<TraceState>>,
        message_id: Option<MessageId>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                downstream: Mutex::new(downstream),
                upstream: Mutex::new(ContextData::new()),
                bidirectional_base: Mutex::new(bidirectional.clone()),
                bidirectional: Mutex::new(bidirectional),
                trace,
                message_id: Mutex::new(message_id),
            }),
        }
    }

    /// Data flowing from callers to callees.
    pub fn downstream_context_data(&self) -> MutexGuard<'_, ContextData> {
        self.inner.downstream.lock()
    }

    /// Data flowing from callees back to callers.
    pub fn upstream_context_data(&self) -> MutexGuard<'_, ContextData> {
        self.inner.upstream.lock()
    }

    /// Data visible in both directions.
    pub fn context_data(&self) -> MutexGuard<'_, ContextData> {
        self.inner.bidirectional.lock()
    }

    /// Returns the store for `direction`.
    pub fn data(&self, direction: DataDirection) -> MutexGuard<'_, ContextData> {
        match direction {
            DataDirection::Downstream => self.downstream_context_data(),
            DataDirection::Upstream => self.upstream_context_data(),
            DataDirection::Bidirectional => self.context_data(),
        }
    }

    /// Returns the trace id of the call chain.
    ///
    /// The first read fixes the id for the whole chain. If none was set, the
    /// active OpenTelemetry span's trace id is adopted, or a random one is
    /// generated.
    pub fn trace_id(&self) -> String {
        let mut trace = self.inner.trace.lock();
        trace.observed = true;
        trace
            .id
            .get_or_insert_with(|| ambient_trace_id().unwrap_or_else(new_trace_id))
            .clone()
    }

    /// Sets the trace id of the call chain.
    ///
    /// # Errors
    ///
    /// Returns [`ConquerorError::InvalidOperation`] once the trace id has been
    /// read, since readers must all observe the same value.
    pub fn set_trace_id(&self, trace_id: impl Into<String>) -> ConquerorResult<()> {
        let mut trace = self.inner.trace.lock();
        if trace.observed {
            return Err(ConquerorError::invalid_operation(
                "the trace id cannot be changed after it has been read",
            ));
        }
        trace.id = Some(trace_id.into());
        Ok(())
    }

    /// Returns the id of the message currently being processed, if any.
    pub fn message_id(&self) -> Option<MessageId> {
        *self.inner.message_id.lock()
    }

    /// Sets the id of the message currently being processed.
    pub fn set_message_id(&self, message_id: MessageId) {
        *self.inner.message_id.lock() = Some(message_id);
    }

    /// Creates a child context for a nested boundary.
    ///
    /// The child shares the trace id and starts with copies of the downstream
    /// and bidirectional stores. Its upstream store starts empty.
    #[must_use]
    pub fn fork(&self) -> Self {
        let downstream = self.downstream_context_data().clone();
        let bidirectional = self.context_data().clone();
        Self::with_parts(
            downstream,
            bidirectional,
            Arc::clone(&self.inner.trace),
            self.message_id(),
        )
    }

    /// Merges a child context created by [`fork`](Self::fork) back into `parent`.
    ///
    /// Upstream entries are copied over the parent's. Bidirectional entries
    /// the child set or removed since it was forked are set or removed in the
    /// parent; other parent entries are untouched.
    pub fn merge_into(&self, parent: &ConquerorContext) {
        if self.ptr_eq(parent) {
            return;
        }

        let upstream = self.upstream_context_data().clone();
        parent.upstream_context_data().merge_from(&upstream);

        let bidirectional = self.context_data().clone();
        let mut base = self.inner.bidirectional_base.lock();
        parent.context_data().apply_diff(&base, &bidirectional);
        *base = bidirectional;
    }

    /// Returns `true` if both handles point to the same context.
    #[must_use]
    pub fn ptr_eq(&self, other: &ConquerorContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for ConquerorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConquerorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConquerorContext")
            .field("trace_id", &self.inner.trace.lock().id)
            .field("message_id", &self.message_id())
            .field("downstream", &self.downstream_context_data().len())
            .field("upstream", &self.upstream_context_data().len())
            .field("bidirectional", &self.context_data().len())
            .finish()
    }
}
