//! Ambient context storage.
//!
//! The current [`ConquerorContext`] of a call chain lives in a task-local
//! slot. A slot is only available inside [`ConquerorContextAccessor::scope`];
//! outside of it the accessor reports no ambient context and contexts have to
//! be passed explicitly.
//!
//! Each installation into a slot bumps a generation counter. A guard only
//! clears or restores the slot if the slot still holds the generation the
//! guard installed, so an inner frame can never clear a context an outer
//! frame still owns.
//!
//! # Example
//!
//! ```
//! use conqueror_core::ConquerorContextAccessor;
//!
//! # tokio_test::block_on(async {
//! ConquerorContextAccessor::scope(None, async {
//!     let outer = ConquerorContextAccessor::get_or_create();
//!     let inner = ConquerorContextAccessor::get_or_create();
//!     assert!(outer.ptr_eq(&inner));
//! })
//! .await;
//! # });
//! ```

use crate::context::ConquerorContext;
use parking_lot::Mutex;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

tokio::task_local! {
    static AMBIENT: AmbientSlot;
}

#[derive(Default)]
struct SlotState {
    context: Option<ConquerorContext>,
    generation: u64,
}

#[derive(Clone, Default)]
struct AmbientSlot {
    state: Arc<Mutex<SlotState>>,
}

impl AmbientSlot {
    fn with_context(context: Option<ConquerorContext>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState {
                context,
                generation: 0,
            })),
        }
    }

    fn get(&self) -> Option<ConquerorContext> {
        self.state.lock().context.clone()
    }

    fn install(&self, context: ConquerorContext) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.context = Some(context);
        state.generation
    }

    fn release(&self, generation: u64, restore: Option<ConquerorContext>) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.context = restore;
            state.generation += 1;
        }
    }
}

fn current_slot() -> Option<AmbientSlot> {
    AMBIENT.try_with(Clone::clone).ok()
}

/// Access to the ambient [`ConquerorContext`] of the current task.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConquerorContextAccessor;

impl ConquerorContextAccessor {
    /// Returns the ambient context, if one is installed.
    #[must_use]
    pub fn current() -> Option<ConquerorContext> {
        current_slot().and_then(|slot| slot.get())
    }

    /// Runs `future` with a fresh ambient slot holding `context`.
    ///
    /// The slot is discarded when the future completes, so nothing set inside
    /// leaks to the caller.
    pub async fn scope<F: Future>(context: Option<ConquerorContext>, future: F) -> F::Output {
        AMBIENT.scope(AmbientSlot::with_context(context), future).await
    }

    /// Returns the ambient context, or creates and installs a new one.
    ///
    /// Dropping the guard clears the slot only if this call created the
    /// context. Outside of [`scope`](Self::scope) the created context is not
    /// installed anywhere, so message clients will not pick it up on their
    /// own; hand it to them explicitly.
    #[must_use]
    pub fn get_or_create() -> ContextGuard {
        let slot = current_slot();
        if let Some(existing) = slot.as_ref().and_then(AmbientSlot::get) {
            return ContextGuard {
                context: existing,
                release: Release::None,
            };
        }

        let context = ConquerorContext::new();
        let release = match slot {
            Some(slot) => {
                let generation = slot.install(context.clone());
                Release::Restore {
                    slot,
                    generation,
                    previous: None,
                }
            }
            None => Release::None,
        };

        ContextGuard { context, release }
    }

    /// Installs a child of the ambient context, or a new context if none exists.
    ///
    /// Dropping the guard merges the child back into its parent and makes the
    /// parent ambient again.
    #[must_use]
    pub fn clone_or_create() -> ContextGuard {
        let slot = current_slot();
        let Some(parent) = slot.as_ref().and_then(AmbientSlot::get) else {
            return Self::get_or_create();
        };

        let child = parent.fork();
        let restore = match slot {
            Some(slot) => {
                let generation = slot.install(child.clone());
                Some((slot, generation))
            }
            None => None,
        };

        ContextGuard {
            context: child,
            release: Release::Merge { parent, restore },
        }
    }
}

enum Release {
    None,
    Restore {
        slot: AmbientSlot,
        generation: u64,
        previous: Option<ConquerorContext>,
    },
    Merge {
        parent: ConquerorContext,
        restore: Option<(AmbientSlot, u64)>,
    },
}

/// A context obtained from [`ConquerorContextAccessor`].
///
/// Dereferences to the [`ConquerorContext`]. Dropping it releases whatever
/// the originating call installed.
pub struct ContextGuard {
    context: ConquerorContext,
    release: Release,
}

impl ContextGuard {
    /// Returns `true` if dropping this guard changes the ambient slot or merges data.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        !matches!(self.release, Release::None)
    }

    /// Returns a handle to the context.
    #[must_use]
    pub fn context(&self) -> ConquerorContext {
        self.context.clone()
    }
}

impl Deref for ContextGuard {
    type Target = ConquerorContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.release, Release::None) {
            Release::None => {}
            Release::Restore {
                slot,
                generation,
                previous,
            } => slot.release(generation, previous),
            Release::Merge { parent, restore } => {
                self.context.merge_into(&parent);
                if let Some((slot, generation)) = restore {
                    slot.release(generation, Some(parent));
                }
            }
        }
    }
}
