//! # Dispatch Registry
//!
//! Publish/subscribe table keyed by envelope type, plus the wildcard channel
//! `"*"` that sees every envelope after its type-specific handlers.
//!
//! The table is shared: any component may subscribe or unsubscribe while the
//! connection loop is emitting. `emit` snapshots the handler lists under the
//! lock and invokes them after releasing it, so a handler may cancel itself
//! (or register others) without corrupting iteration or deadlocking.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;

use crate::envelope::Envelope;

/// Type key that receives every envelope.
pub const WILDCARD: &str = "*";

/// Callback invoked with `(payload, envelope)`.
pub type Handler = Arc<dyn Fn(&Value, &Envelope) + Send + Sync>;

/// Identifies one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type HandlerTable = HashMap<String, Vec<(HandlerId, Handler)>>;

#[derive(Default)]
struct Inner {
    handlers: Mutex<HandlerTable>,
    next_id: AtomicU64,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, HandlerTable> {
        // A poisoned table only means a subscriber panicked while we held the
        // lock elsewhere; the map itself is still consistent.
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, kind: &str, id: HandlerId) -> bool {
        let mut table = self.table();
        let Some(list) = table.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(hid, _)| *hid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            table.remove(kind);
        }
        removed
    }
}

/// # Registry
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.table();
        let mut map = f.debug_map();
        for (kind, list) in table.iter() {
            map.entry(kind, &list.len());
        }
        map.finish()
    }
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind` (or [`WILDCARD`]).
    ///
    /// The returned [`Subscription`] removes exactly this handler when
    /// cancelled. Dropping it without cancelling keeps the handler registered.
    pub fn on<F>(&self, kind: &str, handler: F) -> Subscription
    where
        F: Fn(&Value, &Envelope) + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .table()
            .entry(kind.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        tracing::trace!(kind, ?id, "handler registered");

        Subscription {
            registry: Arc::downgrade(&self.inner),
            kind: kind.to_string(),
            id,
        }
    }

    /// Removes one handler (`Some(id)`) or every handler for `kind` (`None`).
    pub fn off(&self, kind: &str, handler: Option<HandlerId>) {
        match handler {
            Some(id) => {
                self.inner.remove(kind, id);
            }
            None => {
                self.inner.table().remove(kind);
            }
        }
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: &str) -> usize {
        self.inner.table().get(kind).map_or(0, Vec::len)
    }

    /// Delivers `envelope` to its type handlers, then to wildcard handlers,
    /// each in registration order. Returns how many handlers were invoked.
    ///
    /// A panicking handler is logged and skipped; the remaining handlers still
    /// run.
    pub fn emit(&self, envelope: &Envelope) -> usize {
        // --- 1. Snapshot under the lock ---
        let snapshot: Vec<Handler> = {
            let table = self.inner.table();
            let typed = table.get(&envelope.kind).into_iter().flatten();
            let wildcard = if envelope.kind == WILDCARD {
                None
            } else {
                table.get(WILDCARD)
            };
            typed
                .chain(wildcard.into_iter().flatten())
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        // --- 2. Isolated invocation, lock released ---
        // Isolation requires panic = "unwind"; under "abort" a handler panic kills the process.
        for handler in &snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                handler(&envelope.payload, envelope);
            }));
            if outcome.is_err() {
                tracing::error!(kind = %envelope.kind, "event handler panicked; continuing with remaining handlers");
            }
        }
        snapshot.len()
    }
}

/// # Subscription
///
/// Cancel handle returned by [`Registry::on`].
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the handler registered; call cancel() to remove it"]
pub struct Subscription {
    registry: Weak<Inner>,
    kind: String,
    id: HandlerId,
}

impl Subscription {
    /// Handler id, usable with [`Registry::off`].
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Event type this subscription listens to.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Removes the handler. Returns `false` if it was already gone.
    pub fn cancel(self) -> bool {
        match self.registry.upgrade() {
            Some(inner) => inner.remove(&self.kind, self.id),
            None => false,
        }
    }
}
