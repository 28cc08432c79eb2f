//! Change notifier: fans store changes out to per-user listeners.
//!
//! Each listener owns a live [`ChangeFeed`](crate::ChangeFeed) filtered by
//! owner and is driven by its own tokio task. Listeners registered for the
//! same user are independent of each other.

use crate::error::{StorageError, StorageResult};
use crate::feed::{ChangeEvent, ChangeFilter, ChangeSince};
use crate::store::DocumentStore;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback invoked for every change owned by the listener's user.
pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

thread_local! {
    /// Set while a listener callback runs on this thread.
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// Clears [`DELIVERING`] even if the callback panics.
struct DeliveringGuard;

impl DeliveringGuard {
    fn enter() -> Self {
        DELIVERING.with(|d| d.set(true));
        Self
    }
}

impl Drop for DeliveringGuard {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(false));
    }
}

struct Slot {
    active: AtomicBool,
    /// Held for the duration of each callback.
    gate: Mutex<()>,
}

struct Registration {
    username: String,
    slot: Arc<Slot>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    listeners: Mutex<HashMap<u64, Registration>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Registration>> {
        self.listeners.lock().unwrap_or_else(|poisoned| {
            warn!("listener registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Drops registrations whose task has already exited, e.g. because the
    /// store closed and ended the feed.
    fn live(&self) -> MutexGuard<'_, HashMap<u64, Registration>> {
        let mut listeners = self.lock();
        listeners.retain(|id, registration| {
            let finished = registration.task.is_finished();
            if finished {
                debug!(listener = id, username = %registration.username, "listener task ended, unregistered");
            }
            !finished
        });
        listeners
    }

    fn cancel(&self, id: u64) -> bool {
        let Some(registration) = self.lock().remove(&id) else {
            return false;
        };
        registration.slot.active.store(false, Ordering::SeqCst);
        // Wait out an in-flight callback, unless we are inside one: a
        // listener cancelling itself (or a sibling) must not block on a gate.
        if !DELIVERING.with(Cell::get) {
            let _in_flight = registration
                .slot
                .gate
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        registration.task.abort();
        debug!(listener = id, username = %registration.username, "listener cancelled");
        true
    }
}

/// Registry of change listeners keyed by username.
#[derive(Clone)]
pub struct ChangeNotifier {
    store: DocumentStore,
    registry: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

/// Cancellation handle returned by [`ChangeNotifier::watch`].
///
/// Dropping the handle does not cancel the listener.
#[derive(Clone)]
pub struct ListenerHandle {
    id: u64,
    registry: Arc<Registry>,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener. No callback runs once this returns (except a
    /// callback that is itself making this call). Repeated calls are no-ops.
    pub fn cancel(&self) {
        self.registry.cancel(self.id);
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

impl ChangeNotifier {
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store,
            registry: Arc::new(Registry::default()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers `listener` for changes owned by `username`.
    ///
    /// Changes written after this returns are delivered. Must be called
    /// from within a tokio runtime.
    pub fn watch<F>(&self, username: &str, listener: F) -> StorageResult<ListenerHandle>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StorageError::NoRuntime)?;
        let mut feed = self
            .store
            .changes(ChangeSince::Now, true, ChangeFilter::owned_by(username))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot {
            active: AtomicBool::new(true),
            gate: Mutex::new(()),
        });
        let listener: Listener = Arc::new(listener);

        let task_slot = Arc::clone(&slot);
        let task = runtime.spawn(async move {
            while let Some(event) = feed.next().await {
                let _gate = task_slot
                    .gate
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if !task_slot.active.load(Ordering::SeqCst) {
                    break;
                }
                let _delivering = DeliveringGuard::enter();
                listener(&event);
            }
        });

        self.registry.lock().insert(
            id,
            Registration {
                username: username.to_string(),
                slot,
                task,
            },
        );
        debug!(listener = id, %username, "listener registered");
        Ok(ListenerHandle {
            id,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Cancels a listener by handle. Returns `false` if it was already gone.
    pub fn cancel(&self, handle: &ListenerHandle) -> bool {
        self.registry.cancel(handle.id)
    }

    /// Cancels every registered listener.
    pub fn cancel_all(&self) {
        let ids: Vec<u64> = self.registry.lock().keys().copied().collect();
        for id in ids {
            self.registry.cancel(id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.live().len()
    }

    /// Number of listeners registered for `username`.
    pub fn listeners_for(&self, username: &str) -> usize {
        self.registry
            .live()
            .values()
            .filter(|r| r.username == username)
            .count()
    }
}
