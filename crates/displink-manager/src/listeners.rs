use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use displink_transport::{ConnectionEvent, TransportKind};
use tracing::error;

/// Handle returned when registering a listener; pass it back to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

pub type EventListener = dyn Fn(&ConnectionEvent) + Send + Sync;
pub type DataListener = dyn Fn(TransportKind, &[u8]) + Send + Sync;

type Entries<T> = Arc<Vec<(ListenerId, Arc<T>)>>;

/// Copy-on-write listener list.
///
/// Registration swaps in a new vector; delivery iterates a snapshot without
/// holding the lock, so listeners may add or remove listeners while being
/// called.
pub(crate) struct ListenerSet<T: ?Sized> {
    entries: RwLock<Entries<T>>,
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn insert(&self, id: ListenerId, listener: Arc<T>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push((id, listener));
        *entries = Arc::new(next);
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next = entries
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Entries<T> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Call every listener in turn. A panicking listener is logged and
    /// skipped.
    pub fn notify(&self, what: &str, call: impl Fn(&T)) {
        for (id, listener) in self.snapshot().iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| call(&**listener)));
            if outcome.is_err() {
                error!(listener = id.0, "{what} listener panicked");
            }
        }
    }
}
