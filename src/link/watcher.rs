//! Line watchers.
//!
//! Every complete line is offered to the registered watchers, in
//! registration order, before anything else sees it. The first watcher whose
//! predicate returns `true` claims the line: later watchers are not consulted
//! and the line never reaches the generic line stream. This is how structural
//! messages (connect/disconnect, sample lines, completion notices) are kept
//! out of command responses.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A predicate over one received line.
pub type LinePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Handle returned by [`WatcherRegistry::add`], used to remove the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

struct Entry {
    id: WatcherId,
    pred: LinePredicate,
    once: bool,
}

/// Ordered set of line watchers.
///
/// Watchers are never cleaned up implicitly: whoever adds one must remove it,
/// otherwise its lines stay intercepted for the life of the link.
pub struct WatcherRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a watcher that stays until removed.
    pub fn add<F>(&self, pred: F) -> WatcherId
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.insert(Arc::new(pred), false)
    }

    /// Register a watcher that is removed after it claims its first line.
    pub fn add_once<F>(&self, pred: F) -> WatcherId
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.insert(Arc::new(pred), true)
    }

    fn insert(&self, pred: LinePredicate, once: bool) -> WatcherId {
        let id = WatcherId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push(Entry { id, pred, once });
        trace!(?id, once, "watcher added");
        id
    }

    /// Remove a watcher. Removing one that is already gone is a no-op.
    pub fn remove(&self, id: WatcherId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if removed {
            trace!(?id, "watcher removed");
        }
        removed
    }

    pub fn contains(&self, id: WatcherId) -> bool {
        self.entries.lock().iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Offer `line` to the watchers, returning the one that claimed it.
    ///
    /// Predicates run without the registry lock held, so a predicate may add
    /// or remove watchers (including itself).
    pub fn offer(&self, line: &str) -> Option<WatcherId> {
        let snapshot: Vec<(WatcherId, LinePredicate, bool)> = self
            .entries
            .lock()
            .iter()
            .map(|e| (e.id, Arc::clone(&e.pred), e.once))
            .collect();

        for (id, pred, once) in snapshot {
            if !self.contains(id) {
                continue;
            }
            if pred(line) {
                if once {
                    self.remove(id);
                }
                trace!(?id, line, "line claimed");
                return Some(id);
            }
        }
        None
    }
}

impl Default for WatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("watchers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_first_match_wins() {
        let registry = WatcherRegistry::new();
        let second_calls = Arc::new(AtomicUsize::new(0));

        let first = registry.add(|line| line.starts_with("P3M5:"));
        let counter = Arc::clone(&second_calls);
        registry.add(move |line| {
            counter.fetch_add(1, Ordering::SeqCst);
            line.starts_with("P3M5:")
        });

        assert_eq!(registry.offer("P3M5: 12 34"), Some(first));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unclaimed_line() {
        let registry = WatcherRegistry::new();
        registry.add(|line| line.starts_with("P0:"));
        assert_eq!(registry.offer("deltat=12"), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = WatcherRegistry::new();
        let id = registry.add(|_| true);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
        assert_eq!(registry.offer("anything"), None);
    }

    #[test]
    fn test_once_watcher_removed_after_claim() {
        let registry = WatcherRegistry::new();
        let id = registry.add_once(|line| line == "P0: ramp done");

        assert_eq!(registry.offer("P0: pulse done"), None);
        assert!(registry.contains(id));
        assert_eq!(registry.offer("P0: ramp done"), Some(id));
        assert!(!registry.contains(id));
        assert_eq!(registry.offer("P0: ramp done"), None);
    }

    #[test]
    fn test_predicate_may_remove_itself() {
        let registry = Arc::new(WatcherRegistry::new());
        let slot: Arc<Mutex<Option<WatcherId>>> = Arc::new(Mutex::new(None));

        let reg = Arc::clone(&registry);
        let own = Arc::clone(&slot);
        let id = registry.add(move |_| {
            if let Some(id) = *own.lock() {
                reg.remove(id);
            }
            true
        });
        *slot.lock() = Some(id);

        assert_eq!(registry.offer("x"), Some(id));
        assert!(registry.is_empty());
    }
}
