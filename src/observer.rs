//! Listener registry for change notifications
//!
//! Subjects only hold weak references to their listeners: dropping the last
//! `Arc` of a listener silently unregisters it. Explicit removal goes through
//! the [`ListenerId`] returned by [`Subject::attach`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Anything interested in events of type `E`
pub trait Observer<E>: Send + Sync {
    fn notify(&self, event: &E);
}

/// Handle used to detach a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Fan-out point for events of type `E`
pub struct Subject<E> {
    listeners: Mutex<Vec<(ListenerId, Weak<dyn Observer<E>>)>>,
    next_id: AtomicU64,
}

impl<E: 'static> Subject<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a listener (weakly)
    pub fn attach<O: Observer<E> + 'static>(&self, observer: &Arc<O>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let weak: Weak<dyn Observer<E>> = Arc::downgrade(observer) as Weak<dyn Observer<E>>;
        self.listeners.lock().push((id, weak));
        id
    }

    /// Unregister a listener, returns false if it was not attached
    pub fn detach(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(l_id, _)| *l_id != id);
        listeners.len() != before
    }

    /// Number of listeners still alive
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every live listener, pruning dead ones.
    ///
    /// The registry lock is released before listeners run, so a listener may
    /// attach or detach from within `notify`.
    pub fn notify(&self, event: &E) {
        let live: Vec<Arc<dyn Observer<E>>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|(_, w)| w.strong_count() > 0);
            listeners.iter().filter_map(|(_, w)| w.upgrade()).collect()
        };
        for listener in live {
            listener.notify(event);
        }
    }
}

impl<E: 'static> Default for Subject<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Subject<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subject")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
