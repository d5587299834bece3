use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::remote::{EventSink, WatchEvent};

// -----------------------------------------------------------------------------
// ----- Globals ---------------------------------------------------------------

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

// -----------------------------------------------------------------------------
// ----- Listener --------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type ListenerFn = dyn Fn(&WatchEvent) + Send + Sync;

/// A watch event callback with a stable identity.
///
/// Clones share the identity, so the clone a caller keeps around is the key
/// for removing the listener later.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    callback: Arc<ListenerFn>,
}

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        Self {
            id: ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn notify(&self, event: &WatchEvent) {
        (self.callback)(event)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.id.0).finish()
    }
}

// -----------------------------------------------------------------------------
// ----- ListenerSet -----------------------------------------------------------

/// Fan-out target behind one upstream subscription.
#[derive(Default)]
pub(crate) struct ListenerSet {
    members: Mutex<HashMap<ListenerId, Listener>>,
}

impl ListenerSet {
    pub(crate) fn with(listener: &Listener) -> Self {
        let set = Self::default();
        set.insert(listener);
        set
    }

    /// Returns false if the listener was already registered.
    pub(crate) fn insert(&self, listener: &Listener) -> bool {
        self.members
            .lock()
            .insert(listener.id(), listener.clone())
            .is_none()
    }

    /// Returns false if the listener was not registered.
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        self.members.lock().remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Delivers `event` to every current member. Callbacks run outside the
    /// set's lock so a listener may release itself from inside its callback.
    pub(crate) fn dispatch(&self, event: &WatchEvent) -> usize {
        let members: Vec<Listener> = self.members.lock().values().cloned().collect();
        for listener in &members {
            listener.notify(event);
        }
        members.len()
    }

    /// The single callback handed to the upstream watch call.
    pub(crate) fn sink(self: &Arc<Self>) -> EventSink {
        let set = Arc::clone(self);
        Arc::new(move |event: WatchEvent| {
            set.dispatch(&event);
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::WatchEventKind;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener() -> (Listener, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let listener = Listener::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (listener, hits)
    }

    #[test]
    fn clones_share_identity() {
        let (a, _) = counting_listener();
        let (b, _) = counting_listener();

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn duplicate_insert_and_stale_remove_are_noops() {
        let (a, _) = counting_listener();
        let (b, _) = counting_listener();
        let set = ListenerSet::with(&a);

        assert!(!set.insert(&a.clone()));
        assert_eq!(set.len(), 1);

        assert!(!set.remove(b.id()));
        assert!(set.remove(a.id()));
        assert!(!set.remove(a.id()));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn sink_fans_out_to_current_members() {
        let (a, a_hits) = counting_listener();
        let (b, b_hits) = counting_listener();
        let set = Arc::new(ListenerSet::with(&a));
        set.insert(&b);

        let sink = set.sink();
        sink(WatchEvent::new(WatchEventKind::Create, "/home/a.txt"));

        set.remove(a.id());
        sink(WatchEvent::new(WatchEventKind::Write, "/home/a.txt"));

        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_may_remove_itself_while_dispatching() {
        let set = Arc::new(ListenerSet::default());
        let weak = Arc::downgrade(&set);
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);

        let id_slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&id_slot);
        let listener = Listener::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            if let (Some(set), Some(id)) = (weak.upgrade(), *slot.lock()) {
                set.remove(id);
            }
        });
        *id_slot.lock() = Some(listener.id());
        set.insert(&listener);

        assert_eq!(set.dispatch(&WatchEvent::new(WatchEventKind::Remove, "/tmp")), 1);
        assert_eq!(set.dispatch(&WatchEvent::new(WatchEventKind::Remove, "/tmp")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
