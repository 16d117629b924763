//! Listener registries
//!
//! Command traffic, lock changes and locomotive changes are each fanned out
//! through a [`ListenerSet`]. Listeners are identified by their `Arc`, so
//! adding the same listener twice keeps one registration and removing it
//! once drops it. Every listener registered when an event is emitted gets
//! that event, even if the set changes while it is being delivered.

use std::sync::{Arc, Mutex};

use srcp_protocol::{Address, DeviceGroup, Direction};
use tokio::sync::mpsc;

use crate::locomotive::LocomotiveKind;
use crate::session::SessionId;

/// Receiver of events of type `E`
pub trait Listener<E>: Send + Sync {
    /// Called once per emitted event
    fn notify(&self, event: &E);
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn notify(&self, event: &E) {
        self(event)
    }
}

/// Forwards events into a channel; a closed receiver drops them
impl<E> Listener<E> for mpsc::UnboundedSender<E>
where
    E: Clone + Send,
{
    fn notify(&self, event: &E) {
        let _ = self.send(event.clone());
    }
}

/// Set of listeners with identity-based add/remove
pub struct ListenerSet<E> {
    listeners: Mutex<Vec<Arc<dyn Listener<E>>>>,
}

impl<E> ListenerSet<E> {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Add a listener; returns false if it was already registered
    pub fn add(&self, listener: Arc<dyn Listener<E>>) -> bool {
        let mut listeners = self.lock();
        if listeners.iter().any(|l| same(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a listener; returns false if it was not registered
    pub fn remove(&self, listener: &Arc<dyn Listener<E>>) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|l| !same(l, listener));
        listeners.len() != before
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no listener is registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver an event to every listener registered right now
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<_> = self.lock().clone();
        for listener in snapshot {
            listener.notify(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Listener<E>>>> {
        // A panicking listener cannot leave the Vec half-updated
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for ListenerSet<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

fn same<E>(a: &Arc<dyn Listener<E>>, b: &Arc<dyn Listener<E>>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// A line that crossed the command channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandData {
    /// Line written to the server (without terminator)
    Sent(String),
    /// Line read from the server (without terminator)
    Received(String),
}

impl CommandData {
    /// The line text
    pub fn line(&self) -> &str {
        match self {
            Self::Sent(line) | Self::Received(line) => line,
        }
    }
}

/// A device lock was taken or released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChange {
    /// Device group of the lock
    pub group: DeviceGroup,
    /// Device address of the lock
    pub address: Address,
    /// New holder, `None` once released
    pub session: Option<SessionId>,
}

/// Snapshot of a locomotive after a change
#[derive(Debug, Clone, PartialEq)]
pub struct LocomotiveChange {
    /// Primary address
    pub address: Address,
    /// Decoder kind
    pub kind: LocomotiveKind,
    /// Direction after the change
    pub direction: Direction,
    /// Speed after the change
    pub speed: u32,
    /// Functions after the change
    pub functions: Vec<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_add_is_idempotent() {
        let set: ListenerSet<u32> = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let listener: Arc<dyn Listener<u32>> = Arc::new(move |_: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(set.add(listener.clone()));
        assert!(!set.add(listener.clone()));
        assert_eq!(set.len(), 1);

        set.emit(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(set.remove(&listener));
        assert!(!set.remove(&listener));
        assert!(set.is_empty());

        set.emit(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_listener() {
        let set: ListenerSet<CommandData> = ListenerSet::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        set.add(Arc::new(tx));

        set.emit(&CommandData::Sent("GO".into()));
        set.emit(&CommandData::Received("200 OK GO 1".into()));

        assert_eq!(rx.try_recv().unwrap(), CommandData::Sent("GO".into()));
        assert_eq!(rx.try_recv().unwrap().line(), "200 OK GO 1");
    }

    #[test]
    fn test_listener_can_modify_set_during_emit() {
        let set: Arc<ListenerSet<u32>> = Arc::new(ListenerSet::new());
        let inner = set.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        set.add(Arc::new(move |_: &u32| {
            inner.clear();
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = hits.clone();
        set.add(Arc::new(move |_: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        set.emit(&0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(set.is_empty());
    }
}
