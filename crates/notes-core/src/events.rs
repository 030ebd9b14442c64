//! Vault change events and the subscription bus that delivers them.
//!
//! Delivery is synchronous: `emit` calls every current subscriber, in
//! subscription order, before returning.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::conflict::ConflictInfo;
use crate::note::Note;

/// Events emitted by the vault after each mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VaultEvent {
    NoteCreated { note: Note },
    NoteUpdated { note: Note },
    NoteDeleted { id: String },
    ConflictDetected { info: ConflictInfo },
}

impl VaultEvent {
    /// Wire name of the event (`note-created`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            VaultEvent::NoteCreated { .. } => "note-created",
            VaultEvent::NoteUpdated { .. } => "note-updated",
            VaultEvent::NoteDeleted { .. } => "note-deleted",
            VaultEvent::ConflictDetected { .. } => "conflict-detected",
        }
    }
}

type Callback = Arc<dyn Fn(&VaultEvent) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events; drop it or call
/// [`Subscription::unsubscribe`] to stop.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing vault events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&VaultEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: VaultEvent) {
        // Snapshot so a callback may subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        tracing::debug!("emit {} to {} subscriber(s)", event.name(), callbacks.len());
        for callback in callbacks {
            callback(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn deleted(id: &str) -> VaultEvent {
        VaultEvent::NoteDeleted { id: id.into() }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(deleted("a"));

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(deleted("a"));
        }

        bus.emit(deleted("b"));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_explicit_unsubscribe() {
        let bus = Arc::new(EventBus::new());
        let sub = bus.subscribe(|_| {});
        assert_eq!(bus.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_delivery_is_ordered() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&log);
        let _a = bus.subscribe(move |e| first.lock().unwrap().push(format!("a:{}", e.name())));
        let second = Arc::clone(&log);
        let _b = bus.subscribe(move |e| second.lock().unwrap().push(format!("b:{}", e.name())));

        bus.emit(deleted("x"));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:note-deleted".to_string(), "b:note-deleted".to_string()]
        );
    }

    #[test]
    fn test_clear_drops_all_subscribers() {
        let bus = Arc::new(EventBus::new());
        let _a = bus.subscribe(|_| {});
        let _b = bus.subscribe(|_| {});
        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&deleted("n1")).unwrap();
        assert!(json.contains("\"type\":\"note-deleted\""));
        assert!(json.contains("\"id\":\"n1\""));
    }
}
