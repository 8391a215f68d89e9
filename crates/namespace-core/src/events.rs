//! Namespace change notifications.
//!
//! Local operations emit typed events; merged remote edits surface as
//! `TreeChanged { remote: true }` through `Namespace::watch`.

use crate::node::{NodeId, NodeType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Events emitted by the namespace.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NamespaceEvent {
    /// A file or folder was created locally.
    NodeCreated {
        id: NodeId,
        node_type: NodeType,
        parent_id: NodeId,
        /// Milliseconds since Unix epoch.
        timestamp: i64,
    },
    /// A node was renamed locally.
    NodeRenamed {
        id: NodeId,
        from: String,
        to: String,
        timestamp: i64,
    },
    /// A node was moved to another folder locally.
    NodeMoved {
        id: NodeId,
        from: Option<NodeId>,
        to: NodeId,
        timestamp: i64,
    },
    /// A node and its whole subtree were deleted locally.
    NodesDeleted { ids: Vec<NodeId>, timestamp: i64 },
    /// Legacy files were converted into tree nodes.
    Migrated { count: usize, timestamp: i64 },
    /// The `nodes` or `children` container changed.
    TreeChanged {
        /// True when the change came from an imported remote update.
        remote: bool,
        timestamp: i64,
    },
}

type Callback = Arc<dyn Fn(&NamespaceEvent) + Send + Sync>;

/// Fan-out point for [`NamespaceEvent`]s.
///
/// Loro runs watch callbacks on whichever thread commits or imports, so
/// listeners must be `Send + Sync`. Listeners run after the lock is
/// released and may register or drop other listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<BTreeMap<u64, Callback>>,
    next_id: AtomicU64,
}

/// Keeps a listener registered; dropping it removes the listener.
#[must_use = "the listener is removed when this is dropped"]
pub struct Listener {
    bus: Weak<EventBus>,
    id: u64,
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            // Dropped after the guard: the callback may own other listeners.
            let removed = bus.lock().remove(&self.id);
            drop(removed);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every event emitted from now on.
    pub fn listen(
        self: &Arc<Self>,
        callback: impl Fn(&NamespaceEvent) + Send + Sync + 'static,
    ) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, Arc::new(callback));
        Listener {
            bus: Arc::downgrade(self),
            id,
        }
    }

    /// Deliver `event` to listeners in registration order.
    pub fn emit(&self, event: NamespaceEvent) {
        let listeners: Vec<Callback> = self.lock().values().cloned().collect();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    // A listener that panicked leaves the map intact; keep using it.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Callback>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(remote: bool) -> NamespaceEvent {
        NamespaceEvent::TreeChanged {
            remote,
            timestamp: 1000,
        }
    }

    fn recorder(bus: &Arc<EventBus>) -> (Listener, Arc<Mutex<Vec<bool>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = bus.listen(move |event| {
            if let NamespaceEvent::TreeChanged { remote, .. } = event {
                sink.lock().unwrap().push(*remote);
            }
        });
        (listener, seen)
    }

    #[test]
    fn test_listeners_see_events_until_dropped() {
        let bus = Arc::new(EventBus::new());
        let (first, first_seen) = recorder(&bus);
        let (_second, second_seen) = recorder(&bus);

        bus.emit(changed(false));
        drop(first);
        bus.emit(changed(true));

        assert_eq!(*first_seen.lock().unwrap(), vec![false]);
        assert_eq!(*second_seen.lock().unwrap(), vec![false, true]);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_listener_may_register_another_while_emitting() {
        let bus = Arc::new(EventBus::new());
        let late = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&bus);
        let keep = Arc::clone(&late);
        let _outer = bus.listen(move |_| {
            if let Some(bus) = weak.upgrade() {
                keep.lock().unwrap().push(bus.listen(|_| {}));
            }
        });

        bus.emit(changed(false));
        assert_eq!(bus.listener_count(), 2);
    }

    #[test]
    fn test_listener_outliving_bus_is_harmless() {
        let bus = Arc::new(EventBus::new());
        let (listener, _) = recorder(&bus);
        drop(bus);
        drop(listener);
    }

    #[test]
    fn test_event_serialization() {
        let event = NamespaceEvent::NodeMoved {
            id: "n_1".into(),
            from: Some("root".into()),
            to: "n_2".into(),
            timestamp: 5,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"nodeMoved\""));
        assert!(json.contains("\"from\":\"root\""));
        assert!(json.contains("\"to\":\"n_2\""));

        let created = NamespaceEvent::NodeCreated {
            id: "n_3".into(),
            node_type: NodeType::Folder,
            parent_id: "root".into(),
            timestamp: 6,
        };
        let json = serde_json::to_string(&created).unwrap();
        assert!(json.contains("\"nodeType\":\"folder\""));
        assert!(json.contains("\"parentId\":\"root\""));
    }
}
