//! Event infrastructure for the notebook cache.
//!
//! Tree restructuring is coordinated through typed events: every `Node` owns
//! an `EventBus`, and the `Notebook` re-emits each node's events on its own
//! aggregate bus via a forwarding subscriber wired up at `get_node` time.

use crate::attrs::NodeId;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by nodes, files, and the notebook itself.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NotebookEvent {
    /// Any attribute of a node changed.
    NodeChanged {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    /// A node's children-id list changed.
    ChildrenChanged {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    /// A node's parent-id list changed.
    ParentsChanged {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    /// A node was destroyed and evicted from the cache.
    NodeDestroyed {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    /// Content or metadata of a node's file changed.
    FileChanged {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        path: String,
    },
    /// A directory listing is about to replace its children. Consumers that
    /// hold listeners on the old child files should detach now.
    FileChildrenRemoving {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        path: String,
    },
    /// The replacement children from a directory listing are in place.
    FileChildrenAdded {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        path: String,
    },
    /// An icon basename lookup committed; consumers should re-query.
    IconResolved { basename: String },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing notebook events to subscribers.
///
/// Thread-safe for use in a multi-threaded Tokio runtime.
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(NotebookEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(NotebookEvent) + Send + Sync + 'static,
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
        // Use try_write to avoid deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g., during emit).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: NotebookEvent) {
        // Clone the callback list to prevent deadlock if a callback calls subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn changed(id: &str) -> NotebookEvent {
        NotebookEvent::NodeChanged {
            node_id: NodeId::from(id),
        }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(changed("n1"));

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

            bus.emit(changed("n1"));
            assert_eq!(count.load(Ordering::Relaxed), 1);
            // _sub dropped here
        }

        // After drop, callback should not be called
        bus.emit(changed("n2"));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_multiple_subscribers() {
        let bus = Arc::new(EventBus::new());
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        let count1_clone = Arc::clone(&count1);
        let count2_clone = Arc::clone(&count2);

        let _sub1 = bus.subscribe(move |_| {
            count1_clone.fetch_add(1, Ordering::Relaxed);
        });
        let _sub2 = bus.subscribe(move |_| {
            count2_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(changed("n1"));

        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = NotebookEvent::FileChanged {
            node_id: NodeId::from("n1"),
            path: "res/img.png".into(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"fileChanged\""));
        assert!(json.contains("\"nodeId\":\"n1\""));
        assert!(json.contains("\"path\":\"res/img.png\""));
    }
}
