//! Child change notifications
//!
//! Each volume node carries a registry of subscribers interested in child
//! add/remove events. Fan-out is same-thread and synchronous: the thread
//! performing the structural change drives the callbacks. The registry
//! snapshots its subscriber list before invoking anyone, so a listener may
//! re-enter the node (or mutate the subscription set) without deadlocking.

use crate::volume::VolumeNode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Opaque subscription handle, unique within a node
pub type Cookie = u64;

/// Reserved "no subscription" sentinel
pub const INVALID_COOKIE: Cookie = 0;

/// Listener for child add/remove events on a volume node
pub trait NodeEvents: Send + Sync {
    /// A child was added; the child is already queryable when this fires
    fn on_node_added(&self, node: VolumeNode);

    /// A child was detached; its handles are about to go dead
    fn on_node_removed(&self, node: VolumeNode);
}

/// Per-node subscriber registry
///
/// Holds weak references so a dropped listener never has to unregister;
/// stale entries are swept whenever a snapshot is taken.
pub(crate) struct SubscriberRegistry {
    /// Next cookie to hand out (0 is reserved as invalid)
    next_cookie: AtomicU64,
    subscribers: Mutex<HashMap<Cookie, Weak<dyn NodeEvents>>>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        SubscriberRegistry {
            next_cookie: AtomicU64::new(INVALID_COOKIE + 1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a listener, returning its cookie
    pub(crate) fn register(&self, subscriber: Weak<dyn NodeEvents>) -> Cookie {
        let cookie = self.next_cookie.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().insert(cookie, subscriber);
        cookie
    }

    /// Remove a subscription; unknown cookies are ignored
    pub(crate) fn unregister(&self, cookie: Cookie) {
        self.subscribers.lock().remove(&cookie);
    }

    /// Snapshot the live listeners, sweeping dropped ones
    fn snapshot(&self) -> Vec<Arc<dyn NodeEvents>> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|_, weak| weak.strong_count() > 0);
        subscribers.values().filter_map(Weak::upgrade).collect()
    }

    /// Notify all current subscribers that a child was added
    pub(crate) fn notify_added(&self, node: &VolumeNode) {
        for listener in self.snapshot() {
            listener.on_node_added(node.clone());
        }
    }

    /// Notify all current subscribers that a child was removed
    pub(crate) fn notify_removed(&self, node: &VolumeNode) {
        for listener in self.snapshot() {
            listener.on_node_removed(node.clone());
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}
