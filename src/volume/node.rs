//! Volume node implementation
//!
//! The owning side of the physical tree. Parents hold their children in
//! `Arc`s; external callers only ever see `VolumeNode` handles wrapping a
//! `Weak`, so dropping the owning `Arc` (removal from the parent, or the
//! root holder freeing the root) orphans the whole subtree at once.
//!
//! The dictionary, the children map and the subscriber registry are locked
//! independently: a key lookup never contends with a child insert.

use crate::id::{next_node_id, NodeId};
use crate::value::Value;
use crate::volume::events::SubscriberRegistry;
use crate::volume::{Cookie, NodeEvents, VolumeNode};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Mount precedence ordinal; higher wins on conflicting keys
pub type Priority = u32;

pub(crate) struct VolumeNodeImpl {
    name: String,
    id: NodeId,
    /// Fixed at creation; children inherit it
    priority: Priority,
    data: RwLock<HashMap<String, Value>>,
    children: RwLock<HashMap<String, Arc<VolumeNodeImpl>>>,
    subscribers: SubscriberRegistry,
    /// Back-reference to our own Arc, for minting handles
    weak_self: Weak<VolumeNodeImpl>,
}

impl VolumeNodeImpl {
    pub(crate) fn new(name: &str, priority: Priority) -> Arc<Self> {
        Arc::new_cyclic(|weak| VolumeNodeImpl {
            name: name.to_string(),
            id: next_node_id(),
            priority,
            data: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            subscribers: SubscriberRegistry::new(),
            weak_self: weak.clone(),
        })
    }

    /// Build a safe handle to this node
    pub(crate) fn proxy(&self) -> VolumeNode {
        VolumeNode::new(self.weak_self.clone(), self.id)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    // Dictionary operations

    /// Upsert
    pub(crate) fn insert(&self, key: &str, value: Value) {
        self.data.write().insert(key.to_string(), value);
    }

    /// Insert only if the key is absent; returns whether it inserted
    pub(crate) fn try_insert(&self, key: &str, value: Value) -> bool {
        match self.data.write().entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Overwrite only if the key is present; returns whether it did
    pub(crate) fn replace(&self, key: &str, value: Value) -> bool {
        match self.data.write().get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Remove if present; absent keys are not an error
    pub(crate) fn erase(&self, key: &str) {
        self.data.write().remove(key);
    }

    pub(crate) fn find(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Visit every (key, value) pair under the dictionary lock.
    ///
    /// The callback gets a mutable value reference, so the lock is held
    /// for the duration; do not call back into this node's dictionary.
    pub(crate) fn for_each_key_value(&self, mut f: impl FnMut(&str, &mut Value)) {
        let mut data = self.data.write();
        for (key, value) in data.iter_mut() {
            f(key, value);
        }
    }

    // Child operations

    /// Find-then-insert: a duplicate name returns the existing child, so
    /// concurrent duplicate inserts are race-safe and allocation-free.
    /// Subscribers hear about the child only after it is registered.
    pub(crate) fn insert_child(&self, name: &str) -> VolumeNode {
        let child = {
            let mut children = self.children.write();
            if let Some(existing) = children.get(name) {
                return existing.proxy();
            }
            let node = VolumeNodeImpl::new(name, self.priority);
            children.insert(name.to_string(), node.clone());
            node
        };

        debug!("added child {} ({}) under {}", name, child.id, self.id);
        self.subscribers.notify_added(&child.proxy());
        child.proxy()
    }

    /// Detach a child by name, notifying subscribers and orphaning the
    /// removed subtree
    pub(crate) fn remove_child(&self, name: &str) {
        let removed = self.children.write().remove(name);
        if let Some(child) = removed {
            debug!("removed child {} ({}) under {}", name, child.id, self.id);
            self.subscribers.notify_removed(&child.proxy());
        }
        // the owning Arc drops here; handles into the subtree go dead
    }

    /// Detach every child matching the predicate
    pub(crate) fn remove_child_if(&self, mut pred: impl FnMut(&VolumeNode) -> bool) {
        let snapshot: Vec<Arc<VolumeNodeImpl>> =
            self.children.read().values().cloned().collect();
        let doomed: Vec<Arc<VolumeNodeImpl>> = snapshot
            .into_iter()
            .filter(|child| pred(&child.proxy()))
            .collect();
        if doomed.is_empty() {
            return;
        }

        {
            let mut children = self.children.write();
            for child in &doomed {
                // re-check identity: the name may have been re-created
                // by a concurrent insert since the snapshot
                if children
                    .get(child.name())
                    .is_some_and(|current| Arc::ptr_eq(current, child))
                {
                    children.remove(child.name());
                }
            }
        }

        for child in &doomed {
            debug!("removed child {} ({}) under {}", child.name, child.id, self.id);
            self.subscribers.notify_removed(&child.proxy());
        }
    }

    /// Visit each child; iterates a snapshot, so the callback runs without
    /// any node lock held
    pub(crate) fn for_each_child(&self, mut f: impl FnMut(VolumeNode)) {
        let snapshot: Vec<Arc<VolumeNodeImpl>> =
            self.children.read().values().cloned().collect();
        for child in snapshot {
            f(child.proxy());
        }
    }

    pub(crate) fn find_child(&self, name: &str) -> Option<VolumeNode> {
        self.children.read().get(name).map(|child| child.proxy())
    }

    pub(crate) fn find_child_if(
        &self,
        mut pred: impl FnMut(&VolumeNode) -> bool,
    ) -> Option<VolumeNode> {
        let snapshot: Vec<Arc<VolumeNodeImpl>> =
            self.children.read().values().cloned().collect();
        snapshot.into_iter().map(|child| child.proxy()).find(|proxy| pred(proxy))
    }

    // Subscriptions

    pub(crate) fn register_subscriber(&self, subscriber: Weak<dyn NodeEvents>) -> Cookie {
        self.subscribers.register(subscriber)
    }

    pub(crate) fn unregister_subscriber(&self, cookie: Cookie) {
        self.subscribers.unregister(cookie);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn test_dictionary_operations() {
        let node = VolumeNodeImpl::new("root", 0);

        node.insert("k", Value::from("test"));
        assert!(node.contains("k"));
        assert_eq!(node.find("k"), Some(Value::from("test")));

        assert!(node.replace("k", Value::from(3.5)));
        assert_eq!(node.find("k"), Some(Value::F64(3.5)));

        node.erase("k");
        assert!(!node.contains("k"));
        assert!(!node.replace("k", Value::from(1i32)));
        assert_eq!(node.find("k"), None);
    }

    #[test]
    fn test_try_insert_only_once() {
        let node = VolumeNodeImpl::new("root", 0);

        assert!(node.try_insert("k", Value::from("first")));
        assert!(!node.try_insert("k", Value::from("second")));
        assert_eq!(node.find("k"), Some(Value::from("first")));
    }

    #[test]
    fn test_for_each_key_value_mutates_in_place() {
        let node = VolumeNodeImpl::new("root", 0);
        node.insert("a", Value::from(1i32));
        node.insert("b", Value::from(2i32));

        node.for_each_key_value(|_, value| *value = Value::from("seen"));

        assert_eq!(node.find("a"), Some(Value::from("seen")));
        assert_eq!(node.find("b"), Some(Value::from("seen")));
    }

    #[test]
    fn test_insert_child_is_idempotent() {
        let node = VolumeNodeImpl::new("root", 7);

        let first = node.insert_child("child");
        let second = node.insert_child("child");
        assert_eq!(first.id(), second.id());

        // children inherit the parent's priority
        assert_eq!(first.priority().unwrap(), 7);
    }

    #[test]
    fn test_remove_child_if() {
        let node = VolumeNodeImpl::new("root", 0);
        for i in 1..=3 {
            node.insert_child(&format!("child{}", i));
        }

        node.remove_child_if(|child| child.name().unwrap() == "child1");

        assert!(node.find_child("child1").is_none());
        assert!(node.find_child("child2").is_some());
        assert!(node.find_child("child3").is_some());
    }

    // Handles raced against structural churn must keep resolving or fail
    // with NodeRemoved, never anything worse.
    #[test]
    fn test_concurrent_child_churn_keeps_handles_safe() {
        let root = VolumeNodeImpl::new("root", 0);
        let handle = root.proxy();

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let handle = handle.clone();
                thread::spawn(move || {
                    for round in 0..200i32 {
                        let name = format!("child{}", round % 8);
                        let child = handle.insert_child(&name).unwrap();
                        match worker % 2 {
                            0 => handle.remove_child(&name).unwrap(),
                            _ => {
                                let _ = handle.find_child(&name).unwrap();
                            }
                        }
                        // the child may have been removed by a sibling
                        // thread by now; either outcome is fine
                        match child.insert("k", round) {
                            Ok(()) => {}
                            Err(Error::NodeRemoved(id)) => assert_eq!(id, child.id()),
                            Err(err) => panic!("unexpected error: {}", err),
                        }
                        handle.insert("k", round).unwrap();
                        assert!(handle.contains("k").unwrap());
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert!(handle.exists());
    }

    struct RecordingListener {
        added: Mutex<Vec<String>>,
        removed: AtomicUsize,
        /// set when an added child was not yet visible through its parent
        saw_unregistered_child: AtomicUsize,
        parent: Mutex<Option<VolumeNode>>,
    }

    impl RecordingListener {
        fn new() -> Arc<Self> {
            Arc::new(RecordingListener {
                added: Mutex::new(Vec::new()),
                removed: AtomicUsize::new(0),
                saw_unregistered_child: AtomicUsize::new(0),
                parent: Mutex::new(None),
            })
        }
    }

    impl NodeEvents for RecordingListener {
        fn on_node_added(&self, node: VolumeNode) {
            let name = node.name().unwrap();
            // add-before-notify: the child must already be queryable
            if let Some(parent) = self.parent.lock().unwrap().as_ref() {
                if parent.find_child(&name).unwrap().is_none() {
                    self.saw_unregistered_child.fetch_add(1, Ordering::SeqCst);
                }
            }
            self.added.lock().unwrap().push(name);
        }

        fn on_node_removed(&self, _node: VolumeNode) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_subscribers_hear_add_and_remove() {
        let node = VolumeNodeImpl::new("root", 0);
        let listener = RecordingListener::new();
        *listener.parent.lock().unwrap() = Some(node.proxy());

        let weak = Arc::downgrade(&listener);
        let subscriber: Weak<dyn NodeEvents> = weak;
        let cookie = node.register_subscriber(subscriber);
        assert_ne!(cookie, crate::volume::INVALID_COOKIE);

        node.insert_child("a");
        node.insert_child("b");
        node.remove_child("a");

        assert_eq!(*listener.added.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(listener.removed.load(Ordering::SeqCst), 1);
        assert_eq!(listener.saw_unregistered_child.load(Ordering::SeqCst), 0);

        node.unregister_subscriber(cookie);
        node.insert_child("c");
        assert_eq!(listener.added.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_insert_does_not_notify() {
        let node = VolumeNodeImpl::new("root", 0);
        let listener = RecordingListener::new();
        let weak = Arc::downgrade(&listener);
        let subscriber: Weak<dyn NodeEvents> = weak;
        node.register_subscriber(subscriber);

        node.insert_child("a");
        node.insert_child("a");

        assert_eq!(listener.added.lock().unwrap().len(), 1);
    }
}
