//! Virtual node implementation
//!
//! A virtual node owns children and a mounter, nothing else: every
//! key-value operation resolves through the mounter. Children come in two
//! kinds. User-created children are permanent. Mount-created children are
//! auto-generated mirrors of mounted volume children, and are garbage
//! collected during traversal once no live mount backs them.

use crate::error::Result;
use crate::id::{next_node_id, NodeId};
use crate::overlay::mounter::Mounter;
use crate::overlay::VirtualNode;
use crate::value::Value;
use crate::volume::VolumeNode;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    /// Explicitly inserted by a caller; never pruned
    User,
    /// Auto-generated to receive a mounted volume's child; pruned when
    /// entirely unmounted
    ForMounting,
}

pub(crate) struct VirtualNodeImpl {
    name: String,
    id: NodeId,
    kind: NodeKind,
    parent: Weak<VirtualNodeImpl>,
    children: RwLock<HashMap<String, Arc<VirtualNodeImpl>>>,
    mounter: Mounter,
    /// Back-reference to our own Arc, for minting handles and parent links
    weak_self: Weak<VirtualNodeImpl>,
}

impl VirtualNodeImpl {
    pub(crate) fn new_root(name: &str) -> Arc<Self> {
        Self::new(name, NodeKind::User, Weak::new())
    }

    fn new(name: &str, kind: NodeKind, parent: Weak<VirtualNodeImpl>) -> Arc<Self> {
        Arc::new_cyclic(|weak| VirtualNodeImpl {
            name: name.to_string(),
            id: next_node_id(),
            kind,
            parent,
            children: RwLock::new(HashMap::new()),
            mounter: Mounter::new(weak.clone()),
            weak_self: weak.clone(),
        })
    }

    /// Build a safe handle to this node
    pub(crate) fn proxy(&self) -> VirtualNode {
        VirtualNode::new(self.weak_self.clone(), self.id)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn mounter(&self) -> &Mounter {
        &self.mounter
    }

    // Key-value operations, all resolved by the mounter

    pub(crate) fn insert(&self, key: &str, value: Value) -> Result<()> {
        self.mounter.insert(key, value)
    }

    pub(crate) fn try_insert(&self, key: &str, value: Value) -> Result<bool> {
        self.mounter.try_insert(key, value)
    }

    pub(crate) fn replace(&self, key: &str, value: Value) -> bool {
        self.mounter.replace(key, value)
    }

    pub(crate) fn erase(&self, key: &str) {
        self.mounter.erase(key)
    }

    pub(crate) fn find(&self, key: &str) -> Option<Value> {
        self.mounter.find(key)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.mounter.contains(key)
    }

    pub(crate) fn for_each_key_value(&self, f: impl FnMut(&str, &mut Value)) {
        self.mounter.for_each_key_value(f)
    }

    // Mount operations

    pub(crate) fn mount(&self, node: &VolumeNode) -> Result<bool> {
        self.mounter.mount(node)
    }

    pub(crate) fn unmount(&self, node: &VolumeNode) -> bool {
        self.mounter.unmount(node)
    }

    pub(crate) fn unmount_if(&self, pred: impl FnMut(&VolumeNode) -> bool) -> bool {
        self.mounter.unmount_if(pred)
    }

    pub(crate) fn for_each_mounted(&self, f: impl FnMut(VolumeNode)) {
        self.mounter.for_each_mounted(f)
    }

    pub(crate) fn find_mounted_if(
        &self,
        pred: impl FnMut(&VolumeNode) -> bool,
    ) -> Option<VolumeNode> {
        self.mounter.find_mounted_if(pred)
    }

    /// Called by the mounter when its assistant list empties: a
    /// mount-created node with no mounts removes itself from its parent
    pub(crate) fn on_entirely_unmounted(&self) {
        if self.kind != NodeKind::ForMounting {
            return;
        }
        if let Some(parent) = self.parent.upgrade() {
            trace!("virtual node {} ({}) lost its last mount", self.name, self.id);
            parent.remove_child(&self.name);
        }
    }

    // Child operations

    /// Create or fetch a user child; duplicate names return the existing
    /// child (find-then-insert, so concurrent duplicate inserts race
    /// safely and skip the allocation)
    pub(crate) fn insert_child(&self, name: &str) -> VirtualNode {
        self.insert_node(name, NodeKind::User).proxy()
    }

    /// Create or fetch a mount-created child; only mount assistants call
    /// this
    pub(crate) fn insert_child_for_mounting(&self, name: &str) -> Arc<VirtualNodeImpl> {
        self.insert_node(name, NodeKind::ForMounting)
    }

    fn insert_node(&self, name: &str, kind: NodeKind) -> Arc<VirtualNodeImpl> {
        let mut children = self.children.write();
        if let Some(existing) = children.get(name) {
            return existing.clone();
        }
        let node = Self::new(name, kind, self.weak_self.clone());
        children.insert(name.to_string(), node.clone());
        node
    }

    pub(crate) fn remove_child(&self, name: &str) {
        self.children.write().remove(name);
        // the owning Arc drops; handles into the subtree go dead
    }

    /// Detach every child matching the predicate; entirely unmounted
    /// mount-created children encountered on the way are pruned as well
    pub(crate) fn remove_child_if(&self, mut pred: impl FnMut(&VirtualNode) -> bool) {
        let doomed: Vec<Arc<VirtualNodeImpl>> = self
            .live_children()
            .into_iter()
            .filter(|child| pred(&child.proxy()))
            .collect();
        if doomed.is_empty() {
            return;
        }

        let mut children = self.children.write();
        for child in &doomed {
            // re-check identity: the name may have been re-created by a
            // concurrent insert since the snapshot
            if children
                .get(&child.name)
                .is_some_and(|current| Arc::ptr_eq(current, child))
            {
                children.remove(&child.name);
            }
        }
    }

    /// Visit each live child; iterates a snapshot, callbacks run without
    /// the children lock
    pub(crate) fn for_each_child(&self, mut f: impl FnMut(VirtualNode)) {
        for child in self.live_children() {
            f(child.proxy());
        }
    }

    pub(crate) fn find_child(&self, name: &str) -> Option<VirtualNode> {
        let child = self.children.read().get(name).cloned()?;
        if self.prune_if_entirely_unmounted(&child) {
            return None;
        }
        Some(child.proxy())
    }

    pub(crate) fn find_child_if(
        &self,
        mut pred: impl FnMut(&VirtualNode) -> bool,
    ) -> Option<VirtualNode> {
        self.live_children()
            .into_iter()
            .map(|child| child.proxy())
            .find(|proxy| pred(proxy))
    }

    /// Snapshot the children, stripping entirely unmounted mount-created
    /// nodes as they are encountered
    fn live_children(&self) -> Vec<Arc<VirtualNodeImpl>> {
        let snapshot: Vec<Arc<VirtualNodeImpl>> =
            self.children.read().values().cloned().collect();
        snapshot
            .into_iter()
            .filter(|child| !self.prune_if_entirely_unmounted(child))
            .collect()
    }

    /// Incidental garbage collection during traversal. Returns true if the
    /// child was (or is being) pruned.
    fn prune_if_entirely_unmounted(&self, child: &Arc<VirtualNodeImpl>) -> bool {
        if child.kind != NodeKind::ForMounting {
            return false;
        }
        if !child.mounter.is_entirely_unmounted() {
            return false;
        }

        let mut children = self.children.write();
        if children
            .get(&child.name)
            .is_some_and(|current| Arc::ptr_eq(current, child))
        {
            trace!("pruning entirely unmounted child {} ({})", child.name, child.id);
            children.remove(&child.name);
        }
        true
    }
}
