//! Safe handle to a volume node
//!
//! The handle holds a non-owning reference plus the node id captured at
//! construction. Every operation forwards to the implementation if it is
//! still alive and fails with `Error::NodeRemoved` otherwise; a handle can
//! outlive its node safely, it just stops working. Liveness can be probed
//! without paying for an error via [`VolumeNode::exists`].

use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::value::Value;
use crate::volume::node::{Priority, VolumeNodeImpl};
use crate::volume::{Cookie, NodeEvents};
use std::fmt;
use std::sync::{Arc, Weak};

/// Externally held reference to a volume node
#[derive(Clone)]
pub struct VolumeNode {
    target: Weak<VolumeNodeImpl>,
    id: NodeId,
}

impl VolumeNode {
    pub(crate) fn new(target: Weak<VolumeNodeImpl>, id: NodeId) -> Self {
        VolumeNode { target, id }
    }

    fn target(&self) -> Result<Arc<VolumeNodeImpl>> {
        self.target.upgrade().ok_or(Error::NodeRemoved(self.id))
    }

    /// Cheap, non-failing liveness probe
    pub fn exists(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Id of the referenced node; available even after removal
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.target()?.name().to_string())
    }

    pub fn priority(&self) -> Result<Priority> {
        Ok(self.target()?.priority())
    }

    // Dictionary operations

    /// Upsert a value
    pub fn insert(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.target()?.insert(key, value.into());
        Ok(())
    }

    /// Insert only if the key is absent; returns whether it inserted
    pub fn try_insert(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        Ok(self.target()?.try_insert(key, value.into()))
    }

    /// Overwrite only if the key is present; returns whether it did
    pub fn replace(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        Ok(self.target()?.replace(key, value.into()))
    }

    /// Remove a key; absent keys are not an error
    pub fn erase(&self, key: &str) -> Result<()> {
        self.target()?.erase(key);
        Ok(())
    }

    pub fn find(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.target()?.find(key))
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.target()?.contains(key))
    }

    /// Visit every (key, value) pair with a mutable value reference
    pub fn for_each_key_value<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&str, &mut Value),
    {
        self.target()?.for_each_key_value(f);
        Ok(())
    }

    // Child operations

    /// Create or fetch a child; duplicate names return the existing child
    pub fn insert_child(&self, name: &str) -> Result<VolumeNode> {
        Ok(self.target()?.insert_child(name))
    }

    /// Detach a child by name, orphaning its subtree
    pub fn remove_child(&self, name: &str) -> Result<()> {
        self.target()?.remove_child(name);
        Ok(())
    }

    /// Detach every child matching the predicate
    pub fn remove_child_if<F>(&self, pred: F) -> Result<()>
    where
        F: FnMut(&VolumeNode) -> bool,
    {
        self.target()?.remove_child_if(pred);
        Ok(())
    }

    pub fn for_each_child<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(VolumeNode),
    {
        self.target()?.for_each_child(f);
        Ok(())
    }

    pub fn find_child(&self, name: &str) -> Result<Option<VolumeNode>> {
        Ok(self.target()?.find_child(name))
    }

    pub fn find_child_if<F>(&self, pred: F) -> Result<Option<VolumeNode>>
    where
        F: FnMut(&VolumeNode) -> bool,
    {
        Ok(self.target()?.find_child_if(pred))
    }

    // Subscriptions

    /// Register a child-event listener; the registry keeps only a weak
    /// reference, so dropping the listener is enough to stop delivery
    pub fn register_subscriber(&self, subscriber: &Arc<dyn NodeEvents>) -> Result<Cookie> {
        Ok(self.target()?.register_subscriber(Arc::downgrade(subscriber)))
    }

    pub(crate) fn register_subscriber_weak(
        &self,
        subscriber: Weak<dyn NodeEvents>,
    ) -> Result<Cookie> {
        Ok(self.target()?.register_subscriber(subscriber))
    }

    pub fn unregister_subscriber(&self, cookie: Cookie) -> Result<()> {
        self.target()?.unregister_subscriber(cookie);
        Ok(())
    }
}

/// Handles compare by node identity
impl PartialEq for VolumeNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VolumeNode {}

impl fmt::Debug for VolumeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeNode")
            .field("id", &self.id)
            .field("exists", &self.exists())
            .finish()
    }
}
