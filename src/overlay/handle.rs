//! Safe handle to a virtual node
//!
//! Mirrors [`crate::volume::VolumeNode`]: forwards while the node is
//! alive, fails with `Error::NodeRemoved` once it has been removed, and
//! adds the mount management surface.

use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::overlay::node::VirtualNodeImpl;
use crate::value::Value;
use crate::volume::VolumeNode;
use std::fmt;
use std::sync::{Arc, Weak};

/// Externally held reference to a virtual node
#[derive(Clone)]
pub struct VirtualNode {
    target: Weak<VirtualNodeImpl>,
    id: NodeId,
}

impl VirtualNode {
    pub(crate) fn new(target: Weak<VirtualNodeImpl>, id: NodeId) -> Self {
        VirtualNode { target, id }
    }

    fn target(&self) -> Result<Arc<VirtualNodeImpl>> {
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

    // Key-value operations, resolved across the mounted volumes

    /// Upsert into the union view: updates the key in whichever layer
    /// already has it, else inserts into the highest-priority layer
    pub fn insert(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.target()?.insert(key, value.into())
    }

    /// Insert only if no mounted layer has the key
    pub fn try_insert(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        self.target()?.try_insert(key, value.into())
    }

    /// Overwrite in the first layer that has the key
    pub fn replace(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        Ok(self.target()?.replace(key, value.into()))
    }

    /// Erase from every mounted layer
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

    /// Enumerate the union view; each key is visited once, shadowed by
    /// the highest-priority layer that defines it
    pub fn for_each_key_value<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&str, &mut Value),
    {
        self.target()?.for_each_key_value(f);
        Ok(())
    }

    // Mount management

    /// Attach a volume node under this virtual node. Returns `Ok(false)`
    /// if that exact node is already mounted here.
    pub fn mount(&self, node: &VolumeNode) -> Result<bool> {
        self.target()?.mount(node)
    }

    /// Detach a volume node; returns whether anything was unmounted
    pub fn unmount(&self, node: &VolumeNode) -> Result<bool> {
        Ok(self.target()?.unmount(node))
    }

    /// Detach every mounted node matching the predicate
    pub fn unmount_if<F>(&self, pred: F) -> Result<bool>
    where
        F: FnMut(&VolumeNode) -> bool,
    {
        Ok(self.target()?.unmount_if(pred))
    }

    pub fn for_each_mounted<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(VolumeNode),
    {
        self.target()?.for_each_mounted(f);
        Ok(())
    }

    pub fn find_mounted_if<F>(&self, pred: F) -> Result<Option<VolumeNode>>
    where
        F: FnMut(&VolumeNode) -> bool,
    {
        Ok(self.target()?.find_mounted_if(pred))
    }

    // Child operations

    /// Create or fetch a permanent, user-created child
    pub fn insert_child(&self, name: &str) -> Result<VirtualNode> {
        Ok(self.target()?.insert_child(name))
    }

    pub fn remove_child(&self, name: &str) -> Result<()> {
        self.target()?.remove_child(name);
        Ok(())
    }

    pub fn remove_child_if<F>(&self, pred: F) -> Result<()>
    where
        F: FnMut(&VirtualNode) -> bool,
    {
        self.target()?.remove_child_if(pred);
        Ok(())
    }

    pub fn for_each_child<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(VirtualNode),
    {
        self.target()?.for_each_child(f);
        Ok(())
    }

    pub fn find_child(&self, name: &str) -> Result<Option<VirtualNode>> {
        Ok(self.target()?.find_child(name))
    }

    pub fn find_child_if<F>(&self, pred: F) -> Result<Option<VirtualNode>>
    where
        F: FnMut(&VirtualNode) -> bool,
    {
        Ok(self.target()?.find_child_if(pred))
    }
}

/// Handles compare by node identity
impl PartialEq for VirtualNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VirtualNode {}

impl fmt::Debug for VirtualNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualNode")
            .field("id", &self.id)
            .field("exists", &self.exists())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeNodeImpl;

    #[test]
    fn test_forwarding_through_the_union_view() {
        let root = VirtualNodeImpl::new_root("virt");
        let handle = root.proxy();
        let volume = VolumeNodeImpl::new("vol", 10);

        assert!(handle.mount(&volume.proxy()).unwrap());
        handle.insert("k", "value").unwrap();

        assert_eq!(handle.find("k").unwrap(), Some(Value::from("value")));
        assert!(handle.contains("k").unwrap());
        assert_eq!(handle.name().unwrap(), "virt");
    }

    #[test]
    fn test_dead_handle_reports_node_removed() {
        let root = VirtualNodeImpl::new_root("virt");
        let child = root.insert_child("child");
        let id = child.id();

        root.remove_child("child");

        assert!(!child.exists());
        assert_eq!(child.find("k"), Err(Error::NodeRemoved(id)));
        assert_eq!(child.insert_child("x").err(), Some(Error::NodeRemoved(id)));
    }

    #[test]
    fn test_empty_virtual_node_insert_error_passes_through() {
        let root = VirtualNodeImpl::new_root("virt");
        let handle = root.proxy();

        assert_eq!(
            handle.insert("k", 1i32),
            Err(Error::InsertInEmptyVirtualNode)
        );
    }
}
