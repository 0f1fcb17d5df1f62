//! Root holders
//!
//! [`Volume`] owns a physical tree's root, [`Storage`] a virtual tree's.
//! Both expose only safe handles; freeing the root drops the owning
//! reference, which orphans the whole tree and invalidates every handle
//! into it. A single mutex serializes create/free/get against each other.

use crate::overlay::{VirtualNode, VirtualNodeImpl};
use crate::volume::{Priority, VolumeNode, VolumeNodeImpl};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// An independently owned physical tree with a fixed priority
pub struct Volume {
    name: String,
    priority: Priority,
    root: Mutex<Option<Arc<VolumeNodeImpl>>>,
}

impl Volume {
    /// Create a volume and its root node
    pub fn new(name: &str, root_name: &str, priority: Priority) -> Self {
        Volume {
            name: name.to_string(),
            priority,
            root: Mutex::new(Some(VolumeNodeImpl::new(root_name, priority))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Handle to the current root, if one exists
    pub fn root(&self) -> Option<VolumeNode> {
        self.root.lock().as_ref().map(|root| root.proxy())
    }

    /// Replace the root with a fresh node, freeing any previous one
    pub fn create_root(&self, root_name: &str) {
        let mut root = self.root.lock();
        if root.is_some() {
            debug!("volume {}: freeing previous root", self.name);
        }
        *root = Some(VolumeNodeImpl::new(root_name, self.priority));
    }

    /// Drop the root; every handle into the tree goes dead
    pub fn free_root(&self) {
        self.root.lock().take();
    }
}

/// A virtual tree: an overlay with no data of its own
pub struct Storage {
    name: String,
    root: Mutex<Option<Arc<VirtualNodeImpl>>>,
}

impl Storage {
    /// Create a storage and its virtual root node
    pub fn new(name: &str, root_name: &str) -> Self {
        Storage {
            name: name.to_string(),
            root: Mutex::new(Some(VirtualNodeImpl::new_root(root_name))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle to the current root, if one exists
    pub fn root(&self) -> Option<VirtualNode> {
        self.root.lock().as_ref().map(|root| root.proxy())
    }

    /// Replace the root with a fresh node, freeing any previous one
    pub fn create_root(&self, root_name: &str) {
        let mut root = self.root.lock();
        if root.is_some() {
            debug!("storage {}: freeing previous root", self.name);
        }
        *root = Some(VirtualNodeImpl::new_root(root_name));
    }

    /// Drop the root; every handle into the tree goes dead
    pub fn free_root(&self) {
        self.root.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::value::Value;
    use std::sync::Once;
    use tracing_subscriber::{fmt, EnvFilter};

    static TRACING: Once = Once::new();

    /// Route crate tracing through a test-capture subscriber; filter via
    /// RUST_LOG as usual
    fn init_tracing() {
        TRACING.call_once(|| {
            let subscriber = fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_test_writer()
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        });
    }

    #[test]
    fn test_volume_root() {
        let volume = Volume::new("Volume", "Root", 5);
        let root = volume.root().unwrap();

        assert_eq!(volume.name(), "Volume");
        assert_eq!(root.name().unwrap(), "Root");
        assert_eq!(root.priority().unwrap(), 5);
    }

    #[test]
    fn test_free_root_invalidates_handles() {
        let volume = Volume::new("Volume", "Root", 0);
        let root = volume.root().unwrap();
        let child = root.insert_child("child").unwrap();

        volume.free_root();

        assert!(volume.root().is_none());
        assert!(!root.exists());
        assert!(!child.exists());
        assert!(matches!(child.find("k"), Err(Error::NodeRemoved(_))));
    }

    #[test]
    fn test_create_root_replaces_previous() {
        let volume = Volume::new("Volume", "Old", 0);
        let old_root = volume.root().unwrap();

        volume.create_root("New");

        assert!(!old_root.exists());
        assert_eq!(volume.root().unwrap().name().unwrap(), "New");
    }

    #[test]
    fn test_storage_root() {
        let storage = Storage::new("Virtual Storage", "Virtual Root");
        let root = storage.root().unwrap();

        assert_eq!(storage.name(), "Virtual Storage");
        assert_eq!(root.name().unwrap(), "Virtual Root");
    }

    // Two volumes, overlapping children and keys, merged under one
    // virtual root.
    #[test]
    fn test_two_volume_overlay_scenario() {
        init_tracing();
        let storage = Storage::new("store", "root");
        let virt_root = storage.root().unwrap();

        let volume_a = Volume::new("A", "root", 200);
        let root_a = volume_a.root().unwrap();
        let child_a = root_a.insert_child("child").unwrap();
        child_a.insert("1", "x").unwrap();

        let volume_b = Volume::new("B", "root", 100);
        let root_b = volume_b.root().unwrap();
        let child_b = root_b.insert_child("child").unwrap();
        child_b.insert("1", "y").unwrap();
        child_b.insert("2", "z").unwrap();

        virt_root.mount(&root_a).unwrap();
        virt_root.mount(&root_b).unwrap();

        let merged = virt_root.find_child("child").unwrap().unwrap();
        assert_eq!(merged.find("1").unwrap(), Some(Value::from("x")));
        assert_eq!(merged.find("2").unwrap(), Some(Value::from("z")));

        // erase reaches the shadowed layer too; "y" must not resurface
        merged.erase("1").unwrap();
        assert_eq!(merged.find("1").unwrap(), None);
        assert!(!child_a.contains("1").unwrap());
        assert!(!child_b.contains("1").unwrap());
        assert_eq!(merged.find("2").unwrap(), Some(Value::from("z")));
    }

    #[test]
    fn test_freed_volume_drops_out_of_overlay() {
        init_tracing();
        let storage = Storage::new("store", "root");
        let virt_root = storage.root().unwrap();

        let volume_a = Volume::new("A", "root", 200);
        let volume_b = Volume::new("B", "root", 100);
        volume_a.root().unwrap().insert("k", "a").unwrap();
        volume_b.root().unwrap().insert("k", "b").unwrap();

        virt_root.mount(&volume_a.root().unwrap()).unwrap();
        virt_root.mount(&volume_b.root().unwrap()).unwrap();
        assert_eq!(virt_root.find("k").unwrap(), Some(Value::from("a")));

        volume_a.free_root();

        // the dead layer is skipped, then pruned on the next validate
        assert_eq!(virt_root.find("k").unwrap(), Some(Value::from("b")));
    }
}
