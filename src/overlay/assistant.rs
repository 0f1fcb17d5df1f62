//! Per-mount bookkeeping
//!
//! One `MountAssistant` exists for every (virtual node, mounted volume
//! node) pair. It subscribes to the volume node's child events and keeps
//! the owner's mount-created virtual children in step with the volume's
//! children, recording each mirrored pair for symmetric teardown.

use crate::error::Result;
use crate::id::NodeId;
use crate::overlay::node::VirtualNodeImpl;
use crate::volume::{NodeEvents, Priority, VolumeNode, INVALID_COOKIE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MountPhase {
    /// Created but `mount()` has not completed
    Pending,
    Mounted,
    Unmounted,
}

/// A (virtual child, volume child) pair this assistant auto-mounted
struct MirroredPair {
    virtual_child: Arc<VirtualNodeImpl>,
    volume_child: VolumeNode,
}

struct AssistantState {
    phase: MountPhase,
    cookie: crate::volume::Cookie,
    /// Keyed by the volume child's id so mirroring is idempotent per child
    mirrored: HashMap<NodeId, MirroredPair>,
}

pub(crate) struct MountAssistant {
    owner: Weak<VirtualNodeImpl>,
    volume: VolumeNode,
    state: Mutex<AssistantState>,
}

impl MountAssistant {
    pub(crate) fn new(owner: Weak<VirtualNodeImpl>, volume: VolumeNode) -> Arc<Self> {
        Arc::new(MountAssistant {
            owner,
            volume,
            state: Mutex::new(AssistantState {
                phase: MountPhase::Pending,
                cookie: INVALID_COOKIE,
                mirrored: HashMap::new(),
            }),
        })
    }

    /// Handle to the mounted volume node
    pub(crate) fn node(&self) -> VolumeNode {
        self.volume.clone()
    }

    /// Id of the mounted node; usable even when the node is gone
    pub(crate) fn target_id(&self) -> NodeId {
        self.volume.id()
    }

    /// Non-failing: false when never mounted, explicitly unmounted, or the
    /// target node is gone
    pub(crate) fn has_alive_node(&self) -> bool {
        self.state.lock().phase == MountPhase::Mounted && self.volume.exists()
    }

    pub(crate) fn is_unmounted(&self) -> bool {
        self.state.lock().phase == MountPhase::Unmounted
    }

    /// Priority of the mounted node; a dead mount sorts last
    pub(crate) fn priority(&self) -> Priority {
        self.volume.priority().unwrap_or(Priority::MIN)
    }

    /// Subscribe to the volume node, then mirror its existing children.
    ///
    /// Subscription comes first: a child added while the enumeration pass
    /// runs arrives through the callback, and the id-keyed mirrored map
    /// makes the overlap a no-op.
    pub(crate) fn mount(self: &Arc<Self>) -> Result<()> {
        let weak = Arc::downgrade(self);
        let subscriber: Weak<dyn NodeEvents> = weak;
        let cookie = self.volume.register_subscriber_weak(subscriber)?;
        {
            let mut state = self.state.lock();
            state.phase = MountPhase::Mounted;
            state.cookie = cookie;
        }
        debug!("mounted volume node {}", self.volume.id());

        self.volume.for_each_child(|child| self.mount_child(child))?;
        Ok(())
    }

    /// Unsubscribe and tear down every mirrored pair.
    ///
    /// Tolerates the volume node already being gone; the goal state is
    /// "not mounted" either way.
    pub(crate) fn unmount(&self) {
        let (cookie, pairs) = {
            let mut state = self.state.lock();
            if state.phase != MountPhase::Mounted {
                return;
            }
            state.phase = MountPhase::Unmounted;
            let cookie = std::mem::replace(&mut state.cookie, INVALID_COOKIE);
            (cookie, std::mem::take(&mut state.mirrored))
        };

        if cookie != INVALID_COOKIE {
            // NodeRemoved here means the whole subscription died with the
            // node; nothing left to unregister
            let _ = self.volume.unregister_subscriber(cookie);
        }

        for pair in pairs.into_values() {
            pair.virtual_child.unmount(&pair.volume_child);
        }
        debug!("unmounted volume node {}", self.volume.id());
    }

    /// Mirror one volume child into the owner's virtual children
    fn mount_child(&self, volume_child: VolumeNode) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let name = match volume_child.name() {
            Ok(name) => name,
            // the child died before we could mirror it
            Err(_) => return,
        };

        let mut state = self.state.lock();
        if state.phase != MountPhase::Mounted {
            return;
        }
        if state.mirrored.contains_key(&volume_child.id()) {
            return;
        }

        let virtual_child = owner.insert_child_for_mounting(&name);
        match virtual_child.mount(&volume_child) {
            Ok(_) => {
                trace!("mirrored child {} ({})", name, volume_child.id());
                state.mirrored.insert(
                    volume_child.id(),
                    MirroredPair {
                        virtual_child,
                        volume_child,
                    },
                );
            }
            Err(err) => {
                trace!("skipped mirroring child {}: {}", name, err);
            }
        }
    }
}

impl NodeEvents for MountAssistant {
    fn on_node_added(&self, node: VolumeNode) {
        self.mount_child(node);
    }

    fn on_node_removed(&self, node: VolumeNode) {
        let pair = self.state.lock().mirrored.remove(&node.id());
        if let Some(pair) = pair {
            trace!("dropping mirror of removed child {}", node.id());
            pair.virtual_child.unmount(&pair.volume_child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeNodeImpl;

    #[test]
    fn test_fresh_assistant_is_not_alive() {
        let owner = VirtualNodeImpl::new_root("virt");
        let volume = VolumeNodeImpl::new("vol", 10);
        let assistant = MountAssistant::new(Arc::downgrade(&owner), volume.proxy());

        assert!(!assistant.has_alive_node());
        assert!(!assistant.is_unmounted());
    }

    #[test]
    fn test_mount_mirrors_existing_children() {
        let owner = VirtualNodeImpl::new_root("virt");
        let volume = VolumeNodeImpl::new("vol", 10);
        volume.insert_child("a");
        volume.insert_child("b");

        let assistant = MountAssistant::new(Arc::downgrade(&owner), volume.proxy());
        assistant.mount().unwrap();

        assert!(assistant.has_alive_node());
        assert!(owner.find_child("a").is_some());
        assert!(owner.find_child("b").is_some());
    }

    #[test]
    fn test_added_child_is_mirrored_live() {
        let owner = VirtualNodeImpl::new_root("virt");
        let volume = VolumeNodeImpl::new("vol", 10);

        let assistant = MountAssistant::new(Arc::downgrade(&owner), volume.proxy());
        assistant.mount().unwrap();
        assert!(owner.find_child("late").is_none());

        volume.insert_child("late");
        assert!(owner.find_child("late").is_some());
    }

    #[test]
    fn test_removed_child_mirror_is_dropped() {
        let owner = VirtualNodeImpl::new_root("virt");
        let volume = VolumeNodeImpl::new("vol", 10);
        volume.insert_child("a");

        let assistant = MountAssistant::new(Arc::downgrade(&owner), volume.proxy());
        assistant.mount().unwrap();
        assert!(owner.find_child("a").is_some());

        volume.remove_child("a");
        // the mirror lost its only mount and is pruned on traversal
        assert!(owner.find_child("a").is_none());
    }

    #[test]
    fn test_unmount_clears_state() {
        let owner = VirtualNodeImpl::new_root("virt");
        let volume = VolumeNodeImpl::new("vol", 10);
        volume.insert_child("a");

        let assistant = MountAssistant::new(Arc::downgrade(&owner), volume.proxy());
        assistant.mount().unwrap();
        assistant.unmount();

        assert!(!assistant.has_alive_node());
        assert!(assistant.is_unmounted());
        assert!(owner.find_child("a").is_none());
    }

    #[test]
    fn test_dead_mount_sorts_last() {
        let owner = VirtualNodeImpl::new_root("virt");
        let volume = VolumeNodeImpl::new("vol", 10);
        let assistant = MountAssistant::new(Arc::downgrade(&owner), volume.proxy());
        assistant.mount().unwrap();

        assert_eq!(assistant.priority(), 10);
        drop(volume);
        assert_eq!(assistant.priority(), Priority::MIN);
        assert!(!assistant.has_alive_node());
    }
}
