//! Priority-based mount resolution
//!
//! The mounter owns a virtual node's assistant list and implements the
//! union view over it: reads walk layers highest priority first, erases
//! hit every layer, inserts prefer a layer that already has the key.
//!
//! The list is validated lazily. A dead layer discovered mid-walk only
//! raises the invalidity marker; the actual prune happens at the start of
//! the next operation, never while the list is being iterated. The marker
//! distinguishes "mount removed" from "mount added" because only an added
//! mount can change relative order and require a re-sort.

use crate::error::{Error, Result};
use crate::overlay::assistant::MountAssistant;
use crate::overlay::node::VirtualNodeImpl;
use crate::value::Value;
use crate::volume::VolumeNode;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Why the assistant list needs re-validation; kept as the max of all
/// pending causes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum InvalidReason {
    Valid,
    MountRemoved,
    MountAdded,
}

struct MounterInner {
    assistants: Vec<Arc<MountAssistant>>,
    invalid: InvalidReason,
}

impl MounterInner {
    fn invalidate(&mut self, reason: InvalidReason) {
        if reason > self.invalid {
            self.invalid = reason;
        }
    }

    /// Prune dead assistants; re-sort only if a mount was added
    fn validate(&mut self) {
        if self.invalid == InvalidReason::Valid {
            return;
        }

        let before = self.assistants.len();
        self.assistants.retain(|assistant| assistant.has_alive_node());
        if before != self.assistants.len() {
            trace!("pruned {} dead mounts", before - self.assistants.len());
        }

        if self.invalid == InvalidReason::MountAdded {
            // stable: equal priorities keep mount order
            self.assistants
                .sort_by(|a, b| b.priority().cmp(&a.priority()));
        }

        self.invalid = InvalidReason::Valid;
    }
}

pub(crate) struct Mounter {
    owner: Weak<VirtualNodeImpl>,
    inner: RwLock<MounterInner>,
}

impl Mounter {
    pub(crate) fn new(owner: Weak<VirtualNodeImpl>) -> Self {
        Mounter {
            owner,
            inner: RwLock::new(MounterInner {
                assistants: Vec::new(),
                invalid: InvalidReason::Valid,
            }),
        }
    }

    /// Validate, then clone the assistant list so the walk itself runs
    /// without the lock
    fn validated_snapshot(&self) -> Vec<Arc<MountAssistant>> {
        let mut inner = self.inner.write();
        inner.validate();
        inner.assistants.clone()
    }

    /// Record that a layer died mid-walk; it is pruned on the next validate
    fn invalidate(&self, reason: InvalidReason) {
        self.inner.write().invalidate(reason);
    }

    // Mount management

    /// Attach a volume node. Returns `Ok(false)` if the identical node is
    /// already mounted here (the assistant count must not double).
    pub(crate) fn mount(&self, node: &VolumeNode) -> Result<bool> {
        let assistant = {
            let mut inner = self.inner.write();
            let duplicate = inner.assistants.iter().any(|existing| {
                !existing.is_unmounted()
                    && existing.node().exists()
                    && existing.target_id() == node.id()
            });
            if duplicate {
                debug!("volume node {} is already mounted", node.id());
                return Ok(false);
            }

            let assistant = MountAssistant::new(self.owner.clone(), node.clone());
            inner.assistants.push(assistant.clone());
            inner.invalidate(InvalidReason::MountAdded);
            assistant
        };

        // outside the lock: mounting recurses into child virtual nodes
        assistant.mount()?;
        Ok(true)
    }

    /// Detach a volume node; matching is by node id
    pub(crate) fn unmount(&self, node: &VolumeNode) -> bool {
        let target = node.id();
        self.unmount_matching(|assistant| {
            !assistant.is_unmounted() && assistant.target_id() == target
        })
    }

    /// Detach every mounted node whose handle matches the predicate
    pub(crate) fn unmount_if(&self, mut pred: impl FnMut(&VolumeNode) -> bool) -> bool {
        self.unmount_matching(|assistant| {
            !assistant.is_unmounted() && pred(&assistant.node())
        })
    }

    fn unmount_matching(&self, mut matches: impl FnMut(&Arc<MountAssistant>) -> bool) -> bool {
        // the predicate runs against a snapshot, without the lock, so it
        // may re-enter this node
        let matched: Vec<Arc<MountAssistant>> = self
            .validated_snapshot()
            .into_iter()
            .filter(|assistant| matches(assistant))
            .collect();
        if matched.is_empty() {
            return false;
        }

        let now_empty = {
            let mut inner = self.inner.write();
            inner
                .assistants
                .retain(|assistant| !matched.iter().any(|m| Arc::ptr_eq(m, assistant)));
            inner.invalidate(InvalidReason::MountRemoved);
            inner.assistants.is_empty()
        };

        for assistant in &matched {
            assistant.unmount();
        }

        if now_empty {
            if let Some(owner) = self.owner.upgrade() {
                owner.on_entirely_unmounted();
            }
        }
        true
    }

    /// Visit the handle of every mounted node
    pub(crate) fn for_each_mounted(&self, mut f: impl FnMut(VolumeNode)) {
        let snapshot = self.validated_snapshot();
        for assistant in snapshot {
            f(assistant.node());
        }
    }

    /// First mounted node matching the predicate
    pub(crate) fn find_mounted_if(
        &self,
        mut pred: impl FnMut(&VolumeNode) -> bool,
    ) -> Option<VolumeNode> {
        self.validated_snapshot()
            .into_iter()
            .map(|assistant| assistant.node())
            .find(|node| pred(node))
    }

    /// True when no mount is backed by a live node; used by the owner to
    /// decide whether a mount-created node can be pruned
    pub(crate) fn is_entirely_unmounted(&self) -> bool {
        let (all_dead, any_dead) = {
            let inner = self.inner.read();
            let any_alive = inner.assistants.iter().any(|a| a.has_alive_node());
            (!any_alive, !inner.assistants.is_empty() && !any_alive)
        };
        if any_dead {
            self.invalidate(InvalidReason::MountRemoved);
        }
        all_dead
    }

    // Union key-value resolution

    /// Update the key wherever it already lives (priority order), else
    /// insert into the highest-priority live layer
    pub(crate) fn insert(&self, key: &str, value: Value) -> Result<()> {
        let assistants = self.validated_snapshot();

        for assistant in &assistants {
            match assistant.node().replace(key, value.clone()) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(_) => self.invalidate(InvalidReason::MountRemoved),
            }
        }

        for assistant in &assistants {
            match assistant.node().insert(key, value.clone()) {
                Ok(()) => return Ok(()),
                Err(_) => self.invalidate(InvalidReason::MountRemoved),
            }
        }

        Err(Error::InsertInEmptyVirtualNode)
    }

    /// Insert only if no layer has the key; no layer is mutated otherwise
    pub(crate) fn try_insert(&self, key: &str, value: Value) -> Result<bool> {
        let assistants = self.validated_snapshot();

        for assistant in &assistants {
            match assistant.node().contains(key) {
                Ok(true) => return Ok(false),
                Ok(false) => {}
                Err(_) => self.invalidate(InvalidReason::MountRemoved),
            }
        }

        for assistant in &assistants {
            match assistant.node().try_insert(key, value.clone()) {
                Ok(inserted) => return Ok(inserted),
                Err(_) => self.invalidate(InvalidReason::MountRemoved),
            }
        }

        Err(Error::InsertInEmptyVirtualNode)
    }

    /// Overwrite in the first layer (priority order) that has the key
    pub(crate) fn replace(&self, key: &str, value: Value) -> bool {
        for assistant in self.validated_snapshot() {
            match assistant.node().replace(key, value.clone()) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(_) => self.invalidate(InvalidReason::MountRemoved),
            }
        }
        false
    }

    /// First match walking layers in priority order
    pub(crate) fn find(&self, key: &str) -> Option<Value> {
        for assistant in self.validated_snapshot() {
            match assistant.node().find(key) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(_) => self.invalidate(InvalidReason::MountRemoved),
            }
        }
        None
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        for assistant in self.validated_snapshot() {
            match assistant.node().contains(key) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(_) => self.invalidate(InvalidReason::MountRemoved),
            }
        }
        false
    }

    /// Erase from every layer. A key shadowed in a lower layer would
    /// resurface if only the top layer dropped it.
    pub(crate) fn erase(&self, key: &str) {
        for assistant in self.validated_snapshot() {
            if assistant.node().erase(key).is_err() {
                self.invalidate(InvalidReason::MountRemoved);
            }
        }
    }

    /// Enumerate the union: each key is visited once, from the highest-
    /// priority layer that defines it
    pub(crate) fn for_each_key_value(&self, mut f: impl FnMut(&str, &mut Value)) {
        let mut seen: HashSet<String> = HashSet::new();

        for assistant in self.validated_snapshot() {
            let walked = assistant.node().for_each_key_value(|key, value| {
                if seen.contains(key) {
                    return;
                }
                f(key, value);
                seen.insert(key.to_string());
            });
            if walked.is_err() {
                self.invalidate(InvalidReason::MountRemoved);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn assistant_count(&self) -> usize {
        self.inner.read().assistants.len()
    }
}
