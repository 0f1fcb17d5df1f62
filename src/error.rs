//! Error types for overlaykv
//!
//! Two failure modes exist in the store: an operation reached a node that
//! was concurrently removed from its hierarchy, or an insert had no mounted
//! volume to land in. Everything else is expressed through return values.

use crate::id::NodeId;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The node behind a handle no longer exists in its hierarchy.
    ///
    /// Recoverable: callers should stop using the handle. The overlay
    /// resolution code catches this to drop the offending mount and
    /// continue with the remaining layers.
    #[error("node {0} was removed from the hierarchy")]
    NodeRemoved(NodeId),

    /// Insert attempted on a virtual node with no live mounts.
    #[error("cannot insert: no volume nodes are mounted on the virtual node")]
    InsertInEmptyVirtualNode,
}

impl Error {
    /// Id of the removed node, if this is a removed-node error
    pub fn removed_node_id(&self) -> Option<NodeId> {
        match self {
            Error::NodeRemoved(id) => Some(*id),
            _ => None,
        }
    }
}
