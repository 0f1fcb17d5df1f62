//! overlaykv - in-memory hierarchical key-value store with union-mount
//! overlays
//!
//! Independent, prioritized volumes (physical trees of named nodes holding
//! key-value dictionaries) can be mounted under nodes of a separate
//! virtual tree. A virtual node transparently aggregates everything
//! mounted beneath it, resolving lookups and child enumeration by
//! descending priority, the way a union filesystem resolves file
//! visibility across layered mounts.
//!
//! External callers hold safe handles ([`volume::VolumeNode`],
//! [`overlay::VirtualNode`]): a node removed from its tree turns every
//! handle into it into an explicit [`Error::NodeRemoved`] instead of a
//! dangling reference.

pub mod error;
pub mod id;
pub mod overlay;
pub mod storage;
pub mod value;
pub mod volume;

pub use error::{Error, Result};
pub use value::Value;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::NodeId;
    pub use crate::overlay::VirtualNode;
    pub use crate::storage::{Storage, Volume};
    pub use crate::value::Value;
    pub use crate::volume::{Cookie, NodeEvents, Priority, VolumeNode};
}
