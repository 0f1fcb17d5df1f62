//! Physical volume tree
//!
//! A volume is an independently owned tree of named nodes, each holding a
//! key-value dictionary and a fixed priority. Volume nodes notify
//! subscribers when children are added or removed, which is how the
//! overlay layer keeps its mirrored virtual children in sync.

mod events;
mod handle;
mod node;

pub use events::{Cookie, NodeEvents, INVALID_COOKIE};
pub use handle::VolumeNode;
pub use node::Priority;

pub(crate) use node::VolumeNodeImpl;
