//! Virtual overlay tree
//!
//! Virtual nodes hold no data of their own: key-value operations resolve
//! across the volume nodes mounted beneath them, highest priority first,
//! the way a union filesystem resolves file visibility across layered
//! mounts. Structural changes inside a mounted volume are mirrored into
//! the virtual tree live, via the volume's change notifications.

mod assistant;
mod handle;
mod mounter;
mod node;

pub use handle::VirtualNode;

pub(crate) use node::VirtualNodeImpl;
