//! Node identity
//!
//! Issues process-unique, monotonically increasing node identifiers.
//! Ids are assigned once at node construction and never reused, so they
//! double as a cheap "same underlying node" comparison between handles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque node identifier, unique for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Next id to hand out (0 is never issued)
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next unique node id
pub(crate) fn next_node_id() -> NodeId {
    NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::SeqCst))
}
