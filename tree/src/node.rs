use std::fmt;
use std::path::PathBuf;

/// Opaque per-node payload, consumed by the external job.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Every tree's root lives at index 0.
    pub const ROOT: NodeId = NodeId(0);
}

impl From<usize> for NodeId {
    fn from(u: usize) -> Self {
        Self(u as u32)
    }
}

impl From<NodeId> for usize {
    fn from(id: NodeId) -> usize {
        id.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One addressable unit of work in the scan tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique among siblings.
    pub name: String,
    /// Location relative to the tree root (empty for the root itself).
    pub path: PathBuf,
    /// None for the root.
    pub parent: Option<NodeId>,
    /// In insertion order.
    pub children: Vec<NodeId>,
    /// Distance from the root.
    pub depth: usize,
    pub parameters: Parameters,
}

impl Node {
    pub(crate) fn new(
        name: String,
        path: PathBuf,
        parent: Option<NodeId>,
        depth: usize,
        parameters: Parameters,
    ) -> Self {
        Self {
            name,
            path,
            parent,
            children: Vec::with_capacity(0),
            depth,
            parameters,
        }
    }
}
