//!
//! The job tree: every scan point is a [`Node`] stored in an arena owned by a [`Tree`].
//! Parent and child links are [`NodeId`]s rather than references, so the tree can be
//! serialized and relocated as plain data.
//!
//! Node paths are relative to the tree's root directory; only the root directory is
//! absolute. Moving a study on disk therefore only requires [`Tree::relocate`].
//!
//! Status is never cached here: [`Tree::has_been`] and friends read the node's
//! marker file every time, since jobs update their markers out-of-process.

use std::path::PathBuf;

/// a single scan point
mod node;
pub use node::{Node, NodeId, Parameters};

/// the arena and everything you can ask it
mod tree;
pub use tree::Tree;

/// lazy, deterministic walks over the arena
mod traversal;
pub use traversal::{Ancestors, Descendants, Generation};

/// one-document json snapshot of a whole tree
mod snapshot;

/// Reserved parameter naming a node's status marker.
pub const LOG_FILE_KEY: &str = "log_file";
/// Marker file name used when a node doesn't set `log_file`.
pub const MARKER_FILE: &str = "status.json";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid node name \"{0}\" (must be non-empty, without '/', and not '.' or '..')")]
    InvalidName(String),
    #[error("Node \"{parent}\" already has a child named \"{name}\"")]
    DuplicateChild { parent: String, name: String },
    #[error("Path {child:?} of node \"{name}\" does not extend its parent's path {parent:?}")]
    PathNotDerived {
        name: String,
        child: PathBuf,
        parent: PathBuf,
    },
    #[error("Snapshot lists child under key \"{key}\" but its name is \"{name}\"")]
    KeyMismatch { key: String, name: String },
    #[error(
        "Tree root {0:?} does not exist; if the study was moved, relocate the tree \
        to its new directory before querying status"
    )]
    RootNotFound(PathBuf),
    #[error("Unable to read or write tree snapshot {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Invalid tree snapshot {0:?}")]
    Json(PathBuf, #[source] serde_json::Error),
}
