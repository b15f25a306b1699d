use std::path::{Component, Path, PathBuf};

use util::IdVec;

use crate::{
    Ancestors, Descendants, Error, Generation, Node, NodeId, Parameters, LOG_FILE_KEY, MARKER_FILE,
};

/// A rooted, ordered tree of scan points.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    /// arena; the root is always at index 0
    nodes: IdVec<NodeId, Node>,
    /// absolute directory of the root node; all node paths are relative to it
    root_dir: PathBuf,
}

impl Tree {
    /// Create a tree containing only a root node.
    pub fn new<P: Into<PathBuf>>(root_dir: P, name: &str, parameters: Parameters) -> Self {
        let mut nodes = IdVec::with_capacity(64);
        nodes.push(Node::new(
            name.to_owned(),
            PathBuf::new(),
            None,
            0,
            parameters,
        ));
        Self {
            nodes,
            root_dir: root_dir.into(),
        }
    }

    /// Add a child named `name` to `parent`; its path is the parent's path plus its name.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
        parameters: Parameters,
    ) -> Result<NodeId, Error> {
        let path = self.node(parent).path.join(name);
        self.insert(parent, name, path, parameters)
    }

    /// Add a child with an explicit relative path, which must extend the parent's path.
    pub(crate) fn insert(
        &mut self,
        parent: NodeId,
        name: &str,
        path: PathBuf,
        parameters: Parameters,
    ) -> Result<NodeId, Error> {
        check_name(name)?;
        let parent_node = self.node(parent);
        if parent_node
            .children
            .iter()
            .any(|c| self.node(*c).name == name)
        {
            return Err(Error::DuplicateChild {
                parent: parent_node.name.clone(),
                name: name.to_owned(),
            });
        }
        if path == parent_node.path
            || !path.starts_with(&parent_node.path)
            || !is_relative_and_normal(&path)
        {
            return Err(Error::PathNotDerived {
                name: name.to_owned(),
                child: path,
                parent: parent_node.path.clone(),
            });
        }

        let depth = parent_node.depth + 1;
        let id = self.nodes.push(Node::new(
            name.to_owned(),
            path,
            Some(parent),
            depth,
            parameters,
        ));
        self.nodes.get_mut(parent).children.push(id);
        Ok(id)
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id)
    }

    /// Total number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn depth(&self, id: NodeId) -> usize {
        self.node(id).depth
    }

    /// Depth of the deepest node (0 for a lone root).
    pub fn height(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Every node at depth `depth`, in depth-first left-to-right order.
    /// Each call starts a fresh walk.
    pub fn generation(&self, depth: usize) -> Generation<'_> {
        Generation::new(self, self.root(), depth)
    }

    /// Pre-order walk of everything below `id`.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants::new(self, id)
    }

    /// From `id`'s parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors::new(self, id)
    }

    /// All nodes, in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter_ids()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Absolute working directory of `id`.
    pub fn abs_path(&self, id: NodeId) -> PathBuf {
        let node = self.node(id);
        if node.path.as_os_str().is_empty() {
            self.root_dir.clone()
        } else {
            self.root_dir.join(&node.path)
        }
    }

    /// Absolute path of `id`'s status marker.
    pub fn marker_path(&self, id: NodeId) -> PathBuf {
        let log_file = self
            .node(id)
            .parameters
            .get(LOG_FILE_KEY)
            .and_then(|v| v.as_str());
        match log_file {
            Some(f) if Path::new(f).is_absolute() => PathBuf::from(f),
            Some(f) => self.abs_path(id).join(f),
            None => self.abs_path(id).join(MARKER_FILE),
        }
    }

    /// Move the whole tree under a new root directory.
    /// Node paths are relative, so only the root changes.
    pub fn relocate<P: Into<PathBuf>>(&mut self, root_dir: P) {
        self.root_dir = root_dir.into();
        log::debug!("tree relocated to {:?}", self.root_dir);
    }

    /// Append `suffix` to the root directory, e.g. when a snapshot stored a
    /// prefix and the study lives in a subdirectory of it.
    pub fn add_suffix<P: AsRef<Path>>(&mut self, suffix: P) {
        let suffix = suffix.as_ref();
        let suffix = suffix.strip_prefix("/").unwrap_or(suffix);
        let root_dir = self.root_dir.join(suffix);
        self.relocate(root_dir);
    }

    /// Fail fast if the root directory doesn't exist, which means status queries
    /// would silently report every node as incomplete.
    pub fn check_location(&self) -> Result<(), Error> {
        if self.root_dir.is_dir() {
            Ok(())
        } else {
            Err(Error::RootNotFound(self.root_dir.clone()))
        }
    }

    // STATUS ///////////////////////

    /// Current persisted tags of `id`.
    pub fn tags(&self, id: NodeId) -> status::Tags {
        status::tags(&self.marker_path(id))
    }

    /// True if `id`'s marker carries `tag`. Reads the marker on every call.
    pub fn has_been(&self, id: NodeId, tag: &str) -> bool {
        status::has_been(&self.marker_path(id), tag)
    }

    pub fn has_not_been(&self, id: NodeId, tag: &str) -> bool {
        !self.has_been(id, tag)
    }

    /// Apply `tag` to `id` only. This does not cascade to descendants.
    pub fn tag_as(&self, id: NodeId, tag: &str) -> Result<(), status::Error> {
        status::tag_it(&self.marker_path(id), tag)
    }

    /// Delete the status marker of every node. Returns how many markers existed.
    pub fn clean_log(&self) -> Result<usize, status::Error> {
        let mut cleaned = 0;
        for (id, _) in self.iter() {
            if status::clean(&self.marker_path(id))? {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }
}

fn check_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        Err(Error::InvalidName(name.to_owned()))
    } else {
        Ok(())
    }
}

fn is_relative_and_normal(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}
