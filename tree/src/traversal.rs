use crate::{NodeId, Tree};

/// All nodes at exactly one depth, in depth-first left-to-right order.
///
/// The walk never descends below the target depth, so asking for an early
/// generation of a large tree doesn't visit its leaves.
pub struct Generation<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
    depth: usize,
}

impl<'a> Generation<'a> {
    pub(crate) fn new(tree: &'a Tree, start: NodeId, depth: usize) -> Self {
        let mut stack = Vec::with_capacity(16);
        stack.push(start);
        Self { tree, stack, depth }
    }
}

impl Iterator for Generation<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            let node = self.tree.node(id);
            if node.depth == self.depth {
                return Some(id);
            } else if node.depth < self.depth {
                // reversed so that the first child is popped first:
                self.stack.extend(node.children.iter().rev());
            }
        }
        None
    }
}

/// Pre-order walk of everything below a node, excluding the node itself.
pub struct Descendants<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
}

impl<'a> Descendants<'a> {
    pub(crate) fn new(tree: &'a Tree, start: NodeId) -> Self {
        let mut stack = Vec::with_capacity(16);
        stack.extend(tree.node(start).children.iter().rev());
        Self { tree, stack }
    }
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack.extend(self.tree.node(id).children.iter().rev());
        Some(id)
    }
}

/// Walk from a node's parent up to the root.
pub struct Ancestors<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

impl<'a> Ancestors<'a> {
    pub(crate) fn new(tree: &'a Tree, start: NodeId) -> Self {
        Self {
            tree,
            next: tree.node(start).parent,
        }
    }
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.tree.node(id).parent;
        Some(id)
    }
}
