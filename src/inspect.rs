use anyhow::Result;

use tree::{NodeId, Tree};

/// Tags of every descendant of the root, in pre-order.
/// With `pending_only`, only descendants that haven't been completed.
pub fn node_status(tree: &Tree, pending_only: bool) -> Result<Vec<(NodeId, status::Tags)>> {
    tree.check_location()?;
    Ok(tree
        .descendants(tree.root())
        .map(|id| (id, tree.tags(id)))
        .filter(|(_, tags)| !pending_only || !tags.contains_key(status::COMPLETED))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tree::Parameters;

    #[test]
    fn test_pending_only() -> Result<()> {
        let dir = tempdir()?;
        let mut tree = Tree::new(dir.path(), "root", Parameters::new());
        let a = tree.add_child(tree.root(), "a", Parameters::new())?;
        let b = tree.add_child(a, "b", Parameters::new())?;
        std::fs::create_dir_all(tree.abs_path(b))?;
        tree.tag_as(a, status::STARTED)?;
        tree.tag_as(a, status::COMPLETED)?;

        let all = node_status(&tree, false)?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].1.len(), 2);
        assert!(all[1].1.is_empty());

        let pending = node_status(&tree, true)?;
        assert_eq!(pending.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![b]);
        Ok(())
    }
}
