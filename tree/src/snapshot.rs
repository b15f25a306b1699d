use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, NodeId, Parameters, Tree};

/// On-disk form of one node and its subtree.
/// The root's `path` is the absolute root directory; every other `path` is relative.
#[derive(Debug, Serialize, Deserialize)]
struct NodeDoc {
    name: String,
    path: PathBuf,
    #[serde(default)]
    parameters: Parameters,
    #[serde(default)]
    children: ChildDocs,
}

/// Children serialized as a `{name: node}` object, keeping insertion order.
#[derive(Debug, Default)]
struct ChildDocs(Vec<NodeDoc>);

impl Serialize for ChildDocs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for doc in &self.0 {
            map.serialize_entry(&doc.name, doc)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChildDocs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChildDocsVisitor;

        impl<'de> Visitor<'de> for ChildDocsVisitor {
            type Value = ChildDocs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping child names to nodes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ChildDocs, A::Error> {
                let mut docs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, doc)) = access.next_entry::<String, NodeDoc>()? {
                    if key != doc.name {
                        return Err(serde::de::Error::custom(Error::KeyMismatch {
                            key,
                            name: doc.name,
                        }));
                    }
                    docs.push(doc);
                }
                Ok(ChildDocs(docs))
            }
        }

        deserializer.deserialize_map(ChildDocsVisitor)
    }
}

impl Tree {
    /// Serialize the whole tree to a single json document.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let mut doc = self.to_doc(self.root());
        doc.path = self.root_dir().to_path_buf();
        serde_json::to_string_pretty(&doc)
    }

    /// Deserialize a tree from a json document produced by [`Tree::to_json_string`].
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let doc: NodeDoc = serde_json::from_str(text)?;
        Self::from_doc(doc).map_err(serde::de::Error::custom)
    }

    /// Write the snapshot to `path`.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        let text = self
            .to_json_string()
            .map_err(|e| Error::Json(path.to_owned(), e))?;
        fs::write(path, text).map_err(|e| Error::Io(path.to_owned(), e))?;
        log::info!("wrote tree snapshot to {path:?}");
        Ok(())
    }

    /// Load a snapshot from `path`.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::Io(path.to_owned(), e))?;
        let tree = Self::from_json_str(&text).map_err(|e| Error::Json(path.to_owned(), e))?;
        log::info!("loaded tree with {} nodes from {path:?}", tree.len());
        Ok(tree)
    }

    fn to_doc(&self, id: NodeId) -> NodeDoc {
        let node = self.node(id);
        NodeDoc {
            name: node.name.clone(),
            path: node.path.clone(),
            parameters: node.parameters.clone(),
            children: ChildDocs(node.children.iter().map(|c| self.to_doc(*c)).collect()),
        }
    }

    fn from_doc(root: NodeDoc) -> Result<Self, Error> {
        let mut tree = Tree::new(root.path, &root.name, root.parameters);
        let mut stack: Vec<(NodeId, NodeDoc)> = Vec::with_capacity(16);
        let root_id = tree.root();
        for child in root.children.0.into_iter().rev() {
            stack.push((root_id, child));
        }
        // depth-first, first child first, so arena order matches a fresh build:
        while let Some((parent, doc)) = stack.pop() {
            let id = tree.insert(parent, &doc.name, doc.path, doc.parameters)?;
            for child in doc.children.0.into_iter().rev() {
                stack.push((id, child));
            }
        }
        Ok(tree)
    }
}
