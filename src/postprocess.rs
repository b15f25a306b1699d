use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use tree::{NodeId, Parameters, Tree};

use crate::fs::Fs;
use crate::study::{self, GENERATIONS_KEY, SETUP_ENV_KEY};

/// One node of the postprocessed generation.
#[derive(Debug, Serialize)]
pub struct Row {
    pub name: String,
    pub path: PathBuf,
    pub parent_name: Option<String>,
    pub parent_path: Option<PathBuf>,
    /// Parameters of the node and all its ancestors; nearer ones win.
    pub parameters: Parameters,
    pub tags: status::Tags,
    /// Declared output -> whether it exists in the node dir.
    pub outputs: BTreeMap<String, bool>,
}

impl Row {
    pub fn is_problematic(&self) -> bool {
        self.outputs.values().any(|present| !present)
    }
}

/// Everything collected from one generation.
#[derive(Debug, Serialize)]
pub struct Summary {
    pub generation: usize,
    pub rows: Vec<Row>,
    /// Node dirs missing at least one declared output.
    pub problematic: Vec<PathBuf>,
}

/// Collect a [`Summary`] of generation `generation` (the deepest by default).
/// Returns None if the root isn't completed yet, unless `force`.
pub fn summarize(tree: &Tree, generation: Option<usize>, force: bool) -> Result<Option<Summary>> {
    tree.check_location()?;
    if !force && tree.has_not_been(tree.root(), status::COMPLETED) {
        return Ok(None);
    }
    let generation = generation.unwrap_or_else(|| tree.height());
    let outputs = if generation == 0 {
        Vec::new()
    } else {
        study::generation_config(tree, generation)?.outputs
    };

    let mut rows = Vec::with_capacity(64);
    let mut problematic = Vec::new();
    for id in tree.generation(generation) {
        let row = row(tree, id, &outputs);
        if row.is_problematic() {
            problematic.push(tree.abs_path(id));
        }
        rows.push(row);
    }
    log::info!(
        "collected {} rows from generation {generation}, {} problematic",
        rows.len(),
        problematic.len()
    );
    Ok(Some(Summary {
        generation,
        rows,
        problematic,
    }))
}

/// Write `summary` to `$STUDY/postprocess.json`.
pub fn write(fs: &Fs, summary: &Summary) -> Result<PathBuf> {
    let path = fs.postprocess_json();
    let text = serde_json::to_string_pretty(summary).context("serializing summary")?;
    fs.write_file(&path, &text)?;
    Ok(path)
}

fn row(tree: &Tree, id: NodeId, outputs: &[String]) -> Row {
    let node = tree.node(id);
    let parent = node.parent.map(|p| tree.node(p));

    let mut lineage: Vec<NodeId> = tree.ancestors(id).collect();
    lineage.reverse();
    lineage.push(id);
    let mut parameters = Parameters::new();
    for ancestor in lineage {
        for (k, v) in &tree.node(ancestor).parameters {
            if ancestor == tree.root() && (k == GENERATIONS_KEY || k == SETUP_ENV_KEY) {
                continue;
            }
            parameters.insert(k.clone(), v.clone());
        }
    }

    let dir = tree.abs_path(id);
    Row {
        name: node.name.clone(),
        path: node.path.clone(),
        parent_name: parent.map(|p| p.name.clone()),
        parent_path: parent.map(|p| p.path.clone()),
        parameters,
        tags: tree.tags(id),
        outputs: outputs
            .iter()
            .map(|o| (o.clone(), dir.join(o).exists()))
            .collect(),
    }
}
