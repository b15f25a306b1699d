use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as Yaml};

use tree::{NodeId, Parameters, Tree};

/// Root parameter holding the per-generation settings.
pub const GENERATIONS_KEY: &str = "generations";
/// Root parameter holding the environment activation script.
pub const SETUP_ENV_KEY: &str = "setup_env_script";
/// Key inside a node mapping that holds its children.
const CHILDREN_KEY: &str = "children";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No generation {0} declared, but the tree has nodes at that depth")]
    MissingGeneration(usize),
    #[error("Invalid settings for generation {0}")]
    BadGeneration(usize, #[source] serde_json::Error),
    #[error("Root parameters are missing \"{0}\"")]
    MissingRootParameter(&'static str),
    #[error("Node \"{0}\" must be a mapping of parameters")]
    NotAMapping(String),
    #[error("\"children\" of node \"{0}\" must be a mapping of names to nodes")]
    BadChildren(String),
    #[error("Unsupported mapping key {0:?}; keys must be strings, numbers or booleans")]
    UnsupportedKey(Yaml),
    #[error("Number {0} can't be represented in json")]
    UnsupportedNumber(String),
}

/// Where the jobs of one generation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    #[serde(alias = "local")]
    LocalPc,
    Htc,
    HtcDocker,
    Slurm,
    SlurmDocker,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalPc => "local_pc",
            Self::Htc => "htc",
            Self::HtcDocker => "htc_docker",
            Self::Slurm => "slurm",
            Self::SlurmDocker => "slurm_docker",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by every node of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    /// Template directory cloned into each node of this generation.
    pub job_folder: PathBuf,
    /// Job entry point, relative to the node directory once cloned.
    pub job_executable: String,
    /// Program that runs `job_executable`; empty to run it directly.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Extra template entries (files or dirs) to clone next to the executable.
    #[serde(default)]
    pub files_to_clone: Vec<String>,
    #[serde(default)]
    pub run_on: BackendKind,
    pub htc_job_flavor: Option<String>,
    pub singularity_image: Option<String>,
    pub slurm_partition: Option<String>,
    /// Files each node is expected to produce; checked by postprocessing.
    #[serde(default)]
    pub outputs: Vec<String>,
}

fn default_interpreter() -> String {
    "python".to_owned()
}

impl GenerationConfig {
    /// Names of all template entries to clone, executable first.
    pub fn template_entries(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.job_executable.as_str())
            .chain(self.files_to_clone.iter().map(String::as_str))
    }
}

/// The study description the user writes, see `materialize`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyConfig {
    /// Name of the study dir under the output dir.
    pub name: String,
    pub setup_env_script: String,
    pub generations: BTreeMap<usize, GenerationConfig>,
    /// Extra parameters attached to the root.
    #[serde(default)]
    pub parameters: Mapping,
    /// First generation of nodes; each may carry its own `children`.
    #[serde(default)]
    pub children: Mapping,
}

impl StudyConfig {
    /// Read a study config from a yaml file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading study config {path:?}"))?;
        let config = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing study config {path:?}"))?;
        Ok(config)
    }

    /// Expand the config into a tree rooted at `study_dir`.
    /// Relative template dirs are resolved against `config_dir`.
    pub fn into_tree(self, study_dir: &Path, config_dir: &Path) -> Result<Tree> {
        let mut generations = self.generations;
        for gen in generations.values_mut() {
            if gen.job_folder.is_relative() {
                gen.job_folder = config_dir.join(&gen.job_folder);
            }
        }

        let mut root_params = to_parameters(self.parameters)?;
        root_params.insert(SETUP_ENV_KEY.to_owned(), self.setup_env_script.into());
        root_params.insert(
            GENERATIONS_KEY.to_owned(),
            serde_json::to_value(&generations)?,
        );

        let mut tree = Tree::new(study_dir, &self.name, root_params);
        add_children(&mut tree, NodeId::ROOT, &self.name, self.children)?;

        for depth in 1..=tree.height() {
            if !generations.contains_key(&depth) {
                return Err(Error::MissingGeneration(depth).into());
            }
        }
        log::info!(
            "expanded study {} into {} nodes over {} generations",
            self.name,
            tree.len(),
            tree.height()
        );
        Ok(tree)
    }
}

/// Look up the settings of generation `depth` in the root's parameters.
pub fn generation_config(tree: &Tree, depth: usize) -> Result<GenerationConfig, Error> {
    let gen = tree
        .node(tree.root())
        .parameters
        .get(GENERATIONS_KEY)
        .and_then(|gens| gens.get(depth.to_string()))
        .ok_or(Error::MissingGeneration(depth))?;
    serde_json::from_value(gen.clone()).map_err(|e| Error::BadGeneration(depth, e))
}

/// Environment activation script sourced by every launch script.
pub fn setup_env_script(tree: &Tree) -> Result<&str, Error> {
    tree.node(tree.root())
        .parameters
        .get(SETUP_ENV_KEY)
        .and_then(|v| v.as_str())
        .ok_or(Error::MissingRootParameter(SETUP_ENV_KEY))
}

fn add_children(tree: &mut Tree, parent: NodeId, parent_name: &str, children: Mapping) -> Result<()> {
    for (key, value) in children {
        let name = key_to_string(key)?;
        let mut mapping = match value {
            Yaml::Mapping(m) => m,
            Yaml::Null => Mapping::new(),
            _ => return Err(Error::NotAMapping(name).into()),
        };
        let grandchildren = match mapping.remove(CHILDREN_KEY) {
            Some(Yaml::Mapping(m)) => m,
            None | Some(Yaml::Null) => Mapping::new(),
            Some(_) => return Err(Error::BadChildren(name).into()),
        };
        let id = tree
            .add_child(parent, &name, to_parameters(mapping)?)
            .with_context(|| format!("adding child \"{name}\" to \"{parent_name}\""))?;
        add_children(tree, id, &name, grandchildren)?;
    }
    Ok(())
}

/// Convert a yaml mapping to json parameters, stringifying scalar keys.
fn to_parameters(mapping: Mapping) -> Result<Parameters, Error> {
    let mut params = Parameters::new();
    for (k, v) in mapping {
        params.insert(key_to_string(k)?, to_json(v)?);
    }
    Ok(params)
}

fn to_json(value: Yaml) -> Result<serde_json::Value, Error> {
    use serde_json::Value as Json;
    Ok(match value {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(b),
        Yaml::Number(n) => {
            if let Some(u) = n.as_u64() {
                Json::from(u)
            } else if let Some(i) = n.as_i64() {
                Json::from(i)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Json::Number)
                    .ok_or_else(|| Error::UnsupportedNumber(n.to_string()))?
            }
        }
        Yaml::String(s) => Json::String(s),
        Yaml::Sequence(seq) => Json::Array(seq.into_iter().map(to_json).collect::<Result<_, _>>()?),
        Yaml::Mapping(m) => Json::Object(to_parameters(m)?),
        Yaml::Tagged(tagged) => to_json(tagged.value)?,
    })
}

fn key_to_string(key: Yaml) -> Result<String, Error> {
    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        other => Err(Error::UnsupportedKey(other)),
    }
}
