use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use tree::{NodeId, Tree, LOG_FILE_KEY};
use util::Errors;

use crate::fs::Fs;
use crate::study::{self, GenerationConfig};

/// Pure builder for `run.sh`
mod launch_script;
pub use launch_script::{launch_script, quote};

/// Token in template files replaced by the relative path from a node to the study root.
pub const ROOT_PLACEHOLDER: &str = "{{ROOT}}";

/// Turns an in-memory tree into node working directories on disk.
///
/// Each generation is materialized top-down. Within a generation, parents are
/// handled concurrently by a bounded worker pool; every worker only touches the
/// subtree of the children it clones.
pub struct Materializer<'a> {
    fs: &'a Fs,
    tree: &'a Tree,
    pool: ThreadPool,
    verbose: bool,
}

impl<'a> Materializer<'a> {
    pub fn new(fs: &'a Fs, tree: &'a Tree, workers: usize, verbose: bool) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("clone-{i}"))
            .build()
            .context("building cloning thread pool")?;
        Ok(Self {
            fs,
            tree,
            pool,
            verbose,
        })
    }

    /// Print every directory that would be created, and what goes into it.
    pub fn print_plan(&self) -> Result<()> {
        eprintln!(
            "\nThe following node directories {}:",
            "would be created".green()
        );
        eprintln!("{} {:?}", "ROOT".green(), self.tree.root_dir());
        for depth in 1..=self.tree.height() {
            let gen = study::generation_config(self.tree, depth)?;
            let entries: Vec<&str> = gen.template_entries().collect();
            for id in self.tree.generation(depth) {
                eprintln!(
                    "{} {} <- {:?} {:?}",
                    "CREATE".green(),
                    self.tree.node(id).path.display(),
                    gen.job_folder,
                    entries,
                );
            }
        }
        eprintln!();
        Ok(())
    }

    /// Delete the working directory of each of the root's children, and with them
    /// the whole materialized tree. Nothing to delete is not an error.
    pub fn rm_children_folders(&self) -> Result<usize> {
        let mut removed = 0;
        for child in self.tree.children(self.tree.root()) {
            let dir = self.tree.abs_path(*child);
            if self.fs.exists(&dir) {
                eprintln!("{} {:?}", "Deleting".red(), dir);
                self.fs
                    .delete_dir(&dir)
                    .with_context(|| format!("deleting node directory {dir:?}"))?;
                removed += 1;
            }
        }
        log::info!("removed {removed} first-generation directories");
        Ok(removed)
    }

    /// Create the root directory and every node directory below it.
    ///
    /// Per-node failures are collected so siblings keep going; if anything
    /// failed, the errors are printed and an aggregated error is returned once
    /// every node was tried.
    pub fn materialize(&self) -> Result<()> {
        self.fs
            .create_dir(self.tree.root_dir())
            .context("creating study root directory")?;
        let env = study::setup_env_script(self.tree)?;

        let mut errors = Errors::default();
        for depth in 1..=self.tree.height() {
            let gen = study::generation_config(self.tree, depth)?;
            let parents: Vec<NodeId> = self.tree.generation(depth - 1).collect();
            if self.verbose {
                eprintln!(
                    "{} generation {} from {:?}",
                    "Cloning".magenta(),
                    depth,
                    gen.job_folder
                );
            }
            let results: Vec<Errors> = self.pool.install(|| {
                parents
                    .par_iter()
                    .map(|parent| self.clone_children(*parent, &gen, env))
                    .collect()
            });
            for e in results {
                errors.extend(e);
            }
        }
        errors.print_recap("materializing")?;
        Ok(())
    }

    /// Materialize every child of `parent` from the generation's template.
    pub fn clone_children(&self, parent: NodeId, gen: &GenerationConfig, env: &str) -> Errors {
        let mut errors = Errors::default();
        for child in self.tree.children(parent) {
            if let Err(e) = self.materialize_node(*child, gen, env) {
                let path = self.tree.node(*child).path.display().to_string();
                errors.add_context(e, format!("materializing node {path}"));
            }
        }
        errors
    }

    fn materialize_node(&self, id: NodeId, gen: &GenerationConfig, env: &str) -> Result<()> {
        let node = self.tree.node(id);
        let dir = self.tree.abs_path(id);
        log::debug!("materializing {:?}", dir);
        self.fs.create_dir(&dir)?;

        let to_root = relative_root(&node.path);
        for entry in gen.template_entries() {
            let src = gen.job_folder.join(entry);
            let tgt = dir.join(entry);
            if let Some(parent) = tgt.parent() {
                self.fs.create_dir(parent)?;
            }
            self.clone_entry(&src, &tgt, &to_root)
                .with_context(|| format!("cloning template entry {entry:?}"))?;
        }

        let mut config = node.parameters.clone();
        let marker = self.tree.marker_path(id);
        config.insert(
            LOG_FILE_KEY.to_owned(),
            marker.to_string_lossy().into_owned().into(),
        );
        let config = serde_yaml::to_string(&config).context("serializing node config")?;
        self.fs.write_file(self.fs.config_yaml(&dir), &config)?;

        let script = launch_script(env, &dir, &gen.interpreter, &gen.job_executable);
        self.fs.write_executable(self.fs.run_sh(&dir), &script)?;
        Ok(())
    }

    /// Copy one template entry, rendering placeholders in UTF-8 files.
    fn clone_entry(&self, src: &Path, tgt: &Path, to_root: &str) -> Result<()> {
        if src.is_file() && !src.is_symlink() {
            if let Some(text) = render(&self.fs.read(src)?, to_root) {
                return self.fs.write_file_like(tgt, &text, src);
            }
            return self.fs.copy(src, tgt);
        }
        self.fs.copy(src, tgt)?;
        if self.fs.is_dir(tgt)? && !tgt.is_symlink() {
            self.render_dir(tgt, to_root)?;
        }
        Ok(())
    }

    fn render_dir(&self, dir: &Path, to_root: &str) -> Result<()> {
        for entry in self.fs.read_dir(dir)? {
            let path = entry?.path();
            if path.is_symlink() {
                continue;
            } else if path.is_dir() {
                self.render_dir(&path, to_root)?;
            } else if let Some(text) = render(&self.fs.read(&path)?, to_root) {
                self.fs.write_file_like(&path, &text, &path)?;
            }
        }
        Ok(())
    }
}

/// Text with placeholders replaced, or None if there is nothing to render.
fn render(bytes: &[u8], to_root: &str) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    text.contains(ROOT_PLACEHOLDER)
        .then(|| text.replace(ROOT_PLACEHOLDER, to_root))
}

/// `../..` style path from a node's relative path back to the root.
fn relative_root(node_path: &Path) -> String {
    let up: PathBuf = node_path.components().map(|_| "..").collect();
    if up.as_os_str().is_empty() {
        ".".to_owned()
    } else {
        up.to_string_lossy().into_owned()
    }
}
