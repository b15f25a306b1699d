use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use tree::{NodeId, Tree};
use util::HashMap;

use crate::backend::{self, JobId, JobRecord, Listing, NodeState, Scheduler, Shell};
use crate::fs::Fs;
use crate::study;

/// Where the study stands after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Generation `g` is the first with unfinished nodes.
    Pending(usize),
    AllCompleted,
}

/// What happened to one node during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Running,
    Queuing,
    Submitted(JobId),
    /// Needs submitting, but this is a dry run.
    WouldSubmit,
    /// The submit command failed or returned no id for this node.
    Failed,
}

/// Result of one [`ScanDriver::pass`].
#[derive(Debug)]
pub struct PassReport {
    pub state: DriverState,
    /// One line per node of the pending generation, in generation order.
    pub lines: Vec<(NodeId, Outcome)>,
    /// True if the root was tagged completed during this pass.
    pub root_tagged: bool,
}

impl PassReport {
    pub fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize {
        self.lines.iter().filter(|(_, o)| f(o)).count()
    }

    pub fn submitted(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Submitted(_)))
    }
}

/// One reconciliation and submission pass over a materialized study.
///
/// Generations are strictly gated: generation `g + 1` is only looked at once
/// every node of generation `g` has been completed. The pass never waits on
/// jobs; run it again later to make progress.
pub struct ScanDriver<'a> {
    fs: &'a Fs,
    tree: &'a Tree,
    shell: Arc<dyn Shell>,
    dry_run: bool,
}

impl<'a> ScanDriver<'a> {
    pub fn new(fs: &'a Fs, tree: &'a Tree, shell: Arc<dyn Shell>, dry_run: bool) -> Self {
        Self {
            fs,
            tree,
            shell,
            dry_run,
        }
    }

    pub fn pass(&self) -> Result<PassReport> {
        // a moved study would otherwise look like nothing ever completed:
        self.tree.check_location()?;
        let root = self.tree.root();

        if self.tree.has_been(root, status::COMPLETED) {
            return Ok(PassReport {
                state: DriverState::AllCompleted,
                lines: Vec::new(),
                root_tagged: false,
            });
        }

        for g in 1..=self.tree.height() {
            let done = self
                .tree
                .generation(g)
                .all(|id| self.tree.has_been(id, status::COMPLETED));
            if done {
                log::debug!("generation {g} is completed");
                continue;
            }
            let lines = self
                .drive_generation(g)
                .with_context(|| format!("driving generation {g}"))?;
            return Ok(PassReport {
                state: DriverState::Pending(g),
                lines,
                root_tagged: false,
            });
        }

        let root_tagged = if self.dry_run {
            false
        } else {
            self.tree
                .tag_as(root, status::COMPLETED)
                .context("tagging root as completed")?;
            true
        };
        Ok(PassReport {
            state: DriverState::AllCompleted,
            lines: Vec::new(),
            root_tagged,
        })
    }

    fn drive_generation(&self, g: usize) -> Result<Vec<(NodeId, Outcome)>> {
        let gen = study::generation_config(self.tree, g)?;
        let scheduler = backend::for_generation(&gen, self.shell.clone())?;

        let record_path = self.fs.job_record();
        let mut record = JobRecord::load(&record_path).unwrap_or_else(|e| {
            log::warn!("{e}; starting from an empty job record");
            JobRecord::default()
        });
        let listing = Listing::query(scheduler.as_ref(), &mut record);

        let mut lines = Vec::with_capacity(64);
        let mut pending: Vec<PathBuf> = Vec::with_capacity(64);
        for id in self.tree.generation(g) {
            let outcome = match listing.classify(self.tree, id) {
                NodeState::Completed => Outcome::Completed,
                NodeState::Running => Outcome::Running,
                NodeState::Queuing => Outcome::Queuing,
                NodeState::Pending => {
                    pending.push(self.tree.abs_path(id));
                    Outcome::WouldSubmit
                }
            };
            lines.push((id, outcome));
        }
        if self.dry_run {
            return Ok(lines);
        }

        // the record was pruned by the listing, so it is saved whatever happens next
        let submitted = self.submit(scheduler.as_ref(), g, &pending, &mut record);
        record.save(self.fs, &record_path)?;
        let mut ids = submitted?;
        for (id, outcome) in lines.iter_mut() {
            if *outcome == Outcome::WouldSubmit {
                *outcome = match ids.remove(&self.tree.abs_path(*id)) {
                    Some(job) => Outcome::Submitted(job),
                    None => Outcome::Failed,
                };
            }
        }
        Ok(lines)
    }

    /// Write and submit the documents for `pending`, returning the new id of each node.
    fn submit(
        &self,
        scheduler: &dyn Scheduler,
        g: usize,
        pending: &[PathBuf],
        record: &mut JobRecord,
    ) -> Result<HashMap<PathBuf, JobId>> {
        let files = scheduler.write_submission_files(self.fs, g, pending)?;
        let mut ids = HashMap::default();
        for outcome in backend::submit_files(scheduler, files, record) {
            if let Ok(submitted) = outcome.result {
                for (id, node) in submitted {
                    ids.insert(node, id);
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::ScriptedShell;
    use serde_json::json;
    use tempfile::tempdir;
    use tree::Parameters;

    /// root -> 2 -> 1 each, both generations on the local backend
    fn study(dir: &std::path::Path) -> Result<(Fs, Tree)> {
        let fs = Fs::new(dir, false);
        let gen = json!({"job_folder": "/t", "job_executable": "job.py", "run_on": "local_pc"});
        let params = json!({"setup_env_script": "env", "generations": {"1": gen, "2": gen}});
        let mut tree = Tree::new(
            dir.join("scan"),
            "scan",
            params.as_object().cloned().unwrap_or_default(),
        );
        for name in ["a", "b"] {
            let child = tree.add_child(tree.root(), name, Parameters::new())?;
            tree.add_child(child, "x", Parameters::new())?;
        }
        for (id, _) in tree.iter() {
            std::fs::create_dir_all(tree.abs_path(id))?;
        }
        Ok((fs, tree))
    }

    #[test]
    fn test_gating() -> Result<()> {
        let dir = tempdir()?;
        let (fs, tree) = study(dir.path())?;
        let shell = Arc::new(ScriptedShell::default());
        let driver = ScanDriver::new(&fs, &tree, shell.clone(), false);

        let a = tree.generation(1).next().unwrap();
        tree.tag_as(a, status::COMPLETED)?;
        shell.reply(""); // ps
        shell.reply("77\n"); // bash generation_1.sub
        let report = driver.pass()?;
        assert_eq!(report.state, DriverState::Pending(1));
        assert_eq!(report.lines[0].1, Outcome::Completed);
        assert_eq!(report.lines[1].1, Outcome::Submitted("77".into()));
        assert_eq!(JobRecord::load(&fs.job_record())?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_failed_submission_is_reported() -> Result<()> {
        let dir = tempdir()?;
        let (fs, tree) = study(dir.path())?;
        let shell = Arc::new(ScriptedShell::default());
        shell.reply("");
        shell.fail("bash: permission denied");
        let report = ScanDriver::new(&fs, &tree, shell, false).pass()?;
        assert_eq!(report.count(|o| *o == Outcome::Failed), 2);
        Ok(())
    }

    #[test]
    fn test_broken_node_does_not_stop_siblings() -> Result<()> {
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), false);
        let gen = json!({
            "job_folder": "/t",
            "job_executable": "job.py",
            "run_on": "slurm_docker",
            "singularity_image": "/img.sif",
        });
        let params = json!({"setup_env_script": "env", "generations": {"1": gen}});
        let mut tree = Tree::new(
            dir.path().join("scan"),
            "scan",
            params.as_object().cloned().unwrap_or_default(),
        );
        for name in ["a", "b", "c"] {
            let child = tree.add_child(tree.root(), name, Parameters::new())?;
            std::fs::create_dir_all(tree.abs_path(child))?;
        }
        let a = tree.generation(1).next().unwrap();
        std::fs::remove_dir(tree.abs_path(a))?;

        let shell = Arc::new(ScriptedShell::default());
        shell.reply(""); // squeue
        shell.reply("9001\n");
        shell.reply("9002\n");
        let report = ScanDriver::new(&fs, &tree, shell.clone(), false).pass()?;

        assert_eq!(report.lines[0], (a, Outcome::Failed));
        assert_eq!(report.submitted(), 2);
        assert_eq!(shell.calls().len(), 3);
        assert_eq!(JobRecord::load(&fs.job_record())?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_record_is_saved_when_writing_fails() -> Result<()> {
        let dir = tempdir()?;
        let (fs, tree) = study(dir.path())?;
        let first = tree.generation(1).next().unwrap();
        let mut record = JobRecord::default();
        record.insert("404".into(), tree.abs_path(first));
        record.save(&fs, &fs.job_record())?;
        // the submission file can't replace a directory:
        std::fs::create_dir_all(fs.submission_file(1))?;

        let shell = Arc::new(ScriptedShell::default());
        shell.reply(""); // ps: job 404 is gone
        assert!(ScanDriver::new(&fs, &tree, shell, false).pass().is_err());
        assert!(JobRecord::load(&fs.job_record())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_dry_run_writes_nothing() -> Result<()> {
        let dir = tempdir()?;
        let (fs, tree) = study(dir.path())?;
        let shell = Arc::new(ScriptedShell::default());
        shell.reply("");
        let report = ScanDriver::new(&fs, &tree, shell.clone(), true).pass()?;
        assert_eq!(report.count(|o| *o == Outcome::WouldSubmit), 2);
        assert!(!fs.submission_dir().exists());
        assert_eq!(shell.calls().len(), 1);
        Ok(())
    }

    #[test]
    fn test_relocated_tree_fails_fast() -> Result<()> {
        let dir = tempdir()?;
        let (fs, mut tree) = study(dir.path())?;
        tree.relocate(dir.path().join("moved"));
        let driver = ScanDriver::new(&fs, &tree, Arc::new(ScriptedShell::default()), false);
        assert!(driver.pass().is_err());
        Ok(())
    }
}
