use std::path::{Path, PathBuf};

use super::Fs;

/// Launch script written into every node directory.
pub const RUN_SH: &str = "run.sh";
/// Per-node job configuration.
pub const CONFIG_YAML: &str = "config.yaml";
/// Per-node batch script used by the containerized Slurm backend.
pub const RUN_SBATCH: &str = "run.sbatch";
/// Where the launch script sends the job's stdout.
pub const STDOUT_TXT: &str = "output.txt";
/// Where the launch script sends the job's stderr.
pub const STDERR_TXT: &str = "error.txt";

/// Utility fns for making common types of paths.
impl Fs {
    /// $STUDY/tree.json
    pub fn tree_json(&self) -> PathBuf {
        self.study_dir.join("tree.json")
    }

    /// $STUDY/submission_files
    pub fn submission_dir(&self) -> PathBuf {
        self.study_dir.join("submission_files")
    }

    /// $STUDY/submission_files/generation_N.sub
    pub fn submission_file(&self, generation: usize) -> PathBuf {
        self.submission_dir()
            .join(format!("generation_{generation}.sub"))
    }

    /// $STUDY/submission_files/job_record.json
    pub fn job_record(&self) -> PathBuf {
        self.submission_dir().join("job_record.json")
    }

    /// $STUDY/postprocess.json
    pub fn postprocess_json(&self) -> PathBuf {
        self.study_dir.join("postprocess.json")
    }

    /// $NODE/config.yaml
    pub fn config_yaml(&self, node_dir: &Path) -> PathBuf {
        node_dir.join(CONFIG_YAML)
    }

    /// $NODE/run.sh
    pub fn run_sh(&self, node_dir: &Path) -> PathBuf {
        node_dir.join(RUN_SH)
    }

    /// $NODE/run.sbatch
    pub fn run_sbatch(&self, node_dir: &Path) -> PathBuf {
        node_dir.join(RUN_SBATCH)
    }
}
