use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::fs::Fs;
use crate::study::{BackendKind, GenerationConfig};

/// Running external commands
mod shell;
pub use shell::{CmdOutput, Shell, SystemShell, DEFAULT_TIMEOUT};

/// Persisted job id -> node dir map
mod record;
pub use record::JobRecord;

/// Shared dedup and submission logic over any backend
mod reconcile;
pub use reconcile::{submit_files, Listing, NodeState, Submitted};

/// Background processes on this machine
mod local;
pub use local::LocalPc;

/// HTCondor, with or without a container image
mod htc;
pub use htc::Htc;

/// Slurm, plain and containerized
mod slurm;
pub use slurm::{Slurm, SlurmDocker};

/// Scheduler-assigned job id. HTCondor ids are `cluster.proc`, so ids are strings.
pub type JobId = String;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unable to run {0}")]
    Spawn(String, #[source] std::io::Error),
    #[error("{0} did not finish within {1:?}")]
    Timeout(String, Duration),
    #[error("{program} failed: {stderr}")]
    CommandFailed { program: String, stderr: String },
    #[error("Unexpected output from {program}: {output:?}")]
    UnexpectedOutput { program: String, output: String },
    #[error("Backend {0} needs a singularity_image in its generation settings")]
    MissingImage(BackendKind),
    #[error("Unreadable job record {0:?}: {1}")]
    Record(PathBuf, String),
}

/// What the scheduler says a live job is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Running,
    Queuing,
}

/// One job from the scheduler's live listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveJob {
    pub id: JobId,
    pub state: JobState,
    /// Node dir, when the scheduler reports it; otherwise resolved via the record.
    pub path: Option<PathBuf>,
}

/// A written submission document and the node dirs it submits, in stanza order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFile {
    pub path: PathBuf,
    pub nodes: Vec<PathBuf>,
}

/// One batch scheduler.
///
/// Backends only know how to write documents, run the submit command and
/// list live jobs; deciding which nodes need submitting is done once for all
/// of them in [`Listing`].
pub trait Scheduler: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Write the documents submitting `pending` (absolute node dirs) of one generation.
    /// Writes nothing and returns no files when `pending` is empty.
    fn write_submission_files(
        &self,
        fs: &Fs,
        generation: usize,
        pending: &[PathBuf],
    ) -> Result<Vec<SubmissionFile>>;

    /// Run the submit command for `file` and map the new job ids to node dirs.
    fn submit(&self, file: &SubmissionFile) -> Result<Vec<(JobId, PathBuf)>, Error>;

    /// Query the scheduler for jobs that are running or waiting to run.
    fn live_jobs(&self) -> Result<Vec<LiveJob>, Error>;

    /// Whether independent submission files may be submitted concurrently.
    fn parallel_submit(&self) -> bool {
        false
    }
}

/// Build the backend a generation is configured to run on.
pub fn for_generation(
    gen: &GenerationConfig,
    shell: Arc<dyn Shell>,
) -> Result<Box<dyn Scheduler>, Error> {
    let image = || {
        gen.singularity_image
            .clone()
            .ok_or(Error::MissingImage(gen.run_on))
    };
    let scheduler: Box<dyn Scheduler> = match gen.run_on {
        BackendKind::LocalPc => Box::new(LocalPc::new(shell)),
        BackendKind::Htc => Box::new(Htc::new(shell, gen.htc_job_flavor.clone(), None)),
        BackendKind::HtcDocker => Box::new(Htc::new(
            shell,
            gen.htc_job_flavor.clone(),
            Some(image()?),
        )),
        BackendKind::Slurm => Box::new(Slurm::new(shell, gen.slurm_partition.clone())),
        BackendKind::SlurmDocker => Box::new(SlurmDocker::new(
            shell,
            gen.slurm_partition.clone(),
            image()?,
        )),
    };
    log::debug!("using backend {}", scheduler.kind());
    Ok(scheduler)
}

/// Run a command and fail unless it exits successfully.
fn checked(shell: &dyn Shell, program: &str, args: &[String]) -> Result<CmdOutput, Error> {
    let output = shell.run(program, args)?;
    if output.success {
        Ok(output)
    } else {
        Err(Error::CommandFailed {
            program: program.to_owned(),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

/// Pair ids with the nodes of `file` in order, warning if the counts disagree.
fn pair_ids(program: &str, ids: Vec<JobId>, file: &SubmissionFile) -> Vec<(JobId, PathBuf)> {
    if ids.len() != file.nodes.len() {
        log::warn!(
            "{program} returned {} job ids for {} nodes in {:?}",
            ids.len(),
            file.nodes.len(),
            file.path
        );
    }
    ids.into_iter().zip(file.nodes.iter().cloned()).collect()
}
