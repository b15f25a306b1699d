use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use super::{checked, Error, JobId, JobState, LiveJob, Scheduler, Shell, SubmissionFile};
use crate::fs::{Fs, RUN_SH};
use crate::materialize::quote;
use crate::study::BackendKind;

const SBATCH: &str = "sbatch";
const SQUEUE: &str = "squeue";
const STDOUT: &str = "slurm.out";
const STDERR: &str = "slurm.err";

/// Slurm: a generation file with one `sbatch --parsable` line per node, run with bash.
/// Every line echoes its job id, or an empty line if sbatch failed,
/// so ids stay aligned with nodes.
pub struct Slurm {
    shell: Arc<dyn Shell>,
    partition: Option<String>,
}

impl Slurm {
    pub fn new(shell: Arc<dyn Shell>, partition: Option<String>) -> Self {
        Self { shell, partition }
    }
}

impl Scheduler for Slurm {
    fn kind(&self) -> BackendKind {
        BackendKind::Slurm
    }

    fn write_submission_files(
        &self,
        fs: &Fs,
        generation: usize,
        pending: &[PathBuf],
    ) -> Result<Vec<SubmissionFile>> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        let mut text = String::with_capacity(64 + pending.len() * 256);
        text.push_str("# Running on SLURM\n");
        for node in pending {
            let dir = quote(&node.to_string_lossy());
            text.push_str("echo \"$(sbatch --parsable");
            if let Some(partition) = &self.partition {
                write!(text, " --partition={}", quote(partition))?;
            }
            write!(
                text,
                " --chdir={dir} --output={} --error={} {})\"\n",
                quote(&node.join(STDOUT).to_string_lossy()),
                quote(&node.join(STDERR).to_string_lossy()),
                quote(&node.join(RUN_SH).to_string_lossy()),
            )?;
        }

        let path = fs.submission_file(generation);
        fs.create_dir(fs.submission_dir())?;
        fs.write_file(&path, &text)?;
        Ok(vec![SubmissionFile {
            path,
            nodes: pending.to_vec(),
        }])
    }

    fn submit(&self, file: &SubmissionFile) -> Result<Vec<(JobId, PathBuf)>, Error> {
        let args = [file.path.to_string_lossy().into_owned()];
        let output = checked(self.shell.as_ref(), "bash", &args)?;
        let mut submitted = Vec::with_capacity(file.nodes.len());
        for (line, node) in output.stdout.lines().zip(&file.nodes) {
            match parse_job_id(line) {
                Some(id) => submitted.push((id, node.clone())),
                None => log::warn!("sbatch gave no job id for {node:?}"),
            }
        }
        Ok(submitted)
    }

    fn live_jobs(&self) -> Result<Vec<LiveJob>, Error> {
        squeue(self.shell.as_ref())
    }
}

/// Containerized Slurm: one `run.sbatch` per node that runs the launch script
/// with `singularity exec`. The per-node files are independent, so they are
/// submitted concurrently.
pub struct SlurmDocker {
    shell: Arc<dyn Shell>,
    partition: Option<String>,
    image: String,
}

impl SlurmDocker {
    pub fn new(shell: Arc<dyn Shell>, partition: Option<String>, image: String) -> Self {
        Self {
            shell,
            partition,
            image,
        }
    }

    fn sbatch_script(&self, node: &Path, study_dir: &Path) -> Result<String> {
        let mut text = String::with_capacity(512);
        text.push_str("#!/bin/bash\n");
        if let Some(name) = node.file_name() {
            writeln!(text, "#SBATCH --job-name={}", quote(&name.to_string_lossy()))?;
        }
        if let Some(partition) = &self.partition {
            writeln!(text, "#SBATCH --partition={}", quote(partition))?;
        }
        writeln!(text, "#SBATCH --chdir={}", quote(&node.to_string_lossy()))?;
        writeln!(
            text,
            "#SBATCH --output={}",
            quote(&node.join(STDOUT).to_string_lossy())
        )?;
        writeln!(
            text,
            "#SBATCH --error={}",
            quote(&node.join(STDERR).to_string_lossy())
        )?;
        writeln!(
            text,
            "\nsingularity exec --bind {} {} bash {}",
            quote(&study_dir.to_string_lossy()),
            quote(&self.image),
            quote(&node.join(RUN_SH).to_string_lossy()),
        )?;
        Ok(text)
    }
}

impl Scheduler for SlurmDocker {
    fn kind(&self) -> BackendKind {
        BackendKind::SlurmDocker
    }

    fn write_submission_files(
        &self,
        fs: &Fs,
        _generation: usize,
        pending: &[PathBuf],
    ) -> Result<Vec<SubmissionFile>> {
        let mut files = Vec::with_capacity(pending.len());
        for node in pending {
            let path = fs.run_sbatch(node);
            // a node whose dir is broken is left out; the others still go
            let written = self
                .sbatch_script(node, fs.study_dir())
                .and_then(|text| fs.write_file(&path, &text));
            if let Err(e) = written {
                log::warn!("not submitting {node:?}: {e:#}");
                continue;
            }
            files.push(SubmissionFile {
                path,
                nodes: vec![node.clone()],
            });
        }
        Ok(files)
    }

    fn submit(&self, file: &SubmissionFile) -> Result<Vec<(JobId, PathBuf)>, Error> {
        let args = ["--parsable".to_owned(), file.path.to_string_lossy().into_owned()];
        let output = checked(self.shell.as_ref(), SBATCH, &args)?;
        let id = output
            .stdout
            .lines()
            .find_map(parse_job_id)
            .ok_or_else(|| Error::UnexpectedOutput {
                program: SBATCH.to_owned(),
                output: output.stdout.clone(),
            })?;
        Ok(file.nodes.iter().map(|n| (id.clone(), n.clone())).collect())
    }

    fn live_jobs(&self) -> Result<Vec<LiveJob>, Error> {
        squeue(self.shell.as_ref())
    }

    fn parallel_submit(&self) -> bool {
        true
    }
}

/// `sbatch --parsable` prints `id` or `id;cluster`.
fn parse_job_id(line: &str) -> Option<JobId> {
    let id = line.trim().split(';').next()?.trim();
    id.parse::<u64>().ok().map(|_| id.to_owned())
}

fn squeue(shell: &dyn Shell) -> Result<Vec<LiveJob>, Error> {
    let args: Vec<String> = ["--me", "--noheader", "--format=%i|%T|%Z"]
        .into_iter()
        .map(str::to_owned)
        .collect();
    let output = checked(shell, SQUEUE, &args)?;
    Ok(output.stdout.lines().filter_map(parse_squeue_line).collect())
}

/// `123|RUNNING|/study/000`
fn parse_squeue_line(line: &str) -> Option<LiveJob> {
    let mut fields = line.trim().splitn(3, '|');
    let id = fields.next()?.trim();
    let state = match fields.next()?.trim() {
        "PENDING" | "REQUEUED" | "REQUEUE_HOLD" | "SUSPENDED" => JobState::Queuing,
        "RUNNING" | "CONFIGURING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" | "RESIZING" => {
            JobState::Running
        }
        _ => return None,
    };
    let dir = fields.next().unwrap_or_default().trim();
    Some(LiveJob {
        id: id.to_owned(),
        state,
        path: dir.starts_with('/').then(|| PathBuf::from(dir)),
    })
}
