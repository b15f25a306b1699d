use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use super::{checked, pair_ids, Error, JobId, JobState, LiveJob, Scheduler, Shell, SubmissionFile};
use crate::fs::{Fs, RUN_SH};
use crate::study::BackendKind;

const SUBMIT: &str = "condor_submit";
const QUERY: &str = "condor_q";

/// HTCondor: one submit description per generation, one stanza per node.
/// With an image, jobs run inside it through `+SingularityImage`.
pub struct Htc {
    shell: Arc<dyn Shell>,
    flavor: Option<String>,
    image: Option<String>,
}

impl Htc {
    pub fn new(shell: Arc<dyn Shell>, flavor: Option<String>, image: Option<String>) -> Self {
        Self {
            shell,
            flavor,
            image,
        }
    }
}

impl Scheduler for Htc {
    fn kind(&self) -> BackendKind {
        if self.image.is_some() {
            BackendKind::HtcDocker
        } else {
            BackendKind::Htc
        }
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
        let mut text = String::with_capacity(256 + pending.len() * 128);
        text.push_str("# This is a HTCondor submission file\n");
        text.push_str("universe = vanilla\n");
        // relative to each job's initialdir:
        text.push_str("output = htc.out\nerror = htc.err\nlog = htc.log\n");
        if let Some(flavor) = &self.flavor {
            writeln!(text, "+JobFlavour = \"{flavor}\"")?;
        }
        if let Some(image) = &self.image {
            writeln!(text, "+SingularityImage = \"{image}\"")?;
        }
        for node in pending {
            writeln!(text, "\ninitialdir = {}", node.display())?;
            writeln!(text, "executable = {}", node.join(RUN_SH).display())?;
            text.push_str("queue\n");
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
        let output = checked(self.shell.as_ref(), SUBMIT, &args)?;
        let ids = parse_submitted(&output.stdout).ok_or_else(|| Error::UnexpectedOutput {
            program: SUBMIT.to_owned(),
            output: output.stdout.clone(),
        })?;
        Ok(pair_ids(SUBMIT, ids, file))
    }

    fn live_jobs(&self) -> Result<Vec<LiveJob>, Error> {
        let args: Vec<String> = ["-af", "ClusterId", "ProcId", "JobStatus", "Iwd"]
            .into_iter()
            .map(str::to_owned)
            .collect();
        let output = checked(self.shell.as_ref(), QUERY, &args)?;
        Ok(output.stdout.lines().filter_map(parse_q_line).collect())
    }
}

/// `3 job(s) submitted to cluster 42.` -> `42.0`, `42.1`, `42.2`
fn parse_submitted(stdout: &str) -> Option<Vec<JobId>> {
    let line = stdout
        .lines()
        .find(|l| l.contains("job(s) submitted to cluster"))?;
    let count: usize = line.split_whitespace().next()?.parse().ok()?;
    let cluster = line.split_whitespace().last()?.trim_end_matches('.');
    cluster.parse::<u64>().ok()?;
    Some((0..count).map(|proc| format!("{cluster}.{proc}")).collect())
}

/// `42 1 2 /study/000` -> job `42.1`, running in `/study/000`
fn parse_q_line(line: &str) -> Option<LiveJob> {
    let mut fields = line.split_whitespace();
    let cluster = fields.next()?;
    let proc = fields.next()?;
    let state = match fields.next()? {
        "1" | "5" => JobState::Queuing,
        "2" | "6" | "7" => JobState::Running,
        _ => return None,
    };
    let iwd = fields.collect::<Vec<_>>().join(" ");
    let path = (iwd.starts_with('/')).then(|| PathBuf::from(iwd));
    Some(LiveJob {
        id: format!("{cluster}.{proc}"),
        state,
        path,
    })
}
