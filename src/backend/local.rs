use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use super::{checked, pair_ids, Error, JobId, JobState, LiveJob, Scheduler, Shell, SubmissionFile};
use crate::fs::{Fs, RUN_SH};
use crate::materialize::quote;
use crate::study::BackendKind;

/// Runs each node's launch script as a detached background process.
/// Job ids are pids; the live listing is the process table.
pub struct LocalPc {
    shell: Arc<dyn Shell>,
}

impl LocalPc {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        Self { shell }
    }
}

impl Scheduler for LocalPc {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalPc
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
        let mut text = String::with_capacity(64 + pending.len() * 128);
        text.push_str("# Running on local_pc\n");
        for node in pending {
            let script = node.join(RUN_SH);
            writeln!(
                text,
                "nohup bash {} > /dev/null 2>&1 &\necho $!",
                quote(&script.to_string_lossy())
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
        let mut pids = Vec::with_capacity(file.nodes.len());
        for line in output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.parse::<u32>().is_err() {
                return Err(Error::UnexpectedOutput {
                    program: "bash".to_owned(),
                    output: line.to_owned(),
                });
            }
            pids.push(line.to_owned());
        }
        Ok(pair_ids("bash", pids, file))
    }

    fn live_jobs(&self) -> Result<Vec<LiveJob>, Error> {
        let args = ["-eo".to_owned(), "pid=,args=".to_owned()];
        let output = checked(self.shell.as_ref(), "ps", &args)?;
        Ok(output.stdout.lines().filter_map(parse_ps_line).collect())
    }
}

/// `  4242 bash /study/000/run.sh` -> pid 4242 running `/study/000`.
fn parse_ps_line(line: &str) -> Option<LiveJob> {
    let (pid, args) = line.trim().split_once(char::is_whitespace)?;
    pid.parse::<u32>().ok()?;
    let args = args.trim();
    if !args.ends_with(RUN_SH) {
        return None;
    }
    // the script path is the first absolute argument:
    let path = args
        .find(" /")
        .map(|i| Path::new(&args[i + 1..]))
        .and_then(Path::parent)
        .map(Path::to_path_buf);
    Some(LiveJob {
        id: pid.to_owned(),
        state: JobState::Running,
        path,
    })
}
