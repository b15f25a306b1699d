use std::path::{Path, PathBuf};

use rayon::prelude::*;

use tree::{NodeId, Tree};
use util::HashSet;

use super::{Error, JobId, JobRecord, JobState, Scheduler, SubmissionFile};

/// Where a node stands for the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Completed,
    Running,
    Queuing,
    /// Neither completed nor known to the scheduler; needs submitting.
    Pending,
}

/// Live scheduler state resolved to node dirs.
#[derive(Debug, Default)]
pub struct Listing {
    running: HashSet<PathBuf>,
    queuing: HashSet<PathBuf>,
    /// False if the scheduler couldn't be queried.
    available: bool,
}

impl Listing {
    /// Ask `scheduler` for its live jobs and reconcile them with `record`.
    ///
    /// The live listing wins: record entries whose id isn't listed are pruned,
    /// and the record only fills in node dirs the scheduler didn't report.
    /// If the query fails, the record is left alone and the listing is empty,
    /// so every unfinished node will be submitted again.
    pub fn query(scheduler: &dyn Scheduler, record: &mut JobRecord) -> Self {
        let jobs = match scheduler.live_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                log::warn!(
                    "Unable to list live jobs on {}, assuming none: {e}",
                    scheduler.kind()
                );
                return Self::default();
            }
        };

        let live: HashSet<JobId> = jobs.iter().map(|j| j.id.clone()).collect();
        let pruned = record.prune(&live);
        if pruned > 0 {
            log::info!("pruned {pruned} finished jobs from the job record");
        }

        let mut listing = Self {
            available: true,
            ..Self::default()
        };
        for job in jobs {
            let path = job
                .path
                .or_else(|| record.path_of(&job.id).map(Path::to_path_buf));
            let Some(path) = path else {
                log::trace!("ignoring job {} with unknown directory", job.id);
                continue;
            };
            match job.state {
                JobState::Running => listing.running.insert(path),
                JobState::Queuing => listing.queuing.insert(path),
            };
        }
        log::debug!(
            "{} reports {} running and {} queuing jobs",
            scheduler.kind(),
            listing.running.len(),
            listing.queuing.len()
        );
        listing
    }

    /// Completion is checked first, so a stale listing never resubmits a finished
    /// node; a node listed as both running and queuing counts as running.
    pub fn classify(&self, tree: &Tree, id: NodeId) -> NodeState {
        if tree.has_been(id, status::COMPLETED) {
            return NodeState::Completed;
        }
        let dir = tree.abs_path(id);
        if self.running.contains(&dir) {
            NodeState::Running
        } else if self.queuing.contains(&dir) {
            NodeState::Queuing
        } else {
            NodeState::Pending
        }
    }
}

/// Outcome of submitting one file.
#[derive(Debug)]
pub struct Submitted {
    pub file: SubmissionFile,
    pub result: Result<Vec<(JobId, PathBuf)>, Error>,
}

/// Submit every file, concurrently when the backend allows it, and record the
/// new job ids. A failed file doesn't stop the others.
pub fn submit_files(
    scheduler: &dyn Scheduler,
    files: Vec<SubmissionFile>,
    record: &mut JobRecord,
) -> Vec<Submitted> {
    let submit = |file: SubmissionFile| {
        log::debug!("submitting {:?}", file.path);
        let result = scheduler.submit(&file);
        Submitted { file, result }
    };
    let outcomes: Vec<Submitted> = if scheduler.parallel_submit() {
        files.into_par_iter().map(submit).collect()
    } else {
        files.into_iter().map(submit).collect()
    };

    for outcome in &outcomes {
        match &outcome.result {
            Ok(ids) => {
                for (id, node) in ids {
                    record.insert(id.clone(), node.clone());
                }
            }
            Err(e) => log::warn!("submitting {:?} failed: {e}", outcome.file.path),
        }
    }
    outcomes
}
