use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use util::HashSet;

use super::{Error, JobId};
use crate::fs::Fs;

/// Persisted map from scheduler job id to the absolute dir of the node it runs,
/// so a later pass recognizes jobs submitted by an earlier one.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct JobRecord {
    jobs: BTreeMap<JobId, PathBuf>,
}

impl JobRecord {
    /// Load the record at `path`. A missing record is empty.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::Record(path.to_owned(), e.to_string())),
        };
        let jobs =
            serde_json::from_str(&text).map_err(|e| Error::Record(path.to_owned(), e.to_string()))?;
        Ok(Self { jobs })
    }

    /// Atomically replace the record at `path`.
    pub fn save(&self, fs: &Fs, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs.create_dir(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.jobs)?;
        fs.write_file(path, &text)
            .with_context(|| format!("saving job record {path:?}"))
    }

    /// Remember that `id` runs `node_dir`. Older ids for the same node are dropped,
    /// so each node has at most one outstanding job.
    pub fn insert(&mut self, id: JobId, node_dir: PathBuf) {
        self.jobs.retain(|_, p| *p != node_dir);
        self.jobs.insert(id, node_dir);
    }

    /// Drop every entry whose id is not in `live`. Returns how many were dropped.
    pub fn prune(&mut self, live: &HashSet<JobId>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|id, path| {
            let keep = live.contains(id);
            if !keep {
                log::debug!("pruning stale job {id} for {path:?}");
            }
            keep
        });
        before - self.jobs.len()
    }

    pub fn path_of(&self, id: &str) -> Option<&Path> {
        self.jobs.get(id).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JobId, &PathBuf)> {
        self.jobs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_load_prune() -> Result<()> {
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), false);
        let path = dir.path().join("submission_files/job_record.json");

        assert!(JobRecord::load(&path)?.is_empty());

        let mut record = JobRecord::default();
        record.insert("12.0".into(), "/s/000".into());
        record.insert("12.1".into(), "/s/001".into());
        // resubmission replaces the old id:
        record.insert("13.0".into(), "/s/000".into());
        assert_eq!(record.len(), 2);
        assert_eq!(record.path_of("13.0"), Some(Path::new("/s/000")));
        assert_eq!(record.path_of("12.0"), None);
        record.save(&fs, &path)?;

        let mut loaded = JobRecord::load(&path)?;
        assert_eq!(loaded, record);

        let live: HashSet<JobId> = ["13.0".to_owned()].into_iter().collect();
        assert_eq!(loaded.prune(&live), 1);
        assert_eq!(loaded.iter().count(), 1);
        Ok(())
    }

    #[test]
    fn test_malformed_record() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("job_record.json");
        std::fs::write(&path, "[1, 2")?;
        assert!(matches!(JobRecord::load(&path), Err(Error::Record(..))));
        Ok(())
    }
}
