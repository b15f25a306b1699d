//!
//! Status markers record the lifecycle of a single job as a small JSON object
//! mapping each tag to the time it was first applied:
//!
//! ```json
//! {"started": "2024-05-02T10:11:12.131415+00:00", "completed": "..."}
//! ```
//!
//! Markers are written by the job itself, usually from another process than the
//! one that built the tree, so every function here takes only the marker path.
//! A missing marker is the normal state of a job that hasn't run yet.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Tag written by a job when it starts.
pub const STARTED: &str = "started";
/// Tag written by a job when it finishes successfully.
pub const COMPLETED: &str = "completed";

/// Tag name -> RFC 3339 timestamp of when it was first applied.
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to read status marker {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Status marker {0:?} is not a JSON object of tags")]
    Malformed(PathBuf, #[source] serde_json::Error),
    #[error("Unable to write status marker {0:?}")]
    Write(PathBuf, #[source] io::Error),
    #[error("Status marker {0:?} has no parent directory")]
    NoParent(PathBuf),
}

/// Read all tags from the marker at `marker`.
/// Unlike [`tags`], this distinguishes a missing marker (empty tags) from a broken one.
pub fn read(marker: &Path) -> Result<Tags, Error> {
    let text = match fs::read_to_string(marker) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Tags::new()),
        Err(e) => return Err(Error::Read(marker.to_owned(), e)),
    };
    if text.trim().is_empty() {
        return Ok(Tags::new());
    }
    serde_json::from_str(&text).map_err(|e| Error::Malformed(marker.to_owned(), e))
}

/// Read all tags from the marker at `marker`.
/// An absent or unreadable marker yields no tags.
pub fn tags(marker: &Path) -> Tags {
    match read(marker) {
        Ok(tags) => tags,
        Err(e) => {
            log::debug!("treating marker as empty: {e}");
            Tags::new()
        }
    }
}

/// True if `tag` has ever been applied to the marker at `marker`.
pub fn has_been(marker: &Path, tag: &str) -> bool {
    tags(marker).contains_key(tag)
}

/// Apply `tag` to the marker at `marker`, creating the marker if needed.
///
/// Tags are never removed, and re-applying a tag keeps its original timestamp.
/// The marker is replaced atomically so a concurrent reader never sees a partial file.
pub fn tag_it(marker: &Path, tag: &str) -> Result<(), Error> {
    let mut tags = read(marker)?;
    if tags.contains_key(tag) {
        log::debug!("{marker:?} is already tagged {tag}");
        return Ok(());
    }
    tags.insert(tag.to_owned(), chrono::Local::now().to_rfc3339());
    write_atomic(marker, &tags)
}

/// Delete the marker at `marker`. Returns false if there was nothing to delete.
pub fn clean(marker: &Path) -> Result<bool, Error> {
    match fs::remove_file(marker) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Write(marker.to_owned(), e)),
    }
}

fn write_atomic(marker: &Path, tags: &Tags) -> Result<(), Error> {
    let dir = marker
        .parent()
        .ok_or_else(|| Error::NoParent(marker.to_owned()))?;
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    let wrap = |e: io::Error| Error::Write(marker.to_owned(), e);

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(wrap)?;
    let text = serde_json::to_string_pretty(tags).map_err(|e| wrap(e.into()))?;
    tmp.write_all(text.as_bytes()).map_err(wrap)?;
    tmp.write_all(b"\n").map_err(wrap)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644)).map_err(wrap)?;
    }
    tmp.persist(marker).map_err(|e| wrap(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_marker_has_no_tags() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("status.json");
        assert!(!has_been(&marker, STARTED));
        assert!(!has_been(&marker, COMPLETED));
        assert!(read(&marker).unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_marker_has_no_tags() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("status.json");
        fs::write(&marker, "this is not json").unwrap();
        assert!(read(&marker).is_err());
        assert!(!has_been(&marker, COMPLETED));
    }

    #[test]
    fn test_tags_are_monotonic() -> Result<(), Error> {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("status.json");

        tag_it(&marker, STARTED)?;
        assert!(has_been(&marker, STARTED));
        assert!(!has_been(&marker, COMPLETED));
        let started_at = read(&marker)?[STARTED].clone();

        tag_it(&marker, COMPLETED)?;
        tag_it(&marker, STARTED)?;
        let tags = read(&marker)?;
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[STARTED], started_at, "re-tagging keeps the first timestamp");

        for _ in 0..3 {
            assert!(has_been(&marker, COMPLETED));
        }
        Ok(())
    }

    #[test]
    fn test_clean() -> Result<(), Error> {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("status.json");
        assert!(!clean(&marker)?);
        tag_it(&marker, COMPLETED)?;
        assert!(clean(&marker)?);
        assert!(!has_been(&marker, COMPLETED));
        Ok(())
    }

    #[test]
    fn test_tag_without_dir_fails() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("not_cloned/status.json");
        assert!(matches!(tag_it(&marker, STARTED), Err(Error::Write(..))));
    }
}
