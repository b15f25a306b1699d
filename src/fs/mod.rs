use std::path::{Path, PathBuf};
use std::{fs, io};

use anyhow::{Context, Result};

use util::PathEncodingError;

/// Utility fns
mod ops;

/// Defines fns for creating common paths in the study directory
mod paths;
pub use paths::{CONFIG_YAML, RUN_SBATCH, RUN_SH, STDERR_TXT, STDOUT_TXT};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Path is neither file nor dir: {0}")]
    UnknownPathType(String),
    #[error("Specified study directory \"{0}\" is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
    #[error("Path has no parent directory: {0}")]
    NoParent(String),
}

/// All file operations in the crate should go through this struct.
///
/// All destructive operations check that the path in question is a child of the
/// single whitelisted prefix (the study dir), otherwise they will not be performed.
/// Note that the external jobs can break this rule; it is up to the user
/// to make sure that they don't have unintended consequences.
///
/// Everything that a concurrent reader might look at (copied templates, configs,
/// launch scripts, the job record) is written to a temp file and renamed into place.
#[derive(Debug)]
pub struct Fs {
    /// The directory we are allowed to modify
    study_dir: PathBuf,
    /// if true, prevents all destructive operations
    dry_run: bool,
}

impl Fs {
    /// Create a new `Fs` with the given study directory.
    pub fn new(study_dir: &Path, dry_run: bool) -> Self {
        Self {
            study_dir: study_dir.to_path_buf(),
            dry_run,
        }
    }

    /// The whitelisted study directory.
    pub fn study_dir(&self) -> &Path {
        &self.study_dir
    }

    /// Check whether the study dir exists, and create it if not.
    pub fn ensure_study_dir_exists(&mut self, verbose: bool) -> Result<()> {
        if !self.study_dir.exists() {
            if self.dry_run {
                eprintln!("Dry run. Not creating study directory {:?}", self.study_dir);
                return Ok(());
            }
            eprintln!(
                "Study directory {:?} doesn't exist. Creating.",
                self.study_dir
            );
            fs::create_dir_all(&self.study_dir).context("creating study directory")?;
        } else if !self.study_dir.is_dir() {
            return Err(Error::NotDirectory(
                self.study_dir
                    .to_str()
                    .ok_or(PathEncodingError)?
                    .to_string(),
            )
            .into());
        } else if verbose {
            eprintln!(
                "Study directory {:?} already exists. Not creating.",
                self.study_dir
            );
        }

        self.study_dir = self.study_dir.canonicalize()?;
        Ok(())
    }

    /// Check if path exists on disk.
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Check if path exists and is a directory.
    pub fn is_dir<T: AsRef<Path>>(&self, path: T) -> Result<bool> {
        let path = path.as_ref();
        if path.is_dir() || (path.is_symlink() && path.canonicalize()?.is_dir()) {
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Create a directory (uses `std::fs::create_dir_all`, so an entire tree of dirs can be created).
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::create_dir_all(path).context("creating dir")?;
        Ok(())
    }

    /// Atomically replace the contents of `path` with `text`.
    pub fn write_file<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        ops::write_atomic(path, text.as_bytes(), ops::FILE_MODE)
            .with_context(|| format!("writing file {path:?}"))?;
        Ok(())
    }

    /// Atomically replace the contents of `path` with `text`,
    /// giving it the same permissions as `like`.
    pub fn write_file_like<T: AsRef<Path>, U: AsRef<Path>>(
        &self,
        path: T,
        text: &str,
        like: U,
    ) -> Result<()> {
        let (path, like) = (path.as_ref(), like.as_ref());
        self.check_whitelist(path)?;
        let mode = ops::mode_of(like).with_context(|| format!("reading mode of {like:?}"))?;
        ops::write_atomic(path, text.as_bytes(), mode)
            .with_context(|| format!("writing file {path:?}"))?;
        Ok(())
    }

    /// Atomically replace `path` with an executable script containing `text`.
    pub fn write_executable<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        ops::write_atomic(path, text.as_bytes(), ops::SCRIPT_MODE)
            .with_context(|| format!("writing script {path:?}"))?;
        Ok(())
    }

    /// Delete a file.
    pub fn delete_file<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_file(path).context("deleting file")?;
        Ok(())
    }

    /// Recursively delete a directory.
    pub fn delete_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_dir_all(path).context("deleting dir")?;
        Ok(())
    }

    /// Copy `src` to `tgt`, recursively if `src` is a directory.
    /// An existing `tgt` is replaced.
    pub fn copy<T: AsRef<Path>, U: AsRef<Path>>(&self, src: T, tgt: U) -> Result<()> {
        let (src, tgt) = (src.as_ref(), tgt.as_ref());
        self.check_whitelist(tgt)?;
        ops::copy(src, tgt).with_context(|| format!("copying {src:?} to {tgt:?}"))?;
        Ok(())
    }

    /// Read entire file into a String.
    pub fn read_to_string<T: AsRef<Path>>(&self, path: T) -> Result<String, io::Error> {
        fs::read_to_string(path)
    }

    /// Read a file's raw bytes.
    pub fn read<T: AsRef<Path>>(&self, path: T) -> Result<Vec<u8>, io::Error> {
        fs::read(path)
    }

    /// List entries in a directory
    pub fn read_dir<T: AsRef<Path>>(&self, path: T) -> Result<fs::ReadDir, io::Error> {
        fs::read_dir(path)
    }

    fn is_whitelisted<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        if path.starts_with(&self.study_dir) {
            return true;
        }
        false
    }

    fn check_whitelist(&self, path: &Path) -> Result<()> {
        if self.dry_run || !self.is_whitelisted(path) {
            Err(Error::NotWhitelisted(path.to_str().ok_or(PathEncodingError)?.to_owned()).into())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_whitelist() -> Result<()> {
        let dir = tempdir()?;
        let study = dir.path().join("study");
        let mut fs = Fs::new(&study, false);
        fs.ensure_study_dir_exists(false)?;
        let study = fs.study_dir().to_path_buf();

        fs.write_file(study.join("inside.txt"), "ok")?;
        assert_eq!(fs.read_to_string(study.join("inside.txt"))?, "ok");
        assert!(fs.write_file(dir.path().join("outside.txt"), "no").is_err());
        assert!(!dir.path().join("outside.txt").exists());
        Ok(())
    }

    #[test]
    fn test_dry_run_refuses_writes() -> Result<()> {
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), true);
        assert!(fs.create_dir(dir.path().join("x")).is_err());
        assert!(!dir.path().join("x").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_write_executable() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), false);
        let script = dir.path().join("run.sh");
        fs.write_executable(&script, "#!/usr/bin/env bash\n")?;
        let mode = std::fs::metadata(&script)?.permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_write_file_like_keeps_template_mode() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), false);
        let template = dir.path().join("job.sh");
        std::fs::write(&template, "echo {{ROOT}}\n")?;
        std::fs::set_permissions(&template, std::fs::Permissions::from_mode(0o755))?;

        let rendered = dir.path().join("rendered.sh");
        fs.write_file_like(&rendered, "echo ..\n", &template)?;
        assert_eq!(std::fs::metadata(&rendered)?.permissions().mode() & 0o777, 0o755);

        let doc = dir.path().join("config.yaml");
        fs.write_file(&doc, "a: 1\n")?;
        assert_eq!(std::fs::metadata(&doc)?.permissions().mode() & 0o777, 0o644);
        Ok(())
    }
}
