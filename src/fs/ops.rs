use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;

use util::PathEncodingError;

use super::Error;

/// Mode of plain documents (configs, submission files, records).
pub const FILE_MODE: u32 = 0o644;
/// Mode of launch scripts.
pub const SCRIPT_MODE: u32 = 0o755;

/// Write `bytes` to a temp file next to `tgt`, then rename it over `tgt`.
/// The file ends up with permission bits `mode`.
pub fn write_atomic(tgt: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(parent_of(tgt)?)?;
    tmp.write_all(bytes)?;
    set_mode(tmp.path(), mode)?;
    tmp.persist(tgt)?;
    Ok(())
}

/// Copy `src` to `tgt`, recursively if needed, replacing whatever is at `tgt`.
/// The copy is built under a temporary name and renamed into place.
pub fn copy(src: &Path, tgt: &Path) -> Result<()> {
    if src.is_symlink() {
        let link_tgt = fs::read_link(src)?;
        if tgt.is_symlink() || tgt.is_file() {
            fs::remove_file(tgt)?;
        }
        symlink(&link_tgt, tgt)?;
    } else if src.is_file() {
        let tmp = tempfile::NamedTempFile::new_in(parent_of(tgt)?)?;
        fs::copy(src, tmp.path())?;
        tmp.persist(tgt)?;
    } else if src.is_dir() {
        let tmp = tempfile::Builder::new()
            .prefix(".clone")
            .tempdir_in(parent_of(tgt)?)?;
        // internal links are resolved against the final location, not the temp dir:
        cp_dir(src, tgt, src, tmp.path())?;
        if tgt.is_dir() {
            fs::remove_dir_all(tgt)?;
        }
        // NB the TempDir guard will find nothing left to clean up after this:
        fs::rename(tmp.path(), tgt)?;
    } else {
        return Err(
            Error::UnknownPathType(src.to_str().ok_or(PathEncodingError)?.to_owned()).into(),
        );
    }
    Ok(())
}

fn cp_dir(src_root: &Path, tgt_root: &Path, src: &Path, tgt: &Path) -> Result<()> {
    fs::create_dir_all(tgt)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_entry = entry.path();
        let tgt_entry = tgt.join(entry.file_name());
        if ty.is_symlink() {
            let orig_link_tgt = fs::read_link(&src_entry)?;
            let new_link_tgt = resolve_new_link_tgt(src_root, tgt_root, orig_link_tgt)?;
            symlink(&new_link_tgt, &tgt_entry)?;
        } else if ty.is_dir() {
            cp_dir(src_root, tgt_root, &src_entry, &tgt_entry)?;
        } else if ty.is_file() {
            fs::copy(&src_entry, &tgt_entry)?;
        } else {
            return Err(Error::UnknownPathType(
                entry.path().to_str().ok_or(PathEncodingError)?.to_owned(),
            )
            .into());
        }
    }
    Ok(())
}

/// If link is internal to `src_root`, create a new internal link in `tgt_root`.
/// O/w, just link to the same external target.
fn resolve_new_link_tgt(
    src_root: &Path,
    tgt_root: &Path,
    orig_link_tgt: PathBuf,
) -> Result<PathBuf> {
    if orig_link_tgt.starts_with(src_root) {
        Ok(tgt_root.join(orig_link_tgt.strip_prefix(src_root)?))
    } else {
        Ok(orig_link_tgt)
    }
}

fn parent_of(path: &Path) -> Result<&Path> {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => Ok(p),
        Some(_) => Ok(Path::new(".")),
        None => Err(Error::NoParent(path.to_str().ok_or(PathEncodingError)?.to_owned()).into()),
    }
}

/// Symlink the given `link` to `tgt`; works for unix and windows.
pub fn symlink(tgt: &Path, link: &Path) -> Result<()> {
    #[cfg(unix)]
    std::os::unix::fs::symlink(tgt, link)?;

    #[cfg(windows)]
    if tgt.is_dir() {
        std::os::windows::fs::symlink_dir(tgt, link)?;
    } else {
        std::os::windows::fs::symlink_file(tgt, link)?;
    }
    Ok(())
}

/// Permission bits of `path`.
#[cfg(unix)]
pub fn mode_of(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
pub fn mode_of(path: &Path) -> Result<u32> {
    fs::metadata(path)?;
    Ok(FILE_MODE)
}

/// Set the permission bits of `path` to `mode`.
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_copy_file_replaces_target() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src");
        fs::write(&src, "text to copy")?;

        let tgt = dir.path().join("tgt");
        fs::write(&tgt, "stale contents from an earlier run")?;

        copy(&src, &tgt)?;
        assert_eq!(fs::read_to_string(&tgt)?, "text to copy");

        // and again, to check that re-copying is harmless:
        copy(&src, &tgt)?;
        assert_eq!(fs::read_to_string(&tgt)?, "text to copy");

        let leftovers = fs::read_dir(dir.path())?.count();
        assert_eq!(leftovers, 2, "no temp files left behind");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_sets_mode() -> Result<()> {
        let dir = tempdir()?;
        let doc = dir.path().join("config.yaml");
        write_atomic(&doc, b"a: 1\n", FILE_MODE)?;
        assert_eq!(mode_of(&doc)?, 0o644);

        // rewriting keeps the requested mode, not the temp file's:
        write_atomic(&doc, b"a: 2\n", 0o750)?;
        assert_eq!(mode_of(&doc)?, 0o750);
        assert_eq!(fs::read_to_string(&doc)?, "a: 2\n");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_dir() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src/prefix/dir");
        fs::create_dir_all(&src)?;
        let src_subdir = src.join("subdir");
        fs::create_dir(&src_subdir)?;
        let file = src_subdir.join("file");
        fs::write(&file, "text to copy")?;

        let file_link = src.join("file_link");
        symlink(&file, &file_link)?;

        let external_link = src.join("external_link");
        symlink("/dev/null".as_ref(), &external_link)?;

        let tgt = dir.path().join("tgt");
        fs::create_dir(&tgt)?;
        fs::write(tgt.join("stale"), "from before")?;

        copy(&src, &tgt)?;

        assert!(tgt.join("subdir").is_dir());
        assert!(!tgt.join("stale").exists());
        assert_eq!(fs::read_to_string(tgt.join("subdir/file"))?, "text to copy");

        let tgt_file_link = tgt.join("file_link");
        assert!(tgt_file_link.is_symlink());
        assert_eq!(fs::read_link(&tgt_file_link)?, tgt.join("subdir/file"));
        assert_eq!(fs::read_to_string(&tgt_file_link)?, "text to copy");

        let tgt_external_link = tgt.join("external_link");
        assert!(tgt_external_link.is_symlink());
        assert_eq!(&fs::read_link(&tgt_external_link)?, &Path::new("/dev/null"));

        Ok(())
    }
}
