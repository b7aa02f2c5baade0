//! Filesystem helpers shared by the key store, the step runner and the composer.
//!
//! Generated material is signed, so nothing here ever overwrites an existing
//! path. Creation helpers fail with [`Error::AlreadyExists`] instead.

use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Open an existing regular file for reading.
///
/// Symlinks are rejected so a fixture tree cannot be redirected outside its root.
pub fn safe_open_file(path: &Path) -> Result<File> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Err(Error::Validation(format!(
            "Refusing to follow symlink: {}",
            path.display()
        )));
    }
    Ok(File::open(path)?)
}

/// Create a new file, failing if anything already exists at `path`.
pub fn safe_create_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_path_buf()),
            _ => Error::Io(e),
        })
}

/// Create a new file holding `contents`.
pub fn write_new_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = safe_create_file(path)?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(())
}

/// Create a single new directory, failing if it already exists.
pub fn safe_create_dir(path: &Path) -> Result<()> {
    fs::create_dir(path).map_err(|e| match e.kind() {
        ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_path_buf()),
        _ => Error::Io(e),
    })
}

/// Create `path` and any missing parents. Existing directories are fine.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_safe_create_file_refuses_overwrite() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("a.txt");

        write_new_file(&path, b"first")?;
        let result = write_new_file(&path, b"second");

        assert!(matches!(result, Err(Error::AlreadyExists(_))));
        assert_eq!(fs::read(&path)?, b"first");
        Ok(())
    }

    #[test]
    fn test_safe_create_dir_refuses_existing() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sub");

        safe_create_dir(&path)?;
        assert!(matches!(
            safe_create_dir(&path),
            Err(Error::AlreadyExists(_))
        ));
        // ensure_dir is idempotent
        ensure_dir(&path)?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_safe_open_file_rejects_symlink() -> Result<()> {
        let dir = tempdir()?;
        let target = dir.path().join("target.txt");
        let link = dir.path().join("link.txt");
        write_new_file(&target, b"data")?;
        std::os::unix::fs::symlink(&target, &link)?;

        assert!(safe_open_file(&target).is_ok());
        assert!(matches!(safe_open_file(&link), Err(Error::Validation(_))));
        Ok(())
    }
}
