use crate::error::{Error, Result};
use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Tracks every path a chain composition is about to create.
///
/// Dropping an uncommitted context removes the claimed paths in reverse
/// order, so a chain that fails half way leaves nothing behind.
#[derive(Debug, Default)]
pub struct BuildContext {
    claimed: Vec<PathBuf>,
    committed: bool,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a path that does not exist yet.
    ///
    /// Paths that already exist are never claimed, so rollback can only remove
    /// what this composition created.
    pub fn claim(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if path.exists() || path.is_symlink() {
            return Err(Error::AlreadyExists(path));
        }
        self.claimed.push(path);
        Ok(())
    }

    pub fn claimed(&self) -> &[PathBuf] {
        &self.claimed
    }

    pub fn commit(mut self) {
        self.committed = true;
    }

    fn rollback(&mut self) {
        for path in self.claimed.drain(..).rev() {
            match remove_path(&path) {
                Ok(()) => debug!("Rolled back {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to roll back {}: {e}", path.display()),
            }
        }
    }
}

impl Drop for BuildContext {
    fn drop(&mut self) {
        if !self.committed && !self.claimed.is_empty() {
            warn!("Rolling back {} uncommitted paths", self.claimed.len());
            self.rollback();
        }
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
