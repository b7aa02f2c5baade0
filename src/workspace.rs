//! On-disk arrangement of a generated bundle.
//!
//! ```text
//! <root>/keys/<chain>-<role>            PEM private key
//! <root>/keys/<chain>-<role>.pub        PEM public key
//! <root>/metadata/<chain>.layout        signed layout
//! <root>/metadata/<chain>/              signed links (and embedded tiers)
//! <root>/artifacts/<chain>.src|.tar     fixture artifacts
//! ```
//!
//! Each top-level directory may carry a `.keep` sentinel which clean mode
//! leaves in place.

use crate::error::Result;
use crate::utils::{ensure_dir, write_new_file};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const KEYS_DIR: &str = "keys";
pub const METADATA_DIR: &str = "metadata";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const SENTINEL: &str = ".keep";
pub const LAYOUT_EXTENSION: &str = "layout";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

/// Outcome of a clean run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: usize,
    pub failed: usize,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join(KEYS_DIR)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    fn managed_dirs(&self) -> [PathBuf; 3] {
        [self.keys_dir(), self.metadata_dir(), self.artifacts_dir()]
    }

    /// Create the three top-level directories and their sentinels if missing.
    pub fn prepare(&self) -> Result<()> {
        for dir in self.managed_dirs() {
            ensure_dir(&dir)?;
            let sentinel = dir.join(SENTINEL);
            if !sentinel.exists() {
                write_new_file(&sentinel, b"")?;
            }
        }
        Ok(())
    }

    pub fn layout_path(&self, chain: &str) -> PathBuf {
        self.metadata_dir().join(format!("{chain}.{LAYOUT_EXTENSION}"))
    }

    pub fn link_dir(&self, chain: &str) -> PathBuf {
        self.metadata_dir().join(chain)
    }

    /// Artifact path relative to the root, as recorded in links.
    pub fn artifact(&self, chain: &str, extension: &str) -> String {
        format!("{ARTIFACTS_DIR}/{chain}.{extension}")
    }

    /// Remove everything under the managed directories except sentinels.
    ///
    /// Best effort: missing directories are skipped and individual failures
    /// are logged and counted rather than aborting the run.
    pub fn clean(&self) -> Result<CleanReport> {
        let mut report = CleanReport::default();

        for dir in self.managed_dirs() {
            if !dir.is_dir() {
                debug!("Nothing to clean in {}", dir.display());
                continue;
            }

            for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Cannot read entry in {}: {e}", dir.display());
                        report.failed += 1;
                        continue;
                    }
                };
                if entry.file_name() == SENTINEL {
                    continue;
                }

                let result = if entry.file_type().is_dir() {
                    fs::remove_dir_all(entry.path())
                } else {
                    fs::remove_file(entry.path())
                };
                match result {
                    Ok(()) => report.removed += 1,
                    Err(e) => {
                        warn!("Failed to remove {}: {e}", entry.path().display());
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "Cleaned {}: removed {} entries ({} failures)",
            self.root.display(),
            report.removed,
            report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_prepare_creates_sentinels() -> Result<()> {
        let dir = tempdir()?;
        let workspace = Workspace::new(dir.path());

        workspace.prepare()?;
        workspace.prepare()?;

        for name in [KEYS_DIR, METADATA_DIR, ARTIFACTS_DIR] {
            assert!(dir.path().join(name).join(SENTINEL).is_file());
        }
        Ok(())
    }

    #[test]
    fn test_paths() {
        let workspace = Workspace::new("/w");
        assert_eq!(
            workspace.layout_path("supply-chain-0"),
            Path::new("/w/metadata/supply-chain-0.layout")
        );
        assert_eq!(
            workspace.link_dir("supply-chain-0"),
            Path::new("/w/metadata/supply-chain-0")
        );
        assert_eq!(
            workspace.artifact("supply-chain-0", "tar"),
            "artifacts/supply-chain-0.tar"
        );
    }

    #[test]
    fn test_clean_keeps_only_sentinels() -> Result<()> {
        let dir = tempdir()?;
        let workspace = Workspace::new(dir.path());
        workspace.prepare()?;

        write_new_file(&workspace.keys_dir().join("a-owner"), b"k")?;
        ensure_dir(&workspace.link_dir("a").join("nested"))?;
        write_new_file(&workspace.link_dir("a").join("nested/x.link"), b"{}")?;
        write_new_file(&workspace.artifacts_dir().join("a.src"), b"src")?;

        let report = workspace.clean()?;
        assert_eq!(report, CleanReport { removed: 3, failed: 0 });

        for dir in workspace.managed_dirs() {
            let names: Vec<_> = fs::read_dir(&dir)?
                .map(|e| e.map(|e| e.file_name()))
                .collect::<std::io::Result<_>>()?;
            assert_eq!(names, vec![std::ffi::OsString::from(SENTINEL)]);
        }
        Ok(())
    }

    #[test]
    fn test_clean_tolerates_missing_directories() -> Result<()> {
        let dir = tempdir()?;
        let report = Workspace::new(dir.path().join("absent")).clean()?;
        assert_eq!(report, CleanReport::default());
        Ok(())
    }
}
