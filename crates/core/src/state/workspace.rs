//! # Workspace
//!
//! The on-disk staging area for a run. Module clones live at
//! `<root>/<module>`; the directory the run started in is remembered as
//! "home" and re-asserted between modules.
//!
//! Subprocesses always receive their working directory explicitly, so
//! `restore_home` is a checkpoint rather than a repair step.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Staging directory bookkeeping for one run
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    home: PathBuf,
}

impl Workspace {
    /// Remember the current directory as home. A relative `root` is
    /// resolved against it.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let home = std::env::current_dir()?;
        Ok(Self::with_home(root, home))
    }

    /// Same as [`Workspace::new`] with an explicit home directory.
    pub fn with_home(root: impl AsRef<Path>, home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            home.join(root)
        };
        Self { root, home }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// `<root>/<module>`
    pub fn module_dir(&self, module: &str) -> PathBuf {
        self.root.join(module)
    }

    /// Create the staging root if absent.
    pub fn ensure_root(&self) -> Result<()> {
        ensure_dir(&self.root)
    }

    /// Delete a module's directory so the next clone starts empty.
    pub fn reset_module_dir(&self, module: &str) -> Result<PathBuf> {
        let dir = self.module_dir(module);
        reset_dir(&dir)?;
        Ok(dir)
    }

    /// Change back to the home directory if something moved the process.
    pub fn restore_home(&self) -> Result<()> {
        if std::env::current_dir().ok().as_deref() != Some(self.home.as_path()) {
            tracing::debug!(home = %self.home.display(), "Restoring working directory");
            std::env::set_current_dir(&self.home)?;
        }
        Ok(())
    }
}

/// Create `path` and its parents; no error if it already exists.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Recursively delete `path`; no error if it is absent.
pub fn reset_dir(path: &Path) -> Result<()> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "Removing stale directory");
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}
