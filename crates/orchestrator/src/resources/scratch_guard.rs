//! RAII guard for the per-run scratch area.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::Result;

/// Scratch directory owned by one run.
///
/// Removed when the guard drops, unless the run asked to keep it for
/// inspection, in which case the path is logged and left in place.
pub struct ScratchArea {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl ScratchArea {
    /// Create a uniquely named directory under `parent`.
    pub fn create(parent: &Path, tag: &str, keep: bool) -> Result<Self> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("snapclone-{}-", tag))
            .tempdir_in(parent)?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), keep, "Scratch area created");

        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchArea {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.keep {
            #[allow(deprecated)]
            let kept = dir.into_path();
            info!(path = %kept.display(), "Keeping scratch area");
        } else {
            debug!(path = %self.path.display(), "Removing scratch area");
            drop(dir);
        }
    }
}
