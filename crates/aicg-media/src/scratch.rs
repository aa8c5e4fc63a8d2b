//! Scratch directory management.
//!
//! All assembly intermediates live under `/tmp/aicg-{uuid}`; the guard
//! removes the tree on drop, success or failure.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::MediaResult;

/// RAII scratch directory.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create a fresh scratch directory under the system temp root.
    pub fn create() -> MediaResult<Self> {
        let path = std::env::temp_dir().join(format!("aicg-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "created scratch dir");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A file path inside the scratch dir.
    pub fn file(&self, name: impl AsRef<str>) -> PathBuf {
        self.path.join(name.as_ref())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if self.path.exists() {
                warn!(path = %self.path.display(), "failed to clean scratch dir: {e}");
            }
        } else {
            debug!(path = %self.path.display(), "cleaned scratch dir");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_dir_is_cleaned_on_drop() {
        let path;
        {
            let scratch = ScratchDir::create().unwrap();
            path = scratch.path().to_path_buf();
            std::fs::write(scratch.file("clip_000.mp4"), b"data").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn scratch_dirs_are_unique() {
        let a = ScratchDir::create().unwrap();
        let b = ScratchDir::create().unwrap();
        assert_ne!(a.path(), b.path());
    }
}
