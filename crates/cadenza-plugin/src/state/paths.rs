//! Files owned by a plugin's saved state.

use std::io;
use std::path::{Path, PathBuf};

/// Maps between paths a plugin stores in its state and files on disk.
///
/// Files a plugin creates while saving live under `<plugins_dir>/<insert_id>/`; the plugin
/// stores them relative to that directory so a moved session still resolves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    dir: PathBuf,
}

impl StatePaths {
    pub fn new(plugins_dir: impl AsRef<Path>, insert_id: &str) -> Self {
        Self {
            dir: plugins_dir.as_ref().join(insert_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to store in state: relative when inside the state directory, unchanged
    /// otherwise.
    pub fn abstract_path(&self, absolute: &Path) -> PathBuf {
        match absolute.strip_prefix(&self.dir) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => absolute.to_path_buf(),
        }
    }

    /// Resolve a stored path against the state directory.
    pub fn absolute_path(&self, abstract_path: &Path) -> PathBuf {
        if abstract_path.is_absolute() {
            abstract_path.to_path_buf()
        } else {
            self.dir.join(abstract_path)
        }
    }

    /// Path for a new file the plugin wants to write, creating its parent directories.
    pub fn new_file_path(&self, relative: &Path) -> io::Result<PathBuf> {
        let path = self.dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }
}
