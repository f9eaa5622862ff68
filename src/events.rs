use std::path::{Path, PathBuf};
use std::time::Instant;

/// A file that appeared in the watched directory.
///
/// Built from a filesystem notification and consumed once by the file task
/// spawned for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub observed_at: Instant,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            observed_at: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file name as text, lossily converted.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
