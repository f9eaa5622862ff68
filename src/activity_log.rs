//! Persistent record of what the organizer did.
//!
//! Every move attempt appends one entry. Diagnostics go through `tracing`;
//! this log is the user's audit trail and lives next to the organized files.

use crate::config::LogFormat;
use chrono::{DateTime, Local};
use serde_json::json;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only sink for activity entries.
pub trait ActivityLog: Send + Sync {
    /// Appends `message`, stamped with `at`.
    ///
    /// Callers treat errors as non-fatal.
    fn record(&self, message: &str, at: DateTime<Local>) -> io::Result<()>;
}

/// Appends entries to a file, one per line.
#[derive(Debug)]
pub struct FileActivityLog {
    path: PathBuf,
    format: LogFormat,
    file: Mutex<File>,
}

impl FileActivityLog {
    /// Opens (or creates) the log at `path`, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>, format: LogFormat) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            format,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format_line(&self, message: &str, at: DateTime<Local>) -> String {
        match self.format {
            LogFormat::Text => {
                format!("{} - {}\n", at.format("%Y-%m-%d %H:%M:%S,%3f"), message)
            }
            LogFormat::Json => {
                let entry = json!({
                    "timestamp": at.to_rfc3339(),
                    "message": message,
                });
                format!("{}\n", entry)
            }
        }
    }
}

impl ActivityLog for FileActivityLog {
    fn record(&self, message: &str, at: DateTime<Local>) -> io::Result<()> {
        let line = self.format_line(message, at);
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("activity log lock poisoned"))?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

/// Drops every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullActivityLog;

impl ActivityLog for NullActivityLog {
    fn record(&self, _message: &str, _at: DateTime<Local>) -> io::Result<()> {
        Ok(())
    }
}
