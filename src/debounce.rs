//! Waiting for files to finish arriving.
//!
//! A create notification often fires while the writer (a browser download, a
//! copy from another volume) is still filling the file. [`EventDebouncer::admit`]
//! waits a fixed grace period, then samples size and modification time until two
//! consecutive samples agree. A ceiling bounds the wait; once it is reached the
//! file is processed anyway and the mover's retry policy absorbs any lock errors.
//!
//! The wait only suspends the task that owns the event.

use crate::config::DebounceConfig;
use crate::events::FileEvent;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::time::{Instant, sleep};

/// Verdict on whether a file can be processed now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Size and mtime held still across two samples.
    Stable,
    /// The file kept changing until the ceiling; processed anyway.
    CeilingReached,
    /// Metadata could not be read; the mover will report the real error.
    Unreadable,
    /// The path disappeared while waiting.
    Vanished,
    /// The path is a directory or other non-regular entry.
    NotAFile,
}

impl Admission {
    /// Returns true if the file should go on to classification and moving.
    pub fn should_process(self) -> bool {
        matches!(
            self,
            Admission::Stable | Admission::CeilingReached | Admission::Unreadable
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    len: u64,
    modified: Option<SystemTime>,
}

enum Sample {
    File(Snapshot),
    NotAFile,
    Vanished,
    Unreadable,
}

async fn sample(path: &Path) -> Sample {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Sample::File(Snapshot {
            len: meta.len(),
            modified: meta.modified().ok(),
        }),
        Ok(_) => Sample::NotAFile,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Sample::Vanished,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "cannot stat new file");
            Sample::Unreadable
        }
    }
}

/// Per-event stability gate.
#[derive(Debug, Clone)]
pub struct EventDebouncer {
    grace: Duration,
    poll_interval: Duration,
    max_wait: Duration,
}

impl EventDebouncer {
    pub fn new(config: &DebounceConfig) -> Self {
        Self {
            grace: config.grace(),
            poll_interval: config.poll_interval(),
            max_wait: config.max_wait(),
        }
    }

    /// Waits until `event`'s file looks fully written.
    ///
    /// The ceiling is measured from when the event was observed, so time spent
    /// queued before this call counts against it.
    pub async fn admit(&self, event: &FileEvent) -> Admission {
        let deadline = Instant::from_std(event.observed_at) + self.max_wait;

        sleep(self.grace).await;

        let mut previous = match sample(&event.path).await {
            Sample::File(snapshot) => snapshot,
            Sample::NotAFile => return Admission::NotAFile,
            Sample::Vanished => return Admission::Vanished,
            Sample::Unreadable => return Admission::Unreadable,
        };

        loop {
            if Instant::now() >= deadline {
                tracing::warn!(
                    path = %event.path.display(),
                    waited = ?self.max_wait,
                    "file still changing at debounce ceiling, processing anyway"
                );
                return Admission::CeilingReached;
            }

            sleep(self.poll_interval).await;

            let current = match sample(&event.path).await {
                Sample::File(snapshot) => snapshot,
                Sample::NotAFile => return Admission::NotAFile,
                Sample::Vanished => return Admission::Vanished,
                Sample::Unreadable => return Admission::Unreadable,
            };

            if current == previous {
                return Admission::Stable;
            }
            previous = current;
        }
    }
}
