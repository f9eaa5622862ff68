//! Moving files into category directories.
//!
//! The [`Mover`] places a file under `<destination root>/<category>/`, keeping its
//! base name. Nothing at the destination is ever replaced: if the name is taken,
//! the file is stored as `name (1).ext`, `name (2).ext` and so on.
//!
//! Each candidate name is claimed with a primitive that fails instead of
//! overwriting: a hard link on the same volume, or a `create_new` copy when
//! linking is not possible. The source is removed only after the destination is
//! complete, so a file is either fully moved or left untouched.

use crate::config::MoverConfig;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::future::Future;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Highest numeric suffix tried before giving up on a name.
pub const MAX_SUFFIX: u32 = 9999;

/// Why a move could not be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The file stayed in use for every retry.
    Locked,
    /// The source or destination is not writable.
    PermissionDenied,
    /// The destination volume has no space left.
    StorageFull,
    /// Every suffixed name up to [`MAX_SUFFIX`] is taken.
    NameSpaceExhausted,
    /// Any other I/O failure.
    Io,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::Locked => "file is in use by another program",
            FailureReason::PermissionDenied => "permission denied",
            FailureReason::StorageFull => "destination disk is full",
            FailureReason::NameSpaceExhausted => "no free file name at the destination",
            FailureReason::Io => "I/O error",
        };
        f.write_str(text)
    }
}

/// Errors that can occur while moving a single file.
#[derive(Debug, Error)]
pub enum MoveError {
    /// The file disappeared before it could be moved.
    #[error("{} was removed before it could be moved", .path.display())]
    SourceVanished { path: PathBuf },

    /// The file is in use by another process; worth retrying.
    #[error("{} is in use by another process", .path.display())]
    TransientLock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The candidate destination name is taken.
    ///
    /// Resolved inside the mover by trying the next suffix.
    #[error("{} already exists", .path.display())]
    DestinationNameCollision { path: PathBuf },

    /// The move failed for good.
    #[error("could not move {}: {reason}", .path.display())]
    MoveFailed {
        path: PathBuf,
        reason: FailureReason,
        #[source]
        source: Option<io::Error>,
    },
}

impl MoveError {
    /// Short, user-facing description of the failure category.
    pub fn reason(&self) -> String {
        match self {
            MoveError::SourceVanished { .. } => "file was removed before it could be moved".to_string(),
            MoveError::TransientLock { .. } => FailureReason::Locked.to_string(),
            MoveError::DestinationNameCollision { .. } => {
                FailureReason::NameSpaceExhausted.to_string()
            }
            MoveError::MoveFailed { reason, .. } => reason.to_string(),
        }
    }

    /// Returns true for outcomes that are not worth alerting anyone about.
    pub fn is_benign(&self) -> bool {
        matches!(self, MoveError::SourceVanished { .. })
    }

    fn failed(path: &Path, reason: FailureReason, source: Option<io::Error>) -> Self {
        MoveError::MoveFailed {
            path: path.to_path_buf(),
            reason,
            source,
        }
    }
}

/// Result type for single-file move operations.
pub type MoveResult<T> = Result<T, MoveError>;

/// What happened to one file.
#[derive(Debug)]
pub struct MoveOutcome {
    /// Where the file was found.
    pub source: PathBuf,
    /// Where the file ended up, or where it was headed when the move failed.
    pub destination: PathBuf,
    /// The category the file was classified into.
    pub category: String,
    /// Why the move did not happen, if it did not.
    pub error: Option<MoveError>,
}

impl MoveOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// The source file name, for messages.
    pub fn file_name(&self) -> String {
        display_name(&self.source)
    }

    /// One-line description suitable for a notification and the activity log.
    pub fn summary(&self) -> String {
        let name = self.file_name();
        match &self.error {
            None => {
                let stored_as = display_name(&self.destination);
                if stored_as == name {
                    format!("Moved {} → {}", name, self.category)
                } else {
                    format!("Moved {} → {} as {}", name, self.category, stored_as)
                }
            }
            Some(MoveError::SourceVanished { .. }) => {
                format!("Skipped {}: it was removed before it could be moved", name)
            }
            Some(error) => {
                format!(
                    "Could not move {} → {}: {}",
                    name,
                    self.category,
                    error.reason()
                )
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Moves files into category directories under a destination root.
#[derive(Debug, Clone)]
pub struct Mover {
    destination_root: PathBuf,
    retry: MoverConfig,
}

impl Mover {
    pub fn new(destination_root: impl Into<PathBuf>, retry: MoverConfig) -> Self {
        Self {
            destination_root: destination_root.into(),
            retry,
        }
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    /// The directory files of `category` are moved into.
    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.destination_root.join(category)
    }

    /// Creates the destination root and one directory per category.
    ///
    /// Safe to call repeatedly and concurrently.
    pub fn prepare_tree<'a>(&self, categories: impl IntoIterator<Item = &'a str>) -> io::Result<()> {
        ensure_dir(&self.destination_root)?;
        for category in categories {
            ensure_dir(&self.category_dir(category))?;
        }
        Ok(())
    }

    /// Moves `source` into the directory for `category`.
    ///
    /// Lock errors are retried with exponential backoff up to the configured number
    /// of attempts; every other error is reported on the first occurrence. The
    /// blocking filesystem work runs on tokio's blocking pool and the backoff is an
    /// async sleep, so neither holds up other files.
    pub async fn relocate(&self, source: &Path, category: &str) -> MoveOutcome {
        let dir = self.category_dir(category);
        let intended = match source.file_name() {
            Some(name) => dir.join(name),
            None => dir.clone(),
        };

        let result = self
            .retry_while_locked(|| {
                let src = source.to_path_buf();
                let target_dir = dir.clone();
                async move {
                    tokio::task::spawn_blocking(move || place_file(&src, &target_dir))
                        .await
                        .unwrap_or_else(|e| {
                            Err(MoveError::failed(
                                source,
                                FailureReason::Io,
                                Some(io::Error::other(e)),
                            ))
                        })
                }
            })
            .await;

        match result {
            Ok(destination) => MoveOutcome {
                source: source.to_path_buf(),
                destination,
                category: category.to_string(),
                error: None,
            },
            Err(error) => MoveOutcome {
                source: source.to_path_buf(),
                destination: intended,
                category: category.to_string(),
                error: Some(error),
            },
        }
    }

    /// Runs `attempt_move` until it stops reporting a lock, sleeping with
    /// exponential backoff in between.
    ///
    /// After `max_attempts` locked attempts the lock becomes
    /// [`FailureReason::Locked`].
    pub async fn retry_while_locked<F, Fut>(&self, mut attempt_move: F) -> MoveResult<PathBuf>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MoveResult<PathBuf>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_move().await {
                Err(MoveError::TransientLock { path, source: err }) => {
                    if attempt >= self.retry.max_attempts {
                        tracing::warn!(
                            path = %path.display(),
                            attempts = attempt,
                            "file still locked, giving up"
                        );
                        return Err(MoveError::failed(&path, FailureReason::Locked, Some(err)));
                    }
                    let delay = self.retry.backoff(attempt);
                    tracing::debug!(
                        path = %path.display(),
                        attempt,
                        delay = ?delay,
                        "file locked, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Creates `dir` and any missing parents.
///
/// A concurrent caller creating the same directory is not an error.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// Builds the `index`-th candidate name: `report.pdf`, `report (1).pdf`, ...
///
/// Leading dots belong to the stem, so `.env` becomes `.env (1)`. The original
/// bytes of the name are kept even when it is not valid UTF-8.
pub fn candidate_name(file_name: &OsStr, index: u32) -> OsString {
    if index == 0 {
        return file_name.to_os_string();
    }
    let suffix = format!(" ({})", index);

    let Some(name) = file_name.to_str() else {
        let path = Path::new(file_name);
        let mut candidate = path.file_stem().unwrap_or(file_name).to_os_string();
        candidate.push(&suffix);
        if let Some(ext) = path.extension() {
            candidate.push(".");
            candidate.push(ext);
        }
        return candidate;
    };

    let stem_start = name.len() - name.trim_start_matches('.').len();
    let candidate = match name[stem_start..].rfind('.') {
        Some(idx) => {
            let split = stem_start + idx;
            format!("{}{}{}", &name[..split], suffix, &name[split..])
        }
        None => format!("{}{}", name, suffix),
    };
    OsString::from(candidate)
}

/// Moves `source` into `dir` under the first free candidate name.
///
/// Returns the final path.
pub fn place_file(source: &Path, dir: &Path) -> MoveResult<PathBuf> {
    let file_name = source.file_name().ok_or_else(|| {
        MoveError::failed(
            source,
            FailureReason::Io,
            Some(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file has no name component",
            )),
        )
    })?;

    ensure_dir(dir).map_err(|e| destination_error(dir, e))?;

    if let Err(e) = fs::symlink_metadata(source) {
        return Err(source_error(source, e));
    }

    for index in 0..=MAX_SUFFIX {
        let candidate = dir.join(candidate_name(file_name, index));
        match claim(source, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(MoveError::DestinationNameCollision { .. }) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(MoveError::failed(
        source,
        FailureReason::NameSpaceExhausted,
        None,
    ))
}

/// Moves `source` to `candidate` without ever replacing an existing file.
fn claim(source: &Path, candidate: &Path) -> MoveResult<()> {
    match fs::hard_link(source, candidate) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(source) {
                let _ = fs::remove_file(candidate);
                return Err(source_error(source, e));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(MoveError::DestinationNameCollision {
                path: candidate.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if source.exists() {
                Err(destination_error(candidate, e))
            } else {
                Err(MoveError::SourceVanished {
                    path: source.to_path_buf(),
                })
            }
        }
        Err(e) if is_lock_error(&e) => Err(MoveError::TransientLock {
            path: source.to_path_buf(),
            source: e,
        }),
        Err(e) => {
            tracing::debug!(
                path = %source.display(),
                error = %e,
                "hard link unavailable, copying instead"
            );
            copy_then_remove(source, candidate)
        }
    }
}

/// Copies `source` into a newly created `candidate`, verifies it, then removes `source`.
///
/// Any failure removes the partial copy and leaves the source in place.
pub fn copy_then_remove(source: &Path, candidate: &Path) -> MoveResult<()> {
    let mut reader = File::open(source).map_err(|e| source_error(source, e))?;

    let mut writer = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(candidate)
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(MoveError::DestinationNameCollision {
                path: candidate.to_path_buf(),
            });
        }
        Err(e) => return Err(destination_error(candidate, e)),
    };

    let copied = (|| -> io::Result<()> {
        let expected = reader.metadata()?.len();
        let written = io::copy(&mut reader, &mut writer)?;
        writer.sync_all()?;
        if written != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("copied {} of {} bytes", written, expected),
            ));
        }
        if let Ok(meta) = reader.metadata() {
            let _ = fs::set_permissions(candidate, meta.permissions());
        }
        Ok(())
    })();

    drop(writer);
    drop(reader);

    if let Err(e) = copied {
        let _ = fs::remove_file(candidate);
        return Err(destination_error(candidate, e));
    }

    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(candidate);
        return Err(source_error(source, e));
    }

    Ok(())
}

fn is_lock_error(e: &io::Error) -> bool {
    #[cfg(windows)]
    {
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        if matches!(e.raw_os_error(), Some(32) | Some(33)) {
            return true;
        }
    }
    e.kind() == io::ErrorKind::ResourceBusy
}

fn failure_reason(e: &io::Error) -> FailureReason {
    match e.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            FailureReason::PermissionDenied
        }
        io::ErrorKind::StorageFull => FailureReason::StorageFull,
        _ => FailureReason::Io,
    }
}

fn source_error(source: &Path, e: io::Error) -> MoveError {
    if e.kind() == io::ErrorKind::NotFound {
        return MoveError::SourceVanished {
            path: source.to_path_buf(),
        };
    }
    if is_lock_error(&e) {
        return MoveError::TransientLock {
            path: source.to_path_buf(),
            source: e,
        };
    }
    MoveError::failed(source, failure_reason(&e), Some(e))
}

fn destination_error(destination: &Path, e: io::Error) -> MoveError {
    MoveError::failed(destination, failure_reason(&e), Some(e))
}
