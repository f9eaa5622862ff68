//! The watch loop: filesystem notifications in, organized files out.
//!
//! [`WatchLoop::run`] subscribes to one directory (non-recursively) and turns each
//! new file into an independent task that waits for the file to settle,
//! classifies it, moves it and reports the outcome. The loop itself never waits on
//! a task, so a slow download cannot delay the next file.
//!
//! ```text
//! Idle -> Watching -> Stopping -> Stopped
//!            |  ^
//!    event   v  | task spawned
//!         Processing
//! ```

use crate::activity_log::ActivityLog;
use crate::config::{CompiledFilters, ConfigError, OrganizerConfig, WatchTarget};
use crate::debounce::EventDebouncer;
use crate::events::FileEvent;
use crate::file_category::CategoryTable;
use crate::file_organizer::{MoveOutcome, Mover};
use crate::output::Notifier;
use chrono::Local;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;

/// Title used for every notification.
pub const APP_TITLE: &str = "autotidy";

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Errors that stop the watch loop.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watched directory cannot be observed (missing, inaccessible, or gone).
    #[error("cannot watch {}: {reason}", .path.display())]
    Subscription { path: PathBuf, reason: String },

    /// The destination tree could not be created.
    #[error("cannot prepare destination {}", .path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WatchError {
    fn subscription(path: &Path, reason: impl ToString) -> Self {
        WatchError::Subscription {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Verifies that `target` is an accessible directory.
pub fn check_target(target: &Path) -> Result<(), WatchError> {
    match std::fs::metadata(target) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(WatchError::subscription(target, "not a directory")),
        Err(e) => Err(WatchError::subscription(target, e)),
    }
}

/// Lifecycle of a [`WatchLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Watching,
    Stopping,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::Watching => "watching",
            LoopState::Stopping => "stopping",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Tally of a finished run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Files moved into a category directory.
    pub moved: usize,
    /// Files whose move failed.
    pub failed: usize,
    /// Events that did not lead to a move (vanished files, directories).
    pub skipped: usize,
}

impl RunSummary {
    fn absorb(&mut self, joined: Result<FileReport, JoinError>) {
        match joined {
            Ok(FileReport::Moved) => self.moved += 1,
            Ok(FileReport::Failed) => self.failed += 1,
            Ok(FileReport::Skipped) => self.skipped += 1,
            Err(e) if e.is_cancelled() => self.failed += 1,
            Err(e) => {
                tracing::error!(error = %e, "file task panicked");
                self.failed += 1;
            }
        }
    }
}

/// How one file task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileReport {
    Moved,
    Failed,
    Skipped,
}

/// Read-only state shared by every file task.
struct Pipeline {
    categories: CategoryTable,
    debouncer: EventDebouncer,
    mover: Mover,
    notifier: Arc<dyn Notifier>,
    activity: Arc<dyn ActivityLog>,
    notification_duration: Duration,
}

impl Pipeline {
    /// Debounce, classify, move and report one file.
    ///
    /// `guard` is released as soon as the move returns, so a new file arriving
    /// under the same name while the outcome is reported is dispatched normally.
    async fn process(&self, event: FileEvent, guard: InFlightGuard) -> FileReport {
        let admission = self.debouncer.admit(&event).await;
        if !admission.should_process() {
            tracing::debug!(path = %event.path.display(), ?admission, "not organizing");
            return FileReport::Skipped;
        }

        let category = self.categories.classify(&event.file_name()).to_string();
        let outcome = self.mover.relocate(&event.path, &category).await;
        drop(guard);
        self.report(&outcome);

        match &outcome.error {
            None => FileReport::Moved,
            Some(error) if error.is_benign() => FileReport::Skipped,
            Some(_) => FileReport::Failed,
        }
    }

    /// One activity entry per attempt, one notification per move or failure.
    fn report(&self, outcome: &MoveOutcome) {
        let message = outcome.summary();

        match &outcome.error {
            None => tracing::info!(
                source = %outcome.source.display(),
                destination = %outcome.destination.display(),
                category = %outcome.category,
                "moved file"
            ),
            Some(error) if error.is_benign() => tracing::debug!(
                source = %outcome.source.display(),
                "{}", error
            ),
            Some(error) => tracing::error!(
                source = %outcome.source.display(),
                category = %outcome.category,
                error = %error,
                cause = ?std::error::Error::source(error).map(|e| e.to_string()),
                "move failed"
            ),
        }

        if let Err(e) = self.activity.record(&message, Local::now()) {
            tracing::warn!(error = %e, "could not write activity log entry");
        }

        if !outcome.error.as_ref().is_some_and(|e| e.is_benign()) {
            self.notifier
                .notify(APP_TITLE, &message, self.notification_duration);
        }
    }
}

/// Removes a path from the in-flight set when dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.path);
        }
    }
}

/// Watches one directory and organizes every file that appears in it.
pub struct WatchLoop {
    watch: WatchTarget,
    filters: CompiledFilters,
    pipeline: Arc<Pipeline>,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    shutdown_timeout: Duration,
    state: LoopState,
}

impl WatchLoop {
    /// Builds a loop from configuration and the two reporting sinks.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter patterns do not compile.
    pub fn new(
        config: &OrganizerConfig,
        notifier: Arc<dyn Notifier>,
        activity: Arc<dyn ActivityLog>,
    ) -> Result<Self, ConfigError> {
        let watch = config.watch_target();
        let filters = config.compile_filters()?;
        let pipeline = Pipeline {
            categories: config.category_table(),
            debouncer: EventDebouncer::new(&config.debounce),
            mover: Mover::new(watch.destination.clone(), config.mover.clone()),
            notifier,
            activity,
            notification_duration: config.notifications.duration(),
        };

        Ok(Self {
            watch,
            filters,
            pipeline: Arc::new(pipeline),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown_timeout: Duration::from_secs(config.watch.shutdown_timeout_secs),
            state: LoopState::Idle,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn watch_target(&self) -> &WatchTarget {
        &self.watch
    }

    fn transition(&mut self, next: LoopState) {
        tracing::debug!(from = %self.state, to = %next, "watch loop state change");
        self.state = next;
    }

    /// Runs until `shutdown` completes or the watched directory becomes unobservable.
    ///
    /// On shutdown the subscription is dropped immediately; files already being
    /// processed are given up to the configured timeout to finish.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Subscription`] if the target is missing at startup or
    /// disappears while running, and [`WatchError::Setup`] if the destination tree
    /// cannot be created. Per-file failures never end the loop.
    pub async fn run<F>(mut self, shutdown: F) -> Result<RunSummary, WatchError>
    where
        F: Future<Output = ()>,
    {
        self.start()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
        )
        .map_err(|e| WatchError::subscription(&self.watch.target, e))?;
        watcher
            .watch(&self.watch.target, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::subscription(&self.watch.target, e))?;

        self.transition(LoopState::Watching);
        tracing::info!(
            target = %self.watch.target.display(),
            destination = %self.watch.destination.display(),
            "watching for new files"
        );
        self.pipeline.notifier.notify(
            APP_TITLE,
            &format!("Organizer is now running on {}", self.watch.target.display()),
            self.pipeline.notification_duration,
        );

        let (requeue_tx, mut requeue_rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut tasks: JoinSet<FileReport> = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let fatal = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break None,

                received = rx.recv() => match received {
                    Some(Ok(event)) => {
                        if self.target_removed(&event) {
                            break Some(WatchError::subscription(
                                &self.watch.target,
                                "directory was removed",
                            ));
                        }
                        self.dispatch(event, &mut tasks, &requeue_tx);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "watcher reported an error");
                        if let Err(e) = check_target(&self.watch.target) {
                            break Some(e);
                        }
                    }
                    None => {
                        break Some(WatchError::subscription(
                            &self.watch.target,
                            "notification stream closed",
                        ));
                    }
                },

                Some(path) = requeue_rx.recv() => {
                    tracing::debug!(path = %path.display(), "name reused after move");
                    self.dispatch_path(path, &mut tasks, &requeue_tx);
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => summary.absorb(joined),

                _ = health.tick() => {
                    if let Err(e) = check_target(&self.watch.target) {
                        break Some(e);
                    }
                }
            }
        };

        self.transition(LoopState::Stopping);
        let _ = watcher.unwatch(&self.watch.target);
        drop(watcher);
        drop(rx);
        drop(requeue_rx);

        if !tasks.is_empty() {
            tracing::info!(in_flight = tasks.len(), "waiting for in-flight files");
        }
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                summary.absorb(joined);
            }
        })
        .await;
        if drained.is_err() {
            let abandoned = tasks.len();
            tracing::warn!(abandoned, "shutdown timeout reached, abandoning in-flight files");
            tasks.shutdown().await;
            summary.failed += abandoned;
        }

        self.transition(LoopState::Stopped);
        tracing::info!(
            moved = summary.moved,
            failed = summary.failed,
            skipped = summary.skipped,
            "watch loop stopped"
        );

        match fatal {
            Some(error) => {
                tracing::error!(error = %error, "stopped watching");
                Err(error)
            }
            None => Ok(summary),
        }
    }

    /// Idle -> Watching preparation: target check and destination tree.
    fn start(&mut self) -> Result<(), WatchError> {
        check_target(&self.watch.target)?;

        self.pipeline
            .mover
            .prepare_tree(self.pipeline.categories.directory_names())
            .map_err(|source| WatchError::Setup {
                path: self.watch.destination.clone(),
                source,
            })?;

        // Compare against canonical paths; some backends report resolved paths.
        if let Ok(target) = self.watch.target.canonicalize() {
            self.watch.target = target;
        }
        if let Ok(destination) = self.watch.destination.canonicalize() {
            self.watch.destination = destination;
        }
        Ok(())
    }

    fn target_removed(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Remove(_))
            && event.paths.iter().any(|path| path == &self.watch.target)
    }

    /// Spawns a file task for every new file the event names.
    fn dispatch(
        &self,
        event: Event,
        tasks: &mut JoinSet<FileReport>,
        requeue: &mpsc::UnboundedSender<PathBuf>,
    ) {
        for path in new_file_paths(&event) {
            tracing::debug!(path = %path.display(), kind = ?event.kind, "new file");
            self.dispatch_path(path, tasks, requeue);
        }
    }

    /// Spawns a file task for `path` unless it is out of scope or already in flight.
    ///
    /// A task that moved its file hands the path back through `requeue` if a new
    /// file already sits under the same name, in case its event arrived while the
    /// path was still marked in flight.
    fn dispatch_path(
        &self,
        path: PathBuf,
        tasks: &mut JoinSet<FileReport>,
        requeue: &mpsc::UnboundedSender<PathBuf>,
    ) {
        if !self.should_organize(&path) {
            return;
        }

        let inserted = self
            .in_flight
            .lock()
            .map(|mut set| set.insert(path.clone()))
            .unwrap_or(true);
        if !inserted {
            tracing::debug!(path = %path.display(), "already being processed");
            return;
        }

        let guard = InFlightGuard {
            set: Arc::clone(&self.in_flight),
            path: path.clone(),
        };
        let pipeline = Arc::clone(&self.pipeline);
        let requeue = requeue.clone();
        tasks.spawn(async move {
            let report = pipeline.process(FileEvent::new(path.clone()), guard).await;
            if report == FileReport::Moved && tokio::fs::try_exists(&path).await.unwrap_or(false)
            {
                let _ = requeue.send(path);
            }
            report
        });
    }

    /// Scope and filter checks done before a task is spawned.
    ///
    /// Only path checks happen here; directories are rejected by the debouncer
    /// inside the task so the loop never blocks on the filesystem.
    fn should_organize(&self, path: &Path) -> bool {
        if path.starts_with(&self.watch.destination) {
            return false;
        }
        if path.parent() != Some(self.watch.target.as_path()) {
            return false;
        }
        if !self.filters.should_include(path) {
            tracing::debug!(path = %path.display(), "excluded by filters");
            return false;
        }
        true
    }
}

/// Paths of files that appeared: creations and renames into the directory.
///
/// Backends that cannot tell rename directions apart report both names; the old
/// one is gone by the time its task looks and is skipped there.
fn new_file_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event.paths.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_new_file_paths_accepts_creations_and_renames_in() {
        let created = event(EventKind::Create(CreateKind::File), &["/w/a.pdf"]);
        assert_eq!(new_file_paths(&created), vec![PathBuf::from("/w/a.pdf")]);

        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/w/b.zip"],
        );
        assert_eq!(new_file_paths(&renamed), vec![PathBuf::from("/w/b.zip")]);
    }

    #[test]
    fn test_new_file_paths_ignores_other_events() {
        let folder = event(EventKind::Create(CreateKind::Folder), &["/w/dir"]);
        let modified = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/w/a.pdf"],
        );
        let removed = event(EventKind::Remove(RemoveKind::File), &["/w/a.pdf"]);
        let renamed_out = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/w/a.pdf"],
        );
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/a.crdownload", "/w/a.pdf"],
        );

        for ignored in [folder, modified, removed, renamed_out, both] {
            assert!(new_file_paths(&ignored).is_empty(), "{:?}", ignored.kind);
        }
    }

    #[test]
    fn test_check_target() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        assert!(check_target(temp_dir.path()).is_ok());

        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            check_target(&file),
            Err(WatchError::Subscription { .. })
        ));
        assert!(matches!(
            check_target(&temp_dir.path().join("missing")),
            Err(WatchError::Subscription { .. })
        ));
    }

    #[test]
    fn test_run_summary_absorbs_reports() {
        let mut summary = RunSummary::default();
        summary.absorb(Ok(FileReport::Moved));
        summary.absorb(Ok(FileReport::Moved));
        summary.absorb(Ok(FileReport::Failed));
        summary.absorb(Ok(FileReport::Skipped));
        assert_eq!(
            summary,
            RunSummary {
                moved: 2,
                failed: 1,
                skipped: 1
            }
        );
    }
}
