//! autotidy - keep a busy directory tidy as files land in it
//!
//! This library watches one directory and moves every new file into a category
//! subdirectory chosen by its extension. Files are moved only after they stop
//! changing, name collisions get a numbered suffix instead of overwriting, and each
//! outcome is written to an activity log and surfaced as a notification.

pub mod activity_log;
pub mod cli;
pub mod config;
pub mod debounce;
pub mod events;
pub mod file_category;
pub mod file_organizer;
pub mod output;
pub mod watcher;

pub use activity_log::{ActivityLog, FileActivityLog, NullActivityLog};
pub use config::{CompiledFilters, ConfigError, OrganizerConfig, WatchTarget};
pub use debounce::{Admission, EventDebouncer};
pub use events::FileEvent;
pub use file_category::{Category, CategoryTable, OTHERS};
pub use file_organizer::{MoveError, MoveOutcome, Mover};
pub use output::{ConsoleNotifier, Notifier, SilentNotifier};
pub use watcher::{LoopState, RunSummary, WatchError, WatchLoop};

pub use cli::{Args, run_cli};
