//! Command-line front end for autotidy.
//!
//! Parses arguments, resolves the configuration, wires the console notifier and
//! the activity log into a [`WatchLoop`], and runs it until Ctrl-C (or SIGTERM on
//! Unix).

use crate::activity_log::{ActivityLog, FileActivityLog, NullActivityLog};
use crate::config::OrganizerConfig;
use crate::output::{ConsoleNotifier, Notifier, OutputFormatter, SilentNotifier};
use crate::watcher::{RunSummary, WatchLoop, check_target};
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Watch a directory and sort every new file into a category folder.
#[derive(Debug, Clone, Parser)]
#[command(name = "autotidy", version, about)]
pub struct Args {
    /// Configuration file (defaults to ./.autotidy.toml, then ~/.config/autotidy/config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory to watch (defaults to ~/Desktop)
    #[arg(short, long, value_name = "DIR")]
    pub watch: Option<PathBuf>,

    /// Destination root for organized files (defaults to <DIR>/Organized; relative to the current directory)
    #[arg(short, long, value_name = "DIR")]
    pub dest: Option<PathBuf>,

    /// Do not show notifications
    #[arg(long)]
    pub no_notify: bool,

    /// Log debug details
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Default `tracing` filter directive for these flags.
    pub fn log_directive(&self) -> &'static str {
        if self.verbose {
            "autotidy=debug"
        } else if self.quiet {
            "autotidy=warn"
        } else {
            "autotidy=info"
        }
    }
}

/// Resolves the effective configuration: file (or defaults) plus flag overrides.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or is invalid.
pub fn resolve_config(args: &Args) -> Result<OrganizerConfig> {
    let mut config =
        OrganizerConfig::load(args.config.as_deref()).context("Error loading configuration")?;

    // Paths typed on the command line are relative to where the command runs,
    // unlike `destination` in a config file, which is relative to the target.
    if let Some(target) = &args.watch {
        config.watch.target = Some(from_current_dir(target)?);
    }
    if let Some(destination) = &args.dest {
        config.watch.destination = Some(from_current_dir(destination)?);
    }
    if args.no_notify {
        config.notifications.enabled = false;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn from_current_dir(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() || path.starts_with("~") {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Cannot determine the current directory")?;
    Ok(cwd.join(path))
}

/// Runs the organizer until interrupted.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the watched directory
/// cannot be observed.
pub async fn run_cli(args: Args) -> Result<()> {
    let config = resolve_config(&args)?;
    let watch = config.watch_target();

    // Opening the log creates the destination root; never do that under a missing target.
    check_target(&watch.target)?;

    let log_path = config.log_path(&watch.destination);
    let activity: Arc<dyn ActivityLog> = match FileActivityLog::open(&log_path, config.log.format)
    {
        Ok(log) => {
            tracing::debug!(path = %log.path().display(), "activity log opened");
            Arc::new(log)
        }
        Err(e) => {
            tracing::warn!(
                path = %log_path.display(),
                error = %e,
                "activity log unavailable, moves will not be recorded"
            );
            Arc::new(NullActivityLog)
        }
    };

    let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
        Arc::new(ConsoleNotifier)
    } else {
        Arc::new(SilentNotifier)
    };

    let watch_loop = WatchLoop::new(&config, notifier, activity)
        .context("Error compiling filters")?;

    OutputFormatter::info(&format!(
        "Watching {} (organizing into {}). Press Ctrl-C to stop.",
        watch.target.display(),
        watch.destination.display()
    ));

    let summary = watch_loop.run(shutdown_signal()).await?;
    print_summary(&summary);

    if summary.failed > 0 {
        OutputFormatter::error("Some files could not be organized. See the activity log.");
    } else {
        OutputFormatter::success("Stopped.");
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let mut counts = BTreeMap::new();
    counts.insert("Moved", summary.moved);
    counts.insert("Failed", summary.failed);
    counts.insert("Skipped", summary.skipped);
    OutputFormatter::summary_table(&counts);
}

/// Completes on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
