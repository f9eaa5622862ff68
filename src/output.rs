//! User-facing output: notifications and console formatting.
//!
//! The watch loop reports every outcome through the [`Notifier`] trait so the sink
//! can be swapped (a console banner in the binary, a recorder in tests, nothing at
//! all with `--no-notify`). Notifications are fire-and-forget: implementations
//! must not block and must swallow their own failures.

use colored::*;
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

/// Sink for short user notifications.
pub trait Notifier: Send + Sync {
    /// Shows `message` under `title` for roughly `duration`.
    fn notify(&self, title: &str, message: &str, duration: Duration);
}

/// Prints notifications as colored banners on stdout.
///
/// A terminal has no notion of display duration, so `duration` is ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, message: &str, _duration: Duration) {
        let mut stdout = std::io::stdout().lock();
        // A closed stdout must not take the pipeline down with it.
        let _ = writeln!(stdout, "{} {}", format!("[{}]", title).cyan().bold(), message);
    }
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _title: &str, _message: &str, _duration: Duration) {}
}

/// Console formatting for the command-line front end.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints the end-of-run table of outcomes.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use autotidy::output::OutputFormatter;
    /// use std::collections::BTreeMap;
    ///
    /// let mut counts = BTreeMap::new();
    /// counts.insert("Moved", 12);
    /// counts.insert("Failed", 1);
    /// OutputFormatter::summary_table(&counts);
    /// ```
    pub fn summary_table(counts: &BTreeMap<&str, usize>) {
        Self::header("SUMMARY");

        let width = counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max(7);

        println!("{:<width$} | {}", "Outcome".bold(), "Files".bold(), width = width);
        println!("{}", "-".repeat(width + 10));

        for (name, count) in counts {
            let count = if *count == 0 {
                count.to_string().normal()
            } else if *name == "Failed" {
                count.to_string().red()
            } else {
                count.to_string().green()
            };
            println!("{:<width$} | {}", name, count, width = width);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_notifiers_are_object_safe() {
        let sinks: Vec<Arc<dyn Notifier>> = vec![Arc::new(ConsoleNotifier), Arc::new(SilentNotifier)];
        for sink in sinks {
            sink.notify("autotidy", "Moved photo.jpg → Images", Duration::from_secs(3));
        }
    }
}
