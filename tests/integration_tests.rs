/// Integration tests for autotidy
///
/// These tests run the real watch loop against a temporary directory and drive it
/// the way a user would: by dropping files into the watched folder.
///
/// Test categories:
/// 1. Basic organization workflows
/// 2. Collisions and partially written files
/// 3. Filtering and ignored entries
/// 4. Lifecycle: startup failures and shutdown
use autotidy::activity_log::ActivityLog;
use autotidy::config::OrganizerConfig;
use autotidy::output::Notifier;
use autotidy::watcher::{RunSummary, WatchError, WatchLoop};
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ============================================================================
// Test Utilities
// ============================================================================

/// Notifier that keeps every message.
#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    fn move_messages(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|m| m.starts_with("Moved") || m.starts_with("Could not move"))
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, _title: &str, message: &str, _duration: Duration) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Activity log that keeps every entry in memory.
#[derive(Default)]
struct RecordingLog {
    entries: Mutex<Vec<String>>,
    delay: Duration,
}

impl RecordingLog {
    /// A log whose every write takes `delay`, like a slow disk.
    fn slow(delay: Duration) -> Self {
        RecordingLog {
            entries: Mutex::new(Vec::new()),
            delay,
        }
    }

    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

impl ActivityLog for RecordingLog {
    fn record(&self, message: &str, _at: DateTime<Local>) -> io::Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.entries.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// A running watch loop over a temporary inbox directory.
struct TestFixture {
    temp_dir: TempDir,
    notifier: Arc<RecordingNotifier>,
    log: Arc<RecordingLog>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<RunSummary, WatchError>>>,
}

impl TestFixture {
    /// Create a fixture with an `inbox` directory and fast debounce settings.
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir(temp_dir.path().join("inbox")).expect("Failed to create inbox");
        TestFixture {
            temp_dir,
            notifier: Arc::new(RecordingNotifier::default()),
            log: Arc::new(RecordingLog::default()),
            shutdown: None,
            handle: None,
        }
    }

    fn inbox(&self) -> PathBuf {
        self.temp_dir.path().join("inbox")
    }

    fn organized(&self) -> PathBuf {
        self.inbox().join("Organized")
    }

    fn config(&self) -> OrganizerConfig {
        let mut config = OrganizerConfig::default();
        config.watch.target = Some(self.inbox());
        config.debounce.grace_ms = 50;
        config.debounce.poll_interval_ms = 50;
        config.debounce.max_wait_secs = 10;
        config
    }

    /// Start the loop with `config` and wait until it is watching.
    async fn start_with(&mut self, config: OrganizerConfig) {
        let watch_loop = WatchLoop::new(&config, self.notifier.clone(), self.log.clone())
            .expect("Failed to build watch loop");
        let (tx, rx) = oneshot::channel::<()>();
        self.shutdown = Some(tx);
        self.handle = Some(tokio::spawn(watch_loop.run(async {
            let _ = rx.await;
        })));

        let notifier = self.notifier.clone();
        wait_until("startup notification", move || {
            notifier.messages().iter().any(|m| m.contains("now running"))
        })
        .await;
    }

    async fn start(&mut self) {
        let config = self.config();
        self.start_with(config).await;
    }

    /// Signal shutdown and return what the loop reported.
    async fn stop(&mut self) -> Result<RunSummary, WatchError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let handle = self.handle.take().expect("Loop was not started");
        tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .expect("Loop did not stop")
            .expect("Loop panicked")
    }

    /// Create a file with content in the inbox.
    fn create_file(&self, name: &str, content: &[u8]) {
        let mut file = File::create(self.inbox().join(name)).expect("Failed to create file");
        file.write_all(content)
            .expect("Failed to write file content");
    }

    /// Wait for a file to appear at a path relative to the destination root.
    async fn wait_for_organized(&self, rel_path: &str) -> PathBuf {
        let path = self.organized().join(rel_path);
        let probe = path.clone();
        wait_until(rel_path, move || probe.is_file()).await;
        path
    }

    fn assert_in_inbox(&self, name: &str) {
        let path = self.inbox().join(name);
        assert!(path.exists(), "Should still be in the inbox: {}", path.display());
    }

    /// Wait for a file to leave the inbox.
    async fn wait_gone_from_inbox(&self, name: &str) {
        let probe = self.inbox().join(name);
        wait_until(name, move || !probe.exists()).await;
    }
}

/// Poll `condition` until it holds, failing after ten seconds.
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn read(path: &Path) -> Vec<u8> {
    fs::read(path).expect("Failed to read file")
}

// ============================================================================
// Basic Organization Workflows
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_startup_creates_category_tree() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    for dir in ["Documents", "Images", "Videos", "Audio", "Archives", "Others"] {
        assert!(
            fixture.organized().join(dir).is_dir(),
            "Category directory should exist: {}",
            dir
        );
    }

    let summary = fixture.stop().await.expect("Loop failed");
    assert_eq!(summary, RunSummary::default());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_organize_single_image() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    fixture.create_file("photo.JPG", b"jpeg bytes");
    let moved = fixture.wait_for_organized("Images/photo.JPG").await;

    assert_eq!(read(&moved), b"jpeg bytes");
    fixture.wait_gone_from_inbox("photo.JPG").await;

    let summary = fixture.stop().await.expect("Loop failed");
    assert_eq!(summary.moved, 1);
    assert_eq!(summary.failed, 0);

    let entries = fixture.log.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0], "Moved photo.JPG → Images");

    let notifications = fixture.notifier.move_messages();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].contains("Images"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_extension_goes_to_others() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    fixture.create_file("archive.xyz", b"?");
    fixture.create_file("README", b"no extension");
    fixture.wait_for_organized("Others/archive.xyz").await;
    fixture.wait_for_organized("Others/README").await;

    let summary = fixture.stop().await.expect("Loop failed");
    assert_eq!(summary.moved, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mixed_files_are_sorted() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    let files: [(&str, &str); 5] = [
        ("notes.txt", "Documents"),
        ("song.mp3", "Audio"),
        ("clip.mkv", "Videos"),
        ("bundle.7z", "Archives"),
        ("diagram.png", "Images"),
    ];
    for (name, _) in &files {
        fixture.create_file(name, name.as_bytes());
    }
    for (name, category) in &files {
        let moved = fixture
            .wait_for_organized(&format!("{}/{}", category, name))
            .await;
        assert_eq!(read(&moved), name.as_bytes());
    }

    let summary = fixture.stop().await.expect("Loop failed");
    assert_eq!(summary.moved, files.len());
    assert_eq!(fixture.log.entries().len(), files.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_custom_category_table() {
    let mut fixture = TestFixture::new();
    let mut config = fixture.config();
    config.categories = vec![autotidy::config::CategoryConfig {
        name: "Code".to_string(),
        extensions: vec!["rs".to_string(), ".py".to_string()],
    }];
    fixture.start_with(config).await;

    fixture.create_file("main.rs", b"fn main() {}");
    fixture.create_file("photo.png", b"png");
    fixture.wait_for_organized("Code/main.rs").await;
    fixture.wait_for_organized("Others/photo.png").await;

    assert!(!fixture.organized().join("Images").exists());
    fixture.stop().await.expect("Loop failed");
}

// ============================================================================
// Collisions and Partially Written Files
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_same_name_twice_gets_suffix() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    fixture.create_file("report.pdf", b"first");
    let first = fixture.wait_for_organized("Documents/report.pdf").await;
    fixture.wait_gone_from_inbox("report.pdf").await;

    fixture.create_file("report.pdf", b"second");
    let second = fixture.wait_for_organized("Documents/report (1).pdf").await;

    assert_eq!(read(&first), b"first");
    assert_eq!(read(&second), b"second");

    fixture.stop().await.expect("Loop failed");
    let entries = fixture.log.entries();
    assert!(entries.contains(&"Moved report.pdf → Documents".to_string()));
    assert!(entries.contains(&"Moved report.pdf → Documents as report (1).pdf".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_name_reused_while_first_move_is_reported() {
    let mut fixture = TestFixture::new();
    fixture.log = Arc::new(RecordingLog::slow(Duration::from_millis(1500)));
    fixture.start().await;

    fixture.create_file("report.pdf", b"first");
    fixture.wait_for_organized("Documents/report.pdf").await;
    fixture.wait_gone_from_inbox("report.pdf").await;

    // The first file's log entry is still being written.
    fixture.create_file("report.pdf", b"second");
    let second = fixture.wait_for_organized("Documents/report (1).pdf").await;
    fixture.wait_gone_from_inbox("report.pdf").await;

    assert_eq!(read(&second), b"second");
    let summary = fixture.stop().await.expect("Loop failed");
    assert_eq!(summary.moved, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_existing_destination_file_is_never_overwritten() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    fs::write(fixture.organized().join("Audio").join("track.mp3"), b"keep me").unwrap();
    fixture.create_file("track.mp3", b"new track");
    let moved = fixture.wait_for_organized("Audio/track (1).mp3").await;

    assert_eq!(read(&fixture.organized().join("Audio/track.mp3")), b"keep me");
    assert_eq!(read(&moved), b"new track");
    fixture.stop().await.expect("Loop failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_writer_is_moved_intact() {
    let mut fixture = TestFixture::new();
    let mut config = fixture.config();
    config.debounce.poll_interval_ms = 300;
    fixture.start_with(config).await;

    let path = fixture.inbox().join("download.zip");
    let writer = std::thread::spawn(move || {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        for chunk in 0..20u8 {
            file.write_all(&[chunk; 4096]).unwrap();
            file.flush().unwrap();
            std::thread::sleep(Duration::from_millis(50));
        }
    });

    let moved = fixture.wait_for_organized("Archives/download.zip").await;
    writer.join().unwrap();

    let content = read(&moved);
    assert_eq!(content.len(), 20 * 4096);
    assert_eq!(content[content.len() - 1], 19);

    let summary = fixture.stop().await.expect("Loop failed");
    assert_eq!(summary.moved, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_move_is_reported_and_loop_continues() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    let documents = fixture.organized().join("Documents");
    fs::remove_dir(&documents).unwrap();
    fs::write(&documents, b"not a directory").unwrap();

    fixture.create_file("notes.txt", b"notes");
    let log = fixture.log.clone();
    wait_until("failure entry", move || !log.entries().is_empty()).await;

    fixture.create_file("photo.png", b"png");
    fixture.wait_for_organized("Images/photo.png").await;

    let summary = fixture.stop().await.expect("Loop failed");
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.moved, 1);
    fixture.assert_in_inbox("notes.txt");

    let failures: Vec<_> = fixture
        .log
        .entries()
        .into_iter()
        .filter(|entry| entry.starts_with("Could not move"))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(
        failures[0].starts_with("Could not move notes.txt → Documents: "),
        "unexpected entry: {}",
        failures[0]
    );

    let notifications: Vec<_> = fixture
        .notifier
        .move_messages()
        .into_iter()
        .filter(|message| message.starts_with("Could not move"))
        .collect();
    assert_eq!(notifications, failures);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_read_only_category_reports_permission_denied() {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut fixture = TestFixture::new();
        fixture.start().await;

        let audio = fixture.organized().join("Audio");
        fs::set_permissions(&audio, fs::Permissions::from_mode(0o555)).unwrap();
        // Privileged users can write anyway; nothing to observe then.
        if File::create(audio.join(".write-test")).is_ok() {
            fixture.stop().await.expect("Loop failed");
            return;
        }

        fixture.create_file("song.mp3", b"la");
        let log = fixture.log.clone();
        wait_until("failure entry", move || !log.entries().is_empty()).await;

        let summary = fixture.stop().await.expect("Loop failed");
        fs::set_permissions(&audio, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(
            fixture.log.entries(),
            vec!["Could not move song.mp3 → Audio: permission denied".to_string()]
        );
        fixture.assert_in_inbox("song.mp3");
    }
}

// ============================================================================
// Filtering and Ignored Entries
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_download_waits_for_rename() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    fixture.create_file("movie.mp4.crdownload", b"frames");
    tokio::time::sleep(Duration::from_millis(400)).await;
    fixture.assert_in_inbox("movie.mp4.crdownload");

    fs::rename(
        fixture.inbox().join("movie.mp4.crdownload"),
        fixture.inbox().join("movie.mp4"),
    )
    .unwrap();
    let moved = fixture.wait_for_organized("Videos/movie.mp4").await;
    assert_eq!(read(&moved), b"frames");

    fixture.stop().await.expect("Loop failed");
    assert_eq!(fixture.log.entries(), vec!["Moved movie.mp4 → Videos".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hidden_and_system_files_are_ignored() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    fixture.create_file(".secret.txt", b"hidden");
    fixture.create_file("Thumbs.db", b"cache");
    fixture.create_file("marker.txt", b"marker");
    fixture.wait_for_organized("Documents/marker.txt").await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    fixture.assert_in_inbox(".secret.txt");
    fixture.assert_in_inbox("Thumbs.db");
    fixture.stop().await.expect("Loop failed");
    assert_eq!(fixture.log.entries().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_directory_is_ignored() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    fs::create_dir(fixture.inbox().join("Projects.zip")).unwrap();
    fixture.create_file("marker.txt", b"marker");
    fixture.wait_for_organized("Documents/marker.txt").await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(fixture.inbox().join("Projects.zip").is_dir());
    assert!(!fixture.organized().join("Archives/Projects.zip").exists());

    let summary = fixture.stop().await.expect("Loop failed");
    assert_eq!(summary.moved, 1);
    assert_eq!(fixture.notifier.move_messages().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_files_inside_destination_are_left_alone() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    let inside = fixture.organized().join("stray.pdf");
    fs::write(&inside, b"stray").unwrap();
    fixture.create_file("marker.txt", b"marker");
    fixture.wait_for_organized("Documents/marker.txt").await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(inside.is_file());
    assert!(!fixture.organized().join("Documents/stray.pdf").exists());
    fixture.stop().await.expect("Loop failed");
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_target_fails_at_startup() {
    let fixture = TestFixture::new();
    let mut config = fixture.config();
    config.watch.target = Some(fixture.temp_dir.path().join("does-not-exist"));

    let watch_loop = WatchLoop::new(&config, fixture.notifier.clone(), fixture.log.clone())
        .expect("Failed to build watch loop");
    let result = watch_loop.run(std::future::pending::<()>()).await;

    assert!(matches!(result, Err(WatchError::Subscription { .. })));
    assert!(!fixture.temp_dir.path().join("does-not-exist").exists());
    assert!(fixture.notifier.messages().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removed_target_stops_the_loop() {
    let mut fixture = TestFixture::new();
    fixture.start().await;

    fs::remove_dir_all(fixture.inbox()).unwrap();

    let handle = fixture.handle.take().expect("Loop was not started");
    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("Loop kept running without its directory")
        .expect("Loop panicked");
    assert!(matches!(result, Err(WatchError::Subscription { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_lets_in_flight_file_finish() {
    let mut fixture = TestFixture::new();
    let mut config = fixture.config();
    config.debounce.grace_ms = 1500;
    fixture.start_with(config).await;

    fixture.create_file("late.pdf", b"almost missed");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let summary = fixture.stop().await.expect("Loop failed");
    assert_eq!(summary.moved, 1);
    assert_eq!(
        read(&fixture.organized().join("Documents/late.pdf")),
        b"almost missed"
    );

    // Nothing new is picked up once stopped.
    fixture.create_file("after.pdf", b"too late");
    tokio::time::sleep(Duration::from_millis(300)).await;
    fixture.assert_in_inbox("after.pdf");
}
