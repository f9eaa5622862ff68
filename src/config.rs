//! Startup configuration for the organizer.
//!
//! Configuration is read once from a TOML file and is immutable for the rest of
//! the run. Every section is optional; missing values fall back to defaults that
//! reproduce the classic "tidy my Desktop" behaviour.
//!
//! # Configuration File Format
//!
//! ```toml
//! [watch]
//! target = "~/Desktop"
//! destination = "~/Desktop/Organized"
//! shutdown_timeout_secs = 30
//!
//! [debounce]
//! grace_ms = 1000
//! poll_interval_ms = 500
//! max_wait_secs = 60
//!
//! [mover]
//! max_attempts = 5
//! initial_backoff_ms = 250
//! max_backoff_ms = 4000
//!
//! [notifications]
//! enabled = true
//! duration_secs = 3
//!
//! [log]
//! file = "organizer.log"
//! format = "text"
//!
//! [[categories]]
//! name = "Documents"
//! extensions = [".pdf", ".docx", ".txt"]
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["desktop.ini", "Thumbs.db"]
//! patterns = ["~$*"]
//! extensions = ["crdownload", "part", "tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```

use crate::file_category::{Category, CategoryTable, DEFAULT_CATEGORIES, OTHERS, normalize_extension};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".autotidy.toml";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}': expected *.ext or name*")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
    /// A category was declared without a usable name.
    #[error("Category names must not be blank")]
    BlankCategoryName,
    /// A category used the name of the fallback bucket.
    #[error("Category name '{0}' is reserved for unmatched files")]
    ReservedCategoryName(String),
    /// Two categories share a name and would share a directory.
    #[error("Category '{0}' is declared more than once")]
    DuplicateCategory(String),
    /// Two categories claim the same extension.
    #[error("Extension '{extension}' is claimed by both '{first}' and '{second}'")]
    OverlappingExtension {
        /// The normalized extension.
        extension: String,
        /// The category that declared it first.
        first: String,
        /// The category that declared it again.
        second: String,
    },
    /// The destination root is the watched directory itself.
    #[error("Destination {} must differ from the watched directory", .0.display())]
    DestinationIsTarget(PathBuf),
    /// The destination root encloses the watched directory, so every event would be ignored.
    #[error(
        "Destination {} contains the watched directory {}; it must be inside or beside it",
        .destination.display(),
        .target.display()
    )]
    DestinationContainsTarget {
        /// The resolved destination root.
        destination: PathBuf,
        /// The resolved watched directory.
        target: PathBuf,
    },
    /// The mover was configured to never try.
    #[error("mover.max_attempts must be at least 1")]
    ZeroAttempts,
}

/// The complete organizer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrganizerConfig {
    pub watch: WatchConfig,
    pub debounce: DebounceConfig,
    pub mover: MoverConfig,
    pub notifications: NotificationConfig,
    pub log: LogConfig,
    pub categories: Vec<CategoryConfig>,
    pub filters: FilterRules,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            watch: WatchConfig::default(),
            debounce: DebounceConfig::default(),
            mover: MoverConfig::default(),
            notifications: NotificationConfig::default(),
            log: LogConfig::default(),
            categories: default_categories(),
            filters: FilterRules::default(),
        }
    }
}

/// Which directory is watched and where organized files go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory to watch. Defaults to `$HOME/Desktop`.
    pub target: Option<PathBuf>,
    /// Destination root. Defaults to `<target>/Organized`.
    pub destination: Option<PathBuf>,
    /// How long shutdown waits for in-flight files before abandoning them.
    pub shutdown_timeout_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            target: None,
            destination: None,
            shutdown_timeout_secs: 30,
        }
    }
}

/// The resolved watch target and destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub target: PathBuf,
    pub destination: PathBuf,
}

/// Timing of the stability check performed before a file is moved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Fixed delay before the first size/mtime sample.
    pub grace_ms: u64,
    /// Interval between samples.
    pub poll_interval_ms: u64,
    /// Ceiling after which the file is processed even if still changing.
    pub max_wait_secs: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            grace_ms: 1000,
            poll_interval_ms: 500,
            max_wait_secs: 60,
        }
    }
}

impl DebounceConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// Retry policy for files that are locked by another process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoverConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for MoverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 4000,
        }
    }
}

impl MoverConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// User notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub duration_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_secs: 3,
        }
    }
}

impl NotificationConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// On-disk format of the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `<timestamp> - <message>` lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log file; relative paths are resolved against the destination root.
    pub file: PathBuf,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("organizer.log"),
            format: LogFormat::Text,
        }
    }
}

/// One `[[categories]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub extensions: Vec<String>,
}

fn default_categories() -> Vec<CategoryConfig> {
    DEFAULT_CATEGORIES
        .iter()
        .map(|(name, extensions)| CategoryConfig {
            name: name.to_string(),
            extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
        })
        .collect()
}

impl OrganizerConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.autotidy.toml` in the current directory
    /// 3. Look for `~/.config/autotidy/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// The result is not validated; call [`OrganizerConfig::validate`] once
    /// command-line overrides have been applied.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read,
    /// or if any discovered file is not valid TOML.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".config").join("autotidy").join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Resolves the watched directory and destination root.
    ///
    /// A leading `~` is expanded. A relative destination is taken relative to the target.
    pub fn watch_target(&self) -> WatchTarget {
        let target = match &self.watch.target {
            Some(path) => expand_home(path),
            None => home_dir()
                .map(|home| home.join("Desktop"))
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let destination = match &self.watch.destination {
            Some(path) => {
                let expanded = expand_home(path);
                if expanded.is_relative() {
                    target.join(expanded)
                } else {
                    expanded
                }
            }
            None => target.join("Organized"),
        };

        WatchTarget {
            target,
            destination,
        }
    }

    /// Builds the immutable category table.
    pub fn category_table(&self) -> CategoryTable {
        CategoryTable::new(
            self.categories
                .iter()
                .map(|category| Category::new(category.name.trim(), &category.extensions))
                .collect(),
        )
    }

    /// Resolves the activity log path against the destination root.
    pub fn log_path(&self, destination: &Path) -> PathBuf {
        let file = expand_home(&self.log.file);
        if file.is_relative() {
            destination.join(file)
        } else {
            file
        }
    }

    /// Checks the invariants the organizer relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule: blank, reserved or duplicated category names,
    /// an extension claimed by two categories, a destination equal to or enclosing the target,
    /// or a mover that would never attempt a move.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut owners: HashMap<String, String> = HashMap::new();

        for category in &self.categories {
            let name = category.name.trim();
            if name.is_empty() {
                return Err(ConfigError::BlankCategoryName);
            }
            if name.eq_ignore_ascii_case(OTHERS) {
                return Err(ConfigError::ReservedCategoryName(name.to_string()));
            }
            if !names.insert(name.to_lowercase()) {
                return Err(ConfigError::DuplicateCategory(name.to_string()));
            }

            for ext in &category.extensions {
                let ext = normalize_extension(ext);
                if ext.is_empty() {
                    continue;
                }
                match owners.get(&ext) {
                    Some(first) if first != name => {
                        return Err(ConfigError::OverlappingExtension {
                            extension: ext,
                            first: first.clone(),
                            second: name.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        owners.insert(ext, name.to_string());
                    }
                }
            }
        }

        let watch = self.watch_target();
        if same_path(&watch.target, &watch.destination) {
            return Err(ConfigError::DestinationIsTarget(watch.destination));
        }
        if is_within(&watch.target, &watch.destination) {
            return Err(ConfigError::DestinationContainsTarget {
                destination: watch.destination,
                target: watch.target,
            });
        }

        if self.mover.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }

        Ok(())
    }

    /// Compile the filter rules into matchers.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex or glob patterns are invalid.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(&self.filters)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Expands a leading `~` component to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Compares two paths, canonicalizing when both exist.
fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.components().eq(b.components()),
    }
}

/// Returns true if `inner` lies under `outer`, canonicalizing when both exist.
fn is_within(inner: &Path, outer: &Path) -> bool {
    match (inner.canonicalize(), outer.canonicalize()) {
        (Ok(inner), Ok(outer)) => inner.starts_with(outer),
        _ => inner.starts_with(outer),
    }
}

/// Rules for files that are never organized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to organize hidden files (starting with "."). Defaults to false.
    #[serde(default = "default_enable_hidden_files")]
    pub enable_hidden_files: bool,

    /// Rules for excluding files.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,
}

fn default_enable_hidden_files() -> bool {
    false
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: default_enable_hidden_files(),
            exclude: ExcludeRules::default(),
            include: IncludeRules::default(),
        }
    }
}

/// Rules for excluding files from organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., "desktop.ini", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns matched against the file name (e.g., "~$*").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude, with or without the dot.
    #[serde(default = "default_excluded_extensions")]
    pub extensions: Vec<String>,

    /// Regex patterns matched against the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Suffixes browsers and download managers use while a file is still arriving.
fn default_excluded_extensions() -> Vec<String> {
    ["crdownload", "part", "partial", "download", "tmp"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

impl Default for ExcludeRules {
    fn default() -> Self {
        Self {
            filenames: vec![
                "desktop.ini".to_string(),
                "Thumbs.db".to_string(),
                ".DS_Store".to_string(),
            ],
            patterns: Vec::new(),
            extensions: default_excluded_extensions(),
            regex: Vec::new(),
        }
    }
}

/// Rules for including files, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    /// Glob patterns that override exclude rules.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Compiled filter structures for per-event matching.
///
/// Patterns are parsed once at startup so each event is a handful of set
/// lookups and pattern matches against the file name.
#[derive(Debug)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    fn new(rules: &FilterRules) -> Result<Self, ConfigError> {
        let compile_globs = |patterns: &[String]| {
            patterns
                .iter()
                .map(|pattern| {
                    Pattern::new(pattern)
                        .map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
                })
                .collect::<Result<Vec<_>, _>>()
        };

        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| normalize_extension(ext))
                .filter(|ext| !ext.is_empty())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    /// Check if a file should be organized.
    ///
    /// Checks are performed in this order, with early termination:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Exact filename match - if matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, file_path: &Path) -> bool {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self
            .include_patterns
            .iter()
            .any(|pattern| pattern.matches(&file_name))
        {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        let ext = crate::file_category::extension_of(&file_name);
        if !ext.is_empty() && self.exclude_extensions.contains(&ext) {
            return false;
        }

        if self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern.matches(&file_name))
        {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }
}
