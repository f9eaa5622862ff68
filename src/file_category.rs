/// Extension-based categorization of files.
///
/// A [`CategoryTable`] is an ordered list of named categories, each owning a set of
/// extensions (lowercase, leading dot included). Classification scans the table in
/// order and falls back to the [`OTHERS`] bucket when nothing matches.
///
/// # Examples
///
/// ```
/// use autotidy::file_category::CategoryTable;
///
/// let table = CategoryTable::default();
/// assert_eq!(table.classify("photo.JPG"), "Images");
/// assert_eq!(table.classify("report.pdf"), "Documents");
/// assert_eq!(table.classify("archive.xyz"), "Others");
/// ```
use std::collections::HashSet;

/// Name of the fallback category for files no rule recognizes.
pub const OTHERS: &str = "Others";

/// The built-in rules, in scan order.
pub const DEFAULT_CATEGORIES: &[(&str, &[&str])] = &[
    ("Documents", &[".pdf", ".docx", ".txt", ".xlsx", ".pptx"]),
    ("Images", &[".jpg", ".jpeg", ".png", ".gif", ".heic"]),
    ("Videos", &[".mp4", ".mov", ".avi", ".mkv"]),
    ("Audio", &[".mp3", ".wav", ".m4a"]),
    ("Archives", &[".zip", ".rar", ".7z"]),
];

/// A named bucket and the extensions that belong to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    name: String,
    extensions: HashSet<String>,
}

impl Category {
    /// Creates a category, normalizing every extension with [`normalize_extension`].
    pub fn new<I, S>(name: impl Into<String>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            extensions: extensions
                .into_iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }

    /// The directory name files of this category are moved into.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The normalized extensions recognized by this category.
    pub fn extensions(&self) -> &HashSet<String> {
        &self.extensions
    }

    /// Returns true if `ext` (already normalized) belongs to this category.
    pub fn contains(&self, ext: &str) -> bool {
        self.extensions.contains(ext)
    }
}

/// Ordered, immutable category rules.
///
/// Built once at startup and shared read-only between all file tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTable {
    categories: Vec<Category>,
}

impl CategoryTable {
    /// Creates a table from categories in priority order.
    ///
    /// Overlap and naming rules are enforced by the configuration layer
    /// (see `OrganizerConfig::validate`); this constructor accepts the list as given.
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    /// The categories in scan order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Every destination directory name, including the fallback bucket.
    pub fn directory_names(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .map(Category::name)
            .chain(std::iter::once(OTHERS))
    }

    /// Returns the category for `filename`.
    ///
    /// The first category whose set contains the file's extension wins. Files with
    /// no extension, dot-files, and unknown extensions all land in [`OTHERS`].
    ///
    /// # Examples
    ///
    /// ```
    /// use autotidy::file_category::CategoryTable;
    ///
    /// let table = CategoryTable::default();
    /// assert_eq!(table.classify("song.Mp3"), "Audio");
    /// assert_eq!(table.classify("Makefile"), "Others");
    /// assert_eq!(table.classify(".bashrc"), "Others");
    /// ```
    pub fn classify(&self, filename: &str) -> &str {
        let ext = extension_of(filename);
        if ext.is_empty() {
            return OTHERS;
        }

        self.categories
            .iter()
            .find(|category| category.contains(&ext))
            .map(Category::name)
            .unwrap_or(OTHERS)
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_CATEGORIES
                .iter()
                .map(|(name, extensions)| Category::new(*name, extensions.iter()))
                .collect(),
        )
    }
}

/// Extracts the lowercased extension of `filename`, leading dot included.
///
/// Leading dots are not extension separators, so `.bashrc` has none.
/// A trailing dot yields `"."`, which no category can contain.
pub fn extension_of(filename: &str) -> String {
    let stem_start = filename.len() - filename.trim_start_matches('.').len();
    match filename[stem_start..].rfind('.') {
        Some(idx) => filename[stem_start + idx..].to_lowercase(),
        None => String::new(),
    }
}

/// Normalizes a configured extension: trimmed, lowercased, with one leading dot.
///
/// `"PDF"`, `".pdf"` and `" .Pdf "` all become `".pdf"`; a blank entry becomes `""`.
pub fn normalize_extension(ext: &str) -> String {
    let bare = ext.trim().trim_start_matches('.');
    if bare.is_empty() {
        return String::new();
    }
    format!(".{}", bare.to_lowercase())
}
