//! Catalogue module for reading playlist entries.
//!
//! A catalogue is an M3U-style text file of `#EXTINF` metadata lines, each
//! followed by the URL of the stream it describes. Entries keep the order in
//! which they appear in the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Prefix of a metadata (declaration) line.
pub const METADATA_PREFIX: &str = "#EXTINF";

/// Format marker written at the top of every emitted catalogue.
pub const FORMAT_MARKER: &str = "#EXTM3U";

/// Display name used when a metadata line carries no comma.
pub const UNKNOWN_CHANNEL: &str = "Unknown Channel";

/// Separator between fields of a checkpoint line; never appears inside an identifier.
pub(crate) const FIELD_SEPARATOR: &str = " - ";

/// Error type for catalogue loading.
#[derive(Debug, Error)]
pub enum CatalogueError {
    /// The catalogue file does not exist.
    #[error("Catalogue not found: {0}")]
    NotFound(PathBuf),

    /// The catalogue file exists but could not be read.
    #[error("Catalogue unreadable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One (display name, URL) pair declared by the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    /// Free text after the first comma of the metadata line.
    pub display_name: String,
    /// Stream URL from the line following the metadata line.
    pub url: String,
    /// Value of the `group-title` attribute, if any.
    pub group_tag: Option<String>,
    /// The raw metadata line, kept for re-serialization.
    pub metadata: String,
    /// Player directives (`#EXTVLCOPT`, `#KODIPROP`, ...) found between the
    /// metadata line and the URL, in source order.
    #[serde(default)]
    pub options: Vec<String>,
}

impl CatalogueEntry {
    /// Builds an entry from a metadata line and the URL that follows it.
    pub fn from_lines(metadata: &str, url: &str) -> Self {
        let metadata = metadata.trim();
        let display_name = match metadata.split_once(',') {
            Some((_, name)) => name.trim().to_string(),
            None => UNKNOWN_CHANNEL.to_string(),
        };

        Self {
            display_name,
            url: url.trim().to_string(),
            group_tag: extract_attribute(metadata, "group-title"),
            metadata: metadata.to_string(),
            options: Vec::new(),
        }
    }

    /// Stable composite key used for checkpointing: `"<name> <url>"`.
    ///
    /// Occurrences of the checkpoint field separator in the composed key are
    /// replaced so it survives a round trip through the checkpoint file. An
    /// empty name keeps its leading space.
    pub fn identifier(&self) -> String {
        format!("{} {}", self.display_name, self.url).replace(FIELD_SEPARATOR, " ~ ")
    }

    /// Returns a copy whose metadata line carries `name` after the first comma.
    ///
    /// Attributes before the comma are preserved.
    pub fn with_display_name(&self, name: &str) -> Self {
        let prefix = match self.metadata.split_once(',') {
            Some((attrs, _)) => attrs,
            None => self.metadata.as_str(),
        };

        Self {
            display_name: name.to_string(),
            url: self.url.clone(),
            group_tag: self.group_tag.clone(),
            metadata: format!("{},{}", prefix, name),
            options: self.options.clone(),
        }
    }
}

/// A parsed catalogue together with where it came from.
#[derive(Debug, Clone)]
pub struct Catalogue {
    /// Path of the source file.
    pub path: PathBuf,
    /// Group filter applied while parsing.
    pub group: Option<String>,
    /// Entries in source order.
    pub entries: Vec<CatalogueEntry>,
}

impl Catalogue {
    /// Number of entries that passed the filter.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File stem of the source catalogue, used to derive output names.
    pub fn stem(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.split('.').next())
            .filter(|s| !s.is_empty())
            .unwrap_or("catalogue")
            .to_string()
    }

    /// Group filter with `|` and spaces stripped, or `AllGroups`.
    pub fn group_label(&self) -> String {
        group_label(self.group.as_deref())
    }
}

/// Normalizes a group filter into a file-name-safe label.
pub fn group_label(group: Option<&str>) -> String {
    match group {
        Some(g) => g.replace(['|', ' '], ""),
        None => "AllGroups".to_string(),
    }
}

/// Extracts `key="value"` from a metadata line.
fn extract_attribute(metadata: &str, key: &str) -> Option<String> {
    let needle = format!("{}=\"", key);
    let start = metadata.find(&needle)? + needle.len();
    let rest = &metadata[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Parses catalogue text into entries, in source order.
///
/// - Lines starting with `#EXTINF` declare an entry; when `group` is given
///   the line must contain it as a substring
/// - The URL is the first following line that is neither blank nor a
///   directive; directives other than `#EXTINF` on the way are kept as the
///   entry's options
/// - A declaration reaching another `#EXTINF` line or the end of the text
///   before a URL is dropped
/// - All lines are buffered first so the caller knows the total up front
pub fn parse_catalogue(text: &str, group: Option<&str>) -> Vec<CatalogueEntry> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let mut entries = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.starts_with(METADATA_PREFIX) {
            continue;
        }
        if let Some(filter) = group {
            if !line.contains(filter) {
                continue;
            }
        }

        match find_url(&lines[i + 1..]) {
            Some((url, options)) => {
                let mut entry = CatalogueEntry::from_lines(line, url);
                entry.options = options;
                entries.push(entry);
            }
            None => {
                debug!(line = i + 1, "Dropping declaration without a URL line");
            }
        }
    }

    entries
}

/// Scans the lines after a declaration for its URL and any directives before it.
fn find_url<'a>(following: &[&'a str]) -> Option<(&'a str, Vec<String>)> {
    let mut options = Vec::new();
    for line in following.iter().copied() {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(METADATA_PREFIX) {
            return None;
        }
        if line.starts_with('#') {
            options.push(line.to_string());
            continue;
        }
        return Some((line, options));
    }
    None
}

/// Reads and parses a catalogue file.
///
/// A missing or unreadable file is fatal for the run; malformed
/// declarations inside a readable file are dropped with a debug trace.
///
/// # Arguments
///
/// * `path` - Catalogue file to read
/// * `group` - Optional substring a metadata line must contain
///
/// # Returns
///
/// * `Ok(Catalogue)` with entries in source order
/// * `Err(CatalogueError::NotFound)` if the file does not exist
/// * `Err(CatalogueError::Unreadable)` for any other read failure
pub fn load_catalogue(path: &Path, group: Option<&str>) -> Result<Catalogue, CatalogueError> {
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CatalogueError::NotFound(path.to_path_buf()),
        _ => CatalogueError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    Ok(Catalogue {
        path: path.to_path_buf(),
        group: group.map(str::to_string),
        entries: parse_catalogue(&text, group),
    })
}

/// Serializes entries back into catalogue text with a leading format marker.
pub fn render_catalogue<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = &'a CatalogueEntry>,
{
    let mut out = String::from(FORMAT_MARKER);
    out.push('\n');
    for entry in entries {
        out.push_str(&entry.metadata);
        out.push('\n');
        for option in &entry.options {
            out.push_str(option);
            out.push('\n');
        }
        out.push_str(&entry.url);
        out.push('\n');
    }
    out
}
