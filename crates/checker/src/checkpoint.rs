//! Checkpoint module for resumable runs.
//!
//! Every processed entry appends one line to a plain-text log. On restart the
//! log is read back to find which entries can be skipped and where sequence
//! numbering left off. Records are never rewritten or removed.
//!
//! Line format: `<seq>/<total> <fields...> - <identifier> - <rest>`. Only the
//! leading integer and the identifier are significant when loading.

use crate::catalogue::FIELD_SEPARATOR;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Error type for checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to append to checkpoint log {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One significant record recovered from a checkpoint line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Leading sequence number, if the line had one.
    pub sequence_index: Option<u64>,
    pub identifier: String,
}

/// Snapshot of a checkpoint log at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeState {
    /// Identifiers of every entry already processed.
    pub processed: HashSet<String>,
    /// Highest sequence index seen; numbering continues after it.
    pub resume_counter: u64,
}

impl ResumeState {
    pub fn contains(&self, identifier: &str) -> bool {
        self.processed.contains(identifier)
    }
}

/// Parses one checkpoint line.
///
/// Returns `None` for lines that do not carry an identifier field.
pub fn parse_checkpoint_line(line: &str) -> Option<CheckpointRecord> {
    // Only line endings are stripped; a trailing " - " must stay a separator
    // and the identifier is taken verbatim.
    let mut fields = line.trim_end_matches(['\r', '\n']).split(FIELD_SEPARATOR);
    let head = fields.next()?;
    let identifier = fields.next()?;
    if identifier.trim().is_empty() {
        return None;
    }

    // "12/340" -> 12; a head without leading digits contributes no index.
    let digits: String = head
        .split_whitespace()
        .next()
        .unwrap_or("")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    Some(CheckpointRecord {
        sequence_index: digits.parse().ok(),
        identifier: identifier.to_string(),
    })
}

/// Formats one checkpoint line.
///
/// `status` and `detail` are advisory; only `seq` and `identifier` are read back.
pub fn format_checkpoint_line(
    seq: u64,
    total: usize,
    status: &str,
    identifier: &str,
    detail: &str,
) -> String {
    format!(
        "{}/{} {}{sep}{}{sep}{}",
        seq,
        total,
        status,
        identifier,
        detail,
        sep = FIELD_SEPARATOR
    )
}

/// Append-only checkpoint log bound to a file path.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Binds a store to `path`. The file is created on first append.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the log into a resume state.
    ///
    /// A missing file yields an empty state. Malformed lines are skipped.
    pub fn load(&self) -> Result<ResumeState, CheckpointError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No checkpoint log, starting fresh");
                return Ok(ResumeState::default());
            }
            Err(e) => {
                return Err(CheckpointError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let mut state = ResumeState::default();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_checkpoint_line(line) {
                Some(record) => {
                    if let Some(seq) = record.sequence_index {
                        state.resume_counter = state.resume_counter.max(seq);
                    }
                    state.processed.insert(record.identifier);
                }
                None => {
                    debug!(line = number + 1, "Skipping malformed checkpoint line");
                }
            }
        }

        Ok(state)
    }

    /// Appends one line and syncs it to disk before returning.
    ///
    /// The line is written with a single `write_all` so an interrupted run
    /// leaves either the whole record or none of it.
    ///
    /// # Arguments
    ///
    /// * `line` - Formatted record; embedded newlines are replaced by spaces
    ///
    /// # Returns
    ///
    /// * `Ok(())` once the record is on disk
    /// * `Err(CheckpointError::Append)` if the log could not be opened or written
    pub fn append(&self, line: &str) -> Result<(), CheckpointError> {
        let to_err = |source| CheckpointError::Append {
            path: self.path.clone(),
            source,
        };

        let mut file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(to_err)?;

        let mut record = line.replace('\n', " ");
        record.push('\n');
        file.write_all(record.as_bytes()).map_err(to_err)?;
        file.flush().map_err(to_err)?;
        file.sync_data().map_err(to_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(temp_dir.path().join("checklog.txt"));

        let state = store.load().unwrap();
        assert!(state.processed.is_empty());
        assert_eq!(state.resume_counter, 0);
    }

    #[test]
    fn test_append_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(temp_dir.path().join("checklog.txt"));

        store
            .append(&format_checkpoint_line(1, 3, "Alive", "News http://x/n.ts", "video: 1080p"))
            .unwrap();
        store
            .append(&format_checkpoint_line(2, 3, "Dead", "Film http://x/f.ts", "video: Unknown"))
            .unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.resume_counter, 2);
        assert_eq!(state.processed.len(), 2);
        assert!(state.contains("News http://x/n.ts"));
        assert!(state.contains("Film http://x/f.ts"));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checklog.txt");
        fs::write(
            &path,
            "garbage without separator\n\n7/9 Alive - Kept http://x/k.ts - ok\n3/9 Dead -  - \n",
        )
        .unwrap();

        let state = CheckpointStore::open(&path).load().unwrap();
        assert_eq!(state.processed.len(), 1);
        assert!(state.contains("Kept http://x/k.ts"));
        assert_eq!(state.resume_counter, 7);
    }

    #[test]
    fn test_resume_counter_is_maximum_index() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checklog.txt");
        fs::write(
            &path,
            "4/10 Alive - A http://a - x\n9/10 Dead - B http://b - x\n6/10 Alive - C http://c - x\n",
        )
        .unwrap();

        let state = CheckpointStore::open(&path).load().unwrap();
        assert_eq!(state.resume_counter, 9);
    }

    #[test]
    fn test_empty_detail_does_not_leak_into_identifier() {
        let line = format_checkpoint_line(5, 5, "Dead", "A http://a", "");
        let record = parse_checkpoint_line(&line).unwrap();
        assert_eq!(record.identifier, "A http://a");
        assert_eq!(record.sequence_index, Some(5));
    }

    #[test]
    fn test_identifiers_round_trip_through_log() {
        use crate::catalogue::CatalogueEntry;

        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(temp_dir.path().join("checklog.txt"));
        let unnamed = CatalogueEntry::from_lines("#EXTINF:-1,", "http://x/1.ts");
        let dashed = CatalogueEntry::from_lines("#EXTINF:-1,Sky Sports -", "http://x/2.ts");

        store
            .append(&format_checkpoint_line(1, 2, "Dead", &unnamed.identifier(), "HTTP status 404"))
            .unwrap();
        store
            .append(&format_checkpoint_line(2, 2, "Dead", &dashed.identifier(), ""))
            .unwrap();

        let state = store.load().unwrap();
        assert!(state.contains(&unnamed.identifier()));
        assert!(state.contains(&dashed.identifier()));
        assert_eq!(state.processed.len(), 2);
    }

    #[test]
    fn test_line_without_index_still_marks_processed() {
        let record = parse_checkpoint_line("?? Alive - A http://a - rest").unwrap();
        assert_eq!(record.sequence_index, None);
        assert_eq!(record.identifier, "A http://a");
    }

    #[test]
    fn test_append_strips_embedded_newlines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checklog.txt");
        let store = CheckpointStore::open(&path);

        store.append("1/1 Alive - A http://a - two\nlines").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_append_never_rewrites_existing_records() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checklog.txt");
        fs::write(&path, "1/2 Alive - A http://a - x\n").unwrap();

        let store = CheckpointStore::open(&path);
        store.append("2/2 Dead - B http://b - y").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "1/2 Alive - A http://a - x\n2/2 Dead - B http://b - y\n");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_formatted_line_parses_back(
            seq in 0u64..1_000_000,
            total in 0usize..1_000_000,
            name in "[A-Za-z0-9 ]{1,20}",
            path in "[a-z0-9]{1,10}",
        ) {
            let identifier = format!("{} http://host/{}.ts", name.trim(), path);
            prop_assume!(!name.trim().is_empty());

            let line = format_checkpoint_line(seq, total, "Alive", &identifier, "video: SD");
            let record = parse_checkpoint_line(&line).expect("formatted line should parse");

            prop_assert_eq!(record.sequence_index, Some(seq));
            prop_assert_eq!(record.identifier, identifier);
        }
    }
}
