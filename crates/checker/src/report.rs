//! Structured JSON report of a verification pass.

use crate::media::StreamProfile;
use crate::orchestrator::{EntryOutcome, RunSummary};
use crate::probe::{LivenessVerdict, ProbeFailure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Error type for report writing
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Aggregate counts for a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunTotals {
    pub total: usize,
    pub skipped: usize,
    pub processed: usize,
    pub alive: usize,
    pub dead: usize,
    pub cancelled: bool,
}

/// Per-entry record in the report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryRecord {
    pub seq: u64,
    pub name: String,
    pub url: String,
    pub verdict: LivenessVerdict,
    pub failure: Option<ProbeFailure>,
    pub attempts: u32,
    pub bytes_received: u64,
    pub escalated: bool,
    pub profile: Option<StreamProfile>,
    pub screenshot: Option<PathBuf>,
}

impl From<&EntryOutcome> for EntryRecord {
    fn from(outcome: &EntryOutcome) -> Self {
        Self {
            seq: outcome.seq,
            name: outcome.entry.display_name.clone(),
            url: outcome.entry.url.clone(),
            verdict: outcome.report.verdict,
            failure: outcome.report.failure.clone(),
            attempts: outcome.report.attempts,
            bytes_received: outcome.report.bytes_received,
            escalated: outcome.report.escalated,
            profile: outcome.is_alive().then(|| outcome.profile.clone()),
            screenshot: outcome.screenshot.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MismatchRecord {
    pub seq: u64,
    pub name: String,
    pub url: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LowFrameRateRecord {
    pub seq: u64,
    pub name: String,
    pub url: String,
    pub frame_rate: u32,
}

/// Complete report for one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub generated_unix_ms: i64,
    pub catalogue: PathBuf,
    pub group: Option<String>,
    pub totals: RunTotals,
    pub entries: Vec<EntryRecord>,
    pub mismatches: Vec<MismatchRecord>,
    pub low_frame_rates: Vec<LowFrameRateRecord>,
}

impl RunReport {
    pub fn from_summary(summary: &RunSummary) -> Self {
        Self {
            generated_unix_ms: unix_timestamp_ms(),
            catalogue: summary.catalogue_path.clone(),
            group: summary.group.clone(),
            totals: RunTotals {
                total: summary.total,
                skipped: summary.skipped,
                processed: summary.processed(),
                alive: summary.alive(),
                dead: summary.dead(),
                cancelled: summary.cancelled,
            },
            entries: summary.outcomes.iter().map(EntryRecord::from).collect(),
            mismatches: summary
                .mismatch_findings()
                .into_iter()
                .map(|f| MismatchRecord {
                    seq: f.seq,
                    name: f.display_name,
                    url: f.url,
                    description: f.description,
                })
                .collect(),
            low_frame_rates: summary
                .low_frame_rate_findings()
                .into_iter()
                .map(|f| LowFrameRateRecord {
                    seq: f.seq,
                    name: f.display_name,
                    url: f.url,
                    frame_rate: f.frame_rate,
                })
                .collect(),
        }
    }

    /// Writes the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn unix_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
