//! Run orchestrator for a verification pass over one catalogue.
//!
//! Per entry, in catalogue order: skip if checkpointed, probe, optionally
//! confirm by decoding, then profile, consistency-check and capture alive
//! streams. A checkpoint line is appended after every processed entry.
//! Partitioned and renamed catalogues plus the JSON report are written once
//! the pass ends, including after a cancellation.

use crate::catalogue::{render_catalogue, Catalogue, CatalogueEntry, CatalogueError};
use crate::checkpoint::{format_checkpoint_line, CheckpointError, CheckpointStore};
use crate::concurrency::worker_count;
use crate::consistency::{check_frame_rate, check_label};
use crate::media::{MediaTools, StreamProfile};
use crate::probe::{LivenessProber, ProbeFailure, ProbeReport, Transport};
use crate::report::{ReportError, RunReport};
use futures::stream::{self, StreamExt};
use iptv_checker_config::Config;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error type for run-fatal failures.
///
/// Per-entry failures never surface here; they are recorded on the entry's
/// [`ProbeReport`].
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// An output file or folder could not be written.
    #[error("Failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Files derived from the catalogue name, group label and output folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub checkpoint: PathBuf,
    pub working: PathBuf,
    pub dead: PathBuf,
    pub renamed: PathBuf,
    pub report: PathBuf,
    pub screenshots: PathBuf,
}

impl RunPaths {
    /// `<output_dir>/<stem>_<group>_<suffix>`, with an optional checkpoint
    /// path overriding the derived log location.
    pub fn derive(catalogue: &Catalogue, output_dir: &Path, checkpoint: Option<&Path>) -> Self {
        let base = format!("{}_{}", catalogue.stem(), catalogue.group_label());
        let file = |suffix: &str| output_dir.join(format!("{}_{}", base, suffix));

        Self {
            checkpoint: checkpoint
                .map(Path::to_path_buf)
                .unwrap_or_else(|| file("checklog.txt")),
            working: file("working.m3u8"),
            dead: file("dead.m3u8"),
            renamed: file("renamed.m3u8"),
            report: file("report.json"),
            screenshots: file("screenshots"),
        }
    }
}

/// Switches and limits for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Entries probed at once; outputs stay in catalogue order regardless.
    pub concurrency: usize,
    pub split: bool,
    pub rename: bool,
    pub decode_verification: bool,
    pub capture_frames: bool,
    pub low_framerate_threshold: u32,
    pub output_dir: PathBuf,
    /// Overrides the derived checkpoint path.
    pub checkpoint: Option<PathBuf>,
}

impl RunOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            concurrency: worker_count(cfg),
            split: cfg.run.split,
            rename: cfg.run.rename,
            decode_verification: cfg.tools.decode_verification,
            capture_frames: cfg.tools.capture_frames,
            low_framerate_threshold: cfg.run.low_framerate_threshold,
            output_dir: cfg.run.output_dir.clone(),
            checkpoint: None,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of processing one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOutcome {
    /// Sequence number, continuing from the checkpoint's resume counter.
    pub seq: u64,
    pub total: usize,
    pub entry: CatalogueEntry,
    pub report: ProbeReport,
    /// Unknown for dead entries.
    pub profile: StreamProfile,
    pub mismatches: Vec<String>,
    /// Measured frame rate when at or below the low-framerate threshold.
    pub low_frame_rate: Option<u32>,
    pub screenshot: Option<PathBuf>,
}

impl EntryOutcome {
    pub fn is_alive(&self) -> bool {
        self.report.verdict.is_alive()
    }

    /// The checkpoint line recording this outcome.
    pub fn checkpoint_line(&self) -> String {
        format_checkpoint_line(
            self.seq,
            self.total,
            &self.report.verdict.to_string(),
            &self.entry.identifier(),
            &self.profile.summary(),
        )
    }

    /// Entry as it appears in the renamed catalogue.
    ///
    /// Alive entries carry their measured profile in brackets; dead entries
    /// and entries with nothing measured keep their name.
    pub fn renamed_entry(&self) -> CatalogueEntry {
        match self.profile.label() {
            Some(label) if self.is_alive() => self
                .entry
                .with_display_name(&format!("{} [{}]", self.entry.display_name, label)),
            _ => self.entry.clone(),
        }
    }
}

/// Resolution mismatch recorded for an alive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchFinding {
    pub seq: u64,
    pub display_name: String,
    pub url: String,
    pub description: String,
}

/// Low frame rate recorded for an alive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowFrameRateFinding {
    pub seq: u64,
    pub display_name: String,
    pub url: String,
    pub frame_rate: u32,
}

/// Everything a finished (or cancelled) run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub catalogue_path: PathBuf,
    pub group: Option<String>,
    /// Entries that passed the group filter.
    pub total: usize,
    /// Entries skipped because the checkpoint already listed them.
    pub skipped: usize,
    /// Outcomes of this run, in catalogue order.
    pub outcomes: Vec<EntryOutcome>,
    /// The run stopped before every pending entry was processed.
    pub cancelled: bool,
    pub paths: RunPaths,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn alive(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_alive()).count()
    }

    pub fn dead(&self) -> usize {
        self.processed() - self.alive()
    }

    pub fn mismatch_findings(&self) -> Vec<MismatchFinding> {
        self.outcomes
            .iter()
            .flat_map(|o| {
                o.mismatches.iter().map(move |description| MismatchFinding {
                    seq: o.seq,
                    display_name: o.entry.display_name.clone(),
                    url: o.entry.url.clone(),
                    description: description.clone(),
                })
            })
            .collect()
    }

    pub fn low_frame_rate_findings(&self) -> Vec<LowFrameRateFinding> {
        self.outcomes
            .iter()
            .filter_map(|o| {
                o.low_frame_rate.map(|frame_rate| LowFrameRateFinding {
                    seq: o.seq,
                    display_name: o.entry.display_name.clone(),
                    url: o.entry.url.clone(),
                    frame_rate,
                })
            })
            .collect()
    }
}

/// Decode verification stage applied to an alive report.
///
/// A failed or timed out decode downgrades the report to dead. Dead reports
/// pass through untouched.
///
/// # Arguments
///
/// * `tools` - Media tool runner used for the decode attempt
/// * `url` - Entry URL, decoded from the start
/// * `report` - Report produced by the liveness prober for `url`
pub async fn confirm_alive<M: MediaTools>(tools: &M, url: &str, report: ProbeReport) -> ProbeReport {
    if !report.verdict.is_alive() {
        return report;
    }

    match tools.verify_decode(url).await {
        Ok(()) => {
            debug!(url, "Decode verification passed");
            report
        }
        Err(e) => {
            info!(url, error = %e, "Decode verification rejected stream");
            report.reject(ProbeFailure::DecodeRejected {
                reason: e.to_string(),
            })
        }
    }
}

/// File name for a captured frame: `<seq>-<name>.png` with `/` replaced.
pub fn screenshot_file_name(seq: u64, display_name: &str) -> String {
    format!("{}-{}.png", seq, display_name.replace('/', "-"))
}

/// Drives the pipeline over a catalogue.
pub struct Orchestrator<T, M> {
    prober: LivenessProber<T>,
    tools: M,
    options: RunOptions,
}

impl<T: Transport, M: MediaTools> Orchestrator<T, M> {
    pub fn new(prober: LivenessProber<T>, tools: M, options: RunOptions) -> Self {
        Self {
            prober,
            tools,
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs one verification pass.
    ///
    /// `progress` is called once per processed entry, in catalogue order,
    /// right after its checkpoint line is durable. Cancelling `cancel` stops
    /// new entries from starting; entries already in flight finish and are
    /// checkpointed, and outputs are still written.
    ///
    /// # Arguments
    ///
    /// * `catalogue` - Parsed catalogue to verify, already group-filtered
    /// * `cancel` - Token checked before each entry starts
    /// * `progress` - Callback receiving each outcome after it is checkpointed
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` for a finished or cancelled pass
    /// * `Err(RunError)` if the checkpoint log, an output file or the report
    ///   could not be read or written
    pub async fn run(
        &self,
        catalogue: &Catalogue,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(&EntryOutcome),
    ) -> Result<RunSummary, RunError> {
        let paths = RunPaths::derive(
            catalogue,
            &self.options.output_dir,
            self.options.checkpoint.as_deref(),
        );
        create_dir(&self.options.output_dir)?;
        if self.options.capture_frames {
            create_dir(&paths.screenshots)?;
        }

        let store = CheckpointStore::open(&paths.checkpoint);
        let resume = store.load()?;
        let total = catalogue.len();

        // Repeats of an identifier within the catalogue count as skipped.
        let mut seen = HashSet::new();
        let pending: Vec<&CatalogueEntry> = catalogue
            .entries
            .iter()
            .filter(|entry| {
                let identifier = entry.identifier();
                if resume.contains(&identifier) {
                    debug!(name = %entry.display_name, "Already checkpointed, skipping");
                    return false;
                }
                if !seen.insert(identifier) {
                    debug!(name = %entry.display_name, "Duplicate entry, skipping");
                    return false;
                }
                true
            })
            .collect();
        let skipped = total - pending.len();

        info!(
            catalogue = %catalogue.path.display(),
            total,
            skipped,
            resume_from = resume.resume_counter,
            concurrency = self.options.concurrency,
            "Starting verification pass"
        );

        let pending_count = pending.len();
        let first_seq = resume.resume_counter + 1;
        let mut outcomes = Vec::with_capacity(pending_count);
        {
            let outcomes_stream = stream::iter(pending.into_iter().enumerate())
                .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
                .map(|(k, entry)| self.process_entry(first_seq + k as u64, total, entry, &paths))
                .buffered(self.options.concurrency.max(1));
            let mut outcomes_stream = std::pin::pin!(outcomes_stream);

            // Appends happen here, one at a time, in catalogue order.
            while let Some(outcome) = outcomes_stream.next().await {
                store.append(&outcome.checkpoint_line())?;
                progress(&outcome);
                outcomes.push(outcome);
            }
        }

        let cancelled = outcomes.len() < pending_count;
        if cancelled {
            warn!(
                processed = outcomes.len(),
                remaining = pending_count - outcomes.len(),
                "Run cancelled before all entries were processed"
            );
        }

        let summary = RunSummary {
            catalogue_path: catalogue.path.clone(),
            group: catalogue.group.clone(),
            total,
            skipped,
            outcomes,
            cancelled,
            paths,
        };
        self.write_outputs(&summary)?;

        info!(
            alive = summary.alive(),
            dead = summary.dead(),
            skipped = summary.skipped,
            "Verification pass finished"
        );
        Ok(summary)
    }

    async fn process_entry(
        &self,
        seq: u64,
        total: usize,
        entry: &CatalogueEntry,
        paths: &RunPaths,
    ) -> EntryOutcome {
        let url = entry.url.as_str();
        let mut report = self.prober.probe(url).await;
        if self.options.decode_verification {
            report = confirm_alive(&self.tools, url, report).await;
        }

        let mut outcome = EntryOutcome {
            seq,
            total,
            entry: entry.clone(),
            report,
            profile: StreamProfile::unknown(),
            mismatches: Vec::new(),
            low_frame_rate: None,
            screenshot: None,
        };

        if !outcome.is_alive() {
            info!(
                seq,
                name = %entry.display_name,
                failure = ?outcome.report.failure,
                "Dead"
            );
            return outcome;
        }

        outcome.profile = self.tools.profile(url).await;
        outcome.mismatches = check_label(&entry.display_name, outcome.profile.resolution);
        outcome.low_frame_rate = check_frame_rate(
            outcome.profile.frame_rate,
            self.options.low_framerate_threshold,
        );

        if self.options.capture_frames {
            let output = paths
                .screenshots
                .join(screenshot_file_name(seq, &entry.display_name));
            match self.tools.capture_frame(url, &output).await {
                Ok(()) => outcome.screenshot = Some(output),
                Err(e) => warn!(seq, url, error = %e, "Frame capture failed"),
            }
        }

        info!(
            seq,
            name = %entry.display_name,
            profile = %outcome.profile.summary(),
            "Alive"
        );
        outcome
    }

    fn write_outputs(&self, summary: &RunSummary) -> Result<(), RunError> {
        let paths = &summary.paths;

        if self.options.split {
            let working = summary.outcomes.iter().filter(|o| o.is_alive()).map(|o| &o.entry);
            write_file(&paths.working, &render_catalogue(working))?;

            let dead = summary.outcomes.iter().filter(|o| !o.is_alive()).map(|o| &o.entry);
            write_file(&paths.dead, &render_catalogue(dead))?;
        }

        if self.options.rename {
            let renamed: Vec<CatalogueEntry> =
                summary.outcomes.iter().map(EntryOutcome::renamed_entry).collect();
            write_file(&paths.renamed, &render_catalogue(&renamed))?;
        }

        RunReport::from_summary(summary).write_json(&paths.report)?;
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<(), RunError> {
    fs::create_dir_all(path).map_err(|source| RunError::Output {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, content: &str) -> Result<(), RunError> {
    debug!(path = %path.display(), "Writing catalogue");
    fs::write(path, content).map_err(|source| RunError::Output {
        path: path.to_path_buf(),
        source,
    })
}
