//! IPTV Checker
//!
//! Verifies which entries of a stream catalogue are live right now, with a
//! crash-resumable checkpoint log, stream profiling and label consistency
//! checks.

pub mod catalogue;
pub mod checkpoint;
pub mod concurrency;
pub mod consistency;
pub mod media;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod startup;

pub use catalogue::{
    group_label, load_catalogue, parse_catalogue, render_catalogue, Catalogue, CatalogueEntry,
    CatalogueError,
};
pub use checkpoint::{
    format_checkpoint_line, parse_checkpoint_line, CheckpointError, CheckpointRecord,
    CheckpointStore, ResumeState,
};
pub use concurrency::worker_count;
pub use consistency::{check_frame_rate, check_label, QualityLabel};
pub use iptv_checker_config as config;
pub use iptv_checker_config::Config;
pub use media::{
    classify_resolution, parse_frame_rate, parse_probe_output, FfmpegTools, MediaTools,
    ResolutionClass, StreamProfile, ToolError,
};
pub use orchestrator::{
    confirm_alive, EntryOutcome, LowFrameRateFinding, MismatchFinding, Orchestrator, RunError,
    RunOptions, RunPaths, RunSummary,
};
pub use probe::{
    is_qualifying_media, BackoffPolicy, HttpTransport, LivenessProber, LivenessVerdict,
    ProbeFailure, ProbeReport, ProbeSettings, Transport, TransportError,
};
pub use report::{ReportError, RunReport};
pub use startup::{run_startup_checks, StartupError};
