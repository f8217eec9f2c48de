//! CLI entry point for the IPTV checker
//!
//! Parses command line arguments, loads configuration and runs one
//! verification pass over a playlist.

use clap::{ArgAction, Parser};
use iptv_checker::{
    load_catalogue, run_startup_checks, Config, EntryOutcome, FfmpegTools, HttpTransport,
    LivenessProber, Orchestrator, ProbeSettings, RunOptions, RunSummary,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status for a run stopped by Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

/// IPTV checker - verify which playlist streams are live
#[derive(Parser, Debug)]
#[command(name = "iptv-checker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the playlist file (.m3u / .m3u8)
    playlist: PathBuf,

    /// Only check entries whose metadata line contains this text
    #[arg(short, long)]
    group: Option<String>,

    /// Read timeout in seconds for each probe
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Retry dead streams once with this longer timeout
    #[arg(long)]
    extended_timeout: Option<f64>,

    /// Bytes a stream must deliver to count as alive
    #[arg(long)]
    min_bytes: Option<u64>,

    /// HTTP attempts per probe while rate limited
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Path to a configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder for the checkpoint log, output playlists, report and screenshots
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Checkpoint log to resume from (defaults to a name derived from the playlist)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Write separate playlists for working and dead streams
    #[arg(short, long)]
    split: bool,

    /// Write a playlist with measured video/audio details in each name
    #[arg(short, long)]
    rename: bool,

    /// Confirm alive streams by decoding a few seconds with ffmpeg
    #[arg(long)]
    verify: bool,

    /// Capture one frame of every alive stream
    #[arg(long)]
    capture: bool,

    /// Streams probed at once (0 = one per CPU core)
    #[arg(long)]
    concurrency: Option<u32>,

    /// Skip startup checks (ffprobe, ffmpeg). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

impl Args {
    /// Command line values override config file and environment values.
    fn apply(&self, cfg: &mut Config) {
        if let Some(secs) = self.timeout {
            cfg.probe.read_timeout_secs = secs;
        }
        if let Some(secs) = self.extended_timeout {
            cfg.probe.extended_timeout_secs = Some(secs);
        }
        if let Some(bytes) = self.min_bytes {
            cfg.probe.min_bytes = bytes;
        }
        if let Some(attempts) = self.max_attempts {
            cfg.probe.max_attempts = attempts;
        }
        if let Some(dir) = &self.output_dir {
            cfg.run.output_dir = dir.clone();
        }
        if let Some(workers) = self.concurrency {
            cfg.run.concurrency = workers;
        }
        cfg.run.split |= self.split;
        cfg.run.rename |= self.rename;
        cfg.tools.decode_verification |= self.verify;
        cfg.tools.capture_frames |= self.capture;
    }
}

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load(path)
            .map_err(|e| format!("Failed to load config {}: {}", path.display(), e)),
        None => Ok(Config::from_env()),
    }
}

/// One console line per processed entry.
fn progress_line(outcome: &EntryOutcome) -> String {
    let head = format!(
        "{}/{} {}",
        outcome.seq, outcome.total, outcome.entry.display_name
    );
    if outcome.is_alive() {
        format!(
            "{} - Alive: ✓ ||| Video: {} - Audio: {}",
            head,
            outcome.profile.video_summary(),
            outcome.profile.audio_summary()
        )
    } else {
        match &outcome.report.failure {
            Some(failure) => format!("{} - Dead: ✗ ({})", head, failure),
            None => format!("{} - Dead: ✗", head),
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "Alive: {}  Dead: {}  Skipped (already checked): {}  Total: {}",
        summary.alive(),
        summary.dead(),
        summary.skipped,
        summary.total
    );
    if summary.cancelled {
        println!("Run interrupted; rerun with the same checkpoint to continue.");
    }

    let mismatches = summary.mismatch_findings();
    if !mismatches.is_empty() {
        println!();
        println!("Label mismatches:");
        for finding in &mismatches {
            println!("  {}", finding.description);
        }
    }

    let low = summary.low_frame_rate_findings();
    if !low.is_empty() {
        println!();
        println!("Low frame rate streams:");
        for finding in &low {
            println!("  {}: {}fps", finding.display_name, finding.frame_rate);
        }
    }

    println!();
    println!("Checkpoint log: {}", summary.paths.checkpoint.display());
    println!("Report: {}", summary.paths.report.display());
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = run_startup_checks(&config).await {
        eprintln!("Startup check failed: {}", e);
        return ExitCode::FAILURE;
    }

    let catalogue = match load_catalogue(&args.playlist, args.group.as_deref()) {
        Ok(catalogue) => catalogue,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "Checking {} entries from {}",
        catalogue.len(),
        catalogue.path.display()
    );

    let settings = ProbeSettings::from_config(&config);
    let transport = match HttpTransport::new(settings.connect_timeout) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let prober = LivenessProber::new(transport, settings);
    let tools = FfmpegTools::from_config(&config.tools);
    let mut options = RunOptions::from_config(&config);
    options.checkpoint = args.checkpoint.clone();
    let orchestrator = Orchestrator::new(prober, tools, options);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing entries in flight");
            interrupt.cancel();
        }
    });

    let mut print_progress = |outcome: &EntryOutcome| println!("{}", progress_line(outcome));
    match orchestrator.run(&catalogue, &cancel, &mut print_progress).await {
        Ok(summary) => {
            info!(report = %summary.paths.report.display(), "Run complete");
            print_summary(&summary);
            if summary.cancelled {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
