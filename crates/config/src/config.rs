//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Liveness probe configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeConfig {
    /// Connection setup bound in seconds (default 5)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: f64,
    /// Header and per-read timeout in seconds (default 10)
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: f64,
    /// Second-chance read timeout for entries that probed dead (disabled if None)
    #[serde(default)]
    pub extended_timeout_secs: Option<f64>,
    /// HTTP attempts per probe, rate-limited retries included (default 6)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Bytes that must arrive before a stream counts as alive (default 100 KiB)
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,
    /// Upper bound on the whole body read in seconds (default 30)
    #[serde(default = "default_stream_window_secs")]
    pub stream_window_secs: f64,
    /// Resolve playlist responses to their first media URI (default true)
    #[serde(default = "default_follow_playlists")]
    pub follow_playlists: bool,
    /// Maximum nesting of followed playlists (default 3)
    #[serde(default = "default_max_playlist_depth")]
    pub max_playlist_depth: u32,
}

fn default_connect_timeout_secs() -> f64 {
    5.0
}

fn default_read_timeout_secs() -> f64 {
    10.0
}

fn default_max_attempts() -> u32 {
    6
}

fn default_min_bytes() -> u64 {
    100 * 1024
}

fn default_stream_window_secs() -> f64 {
    30.0
}

fn default_follow_playlists() -> bool {
    true
}

fn default_max_playlist_depth() -> u32 {
    3
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            extended_timeout_secs: None,
            max_attempts: default_max_attempts(),
            min_bytes: default_min_bytes(),
            stream_window_secs: default_stream_window_secs(),
            follow_playlists: default_follow_playlists(),
            max_playlist_depth: default_max_playlist_depth(),
        }
    }
}

/// Backoff shape applied between rate-limited attempts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Delay grows by `multiplier` after every rate-limited attempt
    #[default]
    Exponential,
    /// Every retry waits `initial_delay_ms`
    Fixed,
}

/// Rate-limit backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// First delay in milliseconds (default 2000)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Growth factor for the exponential strategy (default 2.0)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Cap on any single delay in milliseconds (default 60000)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// External media tool configuration (ffprobe / ffmpeg)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Bound on each ffprobe invocation in seconds (default 10)
    #[serde(default = "default_profile_timeout_secs")]
    pub profile_timeout_secs: f64,
    /// Bound on a frame capture in seconds (default 30)
    #[serde(default = "default_capture_timeout_secs")]
    pub capture_timeout_secs: f64,
    /// Bound on a decode verification pass in seconds (default 30)
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: f64,
    /// Seconds of media decoded during verification (default 5)
    #[serde(default = "default_verify_duration_secs")]
    pub verify_duration_secs: u32,
    /// Confirm alive verdicts by decoding a short window (default false)
    #[serde(default)]
    pub decode_verification: bool,
    /// Save a still frame for every alive entry (default false)
    #[serde(default)]
    pub capture_frames: bool,
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_profile_timeout_secs() -> f64 {
    10.0
}

fn default_capture_timeout_secs() -> f64 {
    30.0
}

fn default_verify_timeout_secs() -> f64 {
    30.0
}

fn default_verify_duration_secs() -> u32 {
    5
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: default_ffprobe_path(),
            ffmpeg_path: default_ffmpeg_path(),
            profile_timeout_secs: default_profile_timeout_secs(),
            capture_timeout_secs: default_capture_timeout_secs(),
            verify_timeout_secs: default_verify_timeout_secs(),
            verify_duration_secs: default_verify_duration_secs(),
            decode_verification: false,
            capture_frames: false,
        }
    }
}

/// Run-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Entries probed at once (0 = auto-derive, default 1)
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    /// Frame rates at or below this are reported (default 30)
    #[serde(default = "default_low_framerate_threshold")]
    pub low_framerate_threshold: u32,
    /// Write working/dead catalogues
    #[serde(default)]
    pub split: bool,
    /// Write a catalogue with measured profiles embedded in the names
    #[serde(default)]
    pub rename: bool,
    /// Directory receiving checkpoint, catalogues, report and screenshots
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_concurrency() -> u32 {
    1
}

fn default_low_framerate_threshold() -> u32 {
    30
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            low_framerate_threshold: default_low_framerate_threshold(),
            split: false,
            rename: false,
            output_dir: default_output_dir(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub run: RunConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - IPTV_READ_TIMEOUT_SECS -> probe.read_timeout_secs
    /// - IPTV_EXTENDED_TIMEOUT_SECS -> probe.extended_timeout_secs
    /// - IPTV_MAX_ATTEMPTS -> probe.max_attempts
    /// - IPTV_MIN_BYTES -> probe.min_bytes
    /// - IPTV_CONCURRENCY -> run.concurrency
    /// - IPTV_DECODE_VERIFICATION -> tools.decode_verification
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("IPTV_READ_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<f64>() {
                self.probe.read_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("IPTV_EXTENDED_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<f64>() {
                self.probe.extended_timeout_secs = Some(secs);
            }
        }

        if let Ok(val) = env::var("IPTV_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse::<u32>() {
                self.probe.max_attempts = attempts;
            }
        }

        if let Ok(val) = env::var("IPTV_MIN_BYTES") {
            if let Ok(bytes) = val.parse::<u64>() {
                self.probe.min_bytes = bytes;
            }
        }

        if let Ok(val) = env::var("IPTV_CONCURRENCY") {
            if let Ok(workers) = val.parse::<u32>() {
                self.run.concurrency = workers;
            }
        }

        if let Ok(val) = env::var("IPTV_DECODE_VERIFICATION") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.tools.decode_verification = true,
                "false" | "0" | "no" => self.tools.decode_verification = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }
}
