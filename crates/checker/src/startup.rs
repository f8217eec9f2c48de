//! Startup checks run before a verification pass.
//!
//! - ffprobe must run, since every alive entry is profiled with it
//! - ffmpeg must run when decode verification or frame capture is enabled

use crate::media::ffmpeg::run_tool;
use crate::media::ToolError;
use iptv_checker_config::Config;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Upper bound for a `-version` invocation.
pub const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffprobe not available: {0}")]
    FfprobeUnavailable(#[source] ToolError),

    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(#[source] ToolError),
}

/// Extracts the version token from `-version` output.
///
/// Handles `"ffmpeg version 6.1.1 ..."` and `"ffprobe version n7.0-12-gabc ..."`.
/// The token must start with a digit once a leading `n` is removed.
pub fn parse_tool_version(version_output: &str) -> Option<String> {
    version_output.lines().find_map(|line| {
        let start = line.find(" version ")? + " version ".len();
        let token = line[start..].split_whitespace().next()?;
        let token = token.strip_prefix('n').unwrap_or(token);
        token
            .starts_with(|c: char| c.is_ascii_digit())
            .then(|| token.to_string())
    })
}

/// Runs `<program> -version` within `limit` and returns the reported version.
///
/// # Arguments
///
/// * `program` - Path or name of the tool; resolved through `PATH` when bare
/// * `limit` - Time bound after which the process is killed
async fn tool_version(program: &Path, limit: Duration) -> Result<String, ToolError> {
    let mut cmd = Command::new(program);
    cmd.arg("-version");
    let output = run_tool(&program.display().to_string(), cmd, limit).await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_tool_version(&stdout).unwrap_or_else(|| "unknown".to_string()))
}

/// Check that ffprobe runs.
pub async fn check_ffprobe_available(program: &Path) -> Result<String, StartupError> {
    tool_version(program, VERSION_CHECK_TIMEOUT)
        .await
        .map_err(StartupError::FfprobeUnavailable)
}

/// Check that ffmpeg runs.
pub async fn check_ffmpeg_available(program: &Path) -> Result<String, StartupError> {
    tool_version(program, VERSION_CHECK_TIMEOUT)
        .await
        .map_err(StartupError::FfmpegUnavailable)
}

/// Whether the configured run invokes ffmpeg at all.
pub fn needs_ffmpeg(cfg: &Config) -> bool {
    cfg.tools.decode_verification || cfg.tools.capture_frames
}

/// Run all startup checks in order
pub async fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    let version = check_ffprobe_available(&cfg.tools.ffprobe_path).await?;
    debug!(%version, "ffprobe available");

    if needs_ffmpeg(cfg) {
        let version = check_ffmpeg_available(&cfg.tools.ffmpeg_path).await?;
        debug!(%version, "ffmpeg available");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_parse_tool_version_standard() {
        let output = "ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers";
        assert_eq!(parse_tool_version(output).as_deref(), Some("6.1.1"));
    }

    #[test]
    fn test_parse_tool_version_n_prefixed_multiline() {
        let output = "ffprobe version n7.0-12-gabcdef Copyright (c) 2007-2024\nbuilt with gcc 13.2.0\n";
        assert_eq!(parse_tool_version(output).as_deref(), Some("7.0-12-gabcdef"));
    }

    #[test]
    fn test_parse_tool_version_invalid() {
        assert_eq!(parse_tool_version("not a version banner"), None);
        assert_eq!(parse_tool_version("this version is unknown"), None);
        assert_eq!(parse_tool_version(""), None);
    }

    #[test]
    fn test_parse_tool_version_skips_non_banner_lines() {
        let output = "a version mismatch warning\nffmpeg version 5.1.4 Copyright\n";
        assert_eq!(parse_tool_version(output).as_deref(), Some("5.1.4"));
    }

    #[tokio::test]
    async fn test_missing_ffprobe_fails() {
        let mut cfg = Config::default();
        cfg.tools.ffprobe_path = PathBuf::from("/nonexistent/ffprobe");

        let err = run_startup_checks(&cfg).await.unwrap_err();
        assert!(matches!(err, StartupError::FfprobeUnavailable(_)));
        assert!(err.to_string().contains("/nonexistent/ffprobe"));
    }

    #[test]
    fn test_ffmpeg_only_required_when_used() {
        let mut cfg = Config::default();
        assert!(!needs_ffmpeg(&cfg));

        cfg.tools.capture_frames = true;
        assert!(needs_ffmpeg(&cfg));

        cfg.tools.capture_frames = false;
        cfg.tools.decode_verification = true;
        assert!(needs_ffmpeg(&cfg));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_fails() {
        let err = check_ffmpeg_available(Path::new("/nonexistent/ffmpeg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::FfmpegUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hanging_tool_is_killed_after_limit() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let program = temp_dir.path().join("ffprobe");
        std::fs::write(&program, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = std::time::Instant::now();
        let err = tool_version(&program, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_version_token_extracted(
            major in 1u32..20,
            minor in 0u32..10,
            tool_idx in 0usize..2,
        ) {
            let tool = ["ffmpeg", "ffprobe"][tool_idx];
            let output = format!("{} version {}.{} Copyright (c) 2000-2024", tool, major, minor);
            let expected = format!("{}.{}", major, minor);
            prop_assert_eq!(parse_tool_version(&output), Some(expected));
        }
    }
}
