//! ffprobe/ffmpeg backed media tools.
//!
//! Every invocation runs with a time bound and is killed when the bound
//! expires, so a stuck stream can never hold up the run.

use super::{parse_probe_output, MediaTools, StreamProfile, ToolError};
use crate::probe::secs;
use iptv_checker_config::ToolsConfig;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Offset into the stream at which frames are captured.
const CAPTURE_OFFSET: &str = "00:00:02";

/// Media tools backed by the ffmpeg suite.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
    profile_timeout: Duration,
    capture_timeout: Duration,
    verify_timeout: Duration,
    verify_duration_secs: u32,
}

impl FfmpegTools {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        Self {
            ffprobe: cfg.ffprobe_path.clone(),
            ffmpeg: cfg.ffmpeg_path.clone(),
            profile_timeout: secs(cfg.profile_timeout_secs),
            capture_timeout: secs(cfg.capture_timeout_secs),
            verify_timeout: secs(cfg.verify_timeout_secs),
            verify_duration_secs: cfg.verify_duration_secs.max(1),
        }
    }

    /// Build the ffprobe command for one stream selector (`v:0` or `a:0`).
    pub fn build_probe_command(&self, url: &str, selector: &str, entries: &str) -> Command {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(["-v", "error", "-select_streams", selector, "-show_entries"])
            .arg(format!("stream={}", entries))
            .args(["-of", "default=noprint_wrappers=1"])
            .arg(url);
        cmd
    }

    /// Build the ffmpeg command that decodes a short window and discards it.
    pub fn build_verify_command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-nostdin", "-v", "error", "-t"])
            .arg(self.verify_duration_secs.to_string())
            .arg("-i")
            .arg(url)
            .args(["-f", "null", "-"]);
        cmd
    }

    /// Build the ffmpeg command that saves a single frame.
    pub fn build_capture_command(&self, url: &str, output: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-nostdin", "-y", "-v", "error", "-i"])
            .arg(url)
            .args(["-ss", CAPTURE_OFFSET, "-frames:v", "1"])
            .arg(output);
        cmd
    }

    async fn probe_streams(&self, url: &str, selector: &str, entries: &str) -> Option<String> {
        let cmd = self.build_probe_command(url, selector, entries);
        match run_tool("ffprobe", cmd, self.profile_timeout).await {
            Ok(output) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            Err(e) => {
                warn!(url, selector, error = %e, "Stream profiling failed");
                None
            }
        }
    }
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self::from_config(&ToolsConfig::default())
    }
}

/// Runs a tool to completion within `limit`, capturing its output.
///
/// A non-zero exit is reported as [`ToolError::Failed`].
pub(crate) async fn run_tool(tool: &str, mut cmd: Command, limit: Duration) -> Result<Output, ToolError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ToolError::Spawn {
                tool: tool.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(ToolError::Timeout {
                tool: tool.to_string(),
                limit,
            })
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(output)
}

impl MediaTools for FfmpegTools {
    async fn profile(&self, url: &str) -> StreamProfile {
        let video = self
            .probe_streams(url, "v:0", "codec_name,width,height,r_frame_rate")
            .await
            .unwrap_or_default();
        let audio = self
            .probe_streams(url, "a:0", "codec_name,bit_rate")
            .await
            .unwrap_or_default();

        let profile = parse_probe_output(&video, &audio);
        debug!(url, ?profile, "Profiled stream");
        profile
    }

    async fn verify_decode(&self, url: &str) -> Result<(), ToolError> {
        let cmd = self.build_verify_command(url);
        run_tool("ffmpeg", cmd, self.verify_timeout).await.map(|_| ())
    }

    async fn capture_frame(&self, url: &str, output: &Path) -> Result<(), ToolError> {
        let cmd = self.build_capture_command(url, output);
        run_tool("ffmpeg", cmd, self.capture_timeout).await.map(|_| ())
    }
}
