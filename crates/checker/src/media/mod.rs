//! Media module for measuring streams that probed alive.
//!
//! Stream profiles come from ffprobe's `key=value` output. The same external
//! tooling also provides decode verification and frame capture, grouped
//! behind the [`MediaTools`] trait.

pub mod ffmpeg;

pub use ffmpeg::FfmpegTools;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Error type for external tool invocations.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool could not be started.
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool exceeded its time bound and was killed.
    #[error("{tool} timed out after {limit:?}")]
    Timeout { tool: String, limit: Duration },

    /// The tool exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },
}

/// Resolution bucket of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ResolutionClass {
    #[serde(rename = "SD")]
    Sd,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "4K")]
    Uhd4k,
    #[default]
    Unknown,
}

impl std::fmt::Display for ResolutionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionClass::Sd => write!(f, "SD"),
            ResolutionClass::Hd720 => write!(f, "720p"),
            ResolutionClass::Hd1080 => write!(f, "1080p"),
            ResolutionClass::Uhd4k => write!(f, "4K"),
            ResolutionClass::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Buckets pixel dimensions; both dimensions must meet a tier's minimum.
///
/// - 3840x2160 and above -> 4K
/// - 1920x1080 and above -> 1080p
/// - 1280x720 and above -> 720p
/// - anything smaller -> SD
/// - missing or zero dimensions -> Unknown
pub fn classify_resolution(width: Option<u32>, height: Option<u32>) -> ResolutionClass {
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => {
            if w >= 3840 && h >= 2160 {
                ResolutionClass::Uhd4k
            } else if w >= 1920 && h >= 1080 {
                ResolutionClass::Hd1080
            } else if w >= 1280 && h >= 720 {
                ResolutionClass::Hd720
            } else {
                ResolutionClass::Sd
            }
        }
        _ => ResolutionClass::Unknown,
    }
}

/// Measured characteristics of a live stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamProfile {
    pub resolution: ResolutionClass,
    pub frame_rate: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_bitrate_kbps: Option<u32>,
    pub audio_codec: Option<String>,
}

impl StreamProfile {
    /// Profile with every field unknown.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }

    /// `"1080p H264"`, or `"Unknown"` without both resolution and codec.
    pub fn video_summary(&self) -> String {
        match (&self.resolution, &self.video_codec) {
            (res, Some(codec)) if *res != ResolutionClass::Unknown => format!("{} {}", res, codec),
            _ => "Unknown".to_string(),
        }
    }

    /// `"128 kbps AAC"`, or `"Unknown"` without both bitrate and codec.
    pub fn audio_summary(&self) -> String {
        match (self.audio_bitrate_kbps, &self.audio_codec) {
            (Some(kbps), Some(codec)) => format!("{} kbps {}", kbps, codec),
            _ => "Unknown".to_string(),
        }
    }

    /// `"video: 1080p H264 audio: 128 kbps AAC"`, the checkpoint detail field.
    pub fn summary(&self) -> String {
        format!("video: {} audio: {}", self.video_summary(), self.audio_summary())
    }

    /// Compact label embedded into renamed display names, e.g.
    /// `"1080p H264 50fps | 128kbps AAC"`. Absent parts are left out.
    pub fn label(&self) -> Option<String> {
        let mut video = Vec::new();
        if self.resolution != ResolutionClass::Unknown {
            video.push(self.resolution.to_string());
        }
        if let Some(codec) = &self.video_codec {
            video.push(codec.clone());
        }
        if let Some(fps) = self.frame_rate {
            video.push(format!("{}fps", fps));
        }

        let mut audio = Vec::new();
        if let Some(kbps) = self.audio_bitrate_kbps {
            audio.push(format!("{}kbps", kbps));
        }
        if let Some(codec) = &self.audio_codec {
            audio.push(codec.clone());
        }

        match (video.is_empty(), audio.is_empty()) {
            (true, true) => None,
            (false, true) => Some(video.join(" ")),
            (true, false) => Some(audio.join(" ")),
            (false, false) => Some(format!("{} | {}", video.join(" "), audio.join(" "))),
        }
    }
}

/// Splits `key=value` lines; the first occurrence of a key wins.
pub fn parse_key_values(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        if let Some((key, value)) = line.trim().split_once('=') {
            map.entry(key.trim().to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }
    map
}

/// Parses ffprobe's rational frame rate (`"30000/1001"`) to the nearest integer.
pub fn parse_frame_rate(value: &str) -> Option<u32> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse().ok()?,
    };

    if rate.is_finite() && rate > 0.0 {
        Some(rate.round() as u32)
    } else {
        None
    }
}

fn parse_codec(map: &HashMap<String, String>) -> Option<String> {
    map.get("codec_name")
        .filter(|c| !c.is_empty() && c.as_str() != "unknown")
        .map(|c| c.to_uppercase())
}

/// Builds a profile from ffprobe output for the first video and first audio
/// stream. Missing or unparseable keys leave their field unknown.
pub fn parse_probe_output(video: &str, audio: &str) -> StreamProfile {
    let video = parse_key_values(video);
    let audio = parse_key_values(audio);

    let width = video.get("width").and_then(|v| v.parse().ok());
    let height = video.get("height").and_then(|v| v.parse().ok());

    StreamProfile {
        resolution: classify_resolution(width, height),
        frame_rate: video.get("r_frame_rate").and_then(|v| parse_frame_rate(v)),
        video_codec: parse_codec(&video),
        audio_bitrate_kbps: audio
            .get("bit_rate")
            .and_then(|v| v.parse::<u64>().ok())
            .map(|bps| (bps / 1000) as u32),
        audio_codec: parse_codec(&audio),
    }
}

/// External media tooling used after a stream probes alive.
pub trait MediaTools: Send + Sync {
    /// Measures the stream. Never fails: tool errors degrade to unknown fields.
    fn profile(&self, url: &str) -> impl Future<Output = StreamProfile> + Send;

    /// Decodes a short window of the stream; `Ok` only on a clean exit.
    fn verify_decode(&self, url: &str) -> impl Future<Output = Result<(), ToolError>> + Send;

    /// Writes one still frame to `output`.
    fn capture_frame(
        &self,
        url: &str,
        output: &Path,
    ) -> impl Future<Output = Result<(), ToolError>> + Send;
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classify_resolution_tiers() {
        assert_eq!(classify_resolution(Some(1920), Some(1080)), ResolutionClass::Hd1080);
        assert_eq!(classify_resolution(Some(3840), Some(2160)), ResolutionClass::Uhd4k);
        assert_eq!(classify_resolution(Some(640), Some(480)), ResolutionClass::Sd);
        assert_eq!(classify_resolution(Some(1280), Some(720)), ResolutionClass::Hd720);
        assert_eq!(classify_resolution(Some(4096), Some(1716)), ResolutionClass::Hd1080);
        assert_eq!(classify_resolution(None, Some(1080)), ResolutionClass::Unknown);
        assert_eq!(classify_resolution(Some(0), Some(0)), ResolutionClass::Unknown);
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30000/1001"), Some(30));
        assert_eq!(parse_frame_rate("25/1"), Some(25));
        assert_eq!(parse_frame_rate("50"), Some(50));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("N/A"), None);
    }

    #[test]
    fn test_parse_probe_output_full() {
        let video = "codec_name=h264\nwidth=1920\nheight=1080\nr_frame_rate=50/1\n";
        let audio = "codec_name=aac\nbit_rate=128000\n";
        let profile = parse_probe_output(video, audio);

        assert_eq!(
            profile,
            StreamProfile {
                resolution: ResolutionClass::Hd1080,
                frame_rate: Some(50),
                video_codec: Some("H264".to_string()),
                audio_bitrate_kbps: Some(128),
                audio_codec: Some("AAC".to_string()),
            }
        );
        assert_eq!(profile.video_summary(), "1080p H264");
        assert_eq!(profile.audio_summary(), "128 kbps AAC");
        assert_eq!(profile.summary(), "video: 1080p H264 audio: 128 kbps AAC");
        assert_eq!(profile.label().as_deref(), Some("1080p H264 50fps | 128kbps AAC"));
    }

    #[test]
    fn test_parse_probe_output_degrades_gracefully() {
        let profile = parse_probe_output("codec_name=hevc\n", "bit_rate=N/A\n");

        assert_eq!(profile.resolution, ResolutionClass::Unknown);
        assert_eq!(profile.video_codec.as_deref(), Some("HEVC"));
        assert_eq!(profile.audio_bitrate_kbps, None);
        assert_eq!(profile.video_summary(), "Unknown");
        assert_eq!(profile.audio_summary(), "Unknown");
        assert_eq!(profile.label().as_deref(), Some("HEVC"));
    }

    #[test]
    fn test_empty_output_is_unknown_profile() {
        let profile = parse_probe_output("", "");
        assert!(profile.is_unknown());
        assert_eq!(profile.label(), None);
    }

    #[test]
    fn test_resolution_display() {
        assert_eq!(ResolutionClass::Uhd4k.to_string(), "4K");
        assert_eq!(ResolutionClass::Sd.to_string(), "SD");
        assert_eq!(
            serde_json::to_string(&ResolutionClass::Hd720).unwrap(),
            "\"720p\""
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_resolution_monotonic_in_both_dimensions(
            w in 1u32..8000,
            h in 1u32..5000,
            dw in 0u32..2000,
            dh in 0u32..2000,
        ) {
            let rank = |r: ResolutionClass| match r {
                ResolutionClass::Sd => 0,
                ResolutionClass::Hd720 => 1,
                ResolutionClass::Hd1080 => 2,
                ResolutionClass::Uhd4k => 3,
                ResolutionClass::Unknown => -1,
            };
            let small = classify_resolution(Some(w), Some(h));
            let large = classify_resolution(Some(w + dw), Some(h + dh));
            prop_assert!(rank(small) >= 0);
            prop_assert!(rank(small) <= rank(large));
        }

        #[test]
        fn prop_frame_rate_rounds_to_nearest(num in 1u32..240_000, den in 1u32..2_000) {
            let expected = (num as f64 / den as f64).round() as u32;
            let parsed = parse_frame_rate(&format!("{}/{}", num, den));
            prop_assert_eq!(parsed, Some(expected));
        }
    }
}
