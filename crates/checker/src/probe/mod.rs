//! Liveness prober.
//!
//! Decides whether a stream URL is delivering media right now. The decision
//! is built from independent stages:
//!
//! 1. [`LivenessProber::probe_stream`]: one HTTP pass with rate-limit retries
//!    and a minimum-byte threshold on the body
//! 2. [`LivenessProber::probe`]: the same pass repeated once with the extended
//!    timeout when the first pass ends dead
//!
//! Decode verification of an alive verdict lives with the media tools and is
//! applied by the orchestrator.

pub mod backoff;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use transport::{HttpBody, HttpTransport, ProbeResponse, ResponseBody, Transport, TransportError};

use futures::future::{BoxFuture, FutureExt};
use iptv_checker_config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// Largest playlist body read while looking for a media URI.
const MAX_PLAYLIST_BYTES: usize = 1024 * 1024;

/// Content types accepted as a transport stream.
const STREAM_CONTENT_TYPES: &[&str] = &["video/mp2t", "video/mp2p", "video/mpeg"];

/// Content types accepted as a playlist.
const PLAYLIST_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
    "audio/x-mpegurl",
];

/// Final liveness decision for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivenessVerdict {
    Alive,
    Dead,
}

impl LivenessVerdict {
    pub fn is_alive(self) -> bool {
        matches!(self, LivenessVerdict::Alive)
    }
}

impl std::fmt::Display for LivenessVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LivenessVerdict::Alive => write!(f, "Alive"),
            LivenessVerdict::Dead => write!(f, "Dead"),
        }
    }
}

/// Why a probe ended dead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeFailure {
    /// Still rate limited when the attempt budget ran out.
    RateLimited { attempts: u32 },
    /// Connection refused/reset, timeout or any other transport failure.
    TransientNetwork { reason: String },
    /// Wrong status or a response that is not stream/playlist media.
    ProtocolMismatch { reason: String },
    /// The body ended, dropped or stalled before the byte threshold.
    InsufficientData { received: u64, required: u64 },
    /// The decode verification pass rejected the stream.
    DecodeRejected { reason: String },
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::RateLimited { attempts } => {
                write!(f, "rate limited after {} attempts", attempts)
            }
            ProbeFailure::TransientNetwork { reason } => write!(f, "network error: {}", reason),
            ProbeFailure::ProtocolMismatch { reason } => write!(f, "protocol mismatch: {}", reason),
            ProbeFailure::InsufficientData { received, required } => {
                write!(f, "insufficient data: {} of {} bytes", received, required)
            }
            ProbeFailure::DecodeRejected { reason } => write!(f, "decode rejected: {}", reason),
        }
    }
}

/// Outcome of probing one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub verdict: LivenessVerdict,
    pub failure: Option<ProbeFailure>,
    /// HTTP requests issued, retries and followed playlists included.
    pub attempts: u32,
    /// Body bytes counted toward the threshold on the deciding pass.
    pub bytes_received: u64,
    /// The extended timeout pass produced this report.
    pub escalated: bool,
    /// URL whose body was measured (differs from the entry URL for playlists).
    pub media_url: String,
}

impl ProbeReport {
    fn alive(media_url: &str, attempts: u32, bytes_received: u64) -> Self {
        Self {
            verdict: LivenessVerdict::Alive,
            failure: None,
            attempts,
            bytes_received,
            escalated: false,
            media_url: media_url.to_string(),
        }
    }

    fn dead(media_url: &str, attempts: u32, failure: ProbeFailure) -> Self {
        let bytes_received = match &failure {
            ProbeFailure::InsufficientData { received, .. } => *received,
            _ => 0,
        };
        Self {
            verdict: LivenessVerdict::Dead,
            failure: Some(failure),
            attempts,
            bytes_received,
            escalated: false,
            media_url: media_url.to_string(),
        }
    }

    /// Downgrades an alive report after a failed verification stage.
    pub fn reject(mut self, failure: ProbeFailure) -> Self {
        self.verdict = LivenessVerdict::Dead;
        self.failure = Some(failure);
        self
    }
}

/// Kind of media a response declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    TransportStream,
    Playlist,
}

/// Classifies a response by content type, falling back to the URL suffix.
pub fn media_kind(content_type: Option<&str>, url: &str) -> Option<MediaKind> {
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if PLAYLIST_CONTENT_TYPES.iter().any(|t| ct.contains(t)) {
            return Some(MediaKind::Playlist);
        }
        if STREAM_CONTENT_TYPES.iter().any(|t| ct.contains(t)) {
            return Some(MediaKind::TransportStream);
        }
    }

    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or("")
            .to_ascii_lowercase(),
    };
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        Some(MediaKind::Playlist)
    } else if path.ends_with(".ts") {
        Some(MediaKind::TransportStream)
    } else {
        None
    }
}

/// Whether a 200 response may proceed to the body check.
pub fn is_qualifying_media(content_type: Option<&str>, url: &str) -> bool {
    media_kind(content_type, url).is_some()
}

/// First media URI in a playlist, resolved against the playlist URL.
pub fn first_playlist_uri(playlist: &str, base_url: &str) -> Option<String> {
    let uri = playlist
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))?;

    match url::Url::parse(base_url) {
        Ok(base) => base.join(uri).ok().map(|u| u.to_string()),
        Err(_) => url::Url::parse(uri).ok().map(|u| u.to_string()),
    }
}

/// Timing and threshold settings for the prober.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub extended_timeout: Option<Duration>,
    pub max_attempts: u32,
    pub min_bytes: u64,
    pub stream_window: Duration,
    pub follow_playlists: bool,
    pub max_playlist_depth: u32,
    pub backoff: BackoffPolicy,
}

impl ProbeSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let probe = &cfg.probe;
        Self {
            connect_timeout: secs(probe.connect_timeout_secs),
            read_timeout: secs(probe.read_timeout_secs),
            extended_timeout: probe.extended_timeout_secs.map(secs),
            max_attempts: probe.max_attempts.max(1),
            min_bytes: probe.min_bytes,
            stream_window: secs(probe.stream_window_secs),
            follow_playlists: probe.follow_playlists,
            max_playlist_depth: probe.max_playlist_depth,
            backoff: BackoffPolicy::from_config(&cfg.backoff),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Converts fractional seconds from config into a duration, clamping negatives.
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// HTTP liveness prober.
pub struct LivenessProber<T> {
    transport: T,
    settings: ProbeSettings,
}

impl<T: Transport> LivenessProber<T> {
    pub fn new(transport: T, settings: ProbeSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Probes `url` with the base read timeout, escalating once to the
    /// extended timeout if the first pass ends dead.
    pub async fn probe(&self, url: &str) -> ProbeReport {
        let first = self.probe_stream(url, self.settings.read_timeout).await;
        if first.verdict.is_alive() {
            return first;
        }

        let Some(extended) = self.settings.extended_timeout else {
            return first;
        };

        debug!(
            url,
            failure = ?first.failure,
            extended_secs = extended.as_secs_f64(),
            "Escalating to extended timeout"
        );
        let mut second = self.probe_stream(url, extended).await;
        second.attempts += first.attempts;
        second.escalated = true;
        second
    }

    /// One byte-threshold pass over `url` using `read_timeout` for the
    /// response head and for every body read.
    pub async fn probe_stream(&self, url: &str, read_timeout: Duration) -> ProbeReport {
        let depth = if self.settings.follow_playlists {
            self.settings.max_playlist_depth
        } else {
            0
        };
        self.probe_at_depth(url.to_string(), read_timeout, depth).await
    }

    fn probe_at_depth(
        &self,
        url: String,
        read_timeout: Duration,
        depth: u32,
    ) -> BoxFuture<'_, ProbeReport> {
        async move {
            let max_attempts = self.settings.max_attempts.max(1);
            let mut attempts = 0;

            loop {
                attempts += 1;

                let response = match timeout(read_timeout, self.transport.get(&url)).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        debug!(url = %url, error = %e, "Request failed");
                        return ProbeReport::dead(
                            &url,
                            attempts,
                            ProbeFailure::TransientNetwork {
                                reason: e.to_string(),
                            },
                        );
                    }
                    Err(_) => {
                        debug!(url = %url, "Timed out waiting for response head");
                        return ProbeReport::dead(
                            &url,
                            attempts,
                            ProbeFailure::TransientNetwork {
                                reason: "timed out waiting for response".to_string(),
                            },
                        );
                    }
                };

                if response.status == 429 {
                    if attempts >= max_attempts {
                        debug!(url = %url, attempts, "Retry budget exhausted while rate limited");
                        return ProbeReport::dead(
                            &url,
                            attempts,
                            ProbeFailure::RateLimited { attempts },
                        );
                    }
                    let delay = self.settings.backoff.delay(attempts - 1);
                    debug!(url = %url, delay_ms = delay.as_millis() as u64, "Rate limited, backing off");
                    sleep(delay).await;
                    continue;
                }

                if response.status != 200 {
                    debug!(url = %url, status = response.status, "HTTP status not OK");
                    return ProbeReport::dead(
                        &url,
                        attempts,
                        ProbeFailure::ProtocolMismatch {
                            reason: format!("HTTP status {}", response.status),
                        },
                    );
                }

                let kind = media_kind(response.content_type.as_deref(), &response.final_url);
                return match kind {
                    None => {
                        let reason = format!(
                            "content type {} is not stream media",
                            response.content_type.as_deref().unwrap_or("(none)")
                        );
                        debug!(url = %url, %reason, "Rejecting response");
                        ProbeReport::dead(&url, attempts, ProbeFailure::ProtocolMismatch { reason })
                    }
                    Some(MediaKind::Playlist) if self.settings.follow_playlists => {
                        self.follow_playlist(url.clone(), response, read_timeout, depth, attempts)
                            .await
                    }
                    Some(_) => {
                        let mut body = response.body;
                        self.read_threshold(&url, &mut body, read_timeout, attempts)
                            .await
                    }
                };
            }
        }
        .boxed()
    }

    /// Counts body bytes until the threshold, end of stream, a failed read,
    /// a read timeout or the stream window closes.
    async fn read_threshold<B: ResponseBody>(
        &self,
        url: &str,
        body: &mut B,
        read_timeout: Duration,
        attempts: u32,
    ) -> ProbeReport {
        let required = self.settings.min_bytes;
        let deadline = Instant::now() + self.settings.stream_window;
        let mut received: u64 = 0;

        let insufficient = |received| ProbeFailure::InsufficientData { received, required };

        loop {
            if received >= required {
                debug!(url, received, "Byte threshold reached");
                return ProbeReport::alive(url, attempts, received);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(url, received, "Stream window closed before threshold");
                return ProbeReport::dead(url, attempts, insufficient(received));
            }

            match timeout(read_timeout.min(remaining), body.next_chunk()).await {
                Ok(Ok(Some(chunk))) => received += chunk.len() as u64,
                Ok(Ok(None)) => {
                    debug!(url, received, "Stream ended before threshold");
                    return ProbeReport::dead(url, attempts, insufficient(received));
                }
                Ok(Err(e)) => {
                    debug!(url, received, error = %e, "Stream dropped before threshold");
                    return ProbeReport::dead(url, attempts, insufficient(received));
                }
                Err(_) => {
                    debug!(url, received, "Read timed out before threshold");
                    return ProbeReport::dead(url, attempts, insufficient(received));
                }
            }
        }
    }

    /// Reads a playlist body and probes its first media URI one level deeper.
    async fn follow_playlist(
        &self,
        url: String,
        response: ProbeResponse<T::Body>,
        read_timeout: Duration,
        depth: u32,
        attempts: u32,
    ) -> ProbeReport {
        if depth == 0 {
            return ProbeReport::dead(
                &url,
                attempts,
                ProbeFailure::ProtocolMismatch {
                    reason: "playlist nesting too deep".to_string(),
                },
            );
        }

        let mut body = response.body;
        let mut text = Vec::new();
        loop {
            match timeout(read_timeout, body.next_chunk()).await {
                Ok(Ok(Some(chunk))) => {
                    text.extend_from_slice(&chunk);
                    if text.len() >= MAX_PLAYLIST_BYTES {
                        break;
                    }
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    return ProbeReport::dead(
                        &url,
                        attempts,
                        ProbeFailure::TransientNetwork {
                            reason: e.to_string(),
                        },
                    )
                }
                Err(_) => {
                    return ProbeReport::dead(
                        &url,
                        attempts,
                        ProbeFailure::TransientNetwork {
                            reason: "timed out reading playlist".to_string(),
                        },
                    )
                }
            }
        }

        let playlist = String::from_utf8_lossy(&text);
        let Some(next) = first_playlist_uri(&playlist, &response.final_url) else {
            return ProbeReport::dead(
                &url,
                attempts,
                ProbeFailure::ProtocolMismatch {
                    reason: "playlist lists no media".to_string(),
                },
            );
        };

        debug!(playlist = %url, media = %next, "Following playlist");
        let mut report = self.probe_at_depth(next, read_timeout, depth - 1).await;
        report.attempts += attempts;
        report
    }
}
