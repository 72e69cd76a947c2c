use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ── media request ─────────────────────────────────────────────────────────────

/// How the requested media reaches the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    /// `https://` URL the device fetches directly.
    Remote,
    /// Streaming-service URI handed to the backend untouched.
    StreamingService,
    /// Local file exposed by the ephemeral file server.
    LocalFile { root: PathBuf, file_name: String },
}

/// One invocation's media, resolved once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRequest {
    pub raw_uri: String,
    pub resolved_uri: String,
    pub title: String,
    pub content_type: String,
    pub autoplay: bool,
    /// Already validated to lie in `[0.0, 1.0]`.
    pub volume: Option<f32>,
    pub kind: MediaKind,
}

impl MediaRequest {
    pub fn needs_server(&self) -> bool {
        matches!(self.kind, MediaKind::LocalFile { .. })
    }
}

// ── volume ────────────────────────────────────────────────────────────────────

pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 1.0;

/// Parse and bound-check a device volume.  Used as the CLI value parser.
pub fn parse_volume(raw: &str) -> Result<f32, String> {
    let value: f32 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", raw))?;
    validate_volume(value)
}

pub fn validate_volume(value: f32) -> Result<f32, String> {
    if value.is_finite() && (MIN_VOLUME..=MAX_VOLUME).contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "volume {} out of range [{:.1}, {:.1}]",
            value, MIN_VOLUME, MAX_VOLUME
        ))
    }
}

// ── device status ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlayerState {
    Playing,
    Buffering,
    Paused,
    Idle,
    Unknown,
}

impl PlayerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playing => "PLAYING",
            Self::Buffering => "BUFFERING",
            Self::Paused => "PAUSED",
            Self::Idle => "IDLE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finite asset vs. unbounded feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamType {
    Buffered,
    Live,
    Unknown,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Buffered => "BUFFERED",
            Self::Live => "LIVE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// A media status update pushed by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaStatus {
    pub player_state: PlayerState,
    pub stream_type: StreamType,
    pub idle_reason: Option<String>,
    pub current_time: Option<f64>,
}

impl MediaStatus {
    pub fn new(player_state: PlayerState, stream_type: StreamType) -> Self {
        Self {
            player_state,
            stream_type,
            idle_reason: None,
            current_time: None,
        }
    }
}

// ── content type ──────────────────────────────────────────────────────────────

/// Guess a MIME type from a file name or URL path.
pub fn content_type_for(path: &str) -> &'static str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "m3u8" => "application/vnd.apple.mpegurl",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "video/mp4",
    }
}
