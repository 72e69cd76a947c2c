//! Error types shared between the core and the cast backend.

use std::path::PathBuf;

use thiserror::Error;

/// Rejections raised while classifying a media reference.  All of these happen
/// before any session exists.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unsupported URI scheme '{scheme}' in '{uri}' (only https://, spotify: or local paths)")]
    UnsupportedScheme { scheme: String, uri: String },
    #[error("local media not found: {0}")]
    NotFound(PathBuf),
    #[error("local media is not a regular file: {0}")]
    NotAFile(PathBuf),
    #[error("cannot resolve local path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors reported by the casting collaborator.
#[derive(Debug, Error)]
pub enum CastError {
    #[error("device '{0}' not found")]
    DeviceNotFound(String),
    #[error("device discovery cancelled")]
    DiscoveryCancelled,
    #[error("playback failed to start: {0}")]
    PlaybackStart(String),
    #[error("unsupported media: {0}")]
    Unsupported(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("device connection closed")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("file server already running on port {0}")]
    AlreadyRunning(u16),
    #[error("failed to bind file server on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Violations of the single-session rule.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already active on '{0}'")]
    AlreadyActive(String),
}
