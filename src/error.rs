//! Error types.

use thiserror::Error;

/// Errors raised by the playback engines and their audio context.
#[derive(Clone, Debug, Error)]
pub enum AudioError {
    /// No audio output is available on this host.
    #[error("audio output unavailable: {0}")]
    UnsupportedPlatform(String),

    #[error("failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("failed to decode {url}: {reason}")]
    DecodeFailed { url: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// One or more assets of a batch failed; every URL was still attempted.
    #[error("{} asset(s) failed to load", .0.len())]
    Preload(Vec<AudioError>),

    /// The audio context was closed and can no longer be used.
    #[error("audio context is closed")]
    ContextClosed,

    #[error("playback error: {0}")]
    Playback(String),
}

impl AudioError {
    /// The asset URL this error refers to, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            AudioError::FetchFailed { url, .. } | AudioError::DecodeFailed { url, .. } => Some(url),
            _ => None,
        }
    }
}
