//! Seedcast Core - torrent to player streaming
//!
//! Drives an external torrent engine (the wire protocol engine or the
//! HTTP engine), buffers the selected file and hands its stream URL to a
//! media player while reporting progress.

pub mod config;
pub mod engine;
pub mod status;
pub mod stream;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::SeedcastConfig;
pub use engine::{EngineError, HttpEngine, HttpEngineError, WireEngine};
pub use status::{CanonicalStatus, ProgressSink, StatusSnapshot};
pub use stream::{
    AbortHandle, HttpBackend, PlayerError, StreamController, StreamError, StreamErrorKind,
    StreamOutcome, StreamState, WireBackend,
};
pub use torrent::{InfoHash, TorrentDescriptor, TorrentError};

/// Errors that can bubble up from any Seedcast subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SeedcastError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SeedcastError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            SeedcastError::Torrent(e) => match e {
                TorrentError::FileNotFound { path } => format!("Torrent file not found: {path}"),
                TorrentError::FetchFailed { url, .. } => {
                    format!("Could not download torrent from {url}")
                }
                TorrentError::InvalidMagnet { reason } => format!("Invalid magnet link: {reason}"),
                TorrentError::DecodeFailed { .. } => "Torrent file is corrupted".to_string(),
                _ => "Could not read torrent".to_string(),
            },
            SeedcastError::Stream(e) if e.check_settings => {
                format!("{e}. Check the engine settings")
            }
            SeedcastError::Stream(e) => e.to_string(),
            SeedcastError::Player(e) => format!("Player error: {e}"),
            SeedcastError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            SeedcastError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SeedcastError::Configuration { .. }
                | SeedcastError::Torrent(
                    TorrentError::FileNotFound { .. } | TorrentError::InvalidMagnet { .. }
                )
                | SeedcastError::Stream(StreamError {
                    kind: StreamErrorKind::InvalidFileIndex | StreamErrorKind::InvalidPath,
                    ..
                })
        )
    }
}

pub type Result<T> = std::result::Result<T, SeedcastError>;
