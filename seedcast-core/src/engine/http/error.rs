//! HTTP engine errors

/// Errors raised while launching or querying the HTTP engine.
#[derive(Debug, thiserror::Error)]
pub enum HttpEngineError {
    #[error("Can't find engine binary: {reason}")]
    ExecutableNotFound { reason: String },

    #[error("Invalid download path ({path})")]
    InvalidDownloadPath { path: String },

    #[error("Can't start engine process: {reason}")]
    SpawnFailed {
        reason: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid file index {index}")]
    InvalidFileIndex { index: usize },

    #[error("Timeout while {operation}")]
    Timeout { operation: String },

    #[error("Torrent error ({reason})")]
    TorrentError { reason: String },

    #[error("Engine process exited unexpectedly ({status})")]
    Crashed { status: String },
}
