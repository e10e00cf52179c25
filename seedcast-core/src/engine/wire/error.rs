//! Wire engine error taxonomy

/// Errors raised by the wire engine driver and facade.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Can't connect to engine socket at {address}")]
    ConnectionError {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't send data to engine socket")]
    SendError {
        #[source]
        source: std::io::Error,
    },

    #[error("Can't find engine executable: {reason}")]
    ExecutableNotFound { reason: String },

    #[error("Can't start engine: {reason}")]
    EngineLaunchFailed { reason: String },

    #[error("Timeout while {operation}")]
    Timeout { operation: String },

    #[error("Failed to load content: {reason}")]
    MetadataLoadFailed { reason: String },

    #[error("Failed to start playback: {reason}")]
    PlaybackStartFailed { reason: String },

    #[error("Invalid download path ({path})")]
    InvalidSavePath { path: String },

    #[error("Malformed engine message {line:?}: {reason}")]
    ProtocolDecodeError { line: String, reason: String },

    #[error("Engine error {code}: {message}")]
    EngineReportedError { code: String, message: String },

    #[error("Engine session is not connected")]
    NotConnected,
}

impl EngineError {
    pub(crate) fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub(crate) fn decode(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProtocolDecodeError {
            line: line.into(),
            reason: reason.into(),
        }
    }
}
