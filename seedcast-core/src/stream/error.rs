//! Backend errors translated into one stream error type

use std::fmt;

use crate::engine::http::HttpEngineError;
use crate::engine::wire::EngineError;

/// Engine backend a stream runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Wire,
    Http,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wire => "wire engine",
            Self::Http => "http engine",
        })
    }
}

/// What went wrong, independent of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamErrorKind {
    EngineNotFound,
    EngineStartFailed,
    Connection,
    Send,
    Request,
    InvalidPath,
    Timeout,
    LoadFailed,
    PlaybackFailed,
    InvalidFileIndex,
    TorrentError,
    EngineError,
    EngineCrashed,
    NoPlayableContent,
    Protocol,
}

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stream failure carrying the backend, a kind, a message and whether the
/// user should review their engine settings.
#[derive(Debug, thiserror::Error)]
#[error("{backend}: {message}")]
pub struct StreamError {
    pub backend: BackendKind,
    pub kind: StreamErrorKind,
    pub message: String,
    pub check_settings: bool,
    #[source]
    pub source: Option<BoxedSource>,
}

impl StreamError {
    pub fn new(backend: BackendKind, kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            kind,
            message: message.into(),
            check_settings: false,
            source: None,
        }
    }

    pub fn no_playable_content(backend: BackendKind) -> Self {
        Self::new(
            backend,
            StreamErrorKind::NoPlayableContent,
            "No playable files detected",
        )
    }

    pub fn invalid_file_index(backend: BackendKind, index: usize) -> Self {
        Self::new(
            backend,
            StreamErrorKind::InvalidFileIndex,
            format!("Invalid file index {index}"),
        )
    }

    fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    fn checking_settings(mut self) -> Self {
        self.check_settings = true;
        self
    }

    /// Stable numeric id for user-facing message catalogs.
    pub fn message_id(&self) -> u32 {
        use StreamErrorKind as Kind;

        match (self.backend, self.kind) {
            (BackendKind::Http, Kind::EngineNotFound) => 33020,
            (BackendKind::Http, Kind::EngineStartFailed) => 33023,
            (BackendKind::Http, Kind::Request | Kind::InvalidFileIndex) => 33024,
            (BackendKind::Http, Kind::InvalidPath) => 33025,
            (BackendKind::Http, Kind::Timeout) => 33026,
            (BackendKind::Http, Kind::TorrentError) => 33027,
            (BackendKind::Http, Kind::EngineCrashed) => 33028,
            (BackendKind::Wire, Kind::Connection) => 33040,
            (BackendKind::Wire, Kind::Send) => 33041,
            (BackendKind::Wire, Kind::EngineNotFound) => 33042,
            (BackendKind::Wire, Kind::EngineStartFailed) => 33043,
            (BackendKind::Wire, Kind::Timeout) => 33044,
            (BackendKind::Wire, Kind::LoadFailed) => 33045,
            (BackendKind::Wire, Kind::PlaybackFailed) => 33046,
            (BackendKind::Wire, Kind::InvalidPath) => 33047,
            (BackendKind::Wire, Kind::InvalidFileIndex) => 33048,
            (BackendKind::Wire, Kind::EngineError | Kind::Protocol) => 33049,
            (_, Kind::NoPlayableContent) => 33050,
            (BackendKind::Http, _) => 33024,
            (BackendKind::Wire, _) => 33049,
        }
    }
}

impl From<EngineError> for StreamError {
    fn from(error: EngineError) -> Self {
        use StreamErrorKind as Kind;

        let message = error.to_string();
        let (kind, check_settings) = match &error {
            EngineError::ConnectionError { .. } | EngineError::NotConnected => {
                (Kind::Connection, true)
            }
            EngineError::SendError { .. } => (Kind::Send, false),
            EngineError::ExecutableNotFound { .. } => (Kind::EngineNotFound, false),
            EngineError::EngineLaunchFailed { .. } => (Kind::EngineStartFailed, false),
            EngineError::Timeout { .. } => (Kind::Timeout, false),
            EngineError::MetadataLoadFailed { .. } => (Kind::LoadFailed, false),
            EngineError::PlaybackStartFailed { .. } => (Kind::PlaybackFailed, false),
            EngineError::InvalidSavePath { .. } => (Kind::InvalidPath, true),
            EngineError::ProtocolDecodeError { .. } => (Kind::Protocol, false),
            EngineError::EngineReportedError { .. } => (Kind::EngineError, false),
        };

        let translated = Self::new(BackendKind::Wire, kind, message).with_source(error);
        if check_settings {
            translated.checking_settings()
        } else {
            translated
        }
    }
}

impl From<HttpEngineError> for StreamError {
    fn from(error: HttpEngineError) -> Self {
        use StreamErrorKind as Kind;

        let message = error.to_string();
        let (kind, check_settings) = match &error {
            HttpEngineError::ExecutableNotFound { .. } => (Kind::EngineNotFound, false),
            HttpEngineError::SpawnFailed { .. } => (Kind::EngineStartFailed, true),
            HttpEngineError::Request { .. } => (Kind::Request, false),
            HttpEngineError::InvalidFileIndex { .. } => (Kind::InvalidFileIndex, false),
            HttpEngineError::InvalidDownloadPath { .. } => (Kind::InvalidPath, true),
            HttpEngineError::Timeout { .. } => (Kind::Timeout, false),
            HttpEngineError::TorrentError { .. } => (Kind::TorrentError, false),
            HttpEngineError::Crashed { .. } => (Kind::EngineCrashed, false),
        };

        let translated = Self::new(BackendKind::Http, kind, message).with_source(error);
        if check_settings {
            translated.checking_settings()
        } else {
            translated
        }
    }
}
