//! Backend independent status model
//!
//! Every engine backend projects its raw state vocabulary onto
//! [`CanonicalStatus`] and produces a fresh [`StatusSnapshot`] per poll.

pub mod sink;

use std::fmt;

pub use sink::{
    LoggingSink, NullSink, ProgressContext, ProgressSink, SinkGuard, TransferProgress, human_rate,
    human_size,
};

/// Closed set of phases shared by all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CanonicalStatus {
    #[default]
    Queued,
    Stopped,
    DownloadingMetadata,
    CheckPending,
    Checking,
    DownloadPending,
    Downloading,
    SeedPending,
    Seeding,
    Allocating,
    Prebuffering,
    StartingEngine,
}

impl CanonicalStatus {
    /// Human readable label used by progress sinks.
    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Stopped => "Stopped",
            Self::DownloadingMetadata => "Downloading metadata",
            Self::CheckPending => "Waiting to check",
            Self::Checking => "Checking",
            Self::DownloadPending => "Waiting to download",
            Self::Downloading => "Downloading",
            Self::SeedPending => "Waiting to seed",
            Self::Seeding => "Seeding",
            Self::Allocating => "Allocating",
            Self::Prebuffering => "Pre-buffering",
            Self::StartingEngine => "Starting engine",
        }
    }

    /// Phases during which payload data is flowing.
    pub fn is_transferring(self) -> bool {
        matches!(self, Self::Downloading | Self::Prebuffering | Self::Seeding)
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable view of an engine session at one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub phase: CanonicalStatus,
    pub progress_percent: f64,
    pub download_rate_bps: u64,
    pub upload_rate_bps: u64,
    pub peers: u32,
    pub seeds: u32,
    pub downloaded_bytes: u64,
    pub uploaded_bytes: u64,
    pub playback_url: Option<String>,
    pub error_message: Option<String>,
    pub name: Option<String>,
}

impl StatusSnapshot {
    /// Snapshot for a phase with no transfer data yet.
    pub fn phase(phase: CanonicalStatus) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }
}
