//! When buffering is good enough to start the player

use crate::status::{CanonicalStatus, StatusSnapshot, TransferProgress};

/// One prebuffer poll as seen by the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferReading {
    pub snapshot: StatusSnapshot,
    /// Target file progress; `None` until the target is known
    pub target: Option<TransferProgress>,
    /// Every wanted piece is already on disk
    pub complete: bool,
}

/// Backend specific readiness rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyPolicy {
    /// The engine has announced a playback URL.
    PlaybackUrl,
    /// The target file has at least `bytes` on disk while downloading, or
    /// the torrent is complete.
    Threshold { bytes: u64 },
    /// Payload is flowing or the torrent is complete.
    Transferring,
}

impl ReadyPolicy {
    /// Threshold policy when `pre_buffer_bytes` is set, else transferring.
    pub fn for_pre_buffer(pre_buffer_bytes: u64) -> Self {
        if pre_buffer_bytes > 0 {
            Self::Threshold {
                bytes: pre_buffer_bytes,
            }
        } else {
            Self::Transferring
        }
    }

    pub fn is_ready(&self, reading: &BufferReading) -> bool {
        match self {
            Self::PlaybackUrl => reading.snapshot.playback_url.is_some(),
            Self::Threshold { bytes } => {
                let Some(target) = reading.target else {
                    return false;
                };
                reading.complete
                    || (reading.snapshot.phase == CanonicalStatus::Downloading
                        && target.transferred >= *bytes)
            }
            Self::Transferring => {
                reading.target.is_some()
                    && (reading.complete || reading.snapshot.phase == CanonicalStatus::Downloading)
            }
        }
    }

    /// Percentage shown while buffering.
    pub fn progress(&self, reading: &BufferReading) -> f64 {
        match (self, reading.target) {
            (Self::Threshold { bytes }, Some(target))
                if reading.snapshot.phase == CanonicalStatus::Downloading =>
            {
                TransferProgress::new(target.transferred, Some(*bytes)).percent()
            }
            (Self::PlaybackUrl, _) | (_, None) => reading.snapshot.progress_percent,
            (_, Some(target)) => target.percent(),
        }
    }
}
