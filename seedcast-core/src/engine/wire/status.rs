//! Engine state codes and `STATUS` line projection

use crate::status::CanonicalStatus;

use super::error::EngineError;

/// Numeric state reported by `STATE <n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Prebuffering,
    Downloading,
    Buffering,
    Completed,
    Checking,
    Failed,
}

impl TryFrom<i32> for EngineState {
    type Error = EngineError;

    fn try_from(value: i32) -> Result<Self, EngineError> {
        Ok(match value {
            0 => Self::Idle,
            1 => Self::Prebuffering,
            2 => Self::Downloading,
            3 => Self::Buffering,
            4 => Self::Completed,
            5 => Self::Checking,
            6 => Self::Failed,
            other => {
                return Err(EngineError::decode(
                    format!("STATE {other}"),
                    "unknown engine state",
                ));
            }
        })
    }
}

impl EngineState {
    pub fn code(self) -> i32 {
        match self {
            Self::Idle => 0,
            Self::Prebuffering => 1,
            Self::Downloading => 2,
            Self::Buffering => 3,
            Self::Completed => 4,
            Self::Checking => 5,
            Self::Failed => 6,
        }
    }

    /// Projection onto the shared phase set. Errors surface separately
    /// through the snapshot's error message.
    pub fn canonical(self) -> CanonicalStatus {
        match self {
            Self::Idle => CanonicalStatus::Queued,
            Self::Prebuffering | Self::Buffering => CanonicalStatus::Prebuffering,
            Self::Downloading => CanonicalStatus::Downloading,
            Self::Completed => CanonicalStatus::Seeding,
            Self::Checking => CanonicalStatus::Checking,
            Self::Failed => CanonicalStatus::Stopped,
        }
    }
}

/// Numeric fields accumulated from `STATUS main:<phase>;...` lines.
///
/// Rates are in KiB/s as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEngineStatus {
    pub sub_phase: Option<String>,
    pub progress: i64,
    pub down_speed: i64,
    pub up_speed: i64,
    pub peers: i64,
    pub downloaded: i64,
    pub uploaded: i64,
    pub error_id: Option<String>,
    pub error_message: Option<String>,
}

struct TransferFields {
    progress: usize,
    down_speed: usize,
    up_speed: usize,
    peers: usize,
    downloaded: usize,
    uploaded: usize,
}

const BUFFERING_LAYOUT: TransferFields = TransferFields {
    progress: 1,
    down_speed: 5,
    up_speed: 7,
    peers: 8,
    downloaded: 10,
    uploaded: 12,
};

const DOWNLOADING_LAYOUT: TransferFields = TransferFields {
    progress: 1,
    down_speed: 3,
    up_speed: 5,
    peers: 6,
    downloaded: 8,
    uploaded: 10,
};

impl RawEngineStatus {
    /// Applies one `STATUS` parameter string.
    ///
    /// All fields are parsed before any is committed, so a malformed line
    /// leaves the previous values intact. Unknown sub-phases only update the
    /// recorded phase name.
    ///
    /// # Errors
    ///
    /// - `EngineError::ProtocolDecodeError` - Missing `main:` phase or bad field
    pub fn apply(&mut self, status: &str) -> Result<(), EngineError> {
        let phase = main_phase(status)
            .ok_or_else(|| EngineError::decode(status, "missing main phase"))?
            .to_string();
        let parts: Vec<&str> = status.split(';').collect();

        match phase.as_str() {
            "prebuf" | "buf" => self.apply_transfer(status, &parts, &BUFFERING_LAYOUT)?,
            "dl" => self.apply_transfer(status, &parts, &DOWNLOADING_LAYOUT)?,
            "check" => self.progress = field(status, &parts, 1)?,
            "starting" | "loading" | "idle" | "wait" => self.progress = 0,
            "err" => {
                let id = parts
                    .get(1)
                    .ok_or_else(|| EngineError::decode(status, "error status without id"))?;
                self.error_id = Some(id.to_string());
                self.error_message = Some(parts.get(2).unwrap_or(id).to_string());
            }
            _ => {}
        }

        self.sub_phase = Some(phase);
        Ok(())
    }

    fn apply_transfer(
        &mut self,
        status: &str,
        parts: &[&str],
        layout: &TransferFields,
    ) -> Result<(), EngineError> {
        let progress = field(status, parts, layout.progress)?;
        let down_speed = field(status, parts, layout.down_speed)?;
        let up_speed = field(status, parts, layout.up_speed)?;
        let peers = field(status, parts, layout.peers)?;
        let downloaded = field(status, parts, layout.downloaded)?;
        let uploaded = field(status, parts, layout.uploaded)?;

        self.progress = progress;
        self.down_speed = down_speed;
        self.up_speed = up_speed;
        self.peers = peers;
        self.downloaded = downloaded;
        self.uploaded = uploaded;
        Ok(())
    }

    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
    }
}

fn main_phase(status: &str) -> Option<&str> {
    let start = status.find("main:")? + "main:".len();
    let rest = &status[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

fn field(status: &str, parts: &[&str], index: usize) -> Result<i64, EngineError> {
    parts
        .get(index)
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| EngineError::decode(status, format!("invalid status field {index}")))
}
