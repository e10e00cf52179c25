//! JSON payloads served by the HTTP engine

use serde::Deserialize;

use crate::status::{CanonicalStatus, StatusSnapshot};

const SUBTITLE_EXTENSIONS: &[&str] = &[
    "aqt", "gsub", "jss", "sub", "ttxt", "pjs", "psb", "rt", "smi", "stl", "ssf", "srt", "ssa",
    "ass", "usf", "idx",
];

/// Raw torrent state as reported in `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpEngineState {
    QueuedForChecking,
    CheckingFiles,
    DownloadingMetadata,
    Downloading,
    Finished,
    Seeding,
    Allocating,
    CheckingResumeData,
}

impl HttpEngineState {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::QueuedForChecking,
            1 => Self::CheckingFiles,
            2 => Self::DownloadingMetadata,
            3 => Self::Downloading,
            4 => Self::Finished,
            5 => Self::Seeding,
            6 => Self::Allocating,
            7 => Self::CheckingResumeData,
            _ => return None,
        })
    }

    pub fn canonical(self) -> CanonicalStatus {
        match self {
            Self::QueuedForChecking | Self::CheckingResumeData => CanonicalStatus::CheckPending,
            Self::CheckingFiles => CanonicalStatus::Checking,
            Self::DownloadingMetadata => CanonicalStatus::DownloadingMetadata,
            Self::Downloading => CanonicalStatus::Downloading,
            Self::Finished | Self::Seeding => CanonicalStatus::Seeding,
            Self::Allocating => CanonicalStatus::Allocating,
        }
    }

    /// Every wanted piece is on disk.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Finished | Self::Seeding)
    }
}

/// `/status` response. Rates are in kB/s.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionStatus {
    pub name: String,
    pub state: i64,
    pub state_str: String,
    pub error: String,
    pub progress: f64,
    pub download_rate: f64,
    pub upload_rate: f64,
    pub total_download: u64,
    pub total_upload: u64,
    pub num_peers: u32,
    pub num_seeds: u32,
    pub total_seeds: i64,
    pub total_peers: i64,
}

impl SessionStatus {
    pub fn engine_state(&self) -> Option<HttpEngineState> {
        HttpEngineState::from_code(self.state)
    }

    pub fn is_complete(&self) -> bool {
        self.engine_state().is_some_and(HttpEngineState::is_complete)
    }

    /// Projects the session onto the shared status model.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self
                .engine_state()
                .map(HttpEngineState::canonical)
                .unwrap_or_default(),
            progress_percent: (self.progress * 100.0).clamp(0.0, 100.0),
            download_rate_bps: (self.download_rate.max(0.0) * 1000.0) as u64,
            upload_rate_bps: (self.upload_rate.max(0.0) * 1000.0) as u64,
            peers: self.num_peers,
            seeds: self.num_seeds,
            downloaded_bytes: self.total_download,
            uploaded_bytes: self.total_upload,
            playback_url: None,
            error_message: (!self.error.is_empty()).then(|| self.error.clone()),
            name: (!self.name.is_empty()).then(|| self.name.clone()),
        }
    }
}

/// One entry of the `/ls` response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileStatus {
    /// Position in the engine's full file list
    #[serde(skip)]
    pub index: usize,
    pub name: String,
    pub save_path: String,
    pub url: String,
    pub size: u64,
    pub offset: u64,
    pub download: u64,
    pub progress: f64,
}

impl FileStatus {
    pub fn media_type(&self) -> MediaType {
        MediaType::detect(&self.name)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileList {
    pub files: Option<Vec<FileStatus>>,
}

/// Coarse media classification by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Audio,
    Subtitles,
    Unknown,
}

impl MediaType {
    pub fn detect(name: &str) -> Self {
        let extension = std::path::Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        if let Some(extension) = &extension
            && SUBTITLE_EXTENSIONS.contains(&extension.as_str())
        {
            return Self::Subtitles;
        }

        match mime_guess::from_path(name).first() {
            Some(mime) if mime.type_() == mime_guess::mime::VIDEO => Self::Video,
            Some(mime) if mime.type_() == mime_guess::mime::AUDIO => Self::Audio,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping_is_total() {
        let expected = [
            CanonicalStatus::CheckPending,
            CanonicalStatus::Checking,
            CanonicalStatus::DownloadingMetadata,
            CanonicalStatus::Downloading,
            CanonicalStatus::Seeding,
            CanonicalStatus::Seeding,
            CanonicalStatus::Allocating,
            CanonicalStatus::CheckPending,
        ];
        for (code, phase) in expected.into_iter().enumerate() {
            let state = HttpEngineState::from_code(code as i64).unwrap();
            assert_eq!(state.canonical(), phase);
        }
        assert_eq!(HttpEngineState::from_code(8), None);
    }

    #[test]
    fn test_media_type_detection() {
        assert_eq!(MediaType::detect("Movie.MKV"), MediaType::Video);
        assert_eq!(MediaType::detect("clip.mp4"), MediaType::Video);
        assert_eq!(MediaType::detect("movie.srt"), MediaType::Subtitles);
        assert_eq!(MediaType::detect("movie.ass"), MediaType::Subtitles);
        assert_eq!(MediaType::detect("track.mp3"), MediaType::Audio);
        assert_eq!(MediaType::detect("readme.nfo"), MediaType::Unknown);
        assert_eq!(MediaType::detect("noextension"), MediaType::Unknown);
    }

    #[test]
    fn test_status_snapshot() {
        let status: SessionStatus = serde_json::from_str(
            r#"{"name": "x", "state": 3, "state_str": "downloading", "error": "",
                "progress": 0.25, "download_rate": 150.0, "upload_rate": 2.0,
                "total_download": 4096, "total_upload": 10, "num_peers": 7,
                "num_seeds": 3, "total_seeds": 20, "total_peers": 40}"#,
        )
        .unwrap();

        let snapshot = status.snapshot();
        assert_eq!(snapshot.phase, CanonicalStatus::Downloading);
        assert_eq!(snapshot.progress_percent, 25.0);
        assert_eq!(snapshot.download_rate_bps, 150_000);
        assert_eq!(snapshot.peers, 7);
        assert_eq!(snapshot.seeds, 3);
        assert_eq!(snapshot.name.as_deref(), Some("x"));
        assert_eq!(snapshot.error_message, None);
        assert!(!status.is_complete());
    }

    #[test]
    fn test_file_list_null_means_pending() {
        let pending: FileList = serde_json::from_str(r#"{"files": null}"#).unwrap();
        assert!(pending.files.is_none());

        let listed: FileList = serde_json::from_str(
            r#"{"files": [{"name": "a.mkv", "save_path": "/d/a.mkv", "url": "http://h/files/a.mkv",
                "size": 100, "offset": 0, "download": 40, "progress": 0.4}]}"#,
        )
        .unwrap();
        let files = listed.files.unwrap();
        assert_eq!(files[0].download, 40);
        assert_eq!(files[0].media_type(), MediaType::Video);
    }
}
