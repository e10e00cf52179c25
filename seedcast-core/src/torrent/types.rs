//! Decoded torrent metadata types

use chrono::{DateTime, Utc};

use super::InfoHash;

/// Metadata decoded from a `.torrent` payload.
///
/// Owned copy of everything the streaming layer needs, so the raw bencode
/// buffer can be dropped once decoding has happened.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentInfo {
    pub info_hash: InfoHash,
    pub name: Option<String>,
    pub announce: Option<String>,
    pub announce_list: Vec<String>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub is_private: bool,
    pub files: Vec<TorrentFile>,
}

impl TorrentInfo {
    /// Sum of all file lengths in bytes.
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|file| file.length).sum()
    }

    /// Looks up a file by its zero-based index.
    pub fn file(&self, index: usize) -> Option<&TorrentFile> {
        self.files.iter().find(|file| file.index == index)
    }
}

/// Single file entry of a torrent.
///
/// Multi-file torrents yield one entry per `files` element with the path
/// segments joined by `/`. Single-file torrents yield exactly one entry at
/// index 0 named after the torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    pub index: usize,
    pub path: String,
    pub length: u64,
    pub md5sum: Option<String>,
}

impl TorrentFile {
    /// Last path segment, used as a display label.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}
