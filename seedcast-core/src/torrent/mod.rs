//! Torrent sources: descriptor resolution, metadata decoding and magnet links

pub mod bencode;
pub mod descriptor;
pub mod magnet;
pub mod types;

use std::fmt;

pub use bencode::{BencodeDecoder, DecodeFailure};
pub use descriptor::TorrentDescriptor;
pub use magnet::{MagnetLink, MagnetParser};
pub use types::{TorrentFile, TorrentInfo};

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Parses a 40-character hex string, case-insensitive.
    ///
    /// # Errors
    ///
    /// - Human readable reason when the string is not 40 hex characters
    pub fn from_hex(hash_str: &str) -> Result<Self, String> {
        if hash_str.len() != 40 {
            return Err(format!(
                "Invalid hash length: {} (expected 40)",
                hash_str.len()
            ));
        }
        let mut hash = [0u8; 20];
        hex::decode_to_slice(hash_str, &mut hash)
            .map_err(|_| format!("Invalid hex character in hash: {hash_str}"))?;
        Ok(Self(hash))
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Errors raised while resolving or decoding a torrent source.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Magnet link carries no torrent data: {url}")]
    MagnetHasNoData { url: String },

    #[error("Torrent descriptor has no source")]
    UnknownUrl,

    #[error("Torrent name could not be determined")]
    UnknownFileName,

    #[error("Torrent file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to fetch torrent from {url}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read torrent file {path}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode torrent from {location}: {reason}")]
    DecodeFailed { location: String, reason: String },

    #[error("Invalid magnet link: {reason}")]
    InvalidMagnet { reason: String },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_display() {
        let hash = [
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
        ];
        let info_hash = InfoHash::new(hash);
        assert_eq!(
            info_hash.to_string(),
            "0123456789abcdef0123456789abcdef01234567"
        );
    }

    #[test]
    fn test_info_hash_from_hex() {
        let parsed = InfoHash::from_hex("0123456789ABCDEF0123456789abcdef01234567").unwrap();
        assert_eq!(parsed.as_bytes()[0], 0x01);
        assert_eq!(parsed.as_bytes()[19], 0x67);

        assert!(InfoHash::from_hex("0123").is_err());
        assert!(InfoHash::from_hex("zz23456789abcdef0123456789abcdef01234567").is_err());
    }
}
