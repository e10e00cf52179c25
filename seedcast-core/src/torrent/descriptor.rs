//! Lazily resolved torrent source
//!
//! A descriptor holds up to three sources for the same torrent: inline bytes,
//! a local file and a remote URL. Bytes are resolved once, in that order of
//! precedence, and decoded once on first metadata access.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use tokio::sync::OnceCell;

use super::{BencodeDecoder, InfoHash, MagnetParser, TorrentError, TorrentFile, TorrentInfo};

const INLINE_LOCATION: &str = "<inline data>";

/// Torrent source with memoized bytes and metadata.
#[derive(Debug)]
pub struct TorrentDescriptor {
    data: Option<Vec<u8>>,
    file: Option<PathBuf>,
    url: Option<String>,
    client: reqwest::Client,
    bytes: OnceCell<Vec<u8>>,
    info: OnceCell<TorrentInfo>,
}

impl TorrentDescriptor {
    /// Creates descriptor from any combination of sources.
    pub fn new(data: Option<Vec<u8>>, file: Option<PathBuf>, url: Option<String>) -> Self {
        Self {
            data,
            file,
            url,
            client: reqwest::Client::new(),
            bytes: OnceCell::new(),
            info: OnceCell::new(),
        }
    }

    /// Creates descriptor from inline torrent bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(Some(data), None, None)
    }

    /// Creates descriptor from a local `.torrent` file.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(None, Some(path.into()), None)
    }

    /// Creates descriptor from a remote URL or magnet link.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new(None, None, Some(url.into()))
    }

    /// Classifies a user supplied string: URLs and magnets stay remote,
    /// everything else is treated as a local path.
    pub fn from_source(source: &str) -> Self {
        if MagnetParser::is_magnet(source) || url::Url::parse(source).is_ok_and(|u| u.has_host())
        {
            Self::from_url(source)
        } else {
            Self::from_file(source)
        }
    }

    /// Replaces the HTTP client used for remote fetches.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Returns true when the only usable source is a magnet link.
    pub fn is_magnet(&self) -> bool {
        self.data.is_none()
            && self.file.is_none()
            && self.url.as_deref().is_some_and(MagnetParser::is_magnet)
    }

    /// Remote URL, or a `file://` URL for a local source.
    pub fn url(&self) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }
        let path = self.file.as_ref()?;
        let absolute = std::path::absolute(path).ok()?;
        url::Url::from_file_path(absolute)
            .ok()
            .map(|url| url.to_string())
    }

    /// Local file backing this descriptor, if any.
    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Raw torrent bytes, resolved once.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MagnetHasNoData` - Only a magnet link is available
    /// - `TorrentError::FileNotFound` / `ReadFailed` - Local file unusable
    /// - `TorrentError::FetchFailed` - Remote fetch failed
    /// - `TorrentError::UnknownUrl` - Descriptor has no source at all
    pub async fn bytes(&self) -> Result<&[u8], TorrentError> {
        self.bytes
            .get_or_try_init(|| self.resolve_bytes())
            .await
            .map(Vec::as_slice)
    }

    async fn resolve_bytes(&self) -> Result<Vec<u8>, TorrentError> {
        if let Some(data) = &self.data {
            return Ok(data.clone());
        }

        if let Some(path) = &self.file {
            return read_file(path).await;
        }

        let Some(url) = &self.url else {
            return Err(TorrentError::UnknownUrl);
        };

        if MagnetParser::is_magnet(url) {
            return Err(TorrentError::MagnetHasNoData { url: url.clone() });
        }

        if let Ok(parsed) = url::Url::parse(url)
            && parsed.scheme() == "file"
            && let Ok(path) = parsed.to_file_path()
        {
            return read_file(&path).await;
        }

        tracing::debug!("Fetching torrent from {}", url);
        let fetched = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            response.bytes().await
        }
        .await
        .map_err(|source| TorrentError::FetchFailed {
            url: url.clone(),
            source,
        })?;

        Ok(fetched.to_vec())
    }

    /// Decoded metadata, resolved once.
    ///
    /// # Errors
    ///
    /// - Any error from [`Self::bytes`]
    /// - `TorrentError::DecodeFailed` - Payload is not a valid torrent
    pub async fn info(&self) -> Result<&TorrentInfo, TorrentError> {
        self.info
            .get_or_try_init(|| async {
                let bytes = self.bytes().await?;
                BencodeDecoder::decode(bytes).map_err(|failure| TorrentError::DecodeFailed {
                    location: self.location(),
                    reason: failure.reason,
                })
            })
            .await
    }

    /// Torrent name from the info dictionary.
    ///
    /// # Errors
    ///
    /// - `TorrentError::UnknownFileName` - Metadata carries no name
    pub async fn name(&self) -> Result<String, TorrentError> {
        self.info()
            .await?
            .name
            .clone()
            .ok_or(TorrentError::UnknownFileName)
    }

    pub async fn announce(&self) -> Result<Option<String>, TorrentError> {
        Ok(self.info().await?.announce.clone())
    }

    pub async fn comment(&self) -> Result<Option<String>, TorrentError> {
        Ok(self.info().await?.comment.clone())
    }

    pub async fn created_by(&self) -> Result<Option<String>, TorrentError> {
        Ok(self.info().await?.created_by.clone())
    }

    pub async fn creation_date(&self) -> Result<Option<DateTime<Utc>>, TorrentError> {
        Ok(self.info().await?.creation_date)
    }

    pub async fn is_private(&self) -> Result<bool, TorrentError> {
        Ok(self.info().await?.is_private)
    }

    pub async fn files(&self) -> Result<&[TorrentFile], TorrentError> {
        Ok(self.info().await?.files.as_slice())
    }

    /// Info hash of the torrent. Magnet-only descriptors answer from the
    /// link itself without fetching anything.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidMagnet` - Magnet link without a usable hash
    /// - Any error from [`Self::info`]
    pub async fn info_hash(&self) -> Result<InfoHash, TorrentError> {
        if self.is_magnet()
            && let Some(url) = &self.url
        {
            return Ok(MagnetParser::parse(url)?.info_hash);
        }
        Ok(self.info().await?.info_hash)
    }

    /// Writes the torrent bytes into `dir` and re-points the descriptor at the
    /// local copy. An existing copy with the same digest is reused.
    ///
    /// # Errors
    ///
    /// - Any error from [`Self::bytes`]
    /// - `TorrentError::Io` - Directory creation or write failed
    pub async fn download_locally(&mut self, dir: &Path) -> Result<PathBuf, TorrentError> {
        let bytes = self.bytes().await?;
        let digest = hex::encode(Sha1::digest(bytes));
        let path = dir.join(format!("{digest}.torrent"));

        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, bytes).await?;
            tracing::debug!("Stored torrent at {}", path.display());
        }

        self.file = Some(path.clone());
        self.url = None;
        Ok(path)
    }

    fn location(&self) -> String {
        if self.data.is_some() {
            INLINE_LOCATION.to_string()
        } else if let Some(path) = &self.file {
            path.display().to_string()
        } else {
            self.url.clone().unwrap_or_else(|| INLINE_LOCATION.to_string())
        }
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, TorrentError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TorrentError::FileNotFound {
            path: path.display().to_string(),
        }),
        Err(source) => Err(TorrentError::ReadFailed {
            path: path.display().to_string(),
            source,
        }),
    }
}
