//! Stream backend over the HTTP engine

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::time::Instant;

use crate::config::{HttpEngineConfig, StreamConfig};
use crate::engine::http::{FileStatus, HttpEngine, HttpEngineError, MediaType, SessionStatus};
use crate::status::TransferProgress;
use crate::torrent::{TorrentDescriptor, TorrentError, TorrentFile};

use super::backend::{PlaybackTarget, StreamBackend};
use super::error::{BackendKind, StreamError, StreamErrorKind};
use super::ready::{BufferReading, ReadyPolicy};

pub struct HttpBackend {
    engine: HttpEngine,
    policy: ReadyPolicy,
    poll_interval: Duration,
    metadata_timeout: Duration,
    requested: Option<usize>,
    target: Option<FileStatus>,
    subtitle: Option<FileStatus>,
    last_status: Option<SessionStatus>,
}

impl HttpBackend {
    pub fn new(config: HttpEngineConfig, stream: &StreamConfig) -> Self {
        Self::with_engine(HttpEngine::new(config), stream)
    }

    pub fn with_engine(engine: HttpEngine, stream: &StreamConfig) -> Self {
        Self {
            engine,
            policy: ReadyPolicy::for_pre_buffer(stream.pre_buffer_bytes),
            poll_interval: stream.poll_interval,
            metadata_timeout: stream.metadata_timeout,
            requested: None,
            target: None,
            subtitle: None,
            last_status: None,
        }
    }

    /// Engine uri for the descriptor. Inline data is written under the
    /// download path first so the engine can read it from disk.
    async fn resolve_uri(&self, descriptor: &mut TorrentDescriptor) -> crate::Result<String> {
        if let Some(url) = descriptor.url() {
            return Ok(url);
        }
        let dir = self.engine.config().download_path.clone();
        descriptor.download_locally(&dir).await?;
        Ok(descriptor.url().ok_or(TorrentError::UnknownUrl)?)
    }

    async fn launch(
        &mut self,
        descriptor: &mut TorrentDescriptor,
        file_index: usize,
    ) -> crate::Result<()> {
        let uri = self.resolve_uri(descriptor).await?;
        let resume_file = self
            .engine
            .config()
            .download_path
            .join(format!("{}.resume", hex::encode(Sha1::digest(uri.as_bytes()))));

        self.engine.set_uri(uri);
        self.engine.set_resume_file(resume_file);
        self.engine
            .start(file_index)
            .await
            .map_err(StreamError::from)?;
        Ok(())
    }

    async fn status(&mut self, check_error: bool) -> crate::Result<SessionStatus> {
        let status = self.engine.status().await.map_err(StreamError::from)?;
        if check_error {
            HttpEngine::check_torrent_error(&status).map_err(StreamError::from)?;
        }
        self.last_status = Some(status.clone());
        Ok(status)
    }

    /// Identifies the target on first success, then refreshes it.
    async fn refresh_target(&mut self) -> crate::Result<Option<FileStatus>> {
        let index = match (&self.target, self.requested) {
            (Some(target), _) => target.index,
            (None, Some(index)) => index,
            (None, None) => return self.detect_target().await,
        };

        let file = self
            .engine
            .file_status(index)
            .await
            .map_err(StreamError::from)?;
        if let Some(file) = &file {
            self.target = Some(file.clone());
        }
        Ok(file)
    }

    async fn detect_target(&mut self) -> crate::Result<Option<FileStatus>> {
        let Some(videos) = self.list_media(MediaType::Video).await? else {
            return Ok(None);
        };
        let Some(video) = videos.into_iter().next() else {
            return Err(StreamError::no_playable_content(BackendKind::Http).into());
        };
        tracing::info!("Detected video file: {}", video.name);

        self.subtitle = self
            .list_media(MediaType::Subtitles)
            .await?
            .and_then(|subtitles| subtitles.into_iter().next());
        if let Some(subtitle) = &self.subtitle {
            tracing::info!("Detected subtitles: {}", subtitle.name);
        }

        self.target = Some(video.clone());
        Ok(Some(video))
    }

    async fn list_media(
        &mut self,
        media_type: MediaType,
    ) -> crate::Result<Option<Vec<FileStatus>>> {
        Ok(self
            .engine
            .list(Some(media_type))
            .await
            .map_err(StreamError::from)?)
    }

    fn reading(status: &SessionStatus, file: &FileStatus) -> BufferReading {
        BufferReading {
            snapshot: status.snapshot(),
            target: Some(TransferProgress::new(file.download, Some(file.size))),
            complete: status.is_complete(),
        }
    }
}

#[async_trait]
impl StreamBackend for HttpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    fn ready_policy(&self) -> ReadyPolicy {
        self.policy
    }

    async fn prepare(
        &mut self,
        descriptor: &mut TorrentDescriptor,
        file_index: Option<usize>,
    ) -> crate::Result<()> {
        self.requested = file_index;
        self.target = None;
        self.subtitle = None;
        self.last_status = None;
        self.launch(descriptor, file_index.unwrap_or(0)).await
    }

    async fn poll_buffering(&mut self) -> crate::Result<Option<BufferReading>> {
        let status = self.status(true).await?;
        let Some(file) = self.refresh_target().await? else {
            return Ok(None);
        };
        Ok(Some(Self::reading(&status, &file)))
    }

    async fn playback_target(&mut self) -> crate::Result<PlaybackTarget> {
        let file = self.refresh_target().await?.ok_or_else(|| {
            StreamError::new(
                BackendKind::Http,
                StreamErrorKind::Request,
                "Engine has no file list",
            )
        })?;
        let title = self
            .last_status
            .as_ref()
            .map(|status| status.name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| file.name.clone());

        Ok(PlaybackTarget {
            url: file.url,
            subtitle_url: self.subtitle.as_ref().map(|subtitle| subtitle.url.clone()),
            title: Some(title),
            size: Some(file.size),
        })
    }

    async fn poll_playing(&mut self) -> crate::Result<BufferReading> {
        let status = self.status(false).await?;
        match self.refresh_target().await? {
            Some(file) => Ok(Self::reading(&status, &file)),
            None => Ok(BufferReading {
                snapshot: status.snapshot(),
                target: None,
                complete: status.is_complete(),
            }),
        }
    }

    async fn saved_files(&mut self) -> Vec<PathBuf> {
        let complete = self
            .last_status
            .as_ref()
            .is_some_and(SessionStatus::is_complete);
        let Some(target) = self.target.as_ref().filter(|_| complete) else {
            return Vec::new();
        };

        let mut files = vec![PathBuf::from(&target.save_path)];
        if let Some(subtitle) = &self.subtitle
            && Path::new(&subtitle.save_path).exists()
        {
            files.push(PathBuf::from(&subtitle.save_path));
        }
        files
    }

    async fn list(
        &mut self,
        descriptor: &mut TorrentDescriptor,
    ) -> crate::Result<Vec<TorrentFile>> {
        self.launch(descriptor, 0).await?;
        let deadline = Instant::now() + self.metadata_timeout;

        loop {
            if let Some(videos) = self.list_media(MediaType::Video).await? {
                if videos.is_empty() {
                    return Err(StreamError::no_playable_content(BackendKind::Http).into());
                }
                return Ok(videos
                    .into_iter()
                    .map(|file| TorrentFile {
                        index: file.index,
                        path: file.name,
                        length: file.size,
                        md5sum: None,
                    })
                    .collect());
            }

            self.status(true).await?;
            if Instant::now() >= deadline {
                return Err(StreamError::from(HttpEngineError::Timeout {
                    operation: "waiting for torrent metadata".to_string(),
                })
                .into());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn release(&mut self) {
        self.engine.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inline_torrent_is_stored_for_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let backend = HttpBackend::new(
            HttpEngineConfig {
                download_path: dir.path().to_path_buf(),
                ..HttpEngineConfig::default()
            },
            &StreamConfig::default(),
        );
        let mut descriptor = TorrentDescriptor::from_bytes(b"d4:infodee".to_vec());

        let uri = backend.resolve_uri(&mut descriptor).await.unwrap();
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with(".torrent"));
        assert_eq!(backend.ready_policy(), ReadyPolicy::Transferring);
    }

    #[tokio::test]
    async fn test_nothing_saved_before_completion() {
        let mut backend = HttpBackend::new(HttpEngineConfig::default(), &StreamConfig::default());
        backend.target = Some(FileStatus {
            save_path: "/tmp/e01.mkv".to_string(),
            ..FileStatus::default()
        });
        assert!(backend.saved_files().await.is_empty());

        backend.last_status = Some(SessionStatus {
            state: 5,
            ..SessionStatus::default()
        });
        assert_eq!(
            backend.saved_files().await,
            vec![PathBuf::from("/tmp/e01.mkv")]
        );
    }
}
