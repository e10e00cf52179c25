//! Stream backend over the wire protocol engine

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::WireEngineConfig;
use crate::engine::wire::{ContentSource, EngineNotice, WireEngine};
use crate::status::{CanonicalStatus, TransferProgress};
use crate::torrent::{TorrentDescriptor, TorrentFile};

use super::backend::{PlaybackTarget, StreamBackend};
use super::error::{BackendKind, StreamError, StreamErrorKind};
use super::player::PlayerEvent;
use super::ready::{BufferReading, ReadyPolicy};

pub struct WireBackend {
    engine: WireEngine,
    target: Option<usize>,
    title: Option<String>,
    size: Option<u64>,
}

impl WireBackend {
    pub fn new(config: WireEngineConfig) -> Self {
        Self::with_engine(WireEngine::new(config))
    }

    pub fn with_engine(engine: WireEngine) -> Self {
        Self {
            engine,
            target: None,
            title: None,
            size: None,
        }
    }

    pub fn engine(&self) -> &WireEngine {
        &self.engine
    }

    /// Magnets are handed over by info hash, everything else as raw bytes.
    async fn content_source(descriptor: &TorrentDescriptor) -> crate::Result<ContentSource> {
        if descriptor.is_magnet() {
            let info_hash = descriptor.info_hash().await?;
            Ok(ContentSource::Infohash(info_hash.to_string()))
        } else {
            Ok(ContentSource::Raw(descriptor.bytes().await?.to_vec()))
        }
    }

    async fn connect_and_load(
        &mut self,
        descriptor: &TorrentDescriptor,
    ) -> crate::Result<(ContentSource, Vec<(usize, String)>)> {
        let config = self.engine.config();
        let (connect_timeout, request_timeout) = (config.connect_timeout, config.request_timeout);

        self.engine
            .connect(connect_timeout)
            .await
            .map_err(StreamError::from)?;

        let source = Self::content_source(descriptor).await?;
        let files = self
            .engine
            .load(source.clone(), request_timeout)
            .await
            .map_err(StreamError::from)?;
        tracing::debug!("Engine reports {} file(s)", files.len());
        Ok((source, files))
    }

    fn reading(&self) -> crate::Result<BufferReading> {
        let snapshot = self.engine.status().map_err(StreamError::from)?;
        if let Some(message) = &snapshot.error_message {
            return Err(
                StreamError::new(BackendKind::Wire, StreamErrorKind::EngineError, message).into(),
            );
        }

        let target = self.size.map(|size| {
            let downloaded = (size as f64 * snapshot.progress_percent / 100.0) as u64;
            TransferProgress::new(downloaded, Some(size))
        });
        let complete = snapshot.phase == CanonicalStatus::Seeding;

        Ok(BufferReading {
            snapshot,
            target,
            complete,
        })
    }
}

#[async_trait]
impl StreamBackend for WireBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wire
    }

    fn ready_policy(&self) -> ReadyPolicy {
        ReadyPolicy::PlaybackUrl
    }

    async fn prepare(
        &mut self,
        descriptor: &mut TorrentDescriptor,
        file_index: Option<usize>,
    ) -> crate::Result<()> {
        let (source, files) = self.connect_and_load(descriptor).await?;

        let target = match file_index {
            Some(index) if files.iter().any(|(file, _)| *file == index) => index,
            Some(index) => {
                return Err(StreamError::invalid_file_index(BackendKind::Wire, index).into());
            }
            None => files
                .first()
                .map(|(index, _)| *index)
                .ok_or_else(|| StreamError::no_playable_content(BackendKind::Wire))?,
        };

        self.title = files
            .iter()
            .find(|(index, _)| *index == target)
            .map(|(_, name)| name.clone());
        self.size = if descriptor.is_magnet() {
            None
        } else {
            match descriptor.info().await {
                Ok(info) => info.file(target).map(|file| file.length),
                Err(e) => {
                    tracing::debug!("File size unavailable: {}", e);
                    None
                }
            }
        };
        self.target = Some(target);

        tracing::info!("Starting playback of file {}", target);
        let timeout = self.engine.config().request_timeout;
        self.engine
            .play(source, &[target], timeout)
            .await
            .map_err(StreamError::from)?;
        Ok(())
    }

    async fn poll_buffering(&mut self) -> crate::Result<Option<BufferReading>> {
        self.reading().map(Some)
    }

    async fn playback_target(&mut self) -> crate::Result<PlaybackTarget> {
        let snapshot = self.engine.status().map_err(StreamError::from)?;
        let url = snapshot.playback_url.ok_or_else(|| {
            StreamError::new(
                BackendKind::Wire,
                StreamErrorKind::PlaybackFailed,
                "Engine announced no playback url",
            )
        })?;

        Ok(PlaybackTarget {
            url,
            subtitle_url: None,
            title: self.title.clone(),
            size: self.size,
        })
    }

    async fn poll_playing(&mut self) -> crate::Result<BufferReading> {
        self.reading()
    }

    fn player_event(&mut self, event: PlayerEvent) -> crate::Result<()> {
        let forwarded = match event {
            PlayerEvent::Started { duration } => {
                self.engine.on_start(duration.unwrap_or(Duration::ZERO))
            }
            PlayerEvent::Paused => self.engine.on_pause(),
            PlayerEvent::Resumed => self.engine.on_resume(),
            PlayerEvent::Stopped => self.engine.on_stop(),
            PlayerEvent::Ended => self.engine.on_end(),
            PlayerEvent::Seek { position } => self.engine.on_seek(position),
        };
        forwarded.map_err(StreamError::from)?;
        Ok(())
    }

    fn take_notices(&mut self) -> Vec<EngineNotice> {
        self.engine.take_notices()
    }

    async fn saved_files(&mut self) -> Vec<PathBuf> {
        self.target
            .and_then(|index| self.engine.saved_file(index))
            .into_iter()
            .collect()
    }

    async fn list(
        &mut self,
        descriptor: &mut TorrentDescriptor,
    ) -> crate::Result<Vec<TorrentFile>> {
        let (_, files) = self.connect_and_load(descriptor).await?;

        if descriptor.is_magnet() {
            return Ok(files
                .into_iter()
                .map(|(index, path)| TorrentFile {
                    index,
                    path,
                    length: 0,
                    md5sum: None,
                })
                .collect());
        }

        Ok(descriptor
            .files()
            .await?
            .iter()
            .filter(|file| files.iter().any(|(index, _)| *index == file.index))
            .cloned()
            .collect())
    }

    async fn release(&mut self) {
        self.engine.close();
    }
}
