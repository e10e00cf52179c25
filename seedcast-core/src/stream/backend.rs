//! Seam between the stream controller and an engine backend

use std::path::PathBuf;

use async_trait::async_trait;

use crate::engine::wire::EngineNotice;
use crate::torrent::{TorrentDescriptor, TorrentFile};

use super::error::BackendKind;
use super::player::PlayerEvent;
use super::ready::{BufferReading, ReadyPolicy};

/// Resolved playback location for the target file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackTarget {
    pub url: String,
    pub subtitle_url: Option<String>,
    pub title: Option<String>,
    pub size: Option<u64>,
}

/// Operations the controller needs from an engine.
///
/// Engine errors are translated into `StreamError` by the implementation;
/// descriptor errors pass through unchanged.
#[async_trait]
pub trait StreamBackend: Send {
    fn kind(&self) -> BackendKind;

    fn ready_policy(&self) -> ReadyPolicy;

    /// Connects or launches the engine, submits the torrent and starts
    /// downloading the requested file (or the default one).
    async fn prepare(
        &mut self,
        descriptor: &mut TorrentDescriptor,
        file_index: Option<usize>,
    ) -> crate::Result<()>;

    /// One buffering poll. `None` while the target file is not known yet.
    async fn poll_buffering(&mut self) -> crate::Result<Option<BufferReading>>;

    async fn playback_target(&mut self) -> crate::Result<PlaybackTarget>;

    async fn poll_playing(&mut self) -> crate::Result<BufferReading>;

    /// Forwards a player lifecycle event to the engine.
    fn player_event(&mut self, _event: PlayerEvent) -> crate::Result<()> {
        Ok(())
    }

    /// Engine requests to pause or resume the player.
    fn take_notices(&mut self) -> Vec<EngineNotice> {
        Vec::new()
    }

    /// Local files the session produced.
    async fn saved_files(&mut self) -> Vec<PathBuf>;

    /// Playable files of the torrent as reported by the engine.
    async fn list(&mut self, descriptor: &mut TorrentDescriptor)
    -> crate::Result<Vec<TorrentFile>>;

    /// Releases the engine session. Safe to call repeatedly.
    async fn release(&mut self);
}
