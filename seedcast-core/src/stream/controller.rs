//! Prebuffer, play and teardown state machine shared by all backends

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::Instant;

use crate::config::StreamConfig;
use crate::engine::wire::EngineNotice;
use crate::status::{CanonicalStatus, NullSink, ProgressContext, ProgressSink, SinkGuard};
use crate::torrent::{TorrentDescriptor, TorrentFile};

use super::backend::{PlaybackTarget, StreamBackend};
use super::player::{PlayItem, Player, PlayerEvent};

/// Cloneable cancellation flag observed at poll cadence.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    StartingEngine,
    DownloadingMetadata,
    Buffering(CanonicalStatus),
    Playing,
    Stopped,
    Ended,
    Aborted,
    Failed,
}

/// How a playback request finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub state: StreamState,
    pub saved_files: Vec<PathBuf>,
}

impl StreamOutcome {
    fn aborted() -> Self {
        Self {
            state: StreamState::Aborted,
            saved_files: Vec::new(),
        }
    }
}

/// Drives one backend from engine start to teardown.
pub struct StreamController<B> {
    backend: B,
    config: StreamConfig,
    buffering: Arc<dyn ProgressSink>,
    playing: Arc<dyn ProgressSink>,
    abort: AbortHandle,
    state: StreamState,
}

impl<B: StreamBackend> StreamController<B> {
    pub fn new(backend: B, config: StreamConfig) -> Self {
        Self {
            backend,
            config,
            buffering: Arc::new(NullSink),
            playing: Arc::new(NullSink),
            abort: AbortHandle::new(),
            state: StreamState::Idle,
        }
    }

    /// Sinks for the buffering phase and for paused playback.
    pub fn with_sinks(
        mut self,
        buffering: Arc<dyn ProgressSink>,
        playing: Arc<dyn ProgressSink>,
    ) -> Self {
        self.buffering = buffering;
        self.playing = playing;
        self
    }

    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Files the engine reports as playable. The engine is released
    /// afterwards.
    pub async fn list(
        &mut self,
        descriptor: &mut TorrentDescriptor,
    ) -> crate::Result<Vec<TorrentFile>> {
        self.transition(StreamState::StartingEngine);
        let result = self.backend.list(descriptor).await;
        self.backend.release().await;
        self.transition(if result.is_ok() {
            StreamState::Stopped
        } else {
            StreamState::Failed
        });
        result
    }

    /// Buffers `file_index` (or the backend's default), plays it and tears
    /// everything down again.
    ///
    /// Cancellation through the abort handle or either sink ends the run
    /// with [`StreamState::Aborted`] and no error.
    ///
    /// # Errors
    ///
    /// - `SeedcastError::Stream` - Engine failure, translated per backend
    /// - `SeedcastError::Torrent` - Descriptor could not be resolved
    /// - `SeedcastError::Player` - Player could not be started or stopped
    pub async fn play<P>(
        &mut self,
        player: &mut P,
        descriptor: &mut TorrentDescriptor,
        file_index: Option<usize>,
    ) -> crate::Result<StreamOutcome>
    where
        P: Player + ?Sized,
    {
        let result = self.run(player, descriptor, file_index).await;
        self.backend.release().await;

        match &result {
            Ok(outcome) => self.transition(outcome.state),
            Err(e) => {
                tracing::error!("Stream failed: {}", e);
                self.transition(StreamState::Failed);
            }
        }
        result
    }

    async fn run<P>(
        &mut self,
        player: &mut P,
        descriptor: &mut TorrentDescriptor,
        file_index: Option<usize>,
    ) -> crate::Result<StreamOutcome>
    where
        P: Player + ?Sized,
    {
        self.transition(StreamState::StartingEngine);
        self.backend.prepare(descriptor, file_index).await?;
        self.transition(StreamState::DownloadingMetadata);

        if !self.buffer().await? {
            return Ok(StreamOutcome::aborted());
        }

        let target = self.backend.playback_target().await?;
        self.transition(StreamState::Playing);
        player
            .play(&PlayItem {
                url: target.url.clone(),
                title: target.title.clone(),
                subtitle_url: target.subtitle_url.clone(),
            })
            .await?;

        let finished = match self.watch_playback(player, &target).await {
            Ok(finished) => finished,
            Err(e) => {
                if let Err(stop) = player.stop().await {
                    tracing::warn!("Failed to stop player: {}", stop);
                }
                return Err(e);
            }
        };

        // Let stop/end notifications reach the engine before teardown
        tokio::time::sleep(self.config.stop_settle).await;

        Ok(StreamOutcome {
            state: finished,
            saved_files: self.backend.saved_files().await,
        })
    }

    /// Returns false when cancelled before the backend became ready.
    async fn buffer(&mut self) -> crate::Result<bool> {
        let policy = self.backend.ready_policy();
        let buffering = Arc::clone(&self.buffering);
        let sink = SinkGuard::opened(buffering.as_ref(), "Buffering");

        loop {
            if self.is_cancelled() {
                tracing::info!("Buffering cancelled");
                return Ok(false);
            }
            tokio::time::sleep(self.config.poll_interval).await;
            if self.is_cancelled() {
                tracing::info!("Buffering cancelled");
                return Ok(false);
            }

            let Some(reading) = self.backend.poll_buffering().await? else {
                continue;
            };
            self.transition(StreamState::Buffering(reading.snapshot.phase));

            if policy.is_ready(&reading) {
                tracing::info!("Buffering complete");
                return Ok(true);
            }

            sink.sink().update(
                policy.progress(&reading),
                &ProgressContext {
                    snapshot: &reading.snapshot,
                    file_name: None,
                    target_size: reading.target.and_then(|target| target.size),
                },
            );
        }
    }

    /// Polls while the player is active or still inside the start grace
    /// window. Returns the terminal state.
    async fn watch_playback<P>(
        &mut self,
        player: &mut P,
        target: &PlaybackTarget,
    ) -> crate::Result<StreamState>
    where
        P: Player + ?Sized,
    {
        let playing = Arc::clone(&self.playing);
        let mut sink = SinkGuard::new(playing.as_ref());
        let heading = target.title.as_deref().unwrap_or("Playing");
        let started = Instant::now();
        let mut finished = StreamState::Stopped;

        loop {
            let active = player.is_playing();
            self.forward_player_events(player, &mut sink, heading, &mut finished)?;

            if self.is_cancelled() {
                tracing::info!("Playback cancelled");
                player.stop().await?;
                self.forward_player_events(player, &mut sink, heading, &mut finished)?;
                return Ok(StreamState::Aborted);
            }
            if !active && started.elapsed() >= self.config.playback_start_grace {
                break;
            }
            self.apply_notices(player);

            tokio::time::sleep(self.config.poll_interval).await;
            let reading = self.backend.poll_playing().await?;
            if sink.is_open() {
                let percent = reading
                    .target
                    .map(|target| target.percent())
                    .unwrap_or(reading.snapshot.progress_percent);
                sink.sink().update(
                    percent,
                    &ProgressContext {
                        snapshot: &reading.snapshot,
                        file_name: target.title.as_deref(),
                        target_size: target.size,
                    },
                );
            }
        }

        Ok(finished)
    }

    fn forward_player_events<P>(
        &mut self,
        player: &mut P,
        sink: &mut SinkGuard<'_>,
        heading: &str,
        finished: &mut StreamState,
    ) -> crate::Result<()>
    where
        P: Player + ?Sized,
    {
        for event in player.take_events() {
            tracing::debug!("Player event {:?}", event);
            match event {
                PlayerEvent::Paused => sink.open(heading),
                PlayerEvent::Resumed => sink.close(),
                PlayerEvent::Ended => *finished = StreamState::Ended,
                PlayerEvent::Stopped if *finished != StreamState::Ended => {
                    *finished = StreamState::Stopped;
                }
                _ => {}
            }
            self.backend.player_event(event)?;
        }
        Ok(())
    }

    fn apply_notices<P>(&mut self, player: &mut P)
    where
        P: Player + ?Sized,
    {
        for notice in self.backend.take_notices() {
            let applied = match notice {
                EngineNotice::Pause => player.pause(),
                EngineNotice::Resume => player.resume(),
            };
            if let Err(e) = applied {
                tracing::debug!("Engine {:?} request not applied: {}", notice, e);
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.abort.is_aborted() || self.buffering.is_cancelled() || self.playing.is_cancelled()
    }

    fn transition(&mut self, state: StreamState) {
        if self.state == state {
            return;
        }
        match state {
            StreamState::Buffering(phase) => tracing::debug!("Buffering: {}", phase),
            _ => tracing::info!("Stream {:?} -> {:?}", self.state, state),
        }
        self.state = state;
    }
}
