//! Shared fixtures for the stream integration tests.

use std::time::Duration;

use async_trait::async_trait;
use seedcast_core::config::StreamConfig;
use seedcast_core::stream::{PlayItem, Player, PlayerError, PlayerEvent};

/// Fast cadence so a whole session finishes in well under a second.
pub fn stream_config(pre_buffer_bytes: u64) -> StreamConfig {
    StreamConfig {
        poll_interval: Duration::from_millis(20),
        playback_start_grace: Duration::from_millis(200),
        stop_settle: Duration::from_millis(20),
        pre_buffer_bytes,
        metadata_timeout: Duration::from_millis(500),
    }
}

/// Player that "plays" for a fixed number of liveness checks and then
/// reports the end of the media.
pub struct FakePlayer {
    ticks: usize,
    pub played: Vec<PlayItem>,
    events: Vec<PlayerEvent>,
}

impl FakePlayer {
    pub fn new(ticks: usize) -> Self {
        Self {
            ticks,
            played: Vec::new(),
            events: Vec::new(),
        }
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn play(&mut self, item: &PlayItem) -> Result<(), PlayerError> {
        self.played.push(item.clone());
        self.events.push(PlayerEvent::Started { duration: None });
        Ok(())
    }

    fn is_playing(&mut self) -> bool {
        if self.played.is_empty() || self.ticks == 0 {
            return false;
        }
        self.ticks -= 1;
        if self.ticks == 0 {
            self.events.push(PlayerEvent::Ended);
        }
        self.ticks > 0
    }

    fn take_events(&mut self) -> Vec<PlayerEvent> {
        std::mem::take(&mut self.events)
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        Ok(())
    }

    fn resume(&mut self) -> Result<(), PlayerError> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PlayerError> {
        self.ticks = 0;
        self.events.push(PlayerEvent::Stopped);
        Ok(())
    }
}
