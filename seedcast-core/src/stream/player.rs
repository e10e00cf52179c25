//! Media player collaborator
//!
//! The controller only needs to start playback, observe whether the player
//! is still active and collect lifecycle events. [`ProcessPlayer`] drives an
//! external mpv or VLC process.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

/// Player lifecycle notifications forwarded to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Started { duration: Option<Duration> },
    Paused,
    Resumed,
    Stopped,
    Ended,
    Seek { position: Duration },
}

/// What to play.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayItem {
    pub url: String,
    pub title: Option<String>,
    pub subtitle_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Player '{program}' not found")]
    NotFound { program: String },

    #[error("Failed to start player")]
    StartFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Player does not support {operation}")]
    Unsupported { operation: String },
}

#[async_trait]
pub trait Player: Send {
    async fn play(&mut self, item: &PlayItem) -> Result<(), PlayerError>;

    /// Non-blocking liveness check, polled at controller cadence.
    fn is_playing(&mut self) -> bool;

    /// Lifecycle events observed since the last call, oldest first.
    fn take_events(&mut self) -> Vec<PlayerEvent>;

    fn pause(&mut self) -> Result<(), PlayerError>;

    fn resume(&mut self) -> Result<(), PlayerError>;

    async fn stop(&mut self) -> Result<(), PlayerError>;
}

/// Supported external players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PlayerKind {
    #[default]
    Mpv,
    Vlc,
}

impl PlayerKind {
    pub fn command(self) -> &'static str {
        match self {
            Self::Mpv => "mpv",
            Self::Vlc => "vlc",
        }
    }

    /// Arguments for playing `item`.
    pub fn args(self, item: &PlayItem) -> Vec<String> {
        let mut args = vec![item.url.clone()];
        match self {
            Self::Mpv => {
                if let Some(subtitle) = &item.subtitle_url {
                    args.push(format!("--sub-file={subtitle}"));
                }
                if let Some(title) = &item.title {
                    args.push(format!("--force-media-title={title}"));
                }
                args.push("--force-window=immediate".to_string());
            }
            Self::Vlc => {
                if let Some(subtitle) = &item.subtitle_url {
                    args.push(format!("--input-slave={subtitle}"));
                }
                if let Some(title) = &item.title {
                    args.push(format!("--meta-title={title}"));
                }
                args.push("--play-and-exit".to_string());
            }
        }
        args
    }
}

/// Player running as a child process.
///
/// Exit with success is reported as `Ended`, any other exit as `Stopped`.
/// Pause and resume cannot be forwarded to the external process.
pub struct ProcessPlayer {
    kind: PlayerKind,
    child: Option<Child>,
    events: Vec<PlayerEvent>,
}

impl ProcessPlayer {
    pub fn new(kind: PlayerKind) -> Self {
        Self {
            kind,
            child: None,
            events: Vec::new(),
        }
    }

    pub fn kind(&self) -> PlayerKind {
        self.kind
    }
}

#[async_trait]
impl Player for ProcessPlayer {
    async fn play(&mut self, item: &PlayItem) -> Result<(), PlayerError> {
        let program = self.kind.command();
        tracing::info!("Starting {} for {}", program, item.url);

        let child = Command::new(program)
            .args(self.kind.args(item))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PlayerError::NotFound {
                        program: program.to_string(),
                    }
                } else {
                    PlayerError::StartFailed { source: e }
                }
            })?;

        self.child = Some(child);
        self.events.push(PlayerEvent::Started { duration: None });
        Ok(())
    }

    fn is_playing(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::info!("Player exited: {}", status);
                self.events.push(if status.success() {
                    PlayerEvent::Ended
                } else {
                    PlayerEvent::Stopped
                });
                self.child = None;
                false
            }
            Err(e) => {
                tracing::warn!("Cannot query player process: {}", e);
                false
            }
        }
    }

    fn take_events(&mut self) -> Vec<PlayerEvent> {
        std::mem::take(&mut self.events)
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        Err(PlayerError::Unsupported {
            operation: "pause".to_string(),
        })
    }

    fn resume(&mut self) -> Result<(), PlayerError> {
        Err(PlayerError::Unsupported {
            operation: "resume".to_string(),
        })
    }

    async fn stop(&mut self) -> Result<(), PlayerError> {
        if let Some(mut child) = self.child.take() {
            child
                .kill()
                .await
                .map_err(|source| PlayerError::StartFailed { source })?;
            self.events.push(PlayerEvent::Stopped);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> PlayItem {
        PlayItem {
            url: "http://127.0.0.1:5001/files/a.mkv".to_string(),
            title: Some("A".to_string()),
            subtitle_url: Some("http://127.0.0.1:5001/files/a.srt".to_string()),
        }
    }

    #[test]
    fn test_mpv_args() {
        let args = PlayerKind::Mpv.args(&item());
        assert_eq!(args[0], "http://127.0.0.1:5001/files/a.mkv");
        assert!(args.contains(&"--sub-file=http://127.0.0.1:5001/files/a.srt".to_string()));
        assert!(args.contains(&"--force-media-title=A".to_string()));
    }

    #[test]
    fn test_vlc_args_without_subtitle() {
        let item = PlayItem {
            subtitle_url: None,
            ..item()
        };
        let args = PlayerKind::Vlc.args(&item);
        assert!(!args.iter().any(|arg| arg.starts_with("--input-slave")));
        assert!(args.contains(&"--play-and-exit".to_string()));
    }

    #[tokio::test]
    async fn test_idle_player() {
        let mut player = ProcessPlayer::new(PlayerKind::default());
        assert_eq!(player.kind(), PlayerKind::Mpv);
        assert!(!player.is_playing());
        assert!(player.take_events().is_empty());
        assert!(player.stop().await.is_ok());
        assert!(matches!(player.pause(), Err(PlayerError::Unsupported { .. })));
    }
}
