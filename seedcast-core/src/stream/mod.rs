//! Stream orchestration: backends, readiness rules, the player and the controller

pub mod backend;
pub mod controller;
pub mod error;
pub mod http;
pub mod player;
pub mod ready;
pub mod wire;

pub use backend::{PlaybackTarget, StreamBackend};
pub use controller::{AbortHandle, StreamController, StreamOutcome, StreamState};
pub use error::{BackendKind, StreamError, StreamErrorKind};
pub use http::HttpBackend;
pub use player::{PlayItem, Player, PlayerError, PlayerEvent, PlayerKind, ProcessPlayer};
pub use ready::{BufferReading, ReadyPolicy};
pub use wire::WireBackend;
