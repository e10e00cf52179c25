//! Line-oriented TCP engine backend
//!
//! The driver owns the socket and reader thread; the facade layers
//! load/play/status operations on top using correlation ids and bounded
//! waits.

pub mod driver;
pub mod error;
pub mod facade;
pub mod framing;
pub mod handshake;
pub mod launcher;
pub mod listeners;
pub mod message;
pub mod status;

pub use driver::{WireDriver, WireSender};
pub use error::EngineError;
pub use facade::{EngineNotice, EngineView, WireEngine};
pub use framing::LineFramer;
pub use launcher::{LaunchOutcome, LaunchStrategy};
pub use listeners::{Listener, ListenerId, ListenerRegistry};
pub use message::{ClientCommand, ContentSource, EventKind, PartnerIds, ServerMessage};
pub use status::{EngineState, RawEngineStatus};
