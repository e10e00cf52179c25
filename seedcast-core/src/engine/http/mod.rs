//! HTTP-polled engine backend
//!
//! The engine runs as a child process serving `/status`, `/ls` and
//! `/shutdown` on a local bind address.

pub mod client;
pub mod error;
pub mod types;

pub use client::HttpEngine;
pub use error::HttpEngineError;
pub use types::{FileStatus, HttpEngineState, MediaType, SessionStatus};
