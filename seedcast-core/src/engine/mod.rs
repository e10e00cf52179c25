//! Engine backends
//!
//! Two external engine processes are supported: a wire protocol engine
//! reached over a long-lived TCP session, and an HTTP engine launched locally
//! and polled for JSON status.

use std::path::PathBuf;

pub mod http;
pub mod wire;

pub use http::{HttpEngine, HttpEngineError};
pub use wire::{EngineError, WireEngine};

/// First `name` found in the directories of `PATH`.
pub(crate) fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
