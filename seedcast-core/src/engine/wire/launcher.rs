//! Local engine process bootstrap

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::WireEngineConfig;
use crate::engine::find_in_path;

use super::error::EngineError;

const ANDROID_PACKAGE: &str = "org.acestream.engine";
const PORT_FILE: &str = "acestream.port";

#[cfg(windows)]
const DESKTOP_CANDIDATES: &[(&str, &[&str])] = &[("ace_engine.exe", &[]), ("tsengine.exe", &[])];

#[cfg(not(windows))]
const DESKTOP_CANDIDATES: &[(&str, &[&str])] = &[
    ("acestreamengine", &["--client-console"]),
    ("acestreamengine-client-console", &[]),
];

/// How a missing local engine gets started. Chosen once per facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStrategy {
    Desktop { program: PathBuf, args: Vec<String> },
    Android { package: String },
    Remote,
    Unavailable { reason: String },
}

/// Result of a launch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Spawned { pid: u32 },
    ActivityRequested,
    Skipped,
}

impl LaunchStrategy {
    /// Picks the strategy for the configured host and platform.
    pub fn detect(config: &WireEngineConfig) -> Self {
        if !config.is_local() {
            return Self::Remote;
        }

        if let Some(program) = &config.engine_path {
            return Self::Desktop {
                program: program.clone(),
                args: Vec::new(),
            };
        }

        if cfg!(target_os = "android") {
            return Self::Android {
                package: ANDROID_PACKAGE.to_string(),
            };
        }

        for (name, args) in DESKTOP_CANDIDATES {
            if let Some(program) = find_in_path(name) {
                return Self::Desktop {
                    program,
                    args: args.iter().map(|arg| arg.to_string()).collect(),
                };
            }
        }

        Self::Unavailable {
            reason: format!(
                "none of {:?} found in PATH",
                DESKTOP_CANDIDATES
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
            ),
        }
    }

    /// Starts the engine process. The child is left running on its own.
    ///
    /// # Errors
    ///
    /// - `EngineError::ExecutableNotFound` - No engine binary available
    /// - `EngineError::EngineLaunchFailed` - Spawning the process failed
    pub async fn launch(&self) -> Result<LaunchOutcome, EngineError> {
        match self {
            Self::Remote => Ok(LaunchOutcome::Skipped),
            Self::Unavailable { reason } => Err(EngineError::ExecutableNotFound {
                reason: reason.clone(),
            }),
            Self::Desktop { program, args } => {
                tracing::info!("Starting engine: {} {}", program.display(), args.join(" "));
                let child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map_err(|e| match e.kind() {
                        std::io::ErrorKind::NotFound => EngineError::ExecutableNotFound {
                            reason: program.display().to_string(),
                        },
                        _ => EngineError::EngineLaunchFailed {
                            reason: format!("{}: {e}", program.display()),
                        },
                    })?;
                Ok(LaunchOutcome::Spawned {
                    pid: child.id().unwrap_or_default(),
                })
            }
            Self::Android { package } => {
                tracing::info!("Requesting engine activity {}", package);
                Command::new("monkey")
                    .args(["-p", package.as_str(), "-c", "android.intent.category.LAUNCHER", "1"])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map_err(|e| EngineError::EngineLaunchFailed {
                        reason: format!("engine is not installed ({e})"),
                    })?;
                Ok(LaunchOutcome::ActivityRequested)
            }
        }
    }

    /// Port the engine listens on. A desktop install may publish its port in
    /// a file next to the executable.
    pub fn resolve_port(&self, config: &WireEngineConfig) -> u16 {
        let Self::Desktop { program, .. } = self else {
            return config.port;
        };
        program
            .parent()
            .and_then(|dir| read_port_file(&dir.join(PORT_FILE)))
            .unwrap_or(config.port)
    }
}

fn read_port_file(path: &Path) -> Option<u16> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}
