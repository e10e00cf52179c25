//! HTTP engine process and JSON client

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::config::HttpEngineConfig;
use crate::engine::find_in_path;

use super::error::HttpEngineError;
use super::types::{FileList, FileStatus, MediaType, SessionStatus};

const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Locally launched HTTP engine serving one torrent.
pub struct HttpEngine {
    config: HttpEngineConfig,
    uri: Option<String>,
    resume_file: Option<PathBuf>,
    client: reqwest::Client,
    process: Option<Child>,
}

impl HttpEngine {
    pub fn new(config: HttpEngineConfig) -> Self {
        Self {
            config,
            uri: None,
            resume_file: None,
            client: reqwest::Client::new(),
            process: None,
        }
    }

    pub fn config(&self) -> &HttpEngineConfig {
        &self.config
    }

    /// Torrent location handed to the engine (`http(s)://`, `file://` or magnet).
    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.uri = Some(uri.into());
    }

    pub fn set_resume_file(&mut self, path: impl Into<PathBuf>) {
        self.resume_file = Some(path.into());
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.config.bind_host, self.config.bind_port)
    }

    /// Command line for serving `file_index` of the configured uri.
    pub fn command_args(&self, uri: &str, file_index: usize) -> Vec<String> {
        let config = &self.config;
        let mut args = vec![
            format!("--uri={uri}"),
            format!("--bind={}:{}", config.bind_host, config.bind_port),
            format!("--file-index={file_index}"),
            format!("--dl-path={}", config.download_path.display()),
            format!(
                "--state-file={}",
                config
                    .download_path
                    .join(HttpEngineConfig::STATE_FILE)
                    .display()
            ),
            format!("--listen-port={}", config.listen_port),
            format!("--random-port={}", config.use_random_port),
            format!("--keep-files={}", config.keep_files),
            format!("--enable-utp={}", config.enable_utp),
            format!("--enable-dht={}", config.enable_dht),
        ];

        if let Some(resume_file) = &self.resume_file {
            args.push(format!("--resume-file={}", resume_file.display()));
        }
        if let Some(limit) = config.connections_limit {
            args.push(format!("--connections-limit={limit}"));
        }
        if let Some(rate) = config.download_kbps {
            args.push(format!("--dl-rate={rate}"));
        }
        if let Some(rate) = config.upload_kbps {
            args.push(format!("--ul-rate={rate}"));
        }
        if let Some(idle) = config.max_idle {
            args.push(format!("--max-idle={}", idle.as_secs()));
        }
        if !config.trackers.is_empty() {
            args.push(format!("--trackers={}", config.trackers.join(",")));
        }
        if !config.dht_routers.is_empty() {
            args.push(format!("--dht-routers={}", config.dht_routers.join(",")));
        }
        if config.debug_alerts {
            args.push("--debug-alerts=true".to_string());
        }
        args
    }

    fn locate_binary(&self) -> Result<PathBuf, HttpEngineError> {
        match &self.config.binary_path {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => Err(HttpEngineError::ExecutableNotFound {
                reason: path.display().to_string(),
            }),
            None => find_in_path(HttpEngineConfig::BINARY_NAME).ok_or_else(|| {
                HttpEngineError::ExecutableNotFound {
                    reason: format!("{} not found in PATH", HttpEngineConfig::BINARY_NAME),
                }
            }),
        }
    }

    fn prepare_download_path(path: &Path) -> Result<(), HttpEngineError> {
        let invalid = || HttpEngineError::InvalidDownloadPath {
            path: path.display().to_string(),
        };
        std::fs::create_dir_all(path).map_err(|_| invalid())?;
        let metadata = std::fs::metadata(path).map_err(|_| invalid())?;
        if !metadata.is_dir() || metadata.permissions().readonly() {
            return Err(invalid());
        }
        Ok(())
    }

    /// Spawns the engine and waits until `/status` answers.
    ///
    /// # Errors
    ///
    /// - `HttpEngineError::InvalidDownloadPath` - Download path unusable
    /// - `HttpEngineError::ExecutableNotFound` - No engine binary
    /// - `HttpEngineError::SpawnFailed` - Process could not be started
    /// - `HttpEngineError::Crashed` - Process exited during startup
    /// - `HttpEngineError::Timeout` - Engine never answered
    pub async fn start(&mut self, file_index: usize) -> Result<(), HttpEngineError> {
        let uri = self
            .uri
            .clone()
            .ok_or_else(|| HttpEngineError::TorrentError {
                reason: "no torrent uri set".to_string(),
            })?;

        Self::prepare_download_path(&self.config.download_path)?;
        let binary = self.locate_binary()?;
        let args = self.command_args(&uri, file_index);

        tracing::info!("Starting HTTP engine: {} {}", binary.display(), args.join(" "));
        let child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HttpEngineError::SpawnFailed {
                reason: binary.display().to_string(),
                source,
            })?;
        self.process = Some(child);

        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            self.check_alive()?;
            if self.status().await.is_ok() {
                tracing::info!("HTTP engine listening on {}", self.base_url());
                return Ok(());
            }
            if Instant::now() >= deadline {
                self.kill().await;
                return Err(HttpEngineError::Timeout {
                    operation: "waiting for engine startup".to_string(),
                });
            }
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        }
    }

    /// True while the spawned process is running.
    pub fn is_alive(&mut self) -> bool {
        self.process
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    fn check_alive(&mut self) -> Result<(), HttpEngineError> {
        let Some(child) = self.process.as_mut() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.process = None;
                Err(HttpEngineError::Crashed {
                    status: status.to_string(),
                })
            }
            Ok(None) => Ok(()),
            Err(e) => Err(HttpEngineError::Crashed {
                status: e.to_string(),
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(&mut self, path: &str) -> Result<T, HttpEngineError> {
        self.check_alive()?;
        let url = format!("{}/{path}", self.base_url());
        let request_error = |source| HttpEngineError::Request {
            url: url.clone(),
            source,
        };

        self.client
            .get(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)
    }

    /// Current session status.
    pub async fn status(&mut self) -> Result<SessionStatus, HttpEngineError> {
        self.get_json("status").await
    }

    /// Files of the torrent, or `None` while metadata is still missing.
    ///
    /// Indexes are positions in the full list, so filtering by media type
    /// keeps them stable.
    pub async fn list(
        &mut self,
        media_type: Option<MediaType>,
    ) -> Result<Option<Vec<FileStatus>>, HttpEngineError> {
        let listing: FileList = self.get_json("ls").await?;
        Ok(listing.files.map(|files| {
            files
                .into_iter()
                .enumerate()
                .map(|(index, file)| FileStatus { index, ..file })
                .filter(|file| media_type.is_none_or(|wanted| file.media_type() == wanted))
                .collect()
        }))
    }

    /// Status of one file, or `None` while metadata is still missing.
    ///
    /// # Errors
    ///
    /// - `HttpEngineError::InvalidFileIndex` - Index beyond the file list
    pub async fn file_status(
        &mut self,
        index: usize,
    ) -> Result<Option<FileStatus>, HttpEngineError> {
        let Some(files) = self.list(None).await? else {
            return Ok(None);
        };
        files
            .into_iter()
            .nth(index)
            .map(Some)
            .ok_or(HttpEngineError::InvalidFileIndex { index })
    }

    /// Raises the torrent error the engine reported, if any.
    pub fn check_torrent_error(status: &SessionStatus) -> Result<(), HttpEngineError> {
        if status.error.is_empty() {
            Ok(())
        } else {
            Err(HttpEngineError::TorrentError {
                reason: status.error.clone(),
            })
        }
    }

    /// Asks the engine to exit, then kills the process if it is still
    /// running. Safe to call repeatedly.
    pub async fn close(&mut self) {
        let Some(mut child) = self.process.take() else {
            return;
        };
        tracing::info!("Shutting down HTTP engine");

        let url = format!("{}/shutdown", self.base_url());
        if let Err(e) = self
            .client
            .get(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await
        {
            tracing::debug!("Engine shutdown request failed: {}", e);
        }

        match tokio::time::timeout(self.config.request_timeout, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("HTTP engine exited: {}", status),
            _ => {
                tracing::warn!("HTTP engine did not exit, killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill HTTP engine: {}", e);
                }
            }
        }
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.process.take()
            && let Err(e) = child.kill().await
        {
            tracing::warn!("Failed to kill HTTP engine: {}", e);
        }
    }
}
