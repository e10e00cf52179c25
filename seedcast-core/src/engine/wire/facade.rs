//! Request/response facade over the wire driver
//!
//! Reader-thread listeners keep a shared [`SessionCore`] current and publish
//! an [`EngineView`] through a watch channel. Callers wait on that view, or on
//! a oneshot keyed by correlation id for `LOADASYNC`, always under a deadline.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::config::WireEngineConfig;
use crate::status::{CanonicalStatus, StatusSnapshot};

use super::driver::{WireDriver, WireSender};
use super::error::EngineError;
use super::handshake::ready_reply;
use super::launcher::{LaunchOutcome, LaunchStrategy};
use super::listeners::ListenerId;
use super::message::{
    ClientCommand, ContentSource, EventKind, LoadResponse, PartnerIds, ServerMessage,
};
use super::status::{EngineState, RawEngineStatus};

const ENCRYPTED_FORMAT: &str = "encrypted";
const ENCRYPTED_SUFFIX: &str = ".acemedia";
const MAX_CORRELATION_ID: u32 = 0x7fff_ffff;

/// Latest engine state as seen by waiters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineView {
    pub state: Option<i32>,
    pub auth_level: Option<i32>,
    pub error: Option<String>,
    pub playback_url: Option<String>,
    pub is_live: bool,
    pub closed: bool,
}

impl EngineView {
    /// Handshake finished: the engine sent `AUTH` or `STATE`.
    pub fn is_ready(&self) -> bool {
        self.state.is_some()
    }
}

/// Engine-initiated player requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineNotice {
    Resume,
    Pause,
}

struct SessionSettings {
    host: String,
    product_key: String,
    save_root: Option<PathBuf>,
    save_encrypted: bool,
}

/// Mutable session state written by the reader thread.
#[derive(Default)]
pub(crate) struct SessionCore {
    version: Option<String>,
    auth_level: Option<i32>,
    state: Option<i32>,
    raw: RawEngineStatus,
    playback_url: Option<String>,
    is_live: bool,
    files: Vec<(usize, String)>,
    infohash: Option<String>,
    selection: Vec<usize>,
    saved_files: HashMap<usize, PathBuf>,
    pending: HashMap<u32, oneshot::Sender<String>>,
    fault: Option<EngineError>,
    closed: bool,
}

impl SessionCore {
    fn view(&self) -> EngineView {
        EngineView {
            state: self.state,
            auth_level: self.auth_level,
            error: self.error_message(),
            playback_url: self.playback_url.clone(),
            is_live: self.is_live,
            closed: self.closed,
        }
    }

    /// `STATUS main:err` text, or a generic message once the engine
    /// switched to its error state.
    fn error_message(&self) -> Option<String> {
        self.raw.error_message.clone().or_else(|| {
            (self.state == Some(EngineState::Failed.code()))
                .then(|| "Engine entered the error state".to_string())
        })
    }

    fn snapshot(&self) -> StatusSnapshot {
        let phase = match self.state.map(EngineState::try_from) {
            Some(Ok(state)) => state.canonical(),
            Some(Err(_)) => CanonicalStatus::Queued,
            None => CanonicalStatus::StartingEngine,
        };
        let non_negative = |value: i64| u64::try_from(value).unwrap_or(0);

        StatusSnapshot {
            phase,
            progress_percent: self.raw.progress.clamp(0, 100) as f64,
            download_rate_bps: non_negative(self.raw.down_speed) * 1024,
            upload_rate_bps: non_negative(self.raw.up_speed) * 1024,
            peers: u32::try_from(self.raw.peers).unwrap_or(0),
            seeds: 0,
            downloaded_bytes: non_negative(self.raw.downloaded),
            uploaded_bytes: non_negative(self.raw.uploaded),
            playback_url: self.playback_url.clone(),
            error_message: self.error_message(),
            name: None,
        }
    }

    /// Decides whether a `cansave` announcement results in a `SAVE`.
    ///
    /// Returns the command to send, if any. Each index is saved at most once
    /// per playback; an existing destination file is recorded without asking
    /// the engine to write it again.
    fn plan_save(
        &mut self,
        settings: &SessionSettings,
        index: usize,
        infohash: &str,
        format: &str,
    ) -> std::io::Result<Option<ClientCommand>> {
        let Some(root) = &settings.save_root else {
            return Ok(None);
        };
        if !self.selection.contains(&index) || self.saved_files.contains_key(&index) {
            return Ok(None);
        }

        let encrypted = format == ENCRYPTED_FORMAT;
        if encrypted && !settings.save_encrypted {
            return Ok(None);
        }

        let Some(file_name) = self
            .files
            .iter()
            .find(|(file_index, _)| *file_index == index)
            .map(|(_, name)| name.as_str())
            .filter(|name| is_relative_name(name))
            .or_else(|| Some(infohash).filter(|hash| is_relative_name(hash)))
        else {
            tracing::warn!("Refusing to save file {} outside {}", index, root.display());
            return Ok(None);
        };

        let path = save_destination(root, file_name, encrypted);
        let command = if path.exists() {
            None
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Some(ClientCommand::Save {
                infohash: infohash.to_string(),
                index,
                path: path.to_string_lossy().into_owned(),
            })
        };

        self.saved_files.insert(index, path);
        Ok(command)
    }
}

/// Reader-thread side of a session.
struct SessionHandler {
    core: Arc<Mutex<SessionCore>>,
    settings: SessionSettings,
    sender: WireSender,
    view_tx: watch::Sender<EngineView>,
    notice_tx: mpsc::UnboundedSender<EngineNotice>,
}

impl SessionHandler {
    fn handle(&self, message: &ServerMessage) {
        let mut core = self.core.lock();
        let reply = match message {
            ServerMessage::Status(raw) => {
                if let Err(e) = core.raw.apply(raw) {
                    tracing::warn!("{}", e);
                }
                None
            }
            ServerMessage::State(state) => {
                core.state = Some(*state);
                None
            }
            ServerMessage::Auth(level) => {
                core.auth_level = Some(*level);
                core.state = Some(EngineState::Idle.code());
                None
            }
            ServerMessage::Start { url, flags } => {
                let url = url.replace(WireEngineConfig::DEFAULT_HOST, &self.settings.host);
                core.is_live = flags.is_live;
                if flags.is_ad {
                    core.playback_url = None;
                    Some(ClientCommand::Playback { url, percent: 100 })
                } else {
                    tracing::info!("Playback url announced: {}", url);
                    core.playback_url = Some(url);
                    None
                }
            }
            ServerMessage::CanSave {
                index,
                infohash,
                format,
            } => match core.plan_save(&self.settings, *index, infohash, format) {
                Ok(command) => command,
                Err(e) => {
                    tracing::warn!("Cannot prepare save destination: {}", e);
                    None
                }
            },
            ServerMessage::HelloTs { key, version } => {
                core.version = version.clone();
                tracing::debug!("Engine version {:?}", version);
                Some(ready_reply(key.as_deref(), &self.settings.product_key))
            }
            ServerMessage::LoadResp {
                correlation_id,
                body,
            } => {
                match core.pending.remove(correlation_id) {
                    Some(waiter) => {
                        let _ = waiter.send(body.clone());
                    }
                    None => tracing::debug!("Unmatched LOADRESP {}", correlation_id),
                }
                None
            }
            ServerMessage::Resume => {
                let _ = self.notice_tx.send(EngineNotice::Resume);
                None
            }
            ServerMessage::Pause => {
                let _ = self.notice_tx.send(EngineNotice::Pause);
                None
            }
            ServerMessage::Shutdown => {
                core.closed = true;
                None
            }
            ServerMessage::Event { .. } | ServerMessage::Other { .. } => None,
        };

        if let Some(command) = reply
            && let Err(e) = self.sender.send(&command)
        {
            tracing::warn!("{}", e);
            core.fault = Some(e);
        }

        self.view_tx.send_replace(core.view());
    }

    fn on_reader_exit(&self) {
        let mut core = self.core.lock();
        core.closed = true;
        core.pending.clear();
        self.view_tx.send_replace(core.view());
    }
}

struct ActiveSession {
    driver: WireDriver,
    sender: WireSender,
    core: Arc<Mutex<SessionCore>>,
    view: watch::Receiver<EngineView>,
    notices: mpsc::UnboundedReceiver<EngineNotice>,
}

impl ActiveSession {
    fn send(&self, command: ClientCommand) -> Result<(), EngineError> {
        self.sender.send(&command)
    }

    fn take_fault(&self) -> Result<(), EngineError> {
        match self.core.lock().fault.take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn closed_error(&self) -> EngineError {
        EngineError::ConnectionError {
            address: self.driver.address().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "engine closed the connection",
            ),
        }
    }
}

/// Wire protocol engine with synchronous-looking operations.
pub struct WireEngine {
    config: WireEngineConfig,
    strategy: LaunchStrategy,
    session: Option<ActiveSession>,
}

impl WireEngine {
    pub fn new(config: WireEngineConfig) -> Self {
        let strategy = LaunchStrategy::detect(&config);
        Self::with_strategy(config, strategy)
    }

    /// Uses a fixed launch strategy instead of platform detection.
    pub fn with_strategy(config: WireEngineConfig, strategy: LaunchStrategy) -> Self {
        Self {
            config,
            strategy,
            session: None,
        }
    }

    pub fn config(&self) -> &WireEngineConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.driver.is_active())
    }

    /// Connects and completes the handshake, launching a local engine at
    /// most once when the first attempt fails.
    ///
    /// # Errors
    ///
    /// - `EngineError::InvalidSavePath` - Configured save path is not a directory
    /// - `EngineError::ExecutableNotFound` / `EngineLaunchFailed` - Bootstrap failed
    /// - `EngineError::ConnectionError` - Engine unreachable within `timeout`
    /// - `EngineError::Timeout` - Connected but the handshake never completed
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), EngineError> {
        if self.is_connected() {
            return Ok(());
        }
        self.shutdown();

        if self.config.is_local()
            && let Some(path) = &self.config.save_path
            && !path.is_dir()
        {
            return Err(EngineError::InvalidSavePath {
                path: path.display().to_string(),
            });
        }

        let deadline = Instant::now() + timeout;
        let mut launched = false;

        let driver = loop {
            let port = self.strategy.resolve_port(&self.config);
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = WireDriver::connect(
                &self.config.host,
                port,
                remaining.min(self.config.connect_timeout),
                self.config.poll_interval,
            )
            .await;

            let error = match attempt {
                Ok(driver) => break driver,
                Err(e) => e,
            };

            if !launched {
                launched = true;
                tracing::info!("Engine not reachable, attempting to start it");
                if self.strategy.launch().await? == LaunchOutcome::Skipped {
                    tracing::debug!("Remote engine, launch skipped");
                }
            }

            if Instant::now() + self.config.poll_interval >= deadline {
                return Err(error);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        };

        let session = self.start_session(driver)?;
        session.send(ClientCommand::HelloBg)?;

        let mut view = session.view.clone();
        let outcome = wait_for_view(&mut view, deadline, |v| v.is_ready() || v.closed).await;
        match outcome {
            Some(view) if view.is_ready() => {
                tracing::info!("Engine handshake complete");
                self.session = Some(session);
                Ok(())
            }
            Some(_) => Err(session.closed_error()),
            None => Err(EngineError::timeout("waiting for engine handshake")),
        }
    }

    fn start_session(&self, mut driver: WireDriver) -> Result<ActiveSession, EngineError> {
        let core = Arc::new(Mutex::new(SessionCore::default()));
        let (view_tx, view) = watch::channel(EngineView::default());
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let sender = driver.sender();

        let handler = Arc::new(SessionHandler {
            core: Arc::clone(&core),
            settings: SessionSettings {
                host: self.config.host.clone(),
                product_key: self.config.product_key.clone(),
                save_root: self.config.save_path.clone(),
                save_encrypted: self.config.save_encrypted,
            },
            sender: sender.clone(),
            view_tx,
            notice_tx,
        });

        {
            let listener = Arc::clone(&handler);
            driver
                .listeners()
                .lock()
                .attach_wildcard(move |message| listener.handle(message));
        }
        driver.start_reader(move || handler.on_reader_exit())?;

        Ok(ActiveSession {
            driver,
            sender,
            core,
            view,
            notices,
        })
    }

    fn session(&self) -> Result<&ActiveSession, EngineError> {
        self.session.as_ref().ok_or(EngineError::NotConnected)
    }

    fn partner_ids(&self) -> PartnerIds {
        PartnerIds {
            developer_id: self.config.developer_id,
            affiliate_id: self.config.affiliate_id,
            zone_id: self.config.zone_id,
            stream_id: self.config.stream_id,
        }
    }

    /// Registers an extra listener; it runs after the session's own
    /// bookkeeping for the same message.
    ///
    /// # Errors
    ///
    /// - `EngineError::NotConnected` - No active session
    pub fn attach<F>(&self, kind: EventKind, listener: F) -> Result<ListenerId, EngineError>
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        let session = self.session()?;
        Ok(session.driver.listeners().lock().attach(kind, listener))
    }

    /// Removes extra listeners, see [`super::ListenerRegistry::detach`].
    /// The session's own bookkeeping listener is only removed by
    /// `detach(None, None)`.
    pub fn detach(&self, kind: Option<EventKind>, id: Option<ListenerId>) {
        if let Some(session) = &self.session {
            session.driver.listeners().lock().detach(kind, id);
        }
    }

    /// Submits content and waits for the engine's file list.
    ///
    /// # Errors
    ///
    /// - `EngineError::MetadataLoadFailed` - Engine rejected the content
    /// - `EngineError::EngineReportedError` - Engine entered its error state
    /// - `EngineError::Timeout` - No reply within `timeout`
    pub async fn load(
        &self,
        source: ContentSource,
        timeout: Duration,
    ) -> Result<Vec<(usize, String)>, EngineError> {
        let session = self.session()?;
        session.take_fault()?;

        let deadline = Instant::now() + timeout;
        let correlation_id = rand::random_range(0..=MAX_CORRELATION_ID);
        let (tx, mut rx) = oneshot::channel();
        session.core.lock().pending.insert(correlation_id, tx);

        let command = ClientCommand::LoadAsync {
            correlation_id,
            source,
            ids: self.partner_ids(),
        };
        if let Err(e) = session.send(command) {
            session.core.lock().pending.remove(&correlation_id);
            return Err(e);
        }

        let mut view = session.view.clone();
        let waited = tokio::select! {
            biased;
            reply = &mut rx => Ok(reply),
            stopped = wait_for_view(&mut view, deadline, |v| v.error.is_some()) => Err(stopped),
        };

        let body = match waited {
            Ok(Ok(body)) => body,
            Ok(Err(_)) => return Err(session.closed_error()),
            Err(stopped) => {
                session.core.lock().pending.remove(&correlation_id);
                // A reply may have raced the error
                match rx.try_recv() {
                    Ok(body) => body,
                    Err(_) => {
                        return Err(match stopped {
                            Some(EngineView {
                                error: Some(message),
                                ..
                            }) => self.reported_error(session, message),
                            Some(_) => session.closed_error(),
                            None => EngineError::timeout("loading content"),
                        });
                    }
                }
            }
        };

        let response = LoadResponse::parse(&body)?;
        let infohash = response.infohash.clone();
        let files = response.into_files()?;

        let mut core = session.core.lock();
        core.infohash = infohash;
        core.files = files.clone();
        Ok(files)
    }

    fn reported_error(&self, session: &ActiveSession, message: String) -> EngineError {
        let code = session
            .core
            .lock()
            .raw
            .error_id
            .clone()
            .unwrap_or_default();
        EngineError::EngineReportedError { code, message }
    }

    /// Starts playback of the selected indexes and waits until the engine
    /// leaves the idle state.
    ///
    /// # Errors
    ///
    /// - `EngineError::PlaybackStartFailed` - Engine reported an error
    /// - `EngineError::Timeout` - Engine stayed idle for `timeout`
    pub async fn play(
        &self,
        source: ContentSource,
        indexes: &[usize],
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let session = self.session()?;
        session.take_fault()?;

        let indexes = if indexes.is_empty() {
            vec![0]
        } else {
            indexes.to_vec()
        };
        {
            let mut core = session.core.lock();
            core.saved_files.clear();
            core.selection = indexes.clone();
            core.playback_url = None;
        }

        let deadline = Instant::now() + timeout;
        session.send(ClientCommand::Start {
            source,
            indexes,
            ids: self.partner_ids(),
        })?;

        let mut view = session.view.clone();
        let outcome = wait_for_view(&mut view, deadline, |v| {
            v.error.is_some() || v.closed || v.state.is_some_and(|state| state != 0)
        })
        .await;

        match outcome {
            Some(view) if view.error.is_some() => Err(EngineError::PlaybackStartFailed {
                reason: view.error.unwrap_or_default(),
            }),
            Some(view) if view.closed => Err(session.closed_error()),
            Some(_) => Ok(()),
            None => Err(EngineError::timeout("starting playback")),
        }
    }

    pub async fn load_by_url(&self, url: &str) -> Result<Vec<(usize, String)>, EngineError> {
        self.load(
            ContentSource::Torrent(url.to_string()),
            self.config.request_timeout,
        )
        .await
    }

    pub async fn load_by_infohash(
        &self,
        infohash: &str,
    ) -> Result<Vec<(usize, String)>, EngineError> {
        self.load(
            ContentSource::Infohash(infohash.to_string()),
            self.config.request_timeout,
        )
        .await
    }

    pub async fn load_by_data(&self, data: &[u8]) -> Result<Vec<(usize, String)>, EngineError> {
        self.load(ContentSource::Raw(data.to_vec()), self.config.request_timeout)
            .await
    }

    pub async fn load_by_content_id(
        &self,
        content_id: u64,
    ) -> Result<Vec<(usize, String)>, EngineError> {
        self.load(
            ContentSource::ContentId(content_id),
            self.config.request_timeout,
        )
        .await
    }

    pub async fn play_by_url(&self, url: &str, indexes: &[usize]) -> Result<(), EngineError> {
        self.play(
            ContentSource::Torrent(url.to_string()),
            indexes,
            self.config.request_timeout,
        )
        .await
    }

    pub async fn play_by_infohash(
        &self,
        infohash: &str,
        indexes: &[usize],
    ) -> Result<(), EngineError> {
        self.play(
            ContentSource::Infohash(infohash.to_string()),
            indexes,
            self.config.request_timeout,
        )
        .await
    }

    pub async fn play_by_data(&self, data: &[u8], indexes: &[usize]) -> Result<(), EngineError> {
        self.play(
            ContentSource::Raw(data.to_vec()),
            indexes,
            self.config.request_timeout,
        )
        .await
    }

    pub async fn play_by_content_id(
        &self,
        content_id: u64,
        indexes: &[usize],
    ) -> Result<(), EngineError> {
        self.play(
            ContentSource::ContentId(content_id),
            indexes,
            self.config.request_timeout,
        )
        .await
    }

    pub async fn play_by_direct_url(
        &self,
        url: &str,
        indexes: &[usize],
    ) -> Result<(), EngineError> {
        self.play(
            ContentSource::DirectUrl(url.to_string()),
            indexes,
            self.config.request_timeout,
        )
        .await
    }

    pub async fn play_by_efile(&self, url: &str) -> Result<(), EngineError> {
        self.play(
            ContentSource::EncryptedFile(url.to_string()),
            &[],
            self.config.request_timeout,
        )
        .await
    }

    /// Fresh snapshot of the session. Faults recorded by the reader thread
    /// are raised here.
    ///
    /// # Errors
    ///
    /// - `EngineError::NotConnected` - No session
    /// - `EngineError::SendError` - A reader-side reply failed to send
    /// - `EngineError::ConnectionError` - Engine closed the connection
    pub fn status(&self) -> Result<StatusSnapshot, EngineError> {
        let session = self.session()?;
        session.take_fault()?;
        let core = session.core.lock();
        if core.closed {
            drop(core);
            return Err(session.closed_error());
        }
        Ok(core.snapshot())
    }

    /// Engine-initiated pause/resume requests received since the last call.
    pub fn take_notices(&mut self) -> Vec<EngineNotice> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let mut notices = Vec::new();
        while let Ok(notice) = session.notices.try_recv() {
            notices.push(notice);
        }
        notices
    }

    /// Files saved so far in the current playback, by index.
    pub fn saved_files(&self) -> HashMap<usize, PathBuf> {
        self.session
            .as_ref()
            .map(|session| session.core.lock().saved_files.clone())
            .unwrap_or_default()
    }

    pub fn saved_file(&self, index: usize) -> Option<PathBuf> {
        self.session
            .as_ref()
            .and_then(|session| session.core.lock().saved_files.get(&index).cloned())
    }

    pub fn infohash(&self) -> Option<String> {
        self.session
            .as_ref()
            .and_then(|session| session.core.lock().infohash.clone())
    }

    pub fn engine_version(&self) -> Option<String> {
        self.session
            .as_ref()
            .and_then(|session| session.core.lock().version.clone())
    }

    fn playback_url(&self) -> Option<String> {
        self.session
            .as_ref()
            .and_then(|session| session.core.lock().playback_url.clone())
    }

    fn send(&self, command: ClientCommand) -> Result<(), EngineError> {
        self.session()?.send(command)
    }

    /// Player started; reports duration and zero progress.
    pub fn on_start(&self, duration: Duration) -> Result<(), EngineError> {
        let Some(url) = self.playback_url() else {
            return Ok(());
        };
        self.send(ClientCommand::Duration {
            url: url.clone(),
            millis: duration.as_millis() as u64,
        })?;
        self.send(ClientCommand::Playback { url, percent: 0 })
    }

    pub fn on_pause(&self) -> Result<(), EngineError> {
        self.send(event("pause", Vec::new()))
    }

    pub fn on_resume(&self) -> Result<(), EngineError> {
        self.send(event("play", Vec::new()))
    }

    pub fn on_seek(&self, position: Duration) -> Result<(), EngineError> {
        self.send(event(
            "seek",
            vec![("position".to_string(), position.as_secs().to_string())],
        ))
    }

    pub fn on_stop(&self) -> Result<(), EngineError> {
        self.send(event("stop", Vec::new()))?;
        self.send(ClientCommand::Stop)
    }

    pub fn on_end(&self) -> Result<(), EngineError> {
        if let Some(url) = self.playback_url() {
            self.send(ClientCommand::Playback { url, percent: 100 })?;
        }
        self.on_stop()
    }

    /// Stops playback if one is running, asks the engine to shut down and
    /// releases the session. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        tracing::info!("Closing engine session");

        if session.driver.is_active() {
            let playing = session.core.lock().state.is_some_and(|state| state > 0);
            if playing && let Err(e) = self.on_stop() {
                tracing::warn!("{}", e);
            }
            if let Some(session) = &self.session
                && let Err(e) = session.send(ClientCommand::Shutdown)
            {
                tracing::warn!("{}", e);
            }
        }
        self.shutdown();
    }

    /// Stops the reader and drops the socket without notifying the engine.
    /// Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.driver.shutdown();
        }
    }
}

impl Drop for WireEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn event(name: &str, params: Vec<(String, String)>) -> ClientCommand {
    ClientCommand::Event {
        name: name.to_string(),
        params,
    }
}

/// Waits until `predicate` holds or the deadline passes. Returns `None` on
/// timeout.
async fn wait_for_view<F>(
    view: &mut watch::Receiver<EngineView>,
    deadline: Instant,
    predicate: F,
) -> Option<EngineView>
where
    F: Fn(&EngineView) -> bool,
{
    match tokio::time::timeout_at(deadline, view.wait_for(|v| predicate(v) || v.closed)).await {
        Ok(Ok(current)) => Some(current.clone()),
        Ok(Err(_)) => Some(EngineView {
            closed: true,
            ..EngineView::default()
        }),
        Err(_) => None,
    }
}

/// Names from torrent metadata may only descend below the save root.
fn is_relative_name(name: &str) -> bool {
    let mut components = Path::new(name).components().peekable();
    components.peek().is_some()
        && components.all(|component| {
            matches!(component, Component::Normal(_) | Component::CurDir)
        })
}

pub(crate) fn save_destination(root: &Path, name: &str, encrypted: bool) -> PathBuf {
    if encrypted {
        root.join(format!("{name}{ENCRYPTED_SUFFIX}"))
    } else {
        root.join(name)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn settings(root: Option<&Path>, save_encrypted: bool) -> SessionSettings {
        SessionSettings {
            host: "127.0.0.1".to_string(),
            product_key: "pfx-key".to_string(),
            save_root: root.map(Path::to_path_buf),
            save_encrypted,
        }
    }

    #[test]
    fn test_save_is_idempotent_per_index() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(Some(dir.path()), false);
        let mut core = SessionCore {
            selection: vec![0],
            files: vec![(0, "show/e01.mkv".to_string())],
            ..SessionCore::default()
        };

        let first = core.plan_save(&settings, 0, "abc", "plain").unwrap();
        let second = core.plan_save(&settings, 0, "abc", "plain").unwrap();

        let expected = dir.path().join("show/e01.mkv");
        assert_eq!(
            first,
            Some(ClientCommand::Save {
                infohash: "abc".to_string(),
                index: 0,
                path: expected.to_string_lossy().into_owned(),
            })
        );
        assert_eq!(second, None);
        assert!(dir.path().join("show").is_dir());
        assert_eq!(core.saved_files.get(&0), Some(&expected));
    }

    #[test]
    fn test_save_stays_below_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("saves");
        std::fs::create_dir(&root).unwrap();
        let settings = settings(Some(&root), false);
        let mut core = SessionCore {
            selection: vec![0, 1, 2],
            files: vec![
                (0, "../../escaped/evil.mkv".to_string()),
                (1, "/tmp/absolute.mkv".to_string()),
                (2, "show/../../up.mkv".to_string()),
            ],
            ..SessionCore::default()
        };

        for index in 0..3 {
            let command = core.plan_save(&settings, index, "abc", "plain").unwrap();
            assert_eq!(
                command,
                Some(ClientCommand::Save {
                    infohash: "abc".to_string(),
                    index,
                    path: root.join("abc").to_string_lossy().into_owned(),
                })
            );
            core.saved_files.clear();
        }
        assert!(!dir.path().join("escaped").exists());

        assert_eq!(core.plan_save(&settings, 0, "../abc", "plain").unwrap(), None);
        assert!(core.saved_files.is_empty());
    }

    #[test]
    fn test_save_skips_unselected_and_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = SessionCore {
            selection: vec![1],
            ..SessionCore::default()
        };

        let plain = settings(Some(dir.path()), false);
        assert_eq!(core.plan_save(&plain, 0, "abc", "plain").unwrap(), None);
        assert_eq!(core.plan_save(&plain, 1, "abc", "encrypted").unwrap(), None);
        assert!(core.saved_files.is_empty());

        let encrypted = settings(Some(dir.path()), true);
        let command = core.plan_save(&encrypted, 1, "abc", "encrypted").unwrap();
        assert!(command.is_some());
        assert_eq!(
            core.saved_files.get(&1),
            Some(&save_destination(dir.path(), "abc", true))
        );

        let disabled = settings(None, false);
        let mut other = SessionCore {
            selection: vec![0],
            ..SessionCore::default()
        };
        assert_eq!(other.plan_save(&disabled, 0, "abc", "plain").unwrap(), None);
    }

    #[test]
    fn test_existing_destination_recorded_without_save() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc"), b"done").unwrap();
        let mut core = SessionCore {
            selection: vec![0],
            ..SessionCore::default()
        };

        let command = core
            .plan_save(&settings(Some(dir.path()), false), 0, "abc", "plain")
            .unwrap();
        assert_eq!(command, None);
        assert_eq!(core.saved_files.get(&0), Some(&dir.path().join("abc")));
    }

    #[test]
    fn test_snapshot_projection() {
        let mut core = SessionCore::default();
        assert_eq!(core.snapshot().phase, CanonicalStatus::StartingEngine);

        core.state = Some(1);
        core.raw
            .apply("main:prebuf;45;0;0;0;120;0;8;12;0;2048;0;16")
            .unwrap();
        let snapshot = core.snapshot();
        assert_eq!(snapshot.phase, CanonicalStatus::Prebuffering);
        assert_eq!(snapshot.progress_percent, 45.0);
        assert_eq!(snapshot.download_rate_bps, 120 * 1024);
        assert_eq!(snapshot.peers, 12);
        assert_eq!(snapshot.downloaded_bytes, 2048);
    }

    /// Minimal scripted engine: greets, authenticates, then answers each
    /// client line through `respond`.
    fn spawn_engine<F>(respond: F) -> (u16, thread::JoinHandle<Vec<String>>)
    where
        F: Fn(&str) -> Vec<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut writer = socket.try_clone().unwrap();
            let mut reader = BufReader::new(socket);
            let mut received = Vec::new();
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 0 {
                let command = line.trim_end().to_string();
                line.clear();
                let replies = if command == "HELLOBG" {
                    vec!["HELLOTS version=3.1 key=k1".to_string()]
                } else if command.starts_with("READY") {
                    vec!["AUTH 1".to_string()]
                } else {
                    respond(&command)
                };
                received.push(command.clone());
                for reply in replies {
                    if writer.write_all(format!("{reply}\r\n").as_bytes()).is_err() {
                        return received;
                    }
                }
                if command == "SHUTDOWN" {
                    break;
                }
            }
            received
        });
        (port, handle)
    }

    fn local_config(port: u16) -> WireEngineConfig {
        WireEngineConfig {
            port,
            request_timeout: Duration::from_secs(2),
            ..WireEngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_load_play_close() {
        let (port, server) = spawn_engine(|command| {
            if let Some(rest) = command.strip_prefix("LOADASYNC ") {
                let id = rest.split(' ').next().unwrap_or("0");
                vec![format!(
                    "LOADRESP {id} {{\"status\": 1, \"infohash\": \"ab\", \"files\": [[\"x.mkv\", 0]]}}"
                )]
            } else if command.starts_with("START ") {
                vec![
                    "STATE 1".to_string(),
                    "STATUS main:prebuf;50;0;0;0;10;0;1;3;0;100;0;0".to_string(),
                    "START http://127.0.0.1:6878/content/ab/0.0 stream=0".to_string(),
                ]
            } else {
                Vec::new()
            }
        });

        let mut engine =
            WireEngine::with_strategy(local_config(port), LaunchStrategy::Remote);
        engine.connect(Duration::from_secs(2)).await.unwrap();
        assert_eq!(engine.engine_version().as_deref(), Some("3.1"));

        let files = engine.load_by_data(b"d4:infodee").await.unwrap();
        assert_eq!(files, vec![(0, "x.mkv".to_string())]);
        assert_eq!(engine.infohash().as_deref(), Some("ab"));

        engine.play_by_data(b"d4:infodee", &[0]).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let snapshot = loop {
            let snapshot = engine.status().unwrap();
            if snapshot.playback_url.is_some() || Instant::now() > deadline {
                break snapshot;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        assert_eq!(
            snapshot.playback_url.as_deref(),
            Some("http://127.0.0.1:6878/content/ab/0.0")
        );
        assert_eq!(snapshot.phase, CanonicalStatus::Prebuffering);

        engine.close();
        engine.close();
        assert!(!engine.is_connected());

        let received = server.join().unwrap();
        assert_eq!(received[0], "HELLOBG");
        assert!(received[1].starts_with("READY key=n51LvQoTlJzNGaFxseRK-"));
        assert!(received.iter().any(|line| line.starts_with("LOADASYNC ")));
        assert!(received.iter().any(|line| line == "START RAW ZDQ6aW5mb2RlZQ== 0 0 0 0"));
        let tail: Vec<_> = received.iter().rev().take(3).rev().cloned().collect();
        assert_eq!(tail, vec!["EVENT stop", "STOP", "SHUTDOWN"]);
    }

    #[tokio::test]
    async fn test_load_timeout_is_bounded() {
        let (port, _server) = spawn_engine(|_| Vec::new());
        let mut engine =
            WireEngine::with_strategy(local_config(port), LaunchStrategy::Remote);
        engine.connect(Duration::from_secs(2)).await.unwrap();

        let timeout = Duration::from_millis(300);
        let started = Instant::now();
        let result = engine
            .load(ContentSource::Infohash("ab".to_string()), timeout)
            .await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(EngineError::Timeout { .. })));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + engine.config().poll_interval + Duration::from_millis(200));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_load_error_and_play_failure() {
        let (port, _server) = spawn_engine(|command| {
            if let Some(rest) = command.strip_prefix("LOADASYNC ") {
                let id = rest.split(' ').next().unwrap_or("0");
                vec![format!("LOADRESP {id} {{\"status\": 100, \"message\": \"bad torrent\"}}")]
            } else if command.starts_with("START ") {
                vec!["STATUS main:err;3;cannot start".to_string()]
            } else {
                Vec::new()
            }
        });
        let mut engine =
            WireEngine::with_strategy(local_config(port), LaunchStrategy::Remote);
        engine.connect(Duration::from_secs(2)).await.unwrap();

        let load = engine.load_by_infohash("ab").await;
        assert!(matches!(
            load,
            Err(EngineError::MetadataLoadFailed { reason }) if reason == "bad torrent"
        ));

        let play = engine.play_by_infohash("ab", &[0]).await;
        assert!(matches!(
            play,
            Err(EngineError::PlaybackStartFailed { reason }) if reason == "cannot start"
        ));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_connect_fails_without_engine() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut engine = WireEngine::with_strategy(
            local_config(port),
            LaunchStrategy::Unavailable {
                reason: "test".to_string(),
            },
        );
        let result = engine.connect(Duration::from_millis(300)).await;
        assert!(matches!(result, Err(EngineError::ExecutableNotFound { .. })));

        let mut remote = WireEngine::with_strategy(local_config(port), LaunchStrategy::Remote);
        let result = remote.connect(Duration::from_millis(300)).await;
        assert!(matches!(result, Err(EngineError::ConnectionError { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_launches_engine_once() {
        use std::os::unix::fs::PermissionsExt;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let launches = dir.path().join("launches");
        let program = dir.path().join("engine");
        std::fs::write(
            &program,
            format!("#!/bin/sh\necho launched >> '{}'\n", launches.display()),
        )
        .unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = WireEngineConfig {
            poll_interval: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(50),
            ..local_config(port)
        };
        let mut engine = WireEngine::with_strategy(
            config,
            LaunchStrategy::Desktop {
                program,
                args: Vec::new(),
            },
        );
        let result = engine.connect(Duration::from_millis(400)).await;
        assert!(matches!(result, Err(EngineError::ConnectionError { .. })));

        let deadline = Instant::now() + Duration::from_secs(2);
        while !launches.exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let log = std::fs::read_to_string(&launches).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_engine_error_state_fails_playback() {
        let (port, _server) = spawn_engine(|command| {
            if command.starts_with("START ") {
                vec!["STATE 6".to_string()]
            } else {
                Vec::new()
            }
        });
        let mut engine =
            WireEngine::with_strategy(local_config(port), LaunchStrategy::Remote);
        engine.connect(Duration::from_secs(2)).await.unwrap();

        let play = engine.play_by_infohash("ab", &[0]).await;
        assert!(matches!(play, Err(EngineError::PlaybackStartFailed { .. })));

        let snapshot = engine.status().unwrap();
        assert_eq!(
            snapshot.error_message.as_deref(),
            Some("Engine entered the error state")
        );
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_save_path() {
        let config = WireEngineConfig {
            save_path: Some(PathBuf::from("/nonexistent/seedcast/saves")),
            ..local_config(1)
        };
        let mut engine = WireEngine::with_strategy(config, LaunchStrategy::Remote);
        assert!(matches!(
            engine.connect(Duration::from_millis(100)).await,
            Err(EngineError::InvalidSavePath { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_requires_connection() {
        let engine = WireEngine::with_strategy(local_config(1), LaunchStrategy::Remote);
        assert!(matches!(engine.status(), Err(EngineError::NotConnected)));
        assert!(engine.saved_files().is_empty());
    }
}
