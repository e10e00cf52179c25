//! Wire protocol messages
//!
//! Server lines decode into the tagged [`ServerMessage`]; client commands are
//! built as [`ClientCommand`] values and rendered through `Display`.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use super::error::EngineError;

/// Discriminant of a server message, used to key listener registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Status,
    State,
    Auth,
    Start,
    CanSave,
    Event,
    Resume,
    Pause,
    HelloTs,
    LoadResp,
    Shutdown,
    Other,
}

/// Flags trailing a `START`/`PLAY` announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartFlags {
    pub is_ad: bool,
    pub is_live: bool,
}

/// Decoded server-to-client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Status(String),
    State(i32),
    Auth(i32),
    Start {
        url: String,
        flags: StartFlags,
    },
    CanSave {
        index: usize,
        infohash: String,
        format: String,
    },
    Event {
        name: String,
        params: Vec<(String, String)>,
    },
    Resume,
    Pause,
    HelloTs {
        key: Option<String>,
        version: Option<String>,
    },
    LoadResp {
        correlation_id: u32,
        body: String,
    },
    Shutdown,
    Other {
        command: String,
        params: String,
    },
}

impl ServerMessage {
    /// Decodes one framed line.
    ///
    /// # Errors
    ///
    /// - `EngineError::ProtocolDecodeError` - Known command with malformed parameters
    pub fn parse(line: &str) -> Result<Self, EngineError> {
        let (command, params) = line.split_once(' ').unwrap_or((line, ""));

        let message = match command {
            "STATUS" => Self::Status(params.to_string()),
            "STATE" => Self::State(parse_int(line, params)?),
            "AUTH" => Self::Auth(parse_int(line, params)?),
            "START" | "PLAY" => {
                let mut parts = params.split(' ').filter(|p| !p.is_empty());
                let url = parts
                    .next()
                    .ok_or_else(|| EngineError::decode(line, "missing playback url"))?
                    .to_string();
                let mut flags = StartFlags::default();
                for part in parts {
                    match part {
                        "ad=1" => flags.is_ad = true,
                        "stream=1" => flags.is_live = true,
                        _ => {}
                    }
                }
                Self::Start { url, flags }
            }
            "EVENT" => parse_event(line, params)?,
            "RESUME" => Self::Resume,
            "PAUSE" => Self::Pause,
            "HELLOTS" => {
                let mut key = None;
                let mut version = None;
                for (name, value) in parse_params(params) {
                    match name.as_str() {
                        "key" => key = Some(value),
                        "version" => version = Some(value),
                        _ => {}
                    }
                }
                Self::HelloTs { key, version }
            }
            "LOADRESP" => {
                let (id, rest) = params.split_once(' ').unwrap_or((params, ""));
                let correlation_id = id
                    .parse()
                    .map_err(|_| EngineError::decode(line, "invalid correlation id"))?;
                let body = rest
                    .find('{')
                    .map(|start| rest[start..].to_string())
                    .ok_or_else(|| EngineError::decode(line, "missing json body"))?;
                Self::LoadResp {
                    correlation_id,
                    body,
                }
            }
            "SHUTDOWN" => Self::Shutdown,
            _ => Self::Other {
                command: command.to_string(),
                params: params.to_string(),
            },
        };
        Ok(message)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Status(_) => EventKind::Status,
            Self::State(_) => EventKind::State,
            Self::Auth(_) => EventKind::Auth,
            Self::Start { .. } => EventKind::Start,
            Self::CanSave { .. } => EventKind::CanSave,
            Self::Event { .. } => EventKind::Event,
            Self::Resume => EventKind::Resume,
            Self::Pause => EventKind::Pause,
            Self::HelloTs { .. } => EventKind::HelloTs,
            Self::LoadResp { .. } => EventKind::LoadResp,
            Self::Shutdown => EventKind::Shutdown,
            Self::Other { .. } => EventKind::Other,
        }
    }
}

fn parse_int(line: &str, params: &str) -> Result<i32, EngineError> {
    params
        .trim()
        .parse()
        .map_err(|_| EngineError::decode(line, "expected integer parameter"))
}

fn parse_event(line: &str, params: &str) -> Result<ServerMessage, EngineError> {
    let (name, rest) = params.split_once(' ').unwrap_or((params, ""));
    let pairs = parse_params(rest);

    if name != "cansave" {
        return Ok(ServerMessage::Event {
            name: name.to_string(),
            params: pairs,
        });
    }

    let lookup = |key: &str| {
        pairs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| EngineError::decode(line, format!("cansave without {key}")))
    };

    let index = lookup("index")?
        .parse()
        .map_err(|_| EngineError::decode(line, "cansave index is not a number"))?;

    Ok(ServerMessage::CanSave {
        index,
        infohash: lookup("infohash")?,
        format: lookup("format")?,
    })
}

fn parse_params(params: &str) -> Vec<(String, String)> {
    params
        .split(' ')
        .filter_map(|part| part.split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// JSON body of a `LOADRESP` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadResponse {
    pub status: i64,
    #[serde(default)]
    pub infohash: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub files: Vec<(String, i64)>,
}

/// Engine status code marking a failed load.
pub const LOAD_STATUS_ERROR: i64 = 100;

impl LoadResponse {
    /// Decodes a `LOADRESP` body.
    ///
    /// # Errors
    ///
    /// - `EngineError::ProtocolDecodeError` - Body is not the expected JSON
    pub fn parse(body: &str) -> Result<Self, EngineError> {
        serde_json::from_str(body).map_err(|e| EngineError::decode(body, e.to_string()))
    }

    /// Ordered `(index, name)` list, or the engine's load error.
    ///
    /// # Errors
    ///
    /// - `EngineError::MetadataLoadFailed` - Status 100 with the engine's message
    pub fn into_files(self) -> Result<Vec<(usize, String)>, EngineError> {
        if self.status == LOAD_STATUS_ERROR {
            return Err(EngineError::MetadataLoadFailed {
                reason: self
                    .message
                    .unwrap_or_else(|| "engine rejected content".to_string()),
            });
        }
        if self.status <= 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .files
            .into_iter()
            .filter_map(|(name, index)| {
                let index = usize::try_from(index).ok()?;
                let name = urlencoding::decode(&name)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or(name);
                Some((index, name))
            })
            .collect())
    }
}

/// Content handed to `LOADASYNC` or `START`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    Torrent(String),
    Infohash(String),
    Raw(Vec<u8>),
    ContentId(u64),
    DirectUrl(String),
    EncryptedFile(String),
}

impl ContentSource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Torrent(_) => "TORRENT",
            Self::Infohash(_) => "INFOHASH",
            Self::Raw(_) => "RAW",
            Self::ContentId(_) => "PID",
            Self::DirectUrl(_) => "URL",
            Self::EncryptedFile(_) => "EFILE",
        }
    }

    fn payload(&self) -> String {
        match self {
            Self::Torrent(value)
            | Self::Infohash(value)
            | Self::DirectUrl(value)
            | Self::EncryptedFile(value) => value.clone(),
            Self::Raw(data) => BASE64.encode(data),
            Self::ContentId(id) => id.to_string(),
        }
    }
}

/// Partner identifiers appended to load and start commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartnerIds {
    pub developer_id: u32,
    pub affiliate_id: u32,
    pub zone_id: u32,
    pub stream_id: u32,
}

/// Client-to-server command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    HelloBg,
    Ready {
        key: Option<String>,
    },
    LoadAsync {
        correlation_id: u32,
        source: ContentSource,
        ids: PartnerIds,
    },
    Start {
        source: ContentSource,
        indexes: Vec<usize>,
        ids: PartnerIds,
    },
    Stop,
    Shutdown,
    Save {
        infohash: String,
        index: usize,
        path: String,
    },
    Playback {
        url: String,
        percent: u8,
    },
    Duration {
        url: String,
        millis: u64,
    },
    Event {
        name: String,
        params: Vec<(String, String)>,
    },
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HelloBg => f.write_str("HELLOBG"),
            Self::Ready { key: Some(key) } => write!(f, "READY key={key}"),
            Self::Ready { key: None } => f.write_str("READY"),
            Self::LoadAsync {
                correlation_id,
                source: source @ ContentSource::ContentId(_),
                ..
            } => write!(f, "LOADASYNC {correlation_id} PID {}", source.payload()),
            Self::LoadAsync {
                correlation_id,
                source,
                ids,
            } => write!(
                f,
                "LOADASYNC {correlation_id} {} {} {} {} {}",
                source.kind(),
                source.payload(),
                ids.developer_id,
                ids.affiliate_id,
                ids.zone_id
            ),
            Self::Start {
                source,
                indexes,
                ids,
            } => {
                let indexes = indexes
                    .iter()
                    .map(|index| index.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "START {} {}", source.kind(), source.payload())?;
                match source {
                    ContentSource::EncryptedFile(_) => Ok(()),
                    ContentSource::ContentId(_) => write!(f, " {indexes}"),
                    ContentSource::Torrent(_) => write!(
                        f,
                        " {indexes} {} {} {} {}",
                        ids.developer_id, ids.affiliate_id, ids.zone_id, ids.stream_id
                    ),
                    _ => write!(
                        f,
                        " {indexes} {} {} {}",
                        ids.developer_id, ids.affiliate_id, ids.zone_id
                    ),
                }
            }
            Self::Stop => f.write_str("STOP"),
            Self::Shutdown => f.write_str("SHUTDOWN"),
            Self::Save {
                infohash,
                index,
                path,
            } => write!(
                f,
                "SAVE infohash={infohash} index={index} path={}",
                quote_path(path)
            ),
            Self::Playback { url, percent } => write!(f, "PLAYBACK {url} {percent}"),
            Self::Duration { url, millis } => write!(f, "DUR {url} {millis}"),
            Self::Event { name, params } => {
                f.write_str("EVENT ")?;
                f.write_str(name)?;
                for (key, value) in params {
                    write!(f, " {key}={value}")?;
                }
                Ok(())
            }
        }
    }
}

/// Percent-encodes a path while keeping `/` separators readable.
fn quote_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
