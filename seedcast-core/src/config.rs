//! Engine and streaming settings.
//!
//! Defaults match a stock local engine install. `from_env` applies
//! `SEEDCAST_*` overrides on top of them.

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::wire::handshake::DEFAULT_PRODUCT_KEY;

/// Settings for both engine backends and the stream controller.
#[derive(Debug, Clone, Default)]
pub struct SeedcastConfig {
    pub wire: WireEngineConfig,
    pub http: HttpEngineConfig,
    pub stream: StreamConfig,
}

/// Wire protocol engine connection settings.
#[derive(Debug, Clone)]
pub struct WireEngineConfig {
    /// Engine host; only the default loopback host is ever launched locally
    pub host: String,
    pub port: u16,
    /// Key used to answer the engine's `HELLOTS` challenge
    pub product_key: String,
    /// Root directory for saved files (None = saving disabled)
    pub save_path: Option<PathBuf>,
    /// Also save files the engine offers in encrypted form
    pub save_encrypted: bool,
    pub developer_id: u32,
    pub affiliate_id: u32,
    pub zone_id: u32,
    pub stream_id: u32,
    pub connect_timeout: Duration,
    /// Bound for load and playback-start waits
    pub request_timeout: Duration,
    /// Connect retry cadence and reader socket timeout
    pub poll_interval: Duration,
    /// Explicit engine executable, bypassing discovery
    pub engine_path: Option<PathBuf>,
}

impl WireEngineConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 62062;

    /// True when the engine runs on this machine and may be launched.
    pub fn is_local(&self) -> bool {
        self.host == Self::DEFAULT_HOST
    }
}

impl Default for WireEngineConfig {
    fn default() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
            product_key: DEFAULT_PRODUCT_KEY.to_string(),
            save_path: None,
            save_encrypted: false,
            developer_id: 0,
            affiliate_id: 0,
            zone_id: 0,
            stream_id: 0,
            connect_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(100),
            engine_path: None,
        }
    }
}

/// HTTP engine process settings.
#[derive(Debug, Clone)]
pub struct HttpEngineConfig {
    /// Engine executable (None = search PATH)
    pub binary_path: Option<PathBuf>,
    pub bind_host: String,
    pub bind_port: u16,
    pub download_path: PathBuf,
    pub connections_limit: Option<u32>,
    /// Download limit in KiB/s (None = unlimited)
    pub download_kbps: Option<u32>,
    /// Upload limit in KiB/s (None = unlimited)
    pub upload_kbps: Option<u32>,
    pub listen_port: u16,
    pub use_random_port: bool,
    pub keep_files: bool,
    pub enable_utp: bool,
    pub enable_dht: bool,
    pub trackers: Vec<String>,
    pub dht_routers: Vec<String>,
    /// Engine exits after this long without a client (None = never)
    pub max_idle: Option<Duration>,
    /// Time allowed for `/status` to answer after spawn
    pub startup_timeout: Duration,
    pub request_timeout: Duration,
    pub debug_alerts: bool,
}

impl HttpEngineConfig {
    pub const BINARY_NAME: &'static str = "torrent2http";
    pub const STATE_FILE: &'static str = ".state";
}

impl Default for HttpEngineConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            bind_host: "127.0.0.1".to_string(),
            bind_port: 5001,
            download_path: std::env::temp_dir().join("seedcast"),
            connections_limit: None,
            download_kbps: None,
            upload_kbps: None,
            listen_port: 6881,
            use_random_port: false,
            keep_files: false,
            enable_utp: true,
            enable_dht: true,
            trackers: Vec::new(),
            dht_routers: Vec::new(),
            max_idle: None,
            startup_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            debug_alerts: false,
        }
    }
}

/// Stream controller cadence and readiness settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Status poll cadence during buffering and playback
    pub poll_interval: Duration,
    /// Time the player gets to report playing before the loop gives up
    pub playback_start_grace: Duration,
    /// Delay after stop so final player events reach the engine
    pub stop_settle: Duration,
    /// HTTP backend readiness threshold (0 = ready once downloading)
    pub pre_buffer_bytes: u64,
    /// Bound for waiting on torrent metadata when listing files
    pub metadata_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            playback_start_grace: Duration::from_secs(5),
            stop_settle: Duration::from_secs(1),
            pre_buffer_bytes: 0,
            metadata_timeout: Duration::from_secs(60),
        }
    }
}

impl SeedcastConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Wire engine overrides
        if let Ok(host) = std::env::var("SEEDCAST_ENGINE_HOST") {
            config.wire.host = host;
        }

        if let Ok(port) = std::env::var("SEEDCAST_ENGINE_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            config.wire.port = port;
        }

        if let Ok(path) = std::env::var("SEEDCAST_ENGINE_PATH") {
            config.wire.engine_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("SEEDCAST_SAVE_PATH") {
            config.wire.save_path = Some(PathBuf::from(path));
        }

        if let Ok(timeout) = std::env::var("SEEDCAST_CONNECT_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.wire.connect_timeout = Duration::from_secs(seconds);
        }

        // HTTP engine overrides
        if let Ok(path) = std::env::var("SEEDCAST_HTTP_ENGINE_PATH") {
            config.http.binary_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("SEEDCAST_DOWNLOAD_PATH") {
            config.http.download_path = PathBuf::from(path);
        }

        if let Ok(port) = std::env::var("SEEDCAST_LISTEN_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            config.http.listen_port = port;
        }

        if let Ok(keep) = std::env::var("SEEDCAST_KEEP_FILES") {
            config.http.keep_files = keep.parse().unwrap_or(false);
        }

        // Stream overrides
        if let Ok(megabytes) = std::env::var("SEEDCAST_PRE_BUFFER_MB")
            && let Ok(megabytes) = megabytes.parse::<u64>()
        {
            config.stream.pre_buffer_bytes = megabytes * 1024 * 1024;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = SeedcastConfig::default();

        assert_eq!(config.wire.host, "127.0.0.1");
        assert_eq!(config.wire.port, 62062);
        assert!(config.wire.is_local());
        assert_eq!(config.wire.request_timeout, Duration::from_secs(20));
        assert_eq!(config.wire.poll_interval, Duration::from_millis(100));
        assert_eq!(config.http.bind_port, 5001);
        assert_eq!(config.http.listen_port, 6881);
        assert_eq!(config.http.startup_timeout, Duration::from_secs(5));
        assert_eq!(config.stream.poll_interval, Duration::from_millis(500));
        assert_eq!(config.stream.playback_start_grace, Duration::from_secs(5));
        assert_eq!(config.stream.stop_settle, Duration::from_secs(1));
        assert_eq!(config.stream.pre_buffer_bytes, 0);
    }

    #[test]
    fn test_remote_host_is_not_local() {
        let config = WireEngineConfig {
            host: "192.168.1.20".to_string(),
            ..WireEngineConfig::default()
        };
        assert!(!config.is_local());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("SEEDCAST_ENGINE_PORT", "62100");
            std::env::set_var("SEEDCAST_SAVE_PATH", "/tmp/seedcast-saves");
            std::env::set_var("SEEDCAST_CONNECT_TIMEOUT", "3");
            std::env::set_var("SEEDCAST_LISTEN_PORT", "7000");
            std::env::set_var("SEEDCAST_PRE_BUFFER_MB", "2");
        }

        let config = SeedcastConfig::from_env();

        assert_eq!(config.wire.port, 62100);
        assert_eq!(
            config.wire.save_path,
            Some(PathBuf::from("/tmp/seedcast-saves"))
        );
        assert_eq!(config.wire.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.http.listen_port, 7000);
        assert_eq!(config.stream.pre_buffer_bytes, 2 * 1024 * 1024);

        // Cleanup
        unsafe {
            std::env::remove_var("SEEDCAST_ENGINE_PORT");
            std::env::remove_var("SEEDCAST_SAVE_PATH");
            std::env::remove_var("SEEDCAST_CONNECT_TIMEOUT");
            std::env::remove_var("SEEDCAST_LISTEN_PORT");
            std::env::remove_var("SEEDCAST_PRE_BUFFER_MB");
        }
    }
}
