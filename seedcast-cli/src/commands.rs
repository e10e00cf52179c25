//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand, ValueEnum};
use seedcast_core::config::SeedcastConfig;
use seedcast_core::status::{LoggingSink, ProgressSink, human_size};
use seedcast_core::stream::{
    AbortHandle, HttpBackend, PlayerKind, ProcessPlayer, StreamBackend, StreamController,
    StreamState, WireBackend,
};
use seedcast_core::torrent::{MagnetParser, TorrentDescriptor};
use seedcast_core::{SeedcastError, StreamError};

/// Engine used to fetch and serve the torrent
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum BackendChoice {
    /// Wire protocol engine reached over TCP
    #[default]
    Ace,
    /// torrent2http child process
    Http,
}

/// Options shared by the commands that start an engine
#[derive(Debug, Args)]
pub struct EngineArgs {
    /// Engine backend
    #[arg(short, long, value_enum, default_value_t = BackendChoice::Ace)]
    backend: BackendChoice,
    /// Directory for downloads (HTTP engine) or saved files (wire engine)
    #[arg(long)]
    save_path: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show torrent metadata without starting an engine
    Info {
        /// Magnet link, URL or path to a torrent file
        source: String,
    },
    /// List the files the engine considers playable
    List {
        /// Magnet link, URL or path to a torrent file
        source: String,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Buffer a file and play it
    Play {
        /// Magnet link, URL or path to a torrent file
        source: String,
        /// Index of the file to play (default: first playable)
        #[arg(short, long)]
        file: Option<usize>,
        /// Media player to launch
        #[arg(short, long, value_enum, default_value_t = PlayerKind::Mpv)]
        player: PlayerKind,
        /// Megabytes to buffer before starting the player (HTTP engine)
        #[arg(long, default_value = "0")]
        pre_buffer_mb: u64,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let result = match command {
        Commands::Info { source } => show_info(source).await,
        Commands::List { source, engine } => list_files(source, engine).await,
        Commands::Play {
            source,
            file,
            player,
            pre_buffer_mb,
            engine,
        } => play(source, file, player, pre_buffer_mb, engine).await,
    };

    result.map_err(|e| {
        if let SeedcastError::Stream(stream) = &e {
            tracing::debug!("Engine message id {}", stream.message_id());
        }
        let message = e.user_message();
        anyhow::Error::new(e).context(message)
    })
}

fn build_config(engine: &EngineArgs, pre_buffer_mb: u64) -> SeedcastConfig {
    let mut config = SeedcastConfig::from_env();
    if let Some(path) = &engine.save_path {
        config.wire.save_path = Some(path.clone());
        config.http.download_path = path.clone();
    }
    config.stream.pre_buffer_bytes = pre_buffer_mb * 1024 * 1024;
    config
}

/// Print torrent metadata
///
/// # Errors
/// - `SeedcastError::Torrent` - Source could not be resolved or decoded
pub async fn show_info(source: String) -> seedcast_core::Result<()> {
    if MagnetParser::is_magnet(&source) {
        let magnet = MagnetParser::parse(&source)?;
        println!(
            "Magnet: {}",
            magnet.display_name.as_deref().unwrap_or("(unnamed)")
        );
        println!("  Info hash: {}", magnet.info_hash);
        for tracker in &magnet.trackers {
            println!("  Tracker: {tracker}");
        }
        println!("  File list needs an engine, try 'seedcast list'");
        return Ok(());
    }

    let descriptor = TorrentDescriptor::from_source(&source);
    println!("Torrent: {}", descriptor.name().await?);
    println!("  Info hash: {}", descriptor.info_hash().await?);

    if let Some(announce) = descriptor.announce().await? {
        println!("  Tracker: {announce}");
    }
    if let Some(created_by) = descriptor.created_by().await? {
        println!("  Created by: {created_by}");
    }
    if let Some(date) = descriptor.creation_date().await? {
        println!("  Created: {}", date.format("%Y-%m-%d %H:%M"));
    }
    if descriptor.is_private().await? {
        println!("  Private torrent");
    }

    println!("{:-<60}", "");
    for file in descriptor.files().await? {
        println!("{:>4}  {:>10}  {}", file.index, human_size(file.length), file.path);
    }

    Ok(())
}

/// List playable files through the chosen engine
///
/// # Errors
/// - `SeedcastError::Stream` - Engine failed to start or load the torrent
/// - `SeedcastError::Torrent` - Source could not be resolved
pub async fn list_files(source: String, engine: EngineArgs) -> seedcast_core::Result<()> {
    let config = build_config(&engine, 0);
    let mut descriptor = TorrentDescriptor::from_source(&source);

    let files = match engine.backend {
        BackendChoice::Ace => {
            let backend = WireBackend::new(config.wire);
            StreamController::new(backend, config.stream)
                .list(&mut descriptor)
                .await?
        }
        BackendChoice::Http => {
            let backend = HttpBackend::new(config.http, &config.stream);
            StreamController::new(backend, config.stream)
                .list(&mut descriptor)
                .await?
        }
    };

    for file in files {
        if file.length > 0 {
            println!("{:>4}  {:>10}  {}", file.index, human_size(file.length), file.path);
        } else {
            println!("{:>4}  {:>10}  {}", file.index, "-", file.path);
        }
    }
    Ok(())
}

/// Stream one file into the player
///
/// # Errors
/// - `SeedcastError::Stream` - Engine failure during buffering or playback
/// - `SeedcastError::Player` - Player binary missing or failed to start
pub async fn play(
    source: String,
    file: Option<usize>,
    player: PlayerKind,
    pre_buffer_mb: u64,
    engine: EngineArgs,
) -> seedcast_core::Result<()> {
    let config = build_config(&engine, pre_buffer_mb);
    let descriptor = TorrentDescriptor::from_source(&source);

    match engine.backend {
        BackendChoice::Ace => {
            let backend = WireBackend::new(config.wire);
            run_stream(backend, config.stream, descriptor, file, player).await
        }
        BackendChoice::Http => {
            let backend = HttpBackend::new(config.http, &config.stream);
            run_stream(backend, config.stream, descriptor, file, player).await
        }
    }
}

async fn run_stream<B: StreamBackend>(
    backend: B,
    stream: seedcast_core::config::StreamConfig,
    mut descriptor: TorrentDescriptor,
    file: Option<usize>,
    kind: PlayerKind,
) -> seedcast_core::Result<()> {
    let abort = AbortHandle::new();
    let sink: Arc<dyn ProgressSink> = Arc::new(LoggingSink::new());
    let mut controller = StreamController::new(backend, stream)
        .with_sinks(sink.clone(), sink)
        .with_abort_handle(abort.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping stream");
            abort.abort();
        }
    });

    let mut player = ProcessPlayer::new(kind);
    let outcome = controller
        .play(&mut player, &mut descriptor, file)
        .await
        .inspect_err(|e| {
            if let SeedcastError::Stream(StreamError { check_settings, .. }) = e
                && *check_settings
            {
                tracing::warn!("Engine reported a configuration problem");
            }
        })?;

    match outcome.state {
        StreamState::Aborted => println!("Stream aborted"),
        StreamState::Ended => println!("Playback finished"),
        _ => println!("Playback stopped"),
    }
    for path in outcome.saved_files {
        println!("Saved: {}", path.display());
    }
    Ok(())
}
