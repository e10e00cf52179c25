//! Stream sessions against a scripted wire protocol engine.
//!
//! The engine runs on a plain thread with a blocking socket and answers
//! every client line through a closure, recording what it received.

mod common;

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use common::{FakePlayer, stream_config};
use seedcast_core::config::WireEngineConfig;
use seedcast_core::engine::wire::{LaunchStrategy, WireEngine};
use seedcast_core::stream::{StreamController, StreamErrorKind, StreamState, WireBackend};
use seedcast_core::torrent::TorrentDescriptor;
use seedcast_core::{SeedcastError, StreamError};

const PAYLOAD: &[u8] = b"d4:infod6:lengthi1000e4:name5:x.mkv12:piece lengthi16384eee";
const PLAYBACK_URL: &str = "http://127.0.0.1:6878/content/ab/0.0";

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

/// Engine that loads one file and starts downloading it right away.
fn healthy_engine(command: &str) -> Vec<String> {
    if let Some(rest) = command.strip_prefix("LOADASYNC ") {
        let id = rest.split(' ').next().unwrap_or("0");
        vec![format!(
            "LOADRESP {id} {{\"status\": 1, \"infohash\": \"ab\", \"files\": [[\"x.mkv\", 0]]}}"
        )]
    } else if command.starts_with("START ") {
        vec![
            "STATE 2".to_string(),
            "STATUS main:dl;40;0;300;0;9;20;0;4096;0;64".to_string(),
            format!("START {PLAYBACK_URL} stream=0"),
        ]
    } else {
        Vec::new()
    }
}

fn backend(port: u16) -> WireBackend {
    let config = WireEngineConfig {
        port,
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        ..WireEngineConfig::default()
    };
    WireBackend::with_engine(WireEngine::with_strategy(config, LaunchStrategy::Remote))
}

#[tokio::test]
async fn test_play_until_media_ends() {
    let (port, server) = spawn_engine(healthy_engine);
    let mut controller = StreamController::new(backend(port), stream_config(0));
    let mut player = FakePlayer::new(3);
    let mut descriptor = TorrentDescriptor::from_bytes(PAYLOAD.to_vec());

    let outcome = controller
        .play(&mut player, &mut descriptor, None)
        .await
        .unwrap();

    assert_eq!(outcome.state, StreamState::Ended);
    assert!(outcome.saved_files.is_empty());
    assert_eq!(controller.state(), StreamState::Ended);
    assert_eq!(player.played.len(), 1);
    assert_eq!(player.played[0].url, PLAYBACK_URL);
    assert_eq!(player.played[0].title.as_deref(), Some("x.mkv"));

    let received = server.join().unwrap();
    assert!(received.iter().any(|line| line.starts_with("START RAW ")));
    assert!(received.contains(&format!("DUR {PLAYBACK_URL} 0")));
    assert!(received.contains(&format!("PLAYBACK {PLAYBACK_URL} 100")));
    assert_eq!(received.last().map(String::as_str), Some("SHUTDOWN"));
}

#[tokio::test]
async fn test_unknown_file_index_fails_and_releases() {
    let (port, server) = spawn_engine(healthy_engine);
    let mut controller = StreamController::new(backend(port), stream_config(0));
    let mut player = FakePlayer::new(3);
    let mut descriptor = TorrentDescriptor::from_bytes(PAYLOAD.to_vec());

    let result = controller
        .play(&mut player, &mut descriptor, Some(5))
        .await;

    let Err(SeedcastError::Stream(error)) = result else {
        panic!("expected a stream error, got {result:?}");
    };
    assert_eq!(error.kind, StreamErrorKind::InvalidFileIndex);
    assert_eq!(error.message_id(), 33048);
    assert_eq!(controller.state(), StreamState::Failed);
    assert!(player.played.is_empty());

    let received = server.join().unwrap();
    assert!(!received.iter().any(|line| line.starts_with("START ")));
    assert_eq!(received.last().map(String::as_str), Some("SHUTDOWN"));
}

#[tokio::test]
async fn test_engine_error_during_start() {
    let (port, server) = spawn_engine(|command| {
        if let Some(rest) = command.strip_prefix("LOADASYNC ") {
            let id = rest.split(' ').next().unwrap_or("0");
            vec![format!(
                "LOADRESP {id} {{\"status\": 1, \"infohash\": \"ab\", \"files\": [[\"x.mkv\", 0]]}}"
            )]
        } else if command.starts_with("START ") {
            vec!["STATUS main:err;3;disk full".to_string()]
        } else {
            Vec::new()
        }
    });
    let mut controller = StreamController::new(backend(port), stream_config(0));
    let mut player = FakePlayer::new(3);
    let mut descriptor = TorrentDescriptor::from_bytes(PAYLOAD.to_vec());

    let result = controller
        .play(&mut player, &mut descriptor, None)
        .await;

    assert!(matches!(
        result,
        Err(SeedcastError::Stream(StreamError {
            kind: StreamErrorKind::PlaybackFailed,
            ..
        }))
    ));
    assert!(player.played.is_empty());
    server.join().unwrap();
}

#[tokio::test]
async fn test_list_filters_descriptor_files() {
    let (port, server) = spawn_engine(healthy_engine);
    let mut controller = StreamController::new(backend(port), stream_config(0));
    let mut descriptor = TorrentDescriptor::from_bytes(PAYLOAD.to_vec());

    let files = controller.list(&mut descriptor).await.unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].index, 0);
    assert_eq!(files[0].path, "x.mkv");
    assert_eq!(files[0].length, 1000);
    assert_eq!(controller.state(), StreamState::Stopped);

    let received = server.join().unwrap();
    assert!(!received.iter().any(|line| line.starts_with("START ")));
    assert_eq!(received.last().map(String::as_str), Some("SHUTDOWN"));
}

#[tokio::test]
async fn test_magnet_loads_by_infohash() {
    let (port, server) = spawn_engine(healthy_engine);
    let mut controller = StreamController::new(backend(port), stream_config(0));
    let mut descriptor = TorrentDescriptor::from_url(
        "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567",
    );

    let files = controller.list(&mut descriptor).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].length, 0);

    let received = server.join().unwrap();
    let load = received
        .iter()
        .find(|line| line.starts_with("LOADASYNC "))
        .unwrap();
    assert!(load.contains("INFOHASH 0123456789abcdef0123456789abcdef01234567"));
}

#[tokio::test]
async fn test_engine_error_state_fails_the_stream() {
    let (port, server) = spawn_engine(|command| {
        if let Some(rest) = command.strip_prefix("LOADASYNC ") {
            let id = rest.split(' ').next().unwrap_or("0");
            vec![format!(
                "LOADRESP {id} {{\"status\": 1, \"infohash\": \"ab\", \"files\": [[\"x.mkv\", 0]]}}"
            )]
        } else if command.starts_with("START ") {
            vec!["STATE 6".to_string()]
        } else {
            Vec::new()
        }
    });
    let mut controller = StreamController::new(backend(port), stream_config(0));
    let mut player = FakePlayer::new(3);
    let mut descriptor = TorrentDescriptor::from_bytes(PAYLOAD.to_vec());

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        controller.play(&mut player, &mut descriptor, None),
    )
    .await
    .expect("engine error state must end the stream");

    let Err(SeedcastError::Stream(error)) = result else {
        panic!("expected a stream error, got {result:?}");
    };
    assert_eq!(error.kind, StreamErrorKind::PlaybackFailed);
    assert_eq!(controller.state(), StreamState::Failed);
    assert!(player.played.is_empty());

    let received = server.join().unwrap();
    assert_eq!(received.last().map(String::as_str), Some("SHUTDOWN"));
}

#[tokio::test]
async fn test_cansave_sends_one_save_and_reports_the_file() {
    let (port, server) = spawn_engine(|command| {
        if command.starts_with("START ") {
            let cansave = "EVENT cansave index=0 infohash=ab format=plain".to_string();
            vec![
                "STATE 2".to_string(),
                cansave.clone(),
                cansave,
                format!("START {PLAYBACK_URL} stream=0"),
            ]
        } else {
            healthy_engine(command)
        }
    });
    let saves = tempfile::tempdir().unwrap();
    let config = WireEngineConfig {
        port,
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        save_path: Some(saves.path().to_path_buf()),
        ..WireEngineConfig::default()
    };
    let backend =
        WireBackend::with_engine(WireEngine::with_strategy(config, LaunchStrategy::Remote));
    let mut controller = StreamController::new(backend, stream_config(0));
    let mut player = FakePlayer::new(3);
    let mut descriptor = TorrentDescriptor::from_bytes(PAYLOAD.to_vec());

    let outcome = controller
        .play(&mut player, &mut descriptor, None)
        .await
        .unwrap();

    assert_eq!(outcome.state, StreamState::Ended);
    assert_eq!(outcome.saved_files, vec![saves.path().join("x.mkv")]);

    let received = server.join().unwrap();
    let save_lines: Vec<_> = received
        .iter()
        .filter(|line| line.starts_with("SAVE "))
        .collect();
    assert_eq!(save_lines.len(), 1);
    assert!(save_lines[0].starts_with("SAVE infohash=ab index=0 path="));
}
