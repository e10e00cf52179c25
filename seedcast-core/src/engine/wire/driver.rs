//! TCP driver for the wire protocol
//!
//! Owns one socket and one named reader thread. The reader frames CRLF lines,
//! decodes them into [`ServerMessage`] values and dispatches each through the
//! listener registry before reading the next chunk. Writes happen on the
//! caller's thread through a cloneable [`WireSender`].

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::error::EngineError;
use super::framing::LineFramer;
use super::listeners::ListenerRegistry;
use super::message::{ClientCommand, ServerMessage};

const READ_BUFFER_SIZE: usize = 64 * 1024;
const READER_THREAD_NAME: &str = "seedcast-wire-reader";

/// Write half shared between the facade and reader-thread listeners.
#[derive(Clone)]
pub struct WireSender {
    stream: Arc<Mutex<TcpStream>>,
}

impl WireSender {
    /// Sends one command followed by CRLF.
    ///
    /// # Errors
    ///
    /// - `EngineError::SendError` - Socket write failed
    pub fn send(&self, command: &ClientCommand) -> Result<(), EngineError> {
        self.send_line(&command.to_string())
    }

    /// Sends a pre-rendered line followed by CRLF.
    ///
    /// # Errors
    ///
    /// - `EngineError::SendError` - Socket write failed
    pub fn send_line(&self, line: &str) -> Result<(), EngineError> {
        tracing::debug!(">> {}", line);
        let mut stream = self.stream.lock();
        stream
            .write_all(format!("{line}\r\n").as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|source| EngineError::SendError { source })
    }
}

/// Connected wire session: socket, sender and reader thread.
pub struct WireDriver {
    address: String,
    stream: TcpStream,
    sender: WireSender,
    listeners: Arc<Mutex<ListenerRegistry>>,
    active: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    read_interval: Duration,
}

impl WireDriver {
    /// Opens the TCP connection without starting the reader.
    ///
    /// Listeners should be attached before [`Self::start_reader`] so no
    /// early message is missed.
    ///
    /// # Errors
    ///
    /// - `EngineError::ConnectionError` - Connect failed or timed out
    pub async fn connect(
        host: &str,
        port: u16,
        timeout: Duration,
        read_interval: Duration,
    ) -> Result<Self, EngineError> {
        let address = format!("{host}:{port}");
        let connection_error = |source: std::io::Error| EngineError::ConnectionError {
            address: address.clone(),
            source,
        };

        let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&address))
            .await
            .map_err(|_| connection_error(std::io::Error::from(ErrorKind::TimedOut)))?
            .map_err(connection_error)?;

        let stream = stream.into_std().map_err(connection_error)?;
        stream.set_nonblocking(false).map_err(connection_error)?;
        stream
            .set_read_timeout(Some(read_interval))
            .map_err(connection_error)?;
        stream.set_nodelay(true).map_err(connection_error)?;

        let writer = stream.try_clone().map_err(connection_error)?;

        tracing::info!("Connected to engine at {}", address);

        Ok(Self {
            address,
            stream,
            sender: WireSender {
                stream: Arc::new(Mutex::new(writer)),
            },
            listeners: Arc::new(Mutex::new(ListenerRegistry::new())),
            active: Arc::new(AtomicBool::new(true)),
            reader: None,
            read_interval,
        })
    }

    pub fn sender(&self) -> WireSender {
        self.sender.clone()
    }

    pub fn listeners(&self) -> Arc<Mutex<ListenerRegistry>> {
        Arc::clone(&self.listeners)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Spawns the reader thread. `on_exit` runs once on that thread after
    /// the loop ends, whatever the cause.
    ///
    /// # Errors
    ///
    /// - `EngineError::ConnectionError` - Socket clone or thread spawn failed
    pub fn start_reader<F>(&mut self, on_exit: F) -> Result<(), EngineError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.reader.is_some() {
            return Ok(());
        }

        let connection_error = |source| EngineError::ConnectionError {
            address: self.address.clone(),
            source,
        };

        let stream = self.stream.try_clone().map_err(connection_error)?;
        let listeners = Arc::clone(&self.listeners);
        let active = Arc::clone(&self.active);
        let read_interval = self.read_interval;

        let handle = thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || {
                read_loop(stream, &listeners, &active, read_interval);
                active.store(false, Ordering::SeqCst);
                on_exit();
            })
            .map_err(connection_error)?;

        self.reader = Some(handle);
        Ok(())
    }

    /// True while the reader loop is running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops the reader and closes the socket without waiting for the
    /// thread to exit. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!("Shutting down wire driver for {}", self.address);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        self.reader.take();
    }
}

impl Drop for WireDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop(
    mut stream: TcpStream,
    listeners: &Mutex<ListenerRegistry>,
    active: &AtomicBool,
    read_interval: Duration,
) {
    tracing::debug!("Wire reader thread running");
    let mut framer = LineFramer::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    while active.load(Ordering::SeqCst) {
        let read = match stream.read(&mut buffer) {
            Ok(0) => {
                tracing::debug!("Engine closed the connection");
                break;
            }
            Ok(read) => read,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => 0,
            Err(e) if e.kind() == ErrorKind::Interrupted => 0,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::NotConnected
                        | ErrorKind::BrokenPipe
                ) =>
            {
                tracing::debug!("Engine connection lost: {}", e);
                break;
            }
            Err(e) => {
                tracing::warn!("Engine socket read failed: {}", e);
                thread::sleep(read_interval);
                0
            }
        };

        for line in framer.push(&buffer[..read]) {
            tracing::debug!("<< {}", line);
            let message = match ServerMessage::parse(&line) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("{}", e);
                    continue;
                }
            };

            let is_shutdown = matches!(message, ServerMessage::Shutdown);
            // Invoke outside the registry lock so listeners may re-register
            let handlers = listeners.lock().listeners_for(message.kind());
            for handler in handlers {
                handler(&message);
            }

            if is_shutdown {
                tracing::info!("Engine requested shutdown");
                active.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    tracing::debug!("Wire reader thread stopped");
}

#[cfg(test)]
mod tests {
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::sync::mpsc;

    use super::*;
    use crate::engine::wire::message::EventKind;

    #[tokio::test]
    async fn test_single_read_dispatches_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"STATE 2\r\nAUTH 1\r\n").unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let mut driver = WireDriver::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(2),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        let state = Arc::new(Mutex::new(None::<i32>));
        let (tx, rx) = mpsc::channel();
        {
            let listeners = driver.listeners();
            let mut registry = listeners.lock();
            let state_writer = Arc::clone(&state);
            let order_tx = tx.clone();
            registry.attach(EventKind::State, move |message| {
                if let ServerMessage::State(value) = message {
                    *state_writer.lock() = Some(*value);
                }
                let _ = order_tx.send("STATE".to_string());
            });
            let state_reader = Arc::clone(&state);
            registry.attach(EventKind::Auth, move |_message| {
                let _ = tx.send(format!("AUTH state={:?}", *state_reader.lock()));
            });
        }
        driver.start_reader(|| {}).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, "STATE");
        assert_eq!(second, "AUTH state=Some(2)");

        driver.shutdown();
        server.join().unwrap();
    }

    #[tokio::test]
    async fn test_send_appends_crlf_and_eof_stops_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(socket);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            line
        });

        let mut driver = WireDriver::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(2),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let (exit_tx, exit_rx) = mpsc::channel();
        driver
            .start_reader(move || {
                let _ = exit_tx.send(());
            })
            .unwrap();

        driver.sender().send(&ClientCommand::HelloBg).unwrap();
        assert_eq!(server.join().unwrap(), "HELLOBG\r\n");

        exit_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!driver.is_active());
        driver.shutdown();
        driver.shutdown();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = WireDriver::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(EngineError::ConnectionError { .. })));
    }
}
