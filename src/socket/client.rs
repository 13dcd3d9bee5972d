//! UI-side connection to the engine socket.
//!
//! [`ClientTransport`] owns one outbound connection. A background reader
//! thread turns incoming bytes into [`Message`]s and parks them in a FIFO that
//! the UI loop drains with [`ClientTransport::pop_message`], so the render
//! loop never blocks on the socket.
//!
//! ```text
//! UI loop ──send()──────────────► UnixStream ──► engine
//! UI loop ◄─pop_message()── inbound queue ◄── client-reader thread ◄── engine
//! ```

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use crate::config::{validate_socket_path, TransportConfig};
use crate::constants::{DEFAULT_SOCKET_PATH, READ_BUFFER_SIZE};
use crate::message::Message;

use super::framing::{serialize, FrameDecoder};

/// State shared between the owner and the reader thread.
#[derive(Debug, Default)]
struct Shared {
    /// Cleared first on every disconnect path; the reader loop checks it.
    running: AtomicBool,
    /// Write side of the connection. Whoever takes it out shuts it down.
    /// Held only long enough to clone the `Arc`, never across I/O.
    stream: Mutex<Option<Arc<UnixStream>>>,
    /// Serialises writers so concurrent frames don't interleave.
    write_lock: Mutex<()>,
    /// Parsed messages awaiting the consumer.
    inbound: Mutex<VecDeque<Message>>,
}

impl Shared {
    fn stream(&self) -> MutexGuard<'_, Option<Arc<UnixStream>>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inbound(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_connected(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.stream().is_some()
    }

    /// Release the socket. Returns `true` if this call closed it.
    ///
    /// Shutting the socket down also unblocks the reader's pending `read`
    /// and any `write` blocked in [`ClientTransport::send`].
    fn close(&self) -> bool {
        self.running.store(false, Ordering::Release);
        let Some(stream) = self.stream().take() else {
            return false;
        };
        let _ = stream.shutdown(Shutdown::Both);
        true
    }
}

/// Client end of the UI↔engine socket.
///
/// Connection state is all-or-nothing: either the socket is open and the
/// reader thread runs, or neither. Dropping the transport disconnects it.
#[derive(Debug)]
pub struct ClientTransport {
    socket_path: PathBuf,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ClientTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

impl ClientTransport {
    /// Create a disconnected transport for `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            shared: Arc::new(Shared::default()),
            reader: Mutex::new(None),
        }
    }

    /// Create a disconnected transport from configuration.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.socket_path.clone())
    }

    /// Path this transport connects to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connect to the engine and start the reader thread.
    ///
    /// Returns `true` if already connected. On failure nothing is left
    /// behind: no socket, no thread.
    pub fn connect(&self) -> bool {
        if self.is_connected() {
            log::info!("[ClientTransport] Already connected");
            return true;
        }

        // A reader that hit EOF has already released the socket; reap it.
        self.join_reader();

        match self.try_connect() {
            Ok(()) => {
                log::info!("[ClientTransport] Connected to {}", self.socket_path.display());
                true
            }
            Err(e) => {
                log::error!("[ClientTransport] Connection failed: {e:#}");
                false
            }
        }
    }

    fn try_connect(&self) -> Result<()> {
        validate_socket_path(&self.socket_path)?;

        let stream = UnixStream::connect(&self.socket_path)
            .with_context(|| format!("connect to {}", self.socket_path.display()))?;
        let read_stream = stream
            .try_clone()
            .context("clone socket for reader thread")?;

        *self.shared.stream() = Some(Arc::new(stream));
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("client-reader".to_owned())
            .spawn(move || reader_loop(read_stream, &shared));

        match spawned {
            Ok(handle) => {
                *self.reader() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.close();
                Err(e).context("spawn reader thread")
            }
        }
    }

    /// Close the connection and join the reader thread.
    ///
    /// Safe to call repeatedly and from `Drop`.
    pub fn disconnect(&self) {
        if self.shared.close() {
            log::info!("[ClientTransport] Disconnected");
        }
        self.join_reader();
    }

    /// Whether the socket is open and the reader is running.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Send a message to the engine.
    ///
    /// Does nothing (besides logging) when disconnected. A failed write
    /// disconnects the transport.
    pub fn send(&self, msg: &Message) {
        if !self.is_connected() {
            log::warn!("[ClientTransport] Not connected, cannot send {}", msg.kind());
            return;
        }

        let data = serialize(msg);
        let result = {
            let _writing = self.shared.write_lock();
            let stream = self.shared.stream().clone();
            match stream {
                Some(stream) => (&*stream).write_all(&data),
                None => Err(ErrorKind::NotConnected.into()),
            }
        };

        match result {
            Ok(()) => log::info!("[ClientTransport] Sent: {}", msg.kind()),
            Err(e) if !self.shared.running.load(Ordering::Acquire) => {
                log::info!("[ClientTransport] Send of {} aborted by disconnect: {e}", msg.kind());
            }
            Err(e) => {
                log::error!("[ClientTransport] Socket write failed: {e}");
                self.disconnect();
            }
        }
    }

    /// Oldest received message, or `None` if the queue is empty.
    ///
    /// Never blocks on I/O.
    pub fn pop_message(&self) -> Option<Message> {
        self.shared.inbound().pop_front()
    }

    /// Every queued message, oldest first.
    pub fn drain_messages(&self) -> Vec<Message> {
        self.shared.inbound().drain(..).collect()
    }

    fn reader(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_reader(&self) {
        let handle = self.reader().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("[ClientTransport] Reader thread panicked");
            }
        }
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Reader loop: runs on the `client-reader` thread until EOF, error, or
/// disconnect.
fn reader_loop(mut stream: UnixStream, shared: &Shared) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    while shared.running.load(Ordering::Acquire) {
        match stream.read(&mut buf) {
            Ok(0) => {
                log::info!("[ClientTransport] Server closed the connection");
                break;
            }
            Ok(n) => match decoder.feed(&buf[..n]) {
                Ok(messages) => {
                    for msg in messages {
                        let kind = msg.kind().to_owned();
                        shared.inbound().push_back(msg);
                        log::info!("[ClientTransport] Received: {kind}");
                    }
                }
                Err(e) => {
                    log::error!("[ClientTransport] Frame decode error: {e}");
                    break;
                }
            },
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                // A read failing because we shut the socket down is expected.
                if shared.running.load(Ordering::Acquire) {
                    log::error!("[ClientTransport] Socket read failed: {e}");
                }
                break;
            }
        }
    }

    if decoder.has_partial() {
        log::debug!("[ClientTransport] Discarding unterminated frame");
    }
    if shared.close() {
        log::info!("[ClientTransport] Disconnected");
    }
}
