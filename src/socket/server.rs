//! Engine-side Unix domain socket transport.
//!
//! [`UdsTransport`] binds a well-known path, accepts one client at a time and
//! offers blocking send/receive. It does no threading of its own; the engine
//! loop drives it, and a signal-watching thread may call
//! [`Transport::stop`] concurrently.
//!
//! # State machine
//!
//! ```text
//! Idle ──start()──► Listening ──wait_for_client()──► ClientConnected
//!                       ▲                                  │
//!                       └────────── client EOF ────────────┘
//! Listening | ClientConnected ──stop()──► Stopped (terminal)
//! ```
//!
//! Descriptors are kept as raw fds in atomics (`-1` when absent) so `stop()`
//! can close them without taking a lock.

use std::io::{ErrorKind, Read, Write};
use std::mem::ManuallyDrop;
use std::os::unix::io::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use scopeguard::ScopeGuard;

use crate::config::{validate_socket_path, TransportConfig};
use crate::constants::{DEFAULT_SOCKET_PATH, LISTEN_BACKLOG, READ_BUFFER_SIZE};
use crate::message::Message;

use super::error::RecvError;
use super::framing::{serialize, FrameDecoder};
use super::transport::Transport;

/// Marker for "no descriptor".
const NO_FD: RawFd = -1;

/// Observable lifecycle state of a [`UdsTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, never started.
    Idle,
    /// Listening, no client.
    Listening,
    /// A client connection is held.
    ClientConnected,
    /// Stopped; the instance cannot be restarted.
    Stopped,
}

/// Single-client Unix domain socket server.
#[derive(Debug)]
pub struct UdsTransport {
    socket_path: PathBuf,
    listener_fd: AtomicI32,
    client_fd: AtomicI32,
    stopped: AtomicBool,
    /// Bytes received from the current client beyond the last returned frame.
    decoder: Mutex<FrameDecoder>,
}

impl Default for UdsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

impl UdsTransport {
    /// Create an idle transport for `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let socket_path = socket_path.into();
        log::info!("[UdsTransport] Instance created for {}", socket_path.display());
        Self {
            socket_path,
            listener_fd: AtomicI32::new(NO_FD),
            client_fd: AtomicI32::new(NO_FD),
            stopped: AtomicBool::new(false),
            decoder: Mutex::new(FrameDecoder::new()),
        }
    }

    /// Create an idle transport from configuration.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.socket_path.clone())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        if self.stopped.load(Ordering::Acquire) {
            ServerState::Stopped
        } else if self.client_fd.load(Ordering::Acquire) >= 0 {
            ServerState::ClientConnected
        } else if self.listener_fd.load(Ordering::Acquire) >= 0 {
            ServerState::Listening
        } else {
            ServerState::Idle
        }
    }

    fn try_start(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            bail!("transport has been stopped");
        }
        validate_socket_path(&self.socket_path)?;

        // Remove stale socket file if it exists
        if remove_socket_file(&self.socket_path)
            .with_context(|| format!("remove stale socket: {}", self.socket_path.display()))?
        {
            log::debug!("[UdsTransport] Removed stale socket file");
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("bind socket: {}", self.socket_path.display()))?;
        // Until the listener is published, a failure must not leave the
        // bound file behind.
        let socket_file = scopeguard::guard(self.socket_path.as_path(), |path| {
            if let Err(e) = remove_socket_file(path) {
                log::warn!("[UdsTransport] Failed to remove socket file: {e}");
            }
        });

        // Set socket permissions to owner-only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, perms)
                .context("restrict socket permissions")?;
        }

        // std listens with its own backlog; shrink it to the single client
        // this protocol serves.
        let fd = listener.into_raw_fd();
        // SAFETY: `fd` is a valid, bound socket we own.
        if unsafe { libc::listen(fd, LISTEN_BACKLOG) } < 0 {
            let err = std::io::Error::last_os_error();
            // SAFETY: we own `fd` and nothing else refers to it.
            drop(unsafe { OwnedFd::from_raw_fd(fd) });
            return Err(err).context("listen on socket");
        }

        if self
            .listener_fd
            .compare_exchange(NO_FD, fd, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Lost a race with a concurrent start(); keep the first listener.
            // SAFETY: `fd` is ours and was never published.
            drop(unsafe { OwnedFd::from_raw_fd(fd) });
        }
        ScopeGuard::into_inner(socket_file);
        Ok(())
    }

    /// Record a freshly accepted client, replacing any previous one.
    ///
    /// Returns `false` if the transport was stopped concurrently; the stream
    /// is closed in that case.
    fn adopt_client(&self, stream: UnixStream) -> bool {
        let previous = self.client_fd.swap(stream.into_raw_fd(), Ordering::SeqCst);
        if previous >= 0 {
            log::warn!("[UdsTransport] Replacing previous client connection");
            close_fd(previous);
        }
        // stop() sets the flag before taking the client fd, so either it
        // closed ours already or we see the flag here.
        if self.stopped.load(Ordering::SeqCst) {
            close_fd(self.client_fd.swap(NO_FD, Ordering::SeqCst));
            return false;
        }
        self.decoder().clear();
        true
    }

    /// Close the client descriptor after the peer went away.
    fn drop_client(&self) {
        let fd = self.client_fd.swap(NO_FD, Ordering::AcqRel);
        if fd >= 0 {
            // SAFETY: the swap handed us sole ownership of `fd`.
            drop(unsafe { OwnedFd::from_raw_fd(fd) });
        }
        self.decoder().clear();
    }

    fn decoder(&self) -> MutexGuard<'_, FrameDecoder> {
        self.decoder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Borrow a raw descriptor as a `UnixStream` without taking ownership.
///
/// # Safety
///
/// `fd` must be an open stream socket for the lifetime of the returned value.
unsafe fn borrow_stream(fd: RawFd) -> ManuallyDrop<UnixStream> {
    // SAFETY: guaranteed by the caller; ManuallyDrop prevents the close.
    ManuallyDrop::new(unsafe { UnixStream::from_raw_fd(fd) })
}

/// Remove the socket file at `path`. Returns whether a file was removed.
fn remove_socket_file(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Shut down and close `fd` if it is valid. Async-signal-safe.
fn close_fd(fd: RawFd) {
    if fd >= 0 {
        // SAFETY: plain syscalls on a descriptor the caller exclusively owns.
        unsafe {
            libc::shutdown(fd, libc::SHUT_RDWR);
            libc::close(fd);
        }
    }
}

impl Transport for UdsTransport {
    fn start(&self) -> bool {
        if self.listener_fd.load(Ordering::Acquire) >= 0 {
            log::info!("[UdsTransport] Already listening on {}", self.socket_path.display());
            return true;
        }
        match self.try_start() {
            Ok(()) => {
                log::info!("[UdsTransport] Server listening on {}", self.socket_path.display());
                true
            }
            Err(e) => {
                log::error!("[UdsTransport] Failed to start: {e:#}");
                false
            }
        }
    }

    fn wait_for_client(&self) {
        let fd = self.listener_fd.load(Ordering::Acquire);
        if fd < 0 {
            log::error!("[UdsTransport] Server not started");
            return;
        }

        // SAFETY: `fd` is the listening socket; stop() may close it
        // underneath us, which makes accept() fail instead of blocking.
        let listener = ManuallyDrop::new(unsafe { UnixListener::from_raw_fd(fd) });
        match listener.accept() {
            Ok((stream, _addr)) => {
                if self.adopt_client(stream) {
                    log::info!("[UdsTransport] Client connected");
                } else {
                    log::info!("[UdsTransport] Client refused, transport stopped");
                }
            }
            Err(e) => {
                if self.stopped.load(Ordering::Acquire) {
                    log::info!("[UdsTransport] Accept interrupted by stop");
                } else {
                    log::error!("[UdsTransport] Accept failed: {e}");
                }
            }
        }
    }

    fn send(&self, msg: &Message) {
        let fd = self.client_fd.load(Ordering::Acquire);
        if fd < 0 {
            log::error!("[UdsTransport] No client connected, dropping {}", msg.kind());
            return;
        }

        // SAFETY: `fd` is the accepted client socket.
        let mut stream = unsafe { borrow_stream(fd) };
        match stream.write_all(&serialize(msg)) {
            Ok(()) => log::info!("[UdsTransport] Message sent: type={}", msg.kind()),
            Err(e) => log::error!("[UdsTransport] Failed to send {}: {e}", msg.kind()),
        }
    }

    fn try_receive(&self) -> Result<Message, RecvError> {
        let fd = self.client_fd.load(Ordering::Acquire);
        if fd < 0 {
            log::error!("[UdsTransport] No client connected");
            return Err(RecvError::NotConnected);
        }

        let mut decoder = self.decoder();
        // SAFETY: `fd` is the accepted client socket.
        let mut stream = unsafe { borrow_stream(fd) };
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            if let Some(msg) = decoder.next_frame() {
                log::info!("[UdsTransport] Message received: type={}", msg.kind());
                return Ok(msg);
            }

            let n = match stream.read(&mut buf) {
                Ok(0) => {
                    log::info!("[UdsTransport] Client disconnected");
                    drop(decoder);
                    self.drop_client();
                    return Err(RecvError::Disconnected);
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("[UdsTransport] Receive failed: {e}");
                    return Err(RecvError::Io(e));
                }
            };

            log::debug!("[UdsTransport] Read {n} bytes");
            if let Err(e) = decoder.push(&buf[..n]) {
                log::error!("[UdsTransport] Dropping client: {e}");
                drop(decoder);
                self.drop_client();
                return Err(RecvError::Frame(e));
            }
        }
    }

    fn stop(&self) {
        let listener = self.listener_fd.swap(NO_FD, Ordering::SeqCst);
        if listener >= 0 {
            self.stopped.store(true, Ordering::SeqCst);
        }
        let client = self.client_fd.swap(NO_FD, Ordering::SeqCst);
        if client >= 0 {
            self.stopped.store(true, Ordering::SeqCst);
        }
        close_fd(client);
        close_fd(listener);
    }

    fn is_client_connected(&self) -> bool {
        self.client_fd.load(Ordering::Acquire) >= 0
    }

    fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for UdsTransport {
    fn drop(&mut self) {
        self.stop();
        log::info!("[UdsTransport] Instance dropped");
    }
}
