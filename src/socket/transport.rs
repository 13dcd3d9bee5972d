//! Server-side transport abstraction.
//!
//! The engine talks to its UI through this trait so another carrier (TCP,
//! for instance) can replace the Unix socket without touching the engine
//! loop. [`UdsTransport`](super::server::UdsTransport) is the only
//! implementation today.

use std::path::Path;

use crate::message::Message;

use super::error::RecvError;

/// Blocking, single-client message transport.
///
/// Every method takes `&self` so an instance can be shared through an `Arc`
/// between the engine loop and a thread that calls [`Transport::stop`] on
/// shutdown signals.
pub trait Transport: Send + Sync {
    /// Start listening. Returns `false` if any setup step fails.
    fn start(&self) -> bool;

    /// Block until a client connects.
    ///
    /// Failures are logged; check [`Transport::is_client_connected`]
    /// afterwards.
    fn wait_for_client(&self);

    /// Send a message to the connected client. Failures are logged only.
    fn send(&self, msg: &Message);

    /// Block until a complete message arrives from the client.
    ///
    /// # Errors
    ///
    /// Returns a [`RecvError`] describing why no message could be produced.
    fn try_receive(&self) -> Result<Message, RecvError>;

    /// Block until a complete message arrives from the client.
    ///
    /// Any failure is folded into [`Message::error`]; use
    /// [`Transport::try_receive`] to tell a lost client apart from an
    /// application error message.
    fn receive(&self) -> Message {
        self.try_receive().unwrap_or_else(|e| {
            log::debug!("[Transport] receive substituted error message: {e}");
            Message::error()
        })
    }

    /// Close the client and listening sockets.
    ///
    /// Must be idempotent and async-signal-safe: no locks, no allocation.
    fn stop(&self);

    /// Whether a client connection is currently held.
    fn is_client_connected(&self) -> bool;

    /// Path of the listening socket.
    fn socket_path(&self) -> &Path;
}
