//! Error kinds surfaced by the framing layer and the server transport.

use std::io;

use thiserror::Error;

/// Errors from the incremental frame decoder.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer sent more than the allowed bytes without a frame terminator.
    #[error("Frame too large: {size} bytes buffered without terminator (max {max})")]
    TooLarge {
        /// Bytes buffered when the limit was hit.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Why a server-side receive produced no message.
///
/// Lets callers tell a lost connection apart from an application message
/// whose type happens to be `"error"`.
#[derive(Debug, Error)]
pub enum RecvError {
    /// No client is connected.
    #[error("No client connected")]
    NotConnected,
    /// The client closed the connection.
    #[error("Client disconnected")]
    Disconnected,
    /// Reading from the client failed. The connection is kept.
    #[error("Receive failed: {0}")]
    Io(#[from] io::Error),
    /// The client violated framing limits and was dropped.
    #[error("Invalid frame: {0}")]
    Frame(#[from] FrameError),
}
