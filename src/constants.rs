//! Protocol-wide constants for the Smart Piano transport.
//!
//! Grouped by concern so both transports and the codec agree on the same
//! limits.

// ============================================================================
// Socket
// ============================================================================

/// Default Unix socket path shared by the UI and the engine.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/smartpiano.sock";

/// Environment variable overriding [`DEFAULT_SOCKET_PATH`].
pub const SOCKET_PATH_ENV: &str = "SMARTPIANO_SOCKET";

/// Size of `sun_path` on macOS (Linux allows 108). Paths must stay strictly
/// below this so the trailing NUL fits on every platform.
pub const MAX_SOCKET_PATH: usize = 104;

/// Listen backlog for the server socket. The protocol services one client.
pub const LISTEN_BACKLOG: libc::c_int = 1;

// ============================================================================
// Framing
// ============================================================================

/// Bytes requested per `read` on either side of the connection.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Largest incomplete frame a decoder will buffer (16 MB).
///
/// A peer that streams this much without a terminator is either broken or
/// hostile; the connection is dropped instead of growing the buffer forever.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Sentinel message type synthesized for protocol or connection anomalies.
pub const ERROR_MESSAGE_TYPE: &str = "error";
