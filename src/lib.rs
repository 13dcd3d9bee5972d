//! Smart Piano IPC - message transport between the UI and the engine.
//!
//! The UI and the engine run as separate processes and talk over a Unix
//! domain socket using a small line-oriented text protocol.
//!
//! # Modules
//!
//! - [`message`] - Message data model
//! - [`socket`] - Wire codec, client transport, server transport
//! - [`config`] - Socket path configuration
//! - [`constants`] - Protocol limits and defaults

pub mod config;
pub mod constants;
pub mod message;
pub mod socket;

// Re-export commonly used types
pub use config::TransportConfig;
pub use message::Message;
pub use socket::client::ClientTransport;
pub use socket::error::{FrameError, RecvError};
pub use socket::framing::{deserialize, serialize, FrameDecoder};
pub use socket::server::{ServerState, UdsTransport};
pub use socket::transport::Transport;
