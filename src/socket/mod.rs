//! Unix domain socket IPC between the piano UI and the engine.
//!
//! The UI process connects as a client and never blocks its render loop;
//! the engine process owns the socket and drives blocking calls.
//!
//! # Architecture
//!
//! ```text
//! Engine Process                       UI Process
//! ┌──────────────────┐                ┌──────────────────────┐
//! │ UdsTransport     │                │ ClientTransport      │
//! │  UnixListener    │◄──────────────►│  UnixStream          │
//! │  (one client)    │  text frames   │  client-reader thread│
//! └────────┬─────────┘  over socket   └──────────┬───────────┘
//!          │ receive()/send()                    │ pop_message()/send()
//!          ▼                                     ▼
//!     engine loop                             UI loop
//! ```
//!
//! # Wire Protocol
//!
//! `type\nkey=value\n...\n\n`; see [`framing`] for the codec.

pub mod client;
pub mod error;
pub mod framing;
pub mod server;
pub mod transport;
