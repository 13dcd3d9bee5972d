//! Wire protocol codec for the UI↔engine socket.
//!
//! Text frames, one field per line, terminated by an empty line:
//!
//! ```text
//! <type>\n
//! <key1>=<value1>\n
//! <key2>=<value2>\n
//! \n
//! ```
//!
//! No length prefix, no escaping. Keys and values must not contain a line
//! break; values may contain `=` (a field line is split on the first `=`).
//! Parsing is lenient:
//! - a missing or empty type line yields [`Message::error`]
//! - a field line without `=` is dropped
//! - a trailing `\r` is stripped from every line, and `\r\n\r\n` is accepted
//!   as a terminator alongside `\n\n`

use std::fmt::Write as _;

use crate::constants::MAX_FRAME_SIZE;
use crate::message::Message;

use super::error::FrameError;

/// Canonical frame terminator.
pub const TERMINATOR: &[u8] = b"\n\n";

/// Terminator sent by CRLF peers.
const CRLF_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Encode a message into its wire form.
///
/// The output always ends with [`TERMINATOR`].
pub fn serialize(msg: &Message) -> Vec<u8> {
    let mut out = String::with_capacity(msg.kind().len() + 2);
    out.push_str(msg.kind());
    out.push('\n');
    for (key, value) in msg.fields() {
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{key}={value}");
    }
    out.push('\n');
    out.into_bytes()
}

/// Parse one frame body into a message.
///
/// `data` may or may not include the terminator. Invalid UTF-8 is replaced
/// rather than rejected.
pub fn deserialize(data: &[u8]) -> Message {
    let text = String::from_utf8_lossy(data);
    let mut lines = text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

    let kind = match lines.next() {
        Some(kind) if !kind.is_empty() => kind,
        _ => {
            log::warn!("[framing] Frame without type line, substituting error message");
            return Message::error();
        }
    };

    let mut fields = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        match line.split_once('=') {
            Some((key, value)) => fields.push((key, value)),
            None => log::debug!("[framing] Dropping field line without '=': {line:?}"),
        }
    }

    Message::with_fields(kind, fields)
}

/// Incremental frame decoder that handles partial reads.
///
/// Push bytes as they arrive and pull complete messages in stream order.
/// Bytes of an unfinished frame stay buffered until its terminator shows up.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Bytes before this offset hold no terminator start.
    scan_from: usize,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom limit on buffered, unterminated bytes.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            scan_from: 0,
            max_frame_size,
        }
    }

    /// Append bytes read from the socket.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if the buffer exceeds the limit
    /// without containing a terminator. The buffer is discarded in that case.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.max_frame_size && self.find_terminator().is_none() {
            let size = self.buf.len();
            self.clear();
            return Err(FrameError::TooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Extract the oldest complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Message> {
        let (end, terminator_len) = self.find_terminator()?;
        let msg = deserialize(&self.buf[..end]);
        self.buf.drain(..end + terminator_len);
        self.scan_from = 0;
        Some(msg)
    }

    /// Feed bytes and extract every frame they complete.
    ///
    /// # Errors
    ///
    /// See [`FrameDecoder::push`].
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>, FrameError> {
        self.push(bytes)?;
        Ok(std::iter::from_fn(|| self.next_frame()).collect())
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Drop any buffered bytes (new connection).
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scan_from = 0;
    }

    /// Position and length of the earliest terminator in the buffer.
    ///
    /// Resumes where the previous miss stopped, so a frame arriving in many
    /// reads is scanned once.
    fn find_terminator(&mut self) -> Option<(usize, usize)> {
        for pos in self.scan_from..self.buf.len() {
            let rest = &self.buf[pos..];
            if rest.starts_with(TERMINATOR) {
                return Some((pos, TERMINATOR.len()));
            }
            if rest.starts_with(CRLF_TERMINATOR) {
                return Some((pos, CRLF_TERMINATOR.len()));
            }
        }
        // A terminator may straddle the end of what has arrived so far.
        self.scan_from = self.buf.len().saturating_sub(CRLF_TERMINATOR.len() - 1);
        None
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
