//! Message data model exchanged between the UI and the engine.
//!
//! A [`Message`] is a type tag plus an unordered bag of string fields. It is
//! immutable once built: there are no setters, and the only way to "change" a
//! message is to construct a new one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::ERROR_MESSAGE_TYPE;

/// A typed, key/value-tagged protocol message.
///
/// Fields are kept sorted by key so serialization is deterministic; the order
/// carries no meaning on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind ("config", "ack", "note", ...).
    #[serde(rename = "type")]
    kind: String,
    /// Field values keyed by name.
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

impl Message {
    /// Create a message with no fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Create a message with the given fields.
    ///
    /// A key given more than once keeps its last value.
    ///
    /// ```
    /// use smartpiano_ipc::Message;
    ///
    /// let msg = Message::with_fields("config", [("game", "note")]);
    /// assert_eq!(msg.field("game"), "note");
    /// ```
    pub fn with_fields<I, K, V>(kind: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind: kind.into(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The sentinel error message synthesized by the transport itself.
    ///
    /// Indistinguishable on the wire from an application message of type
    /// `"error"` without fields.
    pub fn error() -> Self {
        Self::new(ERROR_MESSAGE_TYPE)
    }

    /// Message type tag.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Value of `key`, or an empty string when the field is absent.
    pub fn field(&self, key: &str) -> &str {
        self.fields.get(key).map_or("", String::as_str)
    }

    /// Whether the field `key` is present (possibly with an empty value).
    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// All fields, sorted by key.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Whether this message has the `"error"` type.
    pub fn is_error(&self) -> bool {
        self.kind == ERROR_MESSAGE_TYPE
    }
}
