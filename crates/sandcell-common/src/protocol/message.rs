//! Wire messages exchanged over a sandcell connection.
//!
//! Every message is a single ASCII line:
//!
//! | Message | Meaning |
//! |---------|---------|
//! | `<clientId>-<identifier>` | fetch the record `identifier` from the client's store |
//! | `delete-<identifier>-<kindTag>` | drop a record the server wrote earlier |
//!
//! The server only ever answers with a bare identifier line.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::error::ProtocolError;

const DELETE_PREFIX: &str = "delete-";

/// The two kinds of record a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Script,
    Task,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Script => "script",
            RecordKind::Task => "task",
        }
    }

    /// Parses the kind tag of a delete message.
    ///
    /// Both the short tags (`script`, `task`) and the payload-field tags
    /// older peers send (`sandScript`, `sandTask`) are accepted.
    pub fn from_tag(tag: &str) -> Result<Self, ProtocolError> {
        match tag {
            "script" | "sandScript" => Ok(RecordKind::Script),
            "task" | "sandTask" => Ok(RecordKind::Task),
            other => Err(ProtocolError::UnknownKindTag(other.to_string())),
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            RecordKind::Script => 1,
            RecordKind::Task => 2,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(RecordKind::Script),
            2 => Some(RecordKind::Task),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Read record `id` from the store belonging to `client_id`.
    Fetch { client_id: String, id: String },
    /// Remove record `id` from the server's store.
    Delete { id: String, kind: RecordKind },
}

impl WireMessage {
    /// Parses one message line.
    ///
    /// The `delete-` literal is checked before the general case, and a
    /// fetch splits on the first `-` only, so identifiers may contain `-`.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.is_ascii() {
            return Err(ProtocolError::NotAscii);
        }

        if let Some(rest) = line.strip_prefix(DELETE_PREFIX) {
            let (id, tag) = rest
                .split_once('-')
                .ok_or_else(|| ProtocolError::MissingKindTag(line.to_string()))?;
            if id.is_empty() {
                return Err(ProtocolError::EmptyIdentifier(line.to_string()));
            }
            let kind = RecordKind::from_tag(tag)?;
            return Ok(WireMessage::Delete {
                id: id.to_string(),
                kind,
            });
        }

        let (client_id, id) = line
            .split_once('-')
            .ok_or_else(|| ProtocolError::MissingSeparator(line.to_string()))?;
        if client_id.is_empty() {
            return Err(ProtocolError::EmptyClientId(line.to_string()));
        }
        if id.is_empty() {
            return Err(ProtocolError::EmptyIdentifier(line.to_string()));
        }
        validate_client_id(client_id)?;

        Ok(WireMessage::Fetch {
            client_id: client_id.to_string(),
            id: id.to_string(),
        })
    }

    /// Encodes the message as a line, without the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            WireMessage::Fetch { client_id, id } => format!("{client_id}-{id}"),
            WireMessage::Delete { id, kind } => format!("{DELETE_PREFIX}{id}-{kind}"),
        }
    }
}

impl FromStr for WireMessage {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WireMessage::parse(s)
    }
}

/// The client id becomes part of a file name, so it must not escape the
/// share directory.
fn validate_client_id(client_id: &str) -> Result<(), ProtocolError> {
    let allowed = client_id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');
    if !allowed || client_id == "." || client_id == ".." {
        return Err(ProtocolError::InvalidClientId(client_id.to_string()));
    }
    Ok(())
}
