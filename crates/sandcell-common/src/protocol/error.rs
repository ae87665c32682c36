use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::payload::ErrorReport;

/// Top-level error type for sandcell.
///
/// Build, script and task failures carry an [`ErrorReport`] so they can be
/// written back to the peer as a script-kind error record unchanged.
#[derive(Error, Debug)]
pub enum SandcellError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Build error: {0}")]
    Build(ErrorReport),

    #[error("Script error: {0}")]
    Script(ErrorReport),

    #[error("Task error: {0}")]
    Task(ErrorReport),

    #[error("Value conversion error: {0}")]
    Conversion(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl SandcellError {
    /// Returns the report to send back to the peer for this error.
    pub fn report(&self) -> ErrorReport {
        match self {
            SandcellError::Build(report)
            | SandcellError::Script(report)
            | SandcellError::Task(report) => report.clone(),
            other => ErrorReport::from_message(other.to_string()),
        }
    }
}

/// Malformed wire messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message is not ASCII")]
    NotAscii,

    #[error("message {0:?} has no '-' separator")]
    MissingSeparator(String),

    #[error("message {0:?} has an empty client id")]
    EmptyClientId(String),

    #[error("message {0:?} has an empty identifier")]
    EmptyIdentifier(String),

    #[error("delete message {0:?} has no kind tag")]
    MissingKindTag(String),

    #[error("unknown kind tag {0:?}")]
    UnknownKindTag(String),

    #[error("client id {0:?} may only contain [A-Za-z0-9_.]")]
    InvalidClientId(String),
}

/// Failures opening, reading or writing a record store region.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store {0} is already owned by another writer")]
    Locked(PathBuf),

    #[error("store {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("store is full: {0}")]
    Full(String),

    #[error("key of {0} bytes exceeds the {1} byte limit")]
    KeyTooLong(usize, usize),

    #[error("key {0:?} is already present")]
    DuplicateKey(String),

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = SandcellError> = std::result::Result<T, E>;
