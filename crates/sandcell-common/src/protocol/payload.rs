//! Record payloads.
//!
//! These are the values stored (encoded with [`PayloadCodec`](crate::PayloadCodec))
//! under a record identifier. A `script` record holds either a
//! [`ScriptDescriptor`] (peer → server), a script result or an
//! [`ErrorRecord`] (server → peer). A `task` record holds a [`TaskRequest`]
//! (server → peer) or a [`TaskAnswer`] (peer → server).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Everything needed to load a script into an execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDescriptor {
    /// Trusted globals supplied by the peer.
    ///
    /// Accepted either as an object or as a string holding an encoded object.
    #[serde(default, deserialize_with = "deserialize_globals")]
    pub globals: Map<String, Value>,
    /// Names of operator-registered capabilities to expose to the script.
    #[serde(default)]
    pub api: Vec<String>,
    /// Script source text.
    pub source: String,
    /// Name of the export to invoke once the source has been evaluated.
    pub method_name: String,
}

impl ScriptDescriptor {
    pub fn new(source: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            globals: Map::new(),
            api: Vec::new(),
            source: source.into(),
            method_name: method_name.into(),
        }
    }

    pub fn with_global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    pub fn with_api(mut self, capability: impl Into<String>) -> Self {
        self.api.push(capability.into());
        self
    }
}

fn deserialize_globals<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(Value::Null) => Ok(Map::new()),
            Ok(other) => Err(D::Error::custom(format!(
                "globals must encode an object, got {other}"
            ))),
            Err(e) => Err(D::Error::custom(format!("globals are not valid JSON: {e}"))),
        },
        other => Err(D::Error::custom(format!(
            "globals must be an object, got {other}"
        ))),
    }
}

/// A task emitted by a running script through `runTask(name, options)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default = "empty_object")]
    pub options: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// The peer's answer to an emitted task, routed back to the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAnswer {
    pub task: String,
    #[serde(default)]
    pub data: Value,
}

impl TaskAnswer {
    /// Name of the dedicated export that handles this answer:
    /// `build` becomes `onBuildTask`.
    pub fn handler_name(&self) -> String {
        let mut chars = self.task.chars();
        match chars.next() {
            Some(first) => format!("on{}{}Task", first.to_uppercase(), chars.as_str()),
            None => "onTask".to_string(),
        }
    }
}

/// Whether an error's stack is passed back to the peer as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StackPolicy {
    #[default]
    Preserve,
    /// Keep only the `Name: message` line and drop every frame.
    Redact,
}

/// Message and stack of a failure, as seen by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    pub stack: String,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: stack.into(),
        }
    }

    /// Report for a failure that has no stack of its own.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let stack = format!("Error: {message}");
        Self { message, stack }
    }

    pub fn apply(self, policy: StackPolicy) -> Self {
        match policy {
            StackPolicy::Preserve => self,
            StackPolicy::Redact => self.redacted(),
        }
    }

    pub fn redacted(self) -> Self {
        let stack = self
            .stack
            .lines()
            .find(|line| !line.trim_start().starts_with("at "))
            .unwrap_or_default()
            .to_string();
        Self {
            message: self.message,
            stack,
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// The `{"error": {"message", "stack"}}` record written for failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error: ErrorReport,
}

impl From<ErrorReport> for ErrorRecord {
    fn from(error: ErrorReport) -> Self {
        Self { error }
    }
}
