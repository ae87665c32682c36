pub mod error;
pub mod message;
pub mod payload;

#[cfg(test)]
mod tests;

pub use error::{ProtocolError, Result, SandcellError, StoreError};
pub use message::{RecordKind, WireMessage};
pub use payload::{ErrorRecord, ErrorReport, ScriptDescriptor, StackPolicy, TaskAnswer, TaskRequest};
