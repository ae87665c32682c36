use std::sync::Arc;

use sandcell_common::{
    ErrorReport, PayloadCodec, Record, RecordKind, SandcellError, ScriptDescriptor, StackPolicy,
    TaskAnswer, WireMessage,
};

use crate::records::RecordSink;
use crate::runtime::{ExecutionContext, dispatch};
use crate::state::ServerState;

/// Per-connection protocol state.
///
/// Holds the connection's execution context, created by the first script
/// record it fetches and discarded with the session. Messages are handled
/// strictly one at a time.
pub struct ConnectionSession {
    state: Arc<ServerState>,
    context: Option<ExecutionContext>,
}

impl ConnectionSession {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self {
            state,
            context: None,
        }
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Handles one message line and returns the identifiers to send back.
    pub fn handle_line(&mut self, line: &str) -> Vec<String> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Vec::new();
        }

        let state = Arc::clone(&self.state);
        let mut sink = RecordSink::new(&state);
        match WireMessage::parse(line) {
            Ok(WireMessage::Delete { id, kind }) => self.delete(&id, kind),
            Ok(WireMessage::Fetch { client_id, id }) => self.fetch(&client_id, &id, &mut sink),
            Err(e) => {
                tracing::warn!(line, "protocol error: {}", e);
                sink.error(SandcellError::from(e).report(), StackPolicy::Preserve);
            }
        }
        sink.into_replies()
    }

    fn delete(&self, id: &str, kind: RecordKind) {
        match self.state.delete_record(id, kind) {
            Ok(true) => tracing::debug!(id, %kind, "record deleted"),
            Ok(false) => tracing::debug!(id, %kind, "delete of missing record ignored"),
            Err(e) => tracing::warn!(id, %kind, "delete failed: {}", e),
        }
    }

    fn fetch(&mut self, client_id: &str, id: &str, sink: &mut RecordSink<'_>) {
        let record = match self.state.read_record(client_id, id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(client_id, id, "record is not visible, message dropped");
                return;
            }
            Err(e) => {
                tracing::warn!(client_id, id, "failed to read record: {}", e);
                return;
            }
        };

        tracing::debug!(client_id, id, kind = %record.kind, "record fetched");
        if let Err(e) = self.dispatch(record, sink) {
            tracing::debug!(client_id, id, "request failed: {}", e);
            sink.error(e.report(), StackPolicy::Preserve);
        }
    }

    /// Runs a script or answers a task. Whatever the script emitted is
    /// published before the error, if any, is returned.
    fn dispatch(&mut self, record: Record, sink: &mut RecordSink<'_>) -> Result<(), SandcellError> {
        let outcome = match record.kind {
            RecordKind::Script => {
                let descriptor: ScriptDescriptor = PayloadCodec::decode_as(&record.payload)?;
                self.run_script(&descriptor)
            }
            RecordKind::Task => {
                let answer: TaskAnswer = PayloadCodec::decode_as(&record.payload)?;
                let context = self.context.as_mut().ok_or_else(|| {
                    SandcellError::Task(ErrorReport::from_message(format!(
                        "task answer '{}' arrived before any script",
                        answer.task
                    )))
                })?;
                dispatch::answer(context, &answer).map(|_| ())
            }
        };

        if let Some(context) = self.context.as_mut() {
            sink.emit(context.take_emissions());
        }
        outcome
    }

    fn run_script(&mut self, descriptor: &ScriptDescriptor) -> Result<(), SandcellError> {
        match self.context.as_mut() {
            Some(context) => context.extend(descriptor)?,
            None => {
                let context = ExecutionContext::build(descriptor, self.state.capabilities())?;
                self.context = Some(context);
            }
        }
        match self.context.as_mut() {
            Some(context) => context.run_entry(descriptor),
            None => Ok(()),
        }
    }
}
