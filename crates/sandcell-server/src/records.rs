use serde_json::Value;

use sandcell_common::protocol::error::Result;
use sandcell_common::{ErrorRecord, ErrorReport, PayloadCodec, RecordKind, StackPolicy};

use crate::runtime::Emission;
use crate::state::ServerState;

/// Writes the records produced while handling one message and remembers
/// their identifiers, in write order, for the reply.
pub struct RecordSink<'a> {
    state: &'a ServerState,
    replies: Vec<String>,
}

impl<'a> RecordSink<'a> {
    pub fn new(state: &'a ServerState) -> Self {
        Self {
            state,
            replies: Vec::new(),
        }
    }

    /// Stores `value` under a fresh identifier.
    pub fn publish(&mut self, kind: RecordKind, value: &Value) -> Result<String> {
        let payload = PayloadCodec::encode(value)?;
        let id = self.state.next_id();
        self.state.write_record(&id, kind, &payload)?;
        tracing::debug!(%id, %kind, len = payload.len(), "record published");
        self.replies.push(id.clone());
        Ok(id)
    }

    /// Publishes everything a script emitted. A failure to store one
    /// emission becomes an error record in its place.
    pub fn emit(&mut self, emissions: Vec<Emission>) {
        for emission in emissions {
            match emission {
                Emission::Task(request) => {
                    let published = serde_json::to_value(&request)
                        .map_err(Into::into)
                        .and_then(|value| self.publish(RecordKind::Task, &value));
                    if let Err(e) = published {
                        self.error(e.report(), StackPolicy::Preserve);
                    }
                }
                Emission::Exit(value) => {
                    if let Err(e) = self.publish(RecordKind::Script, &value) {
                        self.error(e.report(), StackPolicy::Redact);
                    }
                }
                Emission::Failed { report, policy } => self.error(report, policy),
            }
        }
    }

    /// Publishes a script-kind error record.
    ///
    /// The server-wide policy wins over `policy` when it asks for redaction.
    /// If even the error record cannot be stored, the failure is logged and
    /// nothing is sent.
    pub fn error(&mut self, report: ErrorReport, policy: StackPolicy) {
        let policy = match self.state.stack_policy() {
            StackPolicy::Redact => StackPolicy::Redact,
            StackPolicy::Preserve => policy,
        };
        let record = ErrorRecord::from(report.apply(policy));
        let published = serde_json::to_value(&record)
            .map_err(Into::into)
            .and_then(|value| self.publish(RecordKind::Script, &value));
        if let Err(e) = published {
            tracing::error!(message = %record.error.message, "failed to publish error record: {}", e);
        }
    }

    pub fn into_replies(self) -> Vec<String> {
        self.replies
    }
}
