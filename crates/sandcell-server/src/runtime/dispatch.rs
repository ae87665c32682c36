//! Routing of task answers to script handlers.

use serde_json::Value;

use sandcell_common::TaskAnswer;
use sandcell_common::protocol::error::Result;

use crate::runtime::context::ExecutionContext;

/// Which handler, if any, received a task answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The dedicated `on<Task>Task` export, called with `data`.
    Handler(String),
    /// The generic `onTask` export, called with `(task, data)`.
    Generic,
    /// Neither export exists; the answer was dropped.
    Unhandled,
}

const GENERIC_HANDLER: &str = "onTask";

/// Delivers `answer` to the context's exports.
///
/// A dedicated handler takes precedence over `onTask`. An exception thrown by
/// the handler is returned as a script error.
pub fn answer(context: &mut ExecutionContext, answer: &TaskAnswer) -> Result<Dispatch> {
    let handler = answer.handler_name();
    if context.call_export(&handler, std::slice::from_ref(&answer.data))? {
        tracing::debug!(task = %answer.task, %handler, "task answer dispatched");
        return Ok(Dispatch::Handler(handler));
    }

    let args = [Value::String(answer.task.clone()), answer.data.clone()];
    if context.call_export(GENERIC_HANDLER, &args)? {
        tracing::debug!(task = %answer.task, "task answer dispatched to onTask");
        return Ok(Dispatch::Generic);
    }

    tracing::debug!(task = %answer.task, "no handler for task answer");
    Ok(Dispatch::Unhandled)
}
