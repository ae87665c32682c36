//! Native functions installed into every sandbox.
//!
//! - `runTask(name, options)` asks the peer to run a task
//! - `exit(value)` hands the script's result back to the peer
//! - one global per granted capability
//!
//! `runTask` and `exit` never throw into the script. What they produce is
//! queued on the context's [`Outbox`] and written to the record store once
//! the current evaluation returns, in call order.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::{
    Context, JsArgs, JsNativeError, JsString, NativeFunction,
    object::FunctionObjectBuilder,
    property::Attribute,
    value::JsValue,
};
use boa_gc::{Finalize, Trace, empty_trace};
use serde_json::{Map, Value};

use sandcell_common::protocol::error::{Result, SandcellError};
use sandcell_common::{ErrorReport, StackPolicy, TaskRequest};

use crate::runtime::capabilities::CapabilityFn;
use crate::runtime::conversions::{error_report, json_to_js_value, js_value_to_json};

/// Something a script asked the host to deliver to the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// `runTask(name, options)`
    Task(TaskRequest),
    /// `exit(value)`
    Exit(Value),
    /// A `runTask` or `exit` call whose value could not be serialized.
    Failed {
        report: ErrorReport,
        policy: StackPolicy,
    },
}

pub(crate) type Outbox = Rc<RefCell<Vec<Emission>>>;

pub(crate) const RESERVED_GLOBALS: [&str; 3] = ["runTask", "exit", "exports"];

#[derive(Finalize)]
struct OutboxCapture {
    outbox: Outbox,
}

// SAFETY: the capture holds no garbage-collected values.
unsafe impl Trace for OutboxCapture {
    empty_trace!();
}

#[derive(Finalize)]
struct CapabilityCapture {
    name: String,
    function: Arc<CapabilityFn>,
}

// SAFETY: the capture holds no garbage-collected values.
unsafe impl Trace for CapabilityCapture {
    empty_trace!();
}

/// Installs `runTask` and `exit`.
pub(crate) fn install_builtins(ctx: &mut Context, outbox: &Outbox) -> Result<()> {
    // SAFETY: OutboxCapture traces nothing and the closure captures nothing.
    let run_task = unsafe {
        NativeFunction::from_closure_with_captures(
            |_this, args, captures: &OutboxCapture, ctx| {
                let name = match args.get_or_undefined(0).to_string(ctx) {
                    Ok(name) => name.to_std_string_escaped(),
                    Err(e) => {
                        captures.outbox.borrow_mut().push(Emission::Failed {
                            report: error_report(&e, ctx),
                            policy: StackPolicy::Preserve,
                        });
                        return Ok(JsValue::undefined());
                    }
                };
                let options = args.get_or_undefined(1);

                let emission = if options.to_boolean() {
                    match js_value_to_json(options, ctx) {
                        Ok(options) => Emission::Task(TaskRequest { task: name, options }),
                        Err(e) => Emission::Failed {
                            report: e.report(),
                            policy: StackPolicy::Preserve,
                        },
                    }
                } else {
                    Emission::Task(TaskRequest {
                        task: name,
                        options: Value::Object(Map::new()),
                    })
                };
                captures.outbox.borrow_mut().push(emission);
                Ok(JsValue::undefined())
            },
            OutboxCapture {
                outbox: Rc::clone(outbox),
            },
        )
    };
    register_function(ctx, "runTask", 2, run_task)?;

    // SAFETY: as above.
    let exit = unsafe {
        NativeFunction::from_closure_with_captures(
            |_this, args, captures: &OutboxCapture, ctx| {
                let emission = match js_value_to_json(args.get_or_undefined(0), ctx) {
                    Ok(value) => Emission::Exit(value),
                    Err(e) => Emission::Failed {
                        report: e.report(),
                        policy: StackPolicy::Redact,
                    },
                };
                captures.outbox.borrow_mut().push(emission);
                Ok(JsValue::undefined())
            },
            OutboxCapture {
                outbox: Rc::clone(outbox),
            },
        )
    };
    register_function(ctx, "exit", 1, exit)
}

/// Exposes a capability as a global function named `name`.
pub(crate) fn grant_capability(
    ctx: &mut Context,
    name: &str,
    function: Arc<CapabilityFn>,
) -> Result<()> {
    // SAFETY: CapabilityCapture traces nothing and the closure captures nothing.
    let native = unsafe {
        NativeFunction::from_closure_with_captures(
            |_this, args, captures: &CapabilityCapture, ctx| {
                let mut json_args = Vec::with_capacity(args.len());
                for arg in args {
                    let value = js_value_to_json(arg, ctx).map_err(|e| {
                        JsNativeError::typ().with_message(format!(
                            "{}: argument cannot be passed to the host: {e}",
                            captures.name
                        ))
                    })?;
                    json_args.push(value);
                }

                let result = (captures.function)(&json_args).map_err(|message| {
                    JsNativeError::error().with_message(format!("{}: {message}", captures.name))
                })?;

                json_to_js_value(&result, ctx).map_err(|e| {
                    JsNativeError::typ()
                        .with_message(format!("{}: invalid result: {e}", captures.name))
                        .into()
                })
            },
            CapabilityCapture {
                name: name.to_string(),
                function,
            },
        )
    };
    register_function(ctx, name, 0, native)
}

fn register_function(
    ctx: &mut Context,
    name: &str,
    length: usize,
    function: NativeFunction,
) -> Result<()> {
    let function = FunctionObjectBuilder::new(ctx.realm(), function)
        .name(JsString::from(name))
        .length(length)
        .constructor(false)
        .build();
    ctx.register_global_property(JsString::from(name), function, Attribute::all())
        .map_err(|e| {
            SandcellError::Build(ErrorReport::from_message(format!(
                "failed to install '{name}': {e}"
            )))
        })
}
