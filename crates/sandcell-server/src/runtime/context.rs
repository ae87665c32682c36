use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::{
    Context, JsString, Source, js_string,
    object::JsObject,
    property::Attribute,
    value::{JsValue, JsVariant},
};
use serde_json::Value;

use sandcell_common::protocol::error::{Result, SandcellError};
use sandcell_common::{ErrorReport, ScriptDescriptor};

use crate::runtime::bindings::{self, Emission, Outbox, RESERVED_GLOBALS};
use crate::runtime::capabilities::CapabilityRegistry;
use crate::runtime::conversions::{error_report, js_value_to_json, json_to_js_value};

/// A sandbox: one Boa realm plus the globals and capabilities granted to it.
///
/// The Boa `Context` is not `Send`, so an `ExecutionContext` lives and dies
/// on the thread that built it. The server gives every connection its own
/// worker thread for this reason.
///
/// Exports are always read from the `exports` global as it is at call time,
/// so a script may replace the object wholesale.
pub struct ExecutionContext {
    ctx: Context,
    outbox: Outbox,
    capabilities: Arc<CapabilityRegistry>,
    granted: BTreeSet<String>,
}

impl ExecutionContext {
    /// Builds a fresh realm for `descriptor`.
    ///
    /// Installs `runTask` and `exit`, merges the trusted globals, grants the
    /// named capabilities and declares an empty, prototype-less `exports`.
    /// The source is not evaluated; see [`run_entry`](Self::run_entry).
    ///
    /// # Errors
    ///
    /// Returns [`SandcellError::Build`] if a capability is not registered, a
    /// global uses a reserved name, or a global cannot be converted.
    pub fn build(
        descriptor: &ScriptDescriptor,
        capabilities: Arc<CapabilityRegistry>,
    ) -> Result<Self> {
        let mut ctx = Context::default();
        let outbox: Outbox = Rc::new(RefCell::new(Vec::new()));
        bindings::install_builtins(&mut ctx, &outbox)?;

        let exports = JsObject::with_null_proto();
        ctx.register_global_property(js_string!("exports"), exports, Attribute::all())
            .map_err(|e| build_error(format!("failed to declare exports: {e}")))?;

        let mut context = Self {
            ctx,
            outbox,
            capabilities,
            granted: BTreeSet::new(),
        };
        context.extend(descriptor)?;
        tracing::debug!(granted = ?context.granted, "execution context built");
        Ok(context)
    }

    /// Merges another descriptor's globals and capabilities into this realm.
    ///
    /// Globals are converted afresh; existing globals of the same name are
    /// replaced. Capabilities already granted are left as they are.
    pub fn extend(&mut self, descriptor: &ScriptDescriptor) -> Result<()> {
        for name in &descriptor.api {
            if RESERVED_GLOBALS.contains(&name.as_str()) {
                return Err(build_error(format!("capability name '{name}' is reserved")));
            }
            if !self.capabilities.contains(name) {
                return Err(build_error(format!("unknown capability '{name}'")));
            }
        }
        for name in descriptor.globals.keys() {
            if RESERVED_GLOBALS.contains(&name.as_str()) {
                return Err(build_error(format!("global name '{name}' is reserved")));
            }
        }

        for (name, value) in &descriptor.globals {
            let value = json_to_js_value(value, &mut self.ctx).map_err(|e| {
                build_error(format!("global '{name}' cannot be converted: {e}"))
            })?;
            self.ctx
                .register_global_property(JsString::from(name.as_str()), value, Attribute::all())
                .map_err(|e| build_error(format!("failed to install global '{name}': {e}")))?;
        }

        for name in &descriptor.api {
            if self.granted.contains(name) {
                continue;
            }
            let function = self
                .capabilities
                .get(name)
                .ok_or_else(|| build_error(format!("unknown capability '{name}'")))?;
            bindings::grant_capability(&mut self.ctx, name, function)?;
            self.granted.insert(name.clone());
        }
        Ok(())
    }

    /// Evaluates the descriptor's source, then calls `exports[methodName]()`.
    ///
    /// # Errors
    ///
    /// Returns [`SandcellError::Script`] if evaluation throws, the method is
    /// missing or not callable, or the method throws.
    pub fn run_entry(&mut self, descriptor: &ScriptDescriptor) -> Result<()> {
        let evaluated = self.ctx.eval(Source::from_bytes(descriptor.source.as_bytes()));
        if let Err(e) = evaluated {
            return Err(SandcellError::Script(error_report(&e, &mut self.ctx)));
        }
        self.drain_jobs();

        if !self.call_export(&descriptor.method_name, &[])? {
            return Err(SandcellError::Script(ErrorReport::from_message(format!(
                "exports.{} is not a function",
                descriptor.method_name
            ))));
        }
        Ok(())
    }

    /// Calls `exports[name]` with `args`.
    ///
    /// Returns `Ok(false)` without calling anything when the export is
    /// missing or not callable.
    pub fn call_export(&mut self, name: &str, args: &[Value]) -> Result<bool> {
        let exports = self
            .ctx
            .global_object()
            .get(js_string!("exports"), &mut self.ctx)
            .map_err(|e| SandcellError::Script(error_report(&e, &mut self.ctx)))?;
        let JsVariant::Object(exports) = exports.variant() else {
            return Ok(false);
        };
        let export = exports
            .get(JsString::from(name), &mut self.ctx)
            .map_err(|e| SandcellError::Script(error_report(&e, &mut self.ctx)))?;
        let Some(function) = export.as_callable() else {
            return Ok(false);
        };

        let mut js_args = Vec::with_capacity(args.len());
        for arg in args {
            js_args.push(json_to_js_value(arg, &mut self.ctx)?);
        }

        let called = function.call(&JsValue::undefined(), &js_args, &mut self.ctx);
        if let Err(e) = called {
            return Err(SandcellError::Script(error_report(&e, &mut self.ctx)));
        }
        self.drain_jobs();
        Ok(true)
    }

    /// Reads a global and converts it to JSON.
    #[cfg(test)]
    pub(crate) fn global(&mut self, name: &str) -> Result<Value> {
        let value = self
            .ctx
            .global_object()
            .get(JsString::from(name), &mut self.ctx)
            .map_err(|e| SandcellError::Script(error_report(&e, &mut self.ctx)))?;
        js_value_to_json(&value, &mut self.ctx)
    }

    /// Removes and returns everything queued by `runTask` and `exit`.
    pub fn take_emissions(&mut self) -> Vec<Emission> {
        std::mem::take(&mut *self.outbox.borrow_mut())
    }

    /// Names of the capabilities granted so far.
    pub fn granted(&self) -> impl Iterator<Item = &str> {
        self.granted.iter().map(String::as_str)
    }

    /// Runs queued promise jobs so `async` handlers settle before the
    /// emissions are collected.
    fn drain_jobs(&mut self) {
        if let Err(e) = self.ctx.run_jobs() {
            tracing::warn!("promise job failed: {}", e);
        }
    }
}

fn build_error(message: String) -> SandcellError {
    SandcellError::Build(ErrorReport::from_message(message))
}
