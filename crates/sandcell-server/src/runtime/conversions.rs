//! JSON <-> JavaScript Value Conversions
//!
//! Values entering a sandbox are built directly inside its realm from a JSON
//! tree. Every object is created with a null prototype, so nothing a script
//! does to `Object.prototype` reaches (or is reached through) a supplied
//! value.
//!
//! # Type Mapping
//!
//! | JSON | JavaScript |
//! |------|------------|
//! | null | null |
//! | boolean | Boolean |
//! | number | Number |
//! | `{"$numberDouble": "NaN"}` and friends | NaN, Infinity, -Infinity |
//! | string | String |
//! | array | Array |
//! | object | Object with a null prototype |
//!
//! Going the other way, `undefined` and symbols become `null`, functions are
//! dropped from objects (and become `null` in arrays), `Error` objects become
//! `{name, message, stack}` and non-finite numbers are wrapped. A reference
//! cycle is an error rather than an endless walk.

use boa_engine::{
    Context, JsError, JsString, js_string,
    object::{JsObject, builtins::JsArray},
    property::PropertyKey,
    value::{JsValue, JsVariant},
};
use serde_json::{Map, Value};

use sandcell_common::codec::{as_number_double, number_double};
use sandcell_common::protocol::error::{Result, SandcellError};
use sandcell_common::ErrorReport;

/// Deepest nesting converted out of a sandbox.
const MAX_DEPTH: usize = 256;

/// Most values (at any depth) converted out of a sandbox in one go.
const MAX_VALUES: u64 = 1 << 20;

/// Converts a JSON value into a value owned by `ctx`'s realm.
pub(crate) fn json_to_js_value(json: &Value, ctx: &mut Context) -> Result<JsValue> {
    match json {
        Value::Null => Ok(JsValue::null()),
        Value::Bool(b) => Ok(JsValue::new(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                return Ok(JsValue::new(i));
            }
            n.as_f64()
                .map(JsValue::new)
                .ok_or_else(|| SandcellError::Conversion(format!("number {n} is out of range")))
        }
        Value::String(s) => Ok(JsValue::new(JsString::from(s.as_str()))),
        Value::Array(items) => {
            let array = JsArray::new(ctx);
            for (i, item) in items.iter().enumerate() {
                let value = json_to_js_value(item, ctx)?;
                array.push(value, ctx).map_err(|e| {
                    SandcellError::Conversion(format!("failed to push array element {i}: {e}"))
                })?;
            }
            Ok(array.into())
        }
        Value::Object(map) => {
            if let Some(n) = as_number_double(map) {
                return Ok(JsValue::new(n));
            }

            let object = JsObject::with_null_proto();
            for (key, value) in map {
                let value = json_to_js_value(value, ctx)?;
                object
                    .create_data_property_or_throw(JsString::from(key.as_str()), value, ctx)
                    .map_err(|e| {
                        SandcellError::Conversion(format!("failed to set property '{key}': {e}"))
                    })?;
            }
            Ok(object.into())
        }
    }
}

/// Converts a sandbox value into JSON.
pub(crate) fn js_value_to_json(value: &JsValue, ctx: &mut Context) -> Result<Value> {
    let mut walker = Walker {
        path: Vec::new(),
        remaining: MAX_VALUES,
    };
    Ok(walker.convert(value, ctx)?.unwrap_or(Value::Null))
}

/// Builds the report sent to the peer for an exception thrown in a sandbox.
pub(crate) fn error_report(error: &JsError, ctx: &mut Context) -> ErrorReport {
    let thrown = error.to_opaque(ctx);
    if let JsVariant::Object(object) = thrown.variant() {
        if let Some(parts) = error_parts(&object, ctx) {
            return ErrorReport::new(parts.message, parts.stack);
        }
    }

    let message = thrown
        .to_string(ctx)
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_else(|_| error.to_string());
    ErrorReport::from_message(message)
}

struct ErrorParts {
    name: String,
    message: String,
    stack: String,
}

/// Reads `name`, `message` and `stack` from an object whose prototype chain
/// contains `Error.prototype`. The stack always starts with `Name: message`.
fn error_parts(object: &JsObject, ctx: &mut Context) -> Option<ErrorParts> {
    let error_proto = ctx.intrinsics().constructors().error().prototype();
    let mut proto = object.prototype();
    loop {
        match proto {
            Some(p) if JsObject::equals(&p, &error_proto) => break,
            Some(p) => proto = p.prototype(),
            None => return None,
        }
    }

    let mut read = |key: JsString| -> Option<String> {
        let value = object.get(key, ctx).ok()?;
        if value.is_undefined() || value.is_null() {
            return None;
        }
        value.to_string(ctx).ok().map(|s| s.to_std_string_escaped())
    };

    let name = read(js_string!("name")).unwrap_or_else(|| "Error".to_string());
    let message = read(js_string!("message")).unwrap_or_default();
    let header = if message.is_empty() {
        name.clone()
    } else {
        format!("{name}: {message}")
    };
    let stack = match read(js_string!("stack")) {
        Some(stack) if stack.starts_with(&header) => stack,
        Some(stack) if !stack.trim().is_empty() => format!("{header}\n{stack}"),
        _ => header,
    };

    Some(ErrorParts {
        name,
        message,
        stack,
    })
}

struct Walker {
    /// Objects on the path from the root to the value being converted.
    path: Vec<JsObject>,
    /// Values that may still be converted before giving up.
    remaining: u64,
}

impl Walker {
    /// Returns `None` for values JSON has no place for (functions).
    fn convert(&mut self, value: &JsValue, ctx: &mut Context) -> Result<Option<Value>> {
        self.reserve(1)?;
        let object = match value.variant() {
            JsVariant::Undefined | JsVariant::Null | JsVariant::Symbol(_) => {
                return Ok(Some(Value::Null));
            }
            JsVariant::Boolean(b) => return Ok(Some(Value::Bool(b))),
            JsVariant::Integer32(i) => return Ok(Some(Value::from(i))),
            JsVariant::Float64(n) => return Ok(Some(float_to_json(n))),
            JsVariant::String(s) => return Ok(Some(Value::String(s.to_std_string_escaped()))),
            JsVariant::BigInt(_) => {
                return Err(SandcellError::Conversion(
                    "BigInt values cannot be serialized".to_string(),
                ));
            }
            JsVariant::Object(object) => object,
        };

        if object.is_callable() {
            return Ok(None);
        }
        if self.path.iter().any(|seen| JsObject::equals(seen, &object)) {
            return Err(SandcellError::Conversion(
                "value contains a reference cycle".to_string(),
            ));
        }
        if self.path.len() >= MAX_DEPTH {
            return Err(SandcellError::Conversion(format!(
                "value is nested deeper than {MAX_DEPTH} levels"
            )));
        }

        if let Some(parts) = error_parts(&object, ctx) {
            let mut map = Map::new();
            map.insert("name".to_string(), Value::String(parts.name));
            map.insert("message".to_string(), Value::String(parts.message));
            map.insert("stack".to_string(), Value::String(parts.stack));
            return Ok(Some(Value::Object(map)));
        }

        self.path.push(object.clone());
        let converted = if object.is_array() {
            self.convert_array(&object, ctx)
        } else {
            self.convert_object(&object, ctx)
        };
        self.path.pop();
        converted.map(Some)
    }

    fn convert_array(&mut self, object: &JsObject, ctx: &mut Context) -> Result<Value> {
        let array = JsArray::from_object(object.clone())
            .map_err(|e| SandcellError::Conversion(format!("object is not a valid array: {e}")))?;
        let length = array
            .length(ctx)
            .map_err(|e| SandcellError::Conversion(format!("failed to get array length: {e}")))?;

        // Holes cost as much as elements, so a huge `length` is refused
        // before anything is allocated.
        if length > self.remaining {
            return Err(too_many_values());
        }

        let mut items = Vec::new();
        for i in 0..length {
            let element = array.get(i, ctx).map_err(|e| {
                SandcellError::Conversion(format!("failed to get array element {i}: {e}"))
            })?;
            items.push(self.convert(&element, ctx)?.unwrap_or(Value::Null));
        }
        Ok(Value::Array(items))
    }

    fn convert_object(&mut self, object: &JsObject, ctx: &mut Context) -> Result<Value> {
        let keys = object
            .own_property_keys(ctx)
            .map_err(|e| SandcellError::Conversion(format!("failed to get object keys: {e}")))?;

        let mut map = Map::new();
        for key in keys {
            let name = match &key {
                PropertyKey::String(s) => s.to_std_string_escaped(),
                PropertyKey::Index(i) => i.get().to_string(),
                PropertyKey::Symbol(_) => continue,
            };
            let value = object.get(key.clone(), ctx).map_err(|e| {
                SandcellError::Conversion(format!("failed to get property '{name}': {e}"))
            })?;
            if let Some(value) = self.convert(&value, ctx)? {
                map.insert(name, value);
            }
        }
        Ok(Value::Object(map))
    }

    fn reserve(&mut self, count: u64) -> Result<()> {
        self.remaining = self.remaining.checked_sub(count).ok_or_else(too_many_values)?;
        Ok(())
    }
}

fn too_many_values() -> SandcellError {
    SandcellError::Conversion(format!("value has more than {MAX_VALUES} elements"))
}

/// Integral doubles are written without a fraction so `6 * 7` reads back as
/// `42`, not `42.0`.
fn float_to_json(n: f64) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        return Value::from(n as i64);
    }
    number_double(n)
}
