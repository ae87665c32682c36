//! Extended-JSON payload codec.
//!
//! Record payloads are UTF-8 JSON with one extension taken from MongoDB's
//! extended JSON: numbers JSON cannot express are written as
//! `{"$numberDouble": "NaN" | "Infinity" | "-Infinity"}`. Conversions into
//! and out of the script engine use [`number_double`] and
//! [`as_number_double`] so that these values survive a round trip.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::protocol::error::Result;

/// Key of the extended-JSON wrapper for non-finite doubles.
pub const NUMBER_DOUBLE_KEY: &str = "$numberDouble";

/// Encodes and decodes record payloads.
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode(value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode(data: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn encode_as<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode_as<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Encodes a double, wrapping it when plain JSON cannot hold it.
pub fn number_double(n: f64) -> Value {
    match serde_json::Number::from_f64(n) {
        Some(number) => Value::Number(number),
        None => {
            let text = if n.is_nan() {
                "NaN"
            } else if n.is_sign_positive() {
                "Infinity"
            } else {
                "-Infinity"
            };
            let mut wrapper = Map::new();
            wrapper.insert(NUMBER_DOUBLE_KEY.to_string(), Value::String(text.to_string()));
            Value::Object(wrapper)
        }
    }
}

/// Recognises a `{"$numberDouble": "..."}` wrapper.
pub fn as_number_double(map: &Map<String, Value>) -> Option<f64> {
    if map.len() != 1 {
        return None;
    }
    match map.get(NUMBER_DOUBLE_KEY)? {
        Value::String(text) => match text.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            other => other.parse().ok(),
        },
        _ => None,
    }
}
