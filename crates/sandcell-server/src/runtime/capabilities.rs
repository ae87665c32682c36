//! Operator-registered capabilities.
//!
//! A script only ever sees the host through the capabilities named in its
//! descriptor's `api` list. Each capability is a native Rust callable that
//! receives the call's arguments as JSON and returns a JSON value; there is
//! no way for a descriptor to supply code that runs outside the sandbox.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

/// A capability callable. An `Err` is thrown into the script as an `Error`.
pub type CapabilityFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// Named capabilities a descriptor may grant to its script.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Arc<CapabilityFn>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the capabilities every deployment offers:
    ///
    /// - `log(...args)` writes the arguments to the server log
    /// - `now()` returns milliseconds since the Unix epoch
    pub fn standard() -> Self {
        Self::new()
            .with("log", |args| {
                let line = args
                    .iter()
                    .map(|arg| match arg {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                tracing::info!(target: "sandcell::script", "{}", line);
                Ok(Value::Null)
            })
            .with("now", |_| {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|e| e.to_string())?
                    .as_millis();
                Ok(Value::from(millis as u64))
            })
    }

    /// Registers `function` under `name`, replacing any earlier entry.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(function));
    }

    pub fn with<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(name, function);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<CapabilityFn>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_call() {
        let registry = CapabilityRegistry::new().with("double", |args| {
            let n = args.first().and_then(Value::as_i64).ok_or("expected a number")?;
            Ok(json!(n * 2))
        });

        let double = registry.get("double").unwrap();
        assert_eq!(double(&[json!(21)]).unwrap(), json!(42));
        assert_eq!(double(&[json!("x")]).unwrap_err(), "expected a number");
    }

    #[test]
    fn test_unknown_capability() {
        let registry = CapabilityRegistry::new();
        assert!(registry.get("fs").is_none());
        assert!(!registry.contains("fs"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_standard_capabilities() {
        let registry = CapabilityRegistry::standard();
        assert_eq!(registry.names(), vec!["log", "now"]);

        let now = registry.get("now").unwrap()(&[]).unwrap();
        assert!(now.as_u64().unwrap() > 0);

        let log = registry.get("log").unwrap();
        assert_eq!(log(&[json!("hello"), json!(1)]).unwrap(), Value::Null);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = CapabilityRegistry::new();
        registry.register("v", |_| Ok(json!(1)));
        registry.register("v", |_| Ok(json!(2)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("v").unwrap()(&[]).unwrap(), json!(2));
    }
}
