//! Optional payload validators keyed by function or event name.
//!
//! Outbound payloads that fail validation are rejected before anything is
//! sent. Inbound calls that fail answer with a `VALIDATION_ERROR` envelope;
//! inbound events that fail are logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use tether_core::{Result, TetherError};

/// Payload check returning a human-readable reason on failure.
pub type Validator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Validators for one connection or server.
#[derive(Clone)]
pub struct Validators {
    functions: HashMap<String, Validator>,
    events: HashMap<String, Validator>,
    enabled: bool,
}

impl Default for Validators {
    fn default() -> Self {
        Self {
            functions: HashMap::new(),
            events: HashMap::new(),
            enabled: true,
        }
    }
}

impl Validators {
    /// Empty, enabled set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the validator for calls to `function`.
    ///
    /// A second validator for the same name is a build error.
    pub fn add_function<F>(&mut self, function: &str, check: F) -> Result<()>
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        insert_unique(&mut self.functions, "function", function, Arc::new(check))
    }

    /// Register the validator for `event` payloads.
    pub fn add_event<F>(&mut self, event: &str, check: F) -> Result<()>
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        insert_unique(&mut self.events, "event", event, Arc::new(check))
    }

    /// Turn every check on or off without unregistering anything.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether checks run.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check a call payload.
    pub fn check_function(&self, function: &str, data: &Value) -> Result<()> {
        self.check(&self.functions, function, data)
    }

    /// Check an event payload.
    pub fn check_event(&self, event: &str, data: &Value) -> Result<()> {
        self.check(&self.events, event, data)
    }

    fn check(&self, table: &HashMap<String, Validator>, name: &str, data: &Value) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        match table.get(name) {
            Some(validator) => validator(data).map_err(|message| TetherError::Validation {
                name: name.to_owned(),
                message,
            }),
            None => Ok(()),
        }
    }
}

fn insert_unique(
    table: &mut HashMap<String, Validator>,
    kind: &str,
    name: &str,
    validator: Validator,
) -> Result<()> {
    if table.contains_key(name) {
        return Err(TetherError::Build(format!(
            "validator for {kind} '{name}' already registered"
        )));
    }
    let _ = table.insert(name.to_owned(), validator);
    Ok(())
}

/// Validator requiring an object with the given keys present.
pub fn require_keys(
    keys: &'static [&'static str],
) -> impl Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static {
    move |data: &Value| {
        let obj = data.as_object().ok_or_else(|| "expected an object".to_owned())?;
        match keys.iter().find(|k| !obj.contains_key(**k)) {
            Some(missing) => Err(format!("missing '{missing}'")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn reject_all(_: &Value) -> std::result::Result<(), String> {
        Err("always".into())
    }

    #[test]
    fn unregistered_names_pass() {
        let v = Validators::new();
        v.check_function("anything", &json!(1)).unwrap();
        v.check_event("anything", &json!(1)).unwrap();
    }

    #[test]
    fn failing_validator_blocks() {
        let mut v = Validators::new();
        v.add_function("f", reject_all).unwrap();
        let err = v.check_function("f", &json!({})).unwrap_err();
        assert_matches!(err, TetherError::Validation { ref name, ref message } if name == "f" && message == "always");
    }

    #[test]
    fn disabled_bypasses_everything() {
        let mut v = Validators::new();
        v.add_function("f", reject_all).unwrap();
        v.add_event("e", reject_all).unwrap();
        v.set_enabled(false);
        assert!(!v.is_enabled());
        v.check_function("f", &json!(1)).unwrap();
        v.check_event("e", &json!(1)).unwrap();
    }

    #[test]
    fn duplicate_is_build_error() {
        let mut v = Validators::new();
        v.add_event("e", reject_all).unwrap();
        assert_matches!(v.add_event("e", reject_all), Err(TetherError::Build(_)));
        // functions and events are separate namespaces
        v.add_function("e", reject_all).unwrap();
    }

    #[test]
    fn require_keys_checks_presence() {
        let check = require_keys(&["a", "b"]);
        assert!(check(&json!({"a": 1, "b": 2})).is_ok());
        assert_eq!(check(&json!({"a": 1})), Err("missing 'b'".to_owned()));
        assert!(check(&json!([1])).is_err());
    }
}
