//! Command-turn dispatch: scanning generated text for a tool call, and the table `exec()`
//! consults to run it. Split into two pieces the way `json_command_scanner` and its caller
//! are split upstream — scanning text for a call is one concern, running the named handler is
//! another; the decoder only owns the second half, since the scanner's schema-declaration
//! machinery has no counterpart in a plain Rust closure table.

use std::collections::HashMap;

use serde_json::Value;

use crate::{Error, Result};

const PYTHON_TAG: &str = "<|python_tag|>";

pub struct CommandCall {
    pub name: String,
    pub parameters: Value,
}

/// Looks for a `<|python_tag|>{...}` suffix and parses the JSON object that follows it into a
/// command call. Returns `None` for plain text with no trailing tool call, or for a tag
/// followed by something that doesn't parse as `{"name": ..., "parameters": ...}` — a scan
/// miss is not an error, it just means there is nothing to dispatch.
pub fn scan_python_tag(text: &str) -> Option<CommandCall> {
    let tag_pos = text.find(PYTHON_TAG)?;
    let body = text[tag_pos + PYTHON_TAG.len()..].trim();
    let call: Value = serde_json::from_str(body).ok()?;
    let name = call.get("name")?.as_str()?.to_string();
    let parameters = call.get("parameters").cloned().unwrap_or(Value::Null);
    Some(CommandCall { name, parameters })
}

/// Registered command handlers, keyed by name. `exec()` looks a scanned call's name up here
/// and calls the handler with the call's parameters.
pub struct CommandTable {
    handlers: HashMap<String, Box<dyn Fn(Value) -> Value + Send + Sync>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn declare(&mut self, name: impl Into<String>, handler: impl Fn(Value) -> Value + Send + Sync + 'static) -> &mut Self {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    pub fn call(&self, name: &str, parameters: Value) -> Result<Value> {
        let handler = self.handlers.get(name).ok_or_else(|| Error::UnknownCommand(name.to_string()))?;
        Ok(handler(parameters))
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scan_extracts_name_and_parameters_after_the_tag() {
        let text = format!("{PYTHON_TAG}{}", json!({"name": "multiply", "parameters": {"a": 2, "b": 2}}));
        let call = scan_python_tag(&text).unwrap();
        assert_eq!(call.name, "multiply");
        assert_eq!(call.parameters, json!({"a": 2, "b": 2}));
    }

    #[test]
    fn scan_returns_none_for_plain_text() {
        assert!(scan_python_tag("just an answer, no tool call").is_none());
    }

    #[test]
    fn scan_returns_none_for_malformed_json_after_the_tag() {
        let text = format!("{PYTHON_TAG}not json");
        assert!(scan_python_tag(&text).is_none());
    }

    #[test]
    fn declared_handler_runs_with_the_call_parameters() {
        let mut table = CommandTable::new();
        table.declare("multiply", |params| {
            let a = params["a"].as_f64().unwrap_or(0.0);
            let b = params["b"].as_f64().unwrap_or(0.0);
            json!(a * b)
        });
        let result = table.call("multiply", json!({"a": 2, "b": 2})).unwrap();
        assert_eq!(result, json!(4.0));
    }

    #[test]
    fn calling_an_undeclared_command_is_an_error() {
        let table = CommandTable::new();
        assert!(matches!(table.call("missing", Value::Null), Err(Error::UnknownCommand(ref n)) if n == "missing"));
    }
}
