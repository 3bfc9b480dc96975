//! Collaborator traits the dispatcher depends on.
//!
//! Production wiring supplies [`crate::command_engine::CommandEngine`],
//! [`KeyValueParser`] and [`HeadlessFlag`]; tests supply doubles.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

pub use script_args::Arguments;

use crate::error::{ExecutionError, ParseError};

/// Named outputs produced by a script run.
pub type Outputs = serde_json::Map<String, Value>;

/// Everything an engine needs to run one script.
#[derive(Debug, Clone)]
pub struct ScriptInvocation<'a> {
    /// Script identifier / language hint. Not validated.
    pub name: Option<&'a str>,
    /// Script source. Not validated; engines reject what they cannot run.
    pub code: Option<&'a str>,
    pub arguments: Arguments,
    /// Ask the engine to pre-process inputs (bind arguments to the script's
    /// declared parameters) before running. Always set by the dispatcher.
    pub preprocess: bool,
}

/// Compiles or interprets a script and produces named outputs.
///
/// `run` blocks until the script has finished.
pub trait ScriptEngine: Send + Sync + 'static {
    fn run(&self, invocation: ScriptInvocation<'_>) -> Result<Outputs, ExecutionError>;
}

/// Turns the request's `args` string into typed arguments.
pub trait ArgumentParser: Send + Sync + 'static {
    fn parse(&self, input: &str) -> Result<Arguments, ParseError>;
}

/// Process-wide switch between headless and interactive mode.
pub trait HeadlessToggle: Send + Sync + 'static {
    fn set_headless(&self, headless: bool);
}

/// Parser for `key=value,key2="text"` argument strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyValueParser;

impl ArgumentParser for KeyValueParser {
    fn parse(&self, input: &str) -> Result<Arguments, ParseError> {
        Ok(script_args::parse(input)?)
    }
}

/// Headless mode as a process-wide atomic flag. Starts interactive.
#[derive(Debug, Default)]
pub struct HeadlessFlag(AtomicBool);

impl HeadlessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_headless(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl HeadlessToggle for HeadlessFlag {
    fn set_headless(&self, headless: bool) {
        let previous = self.0.swap(headless, Ordering::SeqCst);
        if previous != headless {
            tracing::debug!(headless, "Headless mode changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_value_parser_maps_errors() {
        let args = KeyValueParser.parse(r#"x=1,label="a b""#).unwrap();
        assert_eq!(args["x"], json!(1));
        assert_eq!(args["label"], json!("a b"));

        let err = KeyValueParser.parse("x=[1").unwrap_err();
        assert_eq!(err.to_string(), "unterminated list starting at offset 2");
    }

    #[test]
    fn headless_flag_is_idempotent() {
        let flag = HeadlessFlag::new();
        assert!(!flag.is_headless());

        flag.set_headless(true);
        flag.set_headless(true);
        assert!(flag.is_headless());

        flag.set_headless(false);
        assert!(!flag.is_headless());
    }
}
