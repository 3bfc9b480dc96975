//! Request and response messages.
//!
//! Both directions are flat maps of string to string on the wire. A response
//! is either the script's stringified outputs or exactly the two error
//! fields; the presence of [`EXCEPTION_KEY`] is the only discriminator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use script_args::Arguments;

pub const NAME_KEY: &str = "name";
pub const CODE_KEY: &str = "code";
pub const ARGS_KEY: &str = "args";
pub const HEADLESS_KEY: &str = "headless";

pub const EXCEPTION_KEY: &str = "__exception__";
pub const STACKTRACE_KEY: &str = "stacktrace";

/// A decoded request frame. Unrecognized keys are carried but ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Request(HashMap<String, String>);

impl Request {
    pub fn new(fields: HashMap<String, String>) -> Self {
        Self(fields)
    }

    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Script identifier; its extension doubles as a language hint.
    pub fn name(&self) -> Option<&str> {
        self.get(NAME_KEY)
    }

    pub fn code(&self) -> Option<&str> {
        self.get(CODE_KEY)
    }

    pub fn args(&self) -> Option<&str> {
        self.get(ARGS_KEY)
    }

    /// True only when `headless` spells `true` (any case). Absent or
    /// unrecognized values mean interactive.
    pub fn is_headless(&self) -> bool {
        self.get(HEADLESS_KEY)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.0
    }
}

impl From<HashMap<String, String>> for Request {
    fn from(fields: HashMap<String, String>) -> Self {
        Self(fields)
    }
}

/// Composes requests on the client side.
///
/// Typed arguments are rendered into the `args` string with
/// [`script_args::render_arguments`], so they round-trip through the server's
/// argument parser.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    fields: HashMap<String, String>,
    arguments: Arguments,
    raw_args: Option<String>,
}

impl RequestBuilder {
    pub fn name(self, name: impl Into<String>) -> Self {
        self.field(NAME_KEY, name)
    }

    pub fn code(self, code: impl Into<String>) -> Self {
        self.field(CODE_KEY, code)
    }

    pub fn headless(self, headless: bool) -> Self {
        self.field(HEADLESS_KEY, headless.to_string())
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Send `args` verbatim instead of rendering typed arguments.
    pub fn raw_args(mut self, args: impl Into<String>) -> Self {
        self.raw_args = Some(args.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Request {
        let mut fields = self.fields;
        let args = self
            .raw_args
            .unwrap_or_else(|| script_args::render_arguments(&self.arguments));
        fields.insert(ARGS_KEY.to_string(), args);
        Request(fields)
    }
}

/// An outgoing response frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response(HashMap<String, String>);

impl Response {
    /// Success response: every output value in its string form.
    pub fn from_outputs(outputs: &serde_json::Map<String, Value>) -> Self {
        Self(
            outputs
                .iter()
                .map(|(key, value)| (key.clone(), stringify(value)))
                .collect(),
        )
    }

    /// Error response with exactly the `__exception__` and `stacktrace` fields.
    pub fn from_error(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self(HashMap::from([
            (EXCEPTION_KEY.to_string(), message.into()),
            (STACKTRACE_KEY.to_string(), trace.into()),
        ]))
    }

    pub fn is_error(&self) -> bool {
        self.0.contains_key(EXCEPTION_KEY)
    }

    pub fn exception(&self) -> Option<&str> {
        self.get(EXCEPTION_KEY)
    }

    pub fn stacktrace(&self) -> Option<&str> {
        self.get(STACKTRACE_KEY)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.0
    }

    pub fn into_fields(self) -> HashMap<String, String> {
        self.0
    }
}

impl From<HashMap<String, String>> for Response {
    fn from(fields: HashMap<String, String>) -> Self {
        Self(fields)
    }
}

/// String form of a typed value: strings verbatim, everything else as
/// compact JSON text (`null`, `4`, `true`, `[1,2]`).
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
