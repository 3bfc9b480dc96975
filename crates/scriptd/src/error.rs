//! Error taxonomy for the scripting server.
//!
//! Every variant except [`ServerError::Bind`] is recovered inside the server
//! loop and turned into an error [`Response`]. Bind failures happen before
//! any peer exists and abort startup instead.

use std::error::Error as StdError;
use std::fmt::Write as _;

use crate::bridge::protocol::Response;

/// `__exception__` text for frames that are not a flat string map.
pub const MALFORMED_MESSAGE: &str = "message must be a map of string to string";

/// Failure raised by a script engine while running a script.
///
/// Engines that have their own notion of a stack trace (interpreter
/// tracebacks, captured stderr) attach it with [`ExecutionError::with_trace`];
/// it is shipped verbatim in the `stacktrace` field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionError {
    message: String,
    trace: Option<String>,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }
}

/// The argument string could not be turned into typed arguments.
///
/// Carries the parser's message only; it is the last link of the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<script_args::ArgsError> for ParseError {
    fn from(err: script_args::ArgsError) -> Self {
        Self::new(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The frame payload is not a flat map of string to string.
    #[error("message must be a map of string to string")]
    MalformedMessage(#[source] rmp_serde::decode::Error),

    #[error("invalid script arguments: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("failed to encode response: {0}")]
    Encoding(#[from] rmp_serde::encode::Error),

    /// The listening address could not be acquired. Fatal at startup.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// A collaborator panicked while the request was being processed.
    #[error("script execution panicked: {0}")]
    Panicked(String),
}

impl ServerError {
    pub fn bind(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            source,
        }
    }

    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "malformed_message",
            Self::Parse(_) => "parse",
            Self::Execution(_) => "execution",
            Self::Encoding(_) => "encoding",
            Self::Bind { .. } => "bind",
            Self::Panicked(_) => "panicked",
        }
    }

    /// Full textual trace for the `stacktrace` field.
    ///
    /// Uses the engine's own trace when it supplied one, otherwise the
    /// error message followed by its whole `source()` chain.
    pub fn trace(&self) -> String {
        if let Self::Execution(err) = self
            && let Some(trace) = err.trace()
        {
            if trace.contains(err.message()) {
                return trace.to_string();
            }
            return format!("{}\n\n{}", err.message(), trace);
        }
        render_chain(self)
    }

    /// Build the two-field error response for this failure.
    pub fn to_response(&self) -> Response {
        Response::from_error(self.to_string(), self.trace())
    }
}

/// Render an error and its causes, one per line, in the style of `anyhow`.
pub fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = format!("{}: {}", error_name(err), err);
    let mut cause = err.source();
    if cause.is_some() {
        out.push_str("\n\nCaused by:");
    }
    let mut depth = 0;
    while let Some(err) = cause {
        let _ = write!(out, "\n    {depth}: {err}");
        depth += 1;
        cause = err.source();
    }
    out
}

fn error_name(err: &(dyn StdError + 'static)) -> &'static str {
    if let Some(err) = err.downcast_ref::<ServerError>() {
        return match err {
            ServerError::MalformedMessage(_) => "MalformedMessage",
            ServerError::Parse(_) => "ParseError",
            ServerError::Execution(_) => "ExecutionError",
            ServerError::Encoding(_) => "EncodingError",
            ServerError::Bind { .. } => "BindFailure",
            ServerError::Panicked(_) => "Panic",
        };
    }
    "Error"
}
