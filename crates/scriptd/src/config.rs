//! Server configuration.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::bridge::codec::DEFAULT_MAX_FRAME_LENGTH;

/// Address the original scripting server listened on.
pub const DEFAULT_BIND_ADDRESS: &str = "tcp://127.0.0.1:12345";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid interpreter override '{0}', expected EXT=PROGRAM [ARGS...]")]
    InvalidOverride(String),

    #[error("interpreter command is empty")]
    EmptyInterpreter,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `tcp://host:port` or `host:port`.
    pub bind: String,
    /// Largest accepted request frame, in bytes.
    pub max_frame_length: usize,
    /// Interpreters used by the command engine.
    pub interpreters: InterpreterTable,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND_ADDRESS.to_string(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            interpreters: InterpreterTable::default(),
        }
    }
}

/// A program plus fixed leading arguments; the script path is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
}

impl Interpreter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

impl FromStr for Interpreter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ConfigError::EmptyInterpreter)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

/// Maps script name extensions to interpreters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterTable {
    by_extension: HashMap<String, Interpreter>,
    fallback: Interpreter,
}

impl Default for InterpreterTable {
    fn default() -> Self {
        let by_extension = [
            ("py", "python3"),
            ("sh", "sh"),
            ("bash", "bash"),
            ("js", "node"),
            ("rb", "ruby"),
            ("pl", "perl"),
        ]
        .into_iter()
        .map(|(ext, program)| (ext.to_string(), Interpreter::new(program)))
        .collect();

        Self {
            by_extension,
            fallback: Interpreter::new("sh"),
        }
    }
}

impl InterpreterTable {
    pub fn insert(&mut self, extension: impl Into<String>, interpreter: Interpreter) {
        let extension = extension.into();
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        self.by_extension.insert(extension, interpreter);
    }

    pub fn set_fallback(&mut self, interpreter: Interpreter) {
        self.fallback = interpreter;
    }

    /// Apply an `EXT=PROGRAM [ARGS...]` override.
    pub fn apply_override(&mut self, spec: &str) -> Result<(), ConfigError> {
        let (extension, command) = spec
            .split_once('=')
            .filter(|(ext, _)| !ext.trim().is_empty())
            .ok_or_else(|| ConfigError::InvalidOverride(spec.to_string()))?;
        self.insert(extension.trim(), command.parse()?);
        Ok(())
    }

    /// Pick the interpreter for a script name by its extension.
    pub fn resolve(&self, name: &str) -> &Interpreter {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.by_extension.get(&ext.to_ascii_lowercase()))
            .unwrap_or(&self.fallback)
    }
}
