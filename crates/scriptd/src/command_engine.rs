//! Script engine that runs scripts through an interpreter subprocess.
//!
//! The script source is written to a temporary file whose extension matches
//! the request name, then handed to the interpreter picked from the
//! [`InterpreterTable`]. Arguments reach the script as environment
//! variables:
//!
//! - `SCRIPT_ARG_<KEY>`: each argument in string form (key upper-cased,
//!   non-alphanumerics replaced by `_`)
//! - `SCRIPT_ARGS_JSON`: all arguments as one JSON object
//! - `SCRIPT_NAME`, `SCRIPT_HEADLESS`
//!
//! Outputs are read from stdout: each `@output key=value` line declares one.
//! A script that declares none yields a single `result` output holding its
//! last non-empty stdout line, or `null` when it printed nothing.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde_json::Value;

use crate::bridge::protocol::stringify;
use crate::config::InterpreterTable;
use crate::engine::{HeadlessFlag, Outputs, ScriptEngine, ScriptInvocation};
use crate::error::ExecutionError;

const OUTPUT_PREFIX: &str = "@output ";
const RESULT_KEY: &str = "result";

pub struct CommandEngine {
    interpreters: InterpreterTable,
    headless: Arc<HeadlessFlag>,
}

impl CommandEngine {
    pub fn new(interpreters: InterpreterTable, headless: Arc<HeadlessFlag>) -> Self {
        Self {
            interpreters,
            headless,
        }
    }
}

impl ScriptEngine for CommandEngine {
    fn run(&self, invocation: ScriptInvocation<'_>) -> Result<Outputs, ExecutionError> {
        let code = invocation
            .code
            .ok_or_else(|| ExecutionError::new("no script code provided"))?;
        let name = invocation.name.unwrap_or("script");
        let interpreter = self.interpreters.resolve(name);

        let script = write_script(name, code)?;

        let mut command = Command::new(&interpreter.program);
        command
            .args(&interpreter.args)
            .arg(script.path())
            .env("SCRIPT_NAME", name)
            .env("SCRIPT_HEADLESS", self.headless.is_headless().to_string())
            .env(
                "SCRIPT_ARGS_JSON",
                Value::Object(invocation.arguments.clone()).to_string(),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if invocation.preprocess {
            for (key, value) in &invocation.arguments {
                command.env(format!("SCRIPT_ARG_{}", env_key(key)), stringify(value));
            }
        }

        tracing::debug!(
            program = %interpreter.program,
            script = %script.path().display(),
            "Spawning interpreter"
        );
        let output = command.output().map_err(|e| {
            ExecutionError::new(format!(
                "failed to start interpreter '{}': {e}",
                interpreter.program
            ))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let message = last_line(&stderr)
                .map(str::to_string)
                .unwrap_or_else(|| format!("script exited with {}", output.status));
            return Err(ExecutionError::new(message).with_trace(stderr.into_owned()));
        }
        if !stderr.is_empty() {
            tracing::debug!(stderr = %stderr.trim_end(), "Script wrote to stderr");
        }

        Ok(collect_outputs(&stdout))
    }
}

fn write_script(name: &str, code: &str) -> Result<tempfile::NamedTempFile, ExecutionError> {
    let suffix = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let mut file = tempfile::Builder::new()
        .prefix("scriptd-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| ExecutionError::new(format!("failed to create script file: {e}")))?;
    file.write_all(code.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| ExecutionError::new(format!("failed to write script file: {e}")))?;
    Ok(file)
}

fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rev().find(|line| !line.is_empty())
}

fn collect_outputs(stdout: &str) -> Outputs {
    let mut outputs = Outputs::new();
    for line in stdout.lines() {
        if let Some(declaration) = line.strip_prefix(OUTPUT_PREFIX)
            && let Some((key, value)) = declaration.split_once('=')
            && !key.trim().is_empty()
        {
            outputs.insert(key.trim().to_string(), Value::String(value.to_string()));
        }
    }

    if outputs.is_empty() {
        let result = last_line(stdout).map_or(Value::Null, |line| Value::String(line.to_string()));
        outputs.insert(RESULT_KEY.to_string(), result);
    }
    outputs
}
