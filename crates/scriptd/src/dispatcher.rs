//! Execution dispatcher: one decoded request in, one response out.

use std::sync::Arc;

use crate::bridge::protocol::{Request, Response};
use crate::engine::{ArgumentParser, HeadlessToggle, ScriptEngine, ScriptInvocation};
use crate::error::ServerError;

/// Runs requests against the script engine.
///
/// Holds the engine, argument parser and headless toggle as explicit
/// dependencies. Errors are returned, not converted; turning them into
/// error responses is the server loop's job.
pub struct Dispatcher<E, P, T> {
    engine: Arc<E>,
    parser: Arc<P>,
    headless: Arc<T>,
}

impl<E, P, T> Dispatcher<E, P, T>
where
    E: ScriptEngine,
    P: ArgumentParser,
    T: HeadlessToggle,
{
    pub fn new(engine: Arc<E>, parser: Arc<P>, headless: Arc<T>) -> Self {
        Self {
            engine,
            parser,
            headless,
        }
    }

    /// Run one request to completion.
    ///
    /// The headless toggle is set on every request and stays set until the
    /// next one changes it. A missing `args` field means no arguments.
    pub fn dispatch(&self, request: &Request) -> Result<Response, ServerError> {
        let headless = request.is_headless();
        self.headless.set_headless(headless);

        let arguments = self.parser.parse(request.args().unwrap_or_default())?;

        let invocation = ScriptInvocation {
            name: request.name(),
            code: request.code(),
            arguments,
            preprocess: true,
        };
        tracing::debug!(
            name = invocation.name.unwrap_or("<unnamed>"),
            headless,
            arguments = invocation.arguments.len(),
            "Running script"
        );

        let outputs = self.engine.run(invocation)?;
        tracing::debug!(outputs = outputs.len(), "Script finished");

        Ok(Response::from_outputs(&outputs))
    }
}
