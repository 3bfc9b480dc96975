//! scriptd: request-reply server that runs scripts and returns their outputs.

pub mod bridge;
pub mod client;
pub mod command_engine;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod server;

pub use bridge::protocol::{Request, RequestBuilder, Response};
pub use client::{ClientError, ScriptClient};
pub use command_engine::CommandEngine;
pub use config::{DEFAULT_BIND_ADDRESS, Interpreter, InterpreterTable, ServerConfig};
pub use dispatcher::Dispatcher;
pub use engine::{
    ArgumentParser, Arguments, HeadlessFlag, HeadlessToggle, KeyValueParser, Outputs,
    ScriptEngine, ScriptInvocation,
};
pub use error::{ExecutionError, ParseError, ServerError};
pub use server::{RequestHandler, ScriptServer};
