//! Shared fixtures: a scripted engine, a recording headless toggle and a
//! server running on an ephemeral loopback port.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use scriptd::{
    Dispatcher, ExecutionError, HeadlessToggle, KeyValueParser, Outputs, ScriptEngine,
    ScriptInvocation, ScriptServer, ServerConfig,
};

/// What the collaborators saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Headless(bool),
    Started(String),
    Finished(String),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

// A panicking script poisons the log (the recorder runs during unwinding);
// the data is still consistent.
fn record(log: &EventLog, event: Event) {
    log.lock().unwrap_or_else(|e| e.into_inner()).push(event);
}

/// Engine understanding a handful of one-line "scripts":
///
/// - `return A+B`: `{result: A+B}`
/// - `throw MSG`: execution error with message MSG
/// - `echo`: outputs are the parsed arguments
/// - `sleep MS TAG`: blocks for MS milliseconds, then `{result: TAG}`
/// - `panic`: panics
/// - anything else: `{code: <the code>}`
pub struct ScriptedEngine {
    events: EventLog,
    running: AtomicBool,
    overlaps: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            running: AtomicBool::new(false),
            overlaps: AtomicUsize::new(0),
        }
    }

    /// Number of times a run started while another was still in progress.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn execute(&self, invocation: &ScriptInvocation<'_>) -> Result<Outputs, ExecutionError> {
        let code = invocation.code.unwrap_or_default();
        let mut outputs = Outputs::new();

        if let Some(expr) = code.strip_prefix("return ") {
            let (a, b) = expr
                .split_once('+')
                .ok_or_else(|| ExecutionError::new(format!("cannot evaluate {expr}")))?;
            let sum = a.trim().parse::<i64>().unwrap_or(0) + b.trim().parse::<i64>().unwrap_or(0);
            outputs.insert("result".into(), json!(sum));
        } else if let Some(message) = code.strip_prefix("throw ") {
            return Err(ExecutionError::new(message));
        } else if code == "echo" {
            outputs = invocation.arguments.clone();
        } else if let Some(rest) = code.strip_prefix("sleep ") {
            let (millis, tag) = rest.split_once(' ').unwrap_or((rest, ""));
            std::thread::sleep(Duration::from_millis(millis.parse().unwrap_or(0)));
            outputs.insert("result".into(), json!(tag));
        } else if code == "panic" {
            panic!("engine blew up");
        } else {
            outputs.insert("code".into(), json!(code));
        }

        Ok(outputs)
    }
}

impl ScriptEngine for ScriptedEngine {
    fn run(&self, invocation: ScriptInvocation<'_>) -> Result<Outputs, ExecutionError> {
        let code = invocation.code.unwrap_or_default().to_string();
        if self.running.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        record(&self.events, Event::Started(code.clone()));

        // Reset the running flag even if the script panics.
        struct Finish<'a>(&'a ScriptedEngine, String);
        impl Drop for Finish<'_> {
            fn drop(&mut self) {
                record(&self.0.events, Event::Finished(std::mem::take(&mut self.1)));
                self.0.running.store(false, Ordering::SeqCst);
            }
        }
        let _finish = Finish(self, code);

        self.execute(&invocation)
    }
}

pub struct RecordingToggle {
    events: EventLog,
}

impl HeadlessToggle for RecordingToggle {
    fn set_headless(&self, headless: bool) {
        record(&self.events, Event::Headless(headless));
    }
}

pub struct TestServer {
    pub address: String,
    pub engine: Arc<ScriptedEngine>,
    pub events: EventLog,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServerConfig {
            bind: "tcp://127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        })
        .await
    }

    pub async fn start_with(config: ServerConfig) -> Self {
        let events: EventLog = Arc::default();
        let engine = Arc::new(ScriptedEngine::new(Arc::clone(&events)));
        let toggle = Arc::new(RecordingToggle {
            events: Arc::clone(&events),
        });
        let dispatcher = Dispatcher::new(Arc::clone(&engine), Arc::new(KeyValueParser), toggle);

        let server = ScriptServer::bind(&config, dispatcher)
            .await
            .expect("bind test server");
        let address = format!("tcp://{}", server.local_addr());
        let task = tokio::spawn(server.serve());

        Self {
            address,
            engine,
            events,
            task,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn headless_calls(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Headless(value) => Some(value),
                _ => None,
            })
            .collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
