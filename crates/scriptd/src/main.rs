use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use scriptd::bridge::codec::DEFAULT_MAX_FRAME_LENGTH;
use scriptd::{
    CommandEngine, DEFAULT_BIND_ADDRESS, Dispatcher, HeadlessFlag, KeyValueParser, ScriptServer,
    ServerConfig,
};

/// Serve script execution requests over a request-reply socket.
#[derive(Debug, Parser)]
#[command(name = "scriptd", version)]
struct Cli {
    /// Address to listen on (tcp://host:port or host:port).
    #[arg(long, env = "SCRIPTD_BIND", default_value = DEFAULT_BIND_ADDRESS)]
    bind: String,

    /// Largest accepted request frame in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LENGTH)]
    max_frame_bytes: usize,

    /// Interpreter for a script extension, e.g. `py=python3 -u`. Repeatable.
    #[arg(long = "interpreter", value_name = "EXT=PROGRAM")]
    interpreters: Vec<String>,

    /// Interpreter for scripts whose name has no known extension.
    #[arg(long, value_name = "PROGRAM")]
    default_interpreter: Option<String>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = ServerConfig {
            bind: self.bind,
            max_frame_length: self.max_frame_bytes,
            ..ServerConfig::default()
        };
        for spec in &self.interpreters {
            config.interpreters.apply_override(spec)?;
        }
        if let Some(program) = self.default_interpreter {
            config.interpreters.set_fallback(program.parse()?);
        }
        Ok(config)
    }
}

/// Initialize tracing with SCRIPTD_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("SCRIPTD_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("scriptd={level},script_args={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    info!("scriptd {}", env!("CARGO_PKG_VERSION"));

    let config = cli.into_config()?;

    let headless = Arc::new(HeadlessFlag::new());
    let engine = Arc::new(CommandEngine::new(
        config.interpreters.clone(),
        Arc::clone(&headless),
    ));
    let dispatcher = Dispatcher::new(engine, Arc::new(KeyValueParser), headless);

    let server = match ScriptServer::bind(&config, dispatcher).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to start scripting server");
            return Err(e.into());
        }
    };

    tokio::select! {
        () = server.serve() => Ok(()),
        () = shutdown_signal() => {
            info!("Shutdown signal received, exiting");
            // Dropping the runtime would wait on a script still running in
            // the blocking pool.
            std::process::exit(0);
        }
    }
}

/// Resolves on SIGINT or SIGTERM. There is no drain: an in-flight script is
/// abandoned with the process.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
