//! Server loop: receive, process, reply, repeat.
//!
//! Every received frame is answered exactly once. Decoding, argument
//! parsing, script execution and encoding failures, and panics in any
//! collaborator, all become error responses; none of them can leave the
//! loop. Binding the socket is the only fallible step and happens before
//! the loop starts.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinError;

use crate::bridge::codec::WireCodec;
use crate::bridge::protocol::Response;
use crate::bridge::transport::{Exchange, ReplySocket};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::engine::{ArgumentParser, HeadlessToggle, ScriptEngine};
use crate::error::ServerError;

/// Turns one request frame into one response frame. Cannot fail.
pub struct RequestHandler<E, P, T> {
    codec: WireCodec,
    dispatcher: Dispatcher<E, P, T>,
}

impl<E, P, T> RequestHandler<E, P, T>
where
    E: ScriptEngine,
    P: ArgumentParser,
    T: HeadlessToggle,
{
    pub fn new(dispatcher: Dispatcher<E, P, T>) -> Self {
        Self {
            codec: WireCodec::new(),
            dispatcher,
        }
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    pub fn handle(&self, frame: &[u8]) -> Bytes {
        let response = self.process(frame).unwrap_or_else(|err| error_response(&err));
        self.codec.encode_response(&response)
    }

    fn process(&self, frame: &[u8]) -> Result<Response, ServerError> {
        let request = self.codec.decode_request(frame)?;
        self.dispatcher.dispatch(&request)
    }
}

/// The scripting server: a bound reply socket plus the request handler.
pub struct ScriptServer<E, P, T> {
    socket: ReplySocket,
    handler: Arc<RequestHandler<E, P, T>>,
}

impl<E, P, T> ScriptServer<E, P, T>
where
    E: ScriptEngine,
    P: ArgumentParser,
    T: HeadlessToggle,
{
    /// Bind the configured address. Failing here is fatal for the caller.
    pub async fn bind(
        config: &ServerConfig,
        dispatcher: Dispatcher<E, P, T>,
    ) -> Result<Self, ServerError> {
        let socket = ReplySocket::bind(&config.bind, config.max_frame_length).await?;
        Ok(Self {
            socket,
            handler: Arc::new(RequestHandler::new(dispatcher)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Serve requests one at a time until the process is stopped.
    pub async fn serve(mut self) {
        tracing::info!(address = %self.local_addr(), "Scripting server listening");

        while let Some(exchange) = self.socket.recv().await {
            self.answer(exchange).await;
        }

        tracing::error!("Reply socket closed, server loop exiting");
    }

    async fn answer(&self, exchange: Exchange) {
        let connection = exchange.connection();
        let peer = exchange.peer();
        tracing::debug!(%connection, %peer, frame_bytes = exchange.frame().len(), "Processing request");

        let handler = Arc::clone(&self.handler);
        let frame = exchange.frame().clone();
        // Scripts block; run them off the async workers and wait before the
        // next receive.
        let payload = match tokio::task::spawn_blocking(move || handler.handle(&frame)).await {
            Ok(payload) => payload,
            Err(e) => {
                let err = ServerError::Panicked(panic_message(e));
                self.handler.codec().encode_response(&error_response(&err))
            }
        };

        if !exchange.reply(payload) {
            tracing::warn!(%connection, %peer, "Peer went away before the reply was sent");
        }
    }
}

fn error_response(err: &ServerError) -> Response {
    tracing::error!(kind = err.kind(), error = %err, "Request failed");
    err.to_response()
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
