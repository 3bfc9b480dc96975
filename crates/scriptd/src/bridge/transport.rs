//! Reply socket: request-reply exchanges over TCP.
//!
//! Any number of peers may connect. Each connection gets a reader task that
//! forwards one frame at a time to the owner of the [`ReplySocket`] and does
//! not read that connection's next frame until the reply has been written.
//! The owner receives [`Exchange`]s one by one, so every connection sees
//! strict request/reply alternation and processing stays sequential.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use super::codec::frame_codec;
use crate::error::ServerError;

/// Back-off after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Turn `tcp://host:port` or `host:port` into a socket address string.
///
/// `*` as host means all interfaces.
pub fn resolve_address(address: &str) -> io::Result<String> {
    let target = match address.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported transport scheme '{scheme}', expected tcp"),
            ));
        }
        None => address,
    };

    let Some((host, port)) = target.rsplit_once(':') else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("missing port in address '{address}'"),
        ));
    };
    if host.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("missing host in address '{address}'"),
        ));
    }
    if port.parse::<u16>().is_err() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid port '{port}' in address '{address}'"),
        ));
    }

    let host = if host == "*" { "0.0.0.0" } else { host };
    Ok(format!("{host}:{port}"))
}

/// Identifies one peer connection in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One received request frame awaiting its reply.
///
/// Replying consumes the exchange, so a frame can be answered at most once.
/// Dropping it unanswered closes the peer's connection.
#[must_use = "every received frame must be answered"]
#[derive(Debug)]
pub struct Exchange {
    connection: ConnectionId,
    peer: SocketAddr,
    frame: Bytes,
    reply: oneshot::Sender<Bytes>,
}

impl Exchange {
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Hand the reply to the connection writer.
    ///
    /// Returns false when the peer has already gone away.
    pub fn reply(self, payload: Bytes) -> bool {
        self.reply.send(payload).is_ok()
    }
}

/// Bound request-reply endpoint.
pub struct ReplySocket {
    local_addr: SocketAddr,
    exchanges: mpsc::Receiver<Exchange>,
    acceptor: JoinHandle<()>,
}

impl ReplySocket {
    /// Bind the listening socket. This is the only fallible step of serving.
    pub async fn bind(address: &str, max_frame_length: usize) -> Result<Self, ServerError> {
        let target = resolve_address(address).map_err(|e| ServerError::bind(address, e))?;
        let listener = TcpListener::bind(&target)
            .await
            .map_err(|e| ServerError::bind(address, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::bind(address, e))?;

        tracing::debug!(%address, %local_addr, max_frame_length, "Bound reply socket");

        // Capacity 1: reader tasks queue at most one frame ahead of the loop.
        let (tx, exchanges) = mpsc::channel(1);
        let acceptor = tokio::spawn(accept_loop(listener, tx, max_frame_length));

        Ok(Self {
            local_addr,
            exchanges,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next request frame from any peer.
    ///
    /// Returns `None` only if the accept loop has terminated.
    pub async fn recv(&mut self) -> Option<Exchange> {
        self.exchanges.recv().await
    }
}

impl Drop for ReplySocket {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Exchange>, max_frame_length: usize) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let connection = ConnectionId::new();
                    tracing::debug!(%connection, %peer, "Peer connected");
                    tokio::spawn(connection_task(
                        stream,
                        peer,
                        connection,
                        tx.clone(),
                        max_frame_length,
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
            () = tx.closed() => {
                tracing::debug!("Reply socket dropped, accept loop exiting");
                break;
            }
        }
    }
}

async fn connection_task(
    stream: TcpStream,
    peer: SocketAddr,
    connection: ConnectionId,
    tx: mpsc::Sender<Exchange>,
    max_frame_length: usize,
) {
    let mut framed = Framed::new(stream, frame_codec(max_frame_length));

    loop {
        let frame = match framed.next().await {
            Some(Ok(frame)) => frame.freeze(),
            Some(Err(e)) => {
                // The stream is out of sync after a bad length header; only
                // this peer is affected.
                tracing::warn!(%connection, %peer, error = %e, "Framing error, closing connection");
                break;
            }
            None => {
                tracing::debug!(%connection, %peer, "Peer disconnected");
                break;
            }
        };

        tracing::trace!(%connection, frame_bytes = frame.len(), "Request frame received");
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = Exchange {
            connection,
            peer,
            frame,
            reply: reply_tx,
        };
        if tx.send(exchange).await.is_err() {
            tracing::debug!(%connection, "Server loop gone, closing connection");
            break;
        }

        let payload = match reply_rx.await {
            Ok(payload) => payload,
            Err(_) => {
                tracing::error!(%connection, %peer, "Exchange dropped without a reply, closing connection");
                break;
            }
        };

        let reply_bytes = payload.len();
        if let Err(e) = framed.send(payload).await {
            tracing::warn!(%connection, %peer, error = %e, "Failed to write reply");
            break;
        }
        tracing::trace!(%connection, reply_bytes, "Reply frame sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_supported_address_forms() {
        assert_eq!(
            resolve_address("tcp://localhost:12345").unwrap(),
            "localhost:12345"
        );
        assert_eq!(resolve_address("127.0.0.1:0").unwrap(), "127.0.0.1:0");
        assert_eq!(resolve_address("tcp://*:5555").unwrap(), "0.0.0.0:5555");
        assert_eq!(resolve_address("tcp://[::1]:80").unwrap(), "[::1]:80");
    }

    #[test]
    fn rejects_invalid_addresses() {
        for address in [
            "ipc:///tmp/sock",
            "tcp://localhost",
            "tcp://:80",
            "localhost:http",
            "localhost:70000",
        ] {
            let err = resolve_address(address).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{address}");
        }
    }

    #[tokio::test]
    async fn bind_failure_is_reported_not_panicked() {
        let first = ReplySocket::bind("tcp://127.0.0.1:0", 1024).await.unwrap();
        let taken = format!("tcp://{}", first.local_addr());

        let err = ReplySocket::bind(&taken, 1024).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));

        let err = ReplySocket::bind("udp://127.0.0.1:0", 1024).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn replies_travel_back_on_the_same_connection() {
        let mut socket = ReplySocket::bind("127.0.0.1:0", 1024).await.unwrap();
        let stream = TcpStream::connect(socket.local_addr()).await.unwrap();
        let mut client = Framed::new(stream, frame_codec(1024));

        client.send(Bytes::from_static(b"ping")).await.unwrap();
        let exchange = socket.recv().await.unwrap();
        assert_eq!(&exchange.frame()[..], b"ping");
        assert!(exchange.reply(Bytes::from_static(b"pong")));

        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(&reply[..], b"pong");
    }

    #[tokio::test]
    async fn dropped_exchange_closes_the_peer_connection() {
        let mut socket = ReplySocket::bind("127.0.0.1:0", 1024).await.unwrap();
        let stream = TcpStream::connect(socket.local_addr()).await.unwrap();
        let mut client = Framed::new(stream, frame_codec(1024));

        client.send(Bytes::from_static(b"ping")).await.unwrap();
        drop(socket.recv().await.unwrap());

        assert!(client.next().await.is_none_or(|r| r.is_err()));
    }
}
