//! Request side of the protocol.
//!
//! A client owns one connection and performs strict request/reply
//! exchanges on it: each call sends one frame and waits for exactly one
//! reply before returning.

use std::io;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::bridge::codec::{DEFAULT_MAX_FRAME_LENGTH, WireCodec, frame_codec};
use crate::bridge::protocol::{Request, Response};
use crate::bridge::transport::resolve_address;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode request: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("malformed response: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("server closed the connection before replying")]
    Closed,
}

pub struct ScriptClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    codec: WireCodec,
}

impl ScriptClient {
    /// Connect to a server at `tcp://host:port` or `host:port`.
    pub async fn connect(address: &str) -> Result<Self, ClientError> {
        let connect_err = |source| ClientError::Connect {
            address: address.to_string(),
            source,
        };
        let target = resolve_address(address).map_err(connect_err)?;
        let stream = TcpStream::connect(&target).await.map_err(connect_err)?;
        stream.set_nodelay(true)?;

        Ok(Self {
            framed: Framed::new(stream, frame_codec(DEFAULT_MAX_FRAME_LENGTH)),
            codec: WireCodec::new(),
        })
    }

    /// Run a script remotely. Script failures come back as an error
    /// [`Response`], not as `Err`.
    pub async fn run(&mut self, request: &Request) -> Result<Response, ClientError> {
        let payload = self.codec.encode_request(request)?;
        self.send_raw(payload).await
    }

    /// Send an arbitrary payload as one frame and wait for the reply.
    pub async fn send_raw(&mut self, payload: impl Into<Bytes>) -> Result<Response, ClientError> {
        self.framed.send(payload.into()).await?;
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(self.codec.decode_response(&frame)?),
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_reports_address() {
        let err = ScriptClient::connect("ipc:///tmp/nope").await.err().unwrap();
        assert!(matches!(err, ClientError::Connect { .. }));
        assert!(err.to_string().starts_with("failed to connect to ipc:///tmp/nope"));
    }
}
