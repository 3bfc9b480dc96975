//! Framing and payload codecs.
//!
//! Frames use LengthDelimitedCodec (4-byte big-endian length prefix).
//! Payloads are MessagePack maps of string to string, decoded strictly:
//! anything else is a malformed message, including trailing bytes.

use std::collections::HashMap;
use std::io::Cursor;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

use super::protocol::{EXCEPTION_KEY, Request, Response, STACKTRACE_KEY};
use crate::error::ServerError;

/// Default upper bound for a single frame payload (64 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Message carried by the last-resort reply when no response can be encoded.
const ENCODING_FAILED: &str = "failed to encode response";

/// Length-prefixed frame codec shared by server and client.
pub fn frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// MessagePack codec for flat string maps.
///
/// Created once per server and reused for every exchange.
#[derive(Debug, Clone)]
pub struct WireCodec {
    fallback: Bytes,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec {
    pub fn new() -> Self {
        Self {
            fallback: minimal_error_payload(),
        }
    }

    pub fn decode_request(&self, payload: &[u8]) -> Result<Request, ServerError> {
        decode_map(payload)
            .map(Request::new)
            .map_err(ServerError::MalformedMessage)
    }

    pub fn decode_response(&self, payload: &[u8]) -> Result<Response, rmp_serde::decode::Error> {
        decode_map(payload).map(Response::from)
    }

    pub fn encode_request(&self, request: &Request) -> Result<Bytes, rmp_serde::encode::Error> {
        encode(request)
    }

    pub fn try_encode_response(&self, response: &Response) -> Result<Bytes, ServerError> {
        Ok(encode(response)?)
    }

    /// Encode a response, never failing.
    ///
    /// An unencodable response is replaced by an error response describing
    /// the encoding failure; if even that fails, a fixed pre-encoded error
    /// payload is returned.
    pub fn encode_response(&self, response: &Response) -> Bytes {
        let err = match self.try_encode_response(response) {
            Ok(payload) => return payload,
            Err(err) => err,
        };

        tracing::error!(error = %err, "Failed to encode response, sending error response instead");
        match self.try_encode_response(&err.to_response()) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode error response, sending minimal reply");
                self.fallback.clone()
            }
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, rmp_serde::encode::Error> {
    let payload = rmp_serde::to_vec_named(value)?;
    tracing::trace!(payload_bytes = payload.len(), "Encoded payload");
    Ok(Bytes::from(payload))
}

fn decode_map(payload: &[u8]) -> Result<HashMap<String, String>, rmp_serde::decode::Error> {
    let mut de = rmp_serde::Deserializer::new(Cursor::new(payload));
    let fields = HashMap::<String, String>::deserialize(&mut de)?;

    let consumed = usize::try_from(de.get_ref().position()).unwrap_or(usize::MAX);
    if consumed < payload.len() {
        return Err(rmp_serde::decode::Error::Syntax(format!(
            "{} trailing bytes after message",
            payload.len() - consumed
        )));
    }
    Ok(fields)
}

/// `{"__exception__": ENCODING_FAILED, "stacktrace": ENCODING_FAILED}`,
/// written by hand so producing it cannot fail. All strings fit fixstr.
fn minimal_error_payload() -> Bytes {
    const FIXMAP_2: u8 = 0x82;
    const FIXSTR: u8 = 0xa0;

    let mut buf = vec![FIXMAP_2];
    for s in [EXCEPTION_KEY, ENCODING_FAILED, STACKTRACE_KEY, ENCODING_FAILED] {
        debug_assert!(s.len() < 32);
        buf.push(FIXSTR | s.len() as u8);
        buf.extend_from_slice(s.as_bytes());
    }
    Bytes::from(buf)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use serde_json::json;
    use tokio_util::codec::{Decoder, Encoder};

    use super::*;

    fn packed(value: &serde_json::Value) -> Vec<u8> {
        rmp_serde::to_vec_named(value).unwrap()
    }

    #[test]
    fn decodes_flat_string_map() {
        let codec = WireCodec::new();
        let payload = packed(&json!({"name": "s1", "code": "return 2+2", "extra": "ignored"}));

        let request = codec.decode_request(&payload).unwrap();
        assert_eq!(request.name(), Some("s1"));
        assert_eq!(request.code(), Some("return 2+2"));
        assert_eq!(request.args(), None);
    }

    #[test]
    fn decodes_empty_map() {
        let codec = WireCodec::new();
        let request = codec.decode_request(&packed(&json!({}))).unwrap();
        assert!(request.fields().is_empty());
    }

    #[test]
    fn rejects_non_flat_or_non_string_payloads() {
        let codec = WireCodec::new();
        let cases = [
            packed(&json!({"name": {"nested": "map"}})),
            packed(&json!({"name": 42})),
            packed(&json!({"name": null})),
            packed(&json!({"name": ["a"]})),
            packed(&json!(["name", "s1"])),
            packed(&json!("just a string")),
            rmp_serde::to_vec(&HashMap::from([(1u8, "one")])).unwrap(),
            Vec::new(),
            vec![0xc1],
        ];

        for payload in cases {
            let err = codec.decode_request(&payload).unwrap_err();
            assert!(
                matches!(err, ServerError::MalformedMessage(_)),
                "payload {payload:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn rejects_truncated_payload() {
        let codec = WireCodec::new();
        let payload = packed(&json!({"name": "s1", "code": "x"}));
        let err = codec
            .decode_request(&payload[..payload.len() - 1])
            .unwrap_err();
        assert!(matches!(err, ServerError::MalformedMessage(_)));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let codec = WireCodec::new();
        let mut payload = packed(&json!({"name": "s1"}));
        payload.extend_from_slice(&[0x01, 0x02]);

        let err = codec.decode_request(&payload).unwrap_err();
        assert!(err.trace().contains("2 trailing bytes after message"));
    }

    #[test]
    fn encodes_error_response_readably() {
        let codec = WireCodec::new();
        let response = Response::from_error("Boom", "ExecutionError: Boom");

        let payload = codec.encode_response(&response);
        let decoded = codec.decode_response(&payload).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn minimal_error_payload_is_valid_msgpack() {
        let codec = WireCodec::new();
        let decoded = codec.decode_response(&minimal_error_payload()).unwrap();
        assert!(decoded.is_error());
        assert_eq!(decoded.exception(), Some(ENCODING_FAILED));
        assert_eq!(decoded.stacktrace(), Some(ENCODING_FAILED));
    }

    #[test]
    fn frame_codec_prefixes_length_and_enforces_limit() {
        let mut codec = frame_codec(8);
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"abc"), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 3, b'a', b'b', b'c']);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"abc");

        let mut oversized = BytesMut::from(&[0u8, 0, 0, 9][..]);
        oversized.extend_from_slice(&[0; 9]);
        assert!(codec.decode(&mut oversized).is_err());
    }
}
