//! Wire protocol between script clients and the server.
//!
//! # Architecture
//!
//! - **protocol**: Request/Response maps and their reserved field names
//! - **codec**: MessagePack payloads inside length-prefixed frames
//! - **transport**: TCP reply socket enforcing request/reply alternation

pub mod codec;
pub mod protocol;
pub mod transport;
