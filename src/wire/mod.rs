//! ReQL wire protocol implementation.
//!
//! Architecture:
//! - `protocol`: protobuf message encoding/decoding and length-prefixed framing
//! - `connection`: handshake, deadline-aware framed reads and writes
//! - `pool`: bounded LIFO pool of idle connections
//! - `error`: transport-level errors

pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;

#[cfg(test)]
mod tests;

pub use connection::Connection;
pub use error::{WireError, WireResult};
pub use pool::{ConnectionPool, DEFAULT_MAX_IDLE};
pub use protocol::{
    Frame, Message, Query, QueryType, Response, ResponseType, Term, WireDatum, PROTOCOL_MAGIC,
};
