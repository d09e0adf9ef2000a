//! Error types for the ReQL transport.

use std::fmt;
use std::io;

/// Result type for transport operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while talking to the server.
#[derive(Debug)]
pub enum WireError {
    /// I/O error during communication.
    Io(io::Error),

    /// Protocol error (malformed frame, unknown enum value, bad token, etc.).
    Protocol(String),

    /// The peer closed the stream or the connection was closed locally.
    ConnectionClosed,

    /// The connection deadline expired before the operation finished.
    Timeout,

    /// The pool was closed; no new connections are handed out.
    PoolClosed,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "I/O error: {}", e),
            WireError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            WireError::ConnectionClosed => write!(f, "Connection is closed"),
            WireError::Timeout => write!(f, "Operation timed out"),
            WireError::PoolClosed => write!(f, "Connection pool is closed"),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            WireError::ConnectionClosed
        } else {
            WireError::Io(e)
        }
    }
}
