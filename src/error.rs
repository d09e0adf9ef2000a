//! Error types for the driver.
//!
//! Transport failures arrive as [`WireError`] and are folded into [`Error`]
//! at the session boundary.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::wire::{Frame, Response, WireError};

/// An error reported by the server in a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerError {
    /// Error text sent by the server
    pub message: String,
    /// Path from the query root to the failing sub-term
    pub backtrace: Vec<Frame>,
    /// The response that carried the error
    pub response: Response,
    /// Rendered query, for diagnostics
    pub query: String,
}

impl ServerError {
    pub(crate) fn from_response(response: Response, query: String) -> Self {
        Self {
            message: response.error_message(),
            backtrace: response.backtrace.clone(),
            response,
            query,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.backtrace.is_empty() {
            let path: Vec<String> = self.backtrace.iter().map(Frame::to_string).collect();
            write!(f, " at [{}]", path.join(", "))?;
        }
        if !self.query.is_empty() {
            write!(f, " in: {}", self.query)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Bad query: {0}")]
    BadQuery(ServerError),

    #[error("Runtime error: {0}")]
    Runtime(ServerError),

    #[error("Broken client: {message}")]
    BrokenClient {
        message: String,
        response: Option<Box<Response>>,
    },

    #[error("Bad client: {message} in: {query}")]
    BadClient { message: String, query: String },

    #[error("Internal error: {message} in: {query}")]
    Internal { message: String, query: String },

    #[error("No such row")]
    NoSuchRow,

    #[error("Wrong response type: expected {expected}, got {actual}")]
    WrongResponseType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Unmarshalable value: {0}")]
    Unmarshalable(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Query timed out")]
    Timeout,

    #[error("Session is closed")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl Error {
    pub(crate) fn bad_client(message: impl Into<String>) -> Self {
        Error::BadClient {
            message: message.into(),
            query: String::new(),
        }
    }

    pub(crate) fn broken_client(message: impl Into<String>, response: Option<Response>) -> Self {
        Error::BrokenClient {
            message: message.into(),
            response: response.map(Box::new),
        }
    }

    /// Attach the rendered query to client-side errors that lack one.
    pub(crate) fn with_query(self, rendered: &str) -> Self {
        match self {
            Error::BadClient { message, query } if query.is_empty() => Error::BadClient {
                message,
                query: rendered.to_string(),
            },
            Error::Internal { message, query } if query.is_empty() => Error::Internal {
                message,
                query: rendered.to_string(),
            },
            other => other,
        }
    }

    /// The response this error was built from, when there is one.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::BadQuery(e) | Error::Runtime(e) => Some(&e.response),
            Error::BrokenClient { response, .. } => response.as_deref(),
            _ => None,
        }
    }

    /// Whether the error was caused by a deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => Error::Io(Arc::new(e)),
            WireError::Protocol(msg) => Error::broken_client(msg, None),
            WireError::ConnectionClosed => Error::Io(Arc::new(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed",
            ))),
            WireError::Timeout => Error::Timeout,
            WireError::PoolClosed => Error::SessionClosed,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
