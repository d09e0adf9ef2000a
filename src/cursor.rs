//! Streaming result cursor.
//!
//! A cursor is returned by every query. It holds the datums of the latest
//! batch and, for partial responses, the connection the query runs on;
//! continuation requests are issued as the buffer drains. Errors are sticky:
//! once set, every terminal call returns the same error.

use std::collections::VecDeque;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::datum::{self, Datum};
use crate::error::{Error, Result, ServerError};
use crate::wire::{Connection, ConnectionPool, Query, Response, ResponseType};

/// Shape of the response that started a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// A single value
    Atom,
    /// A complete stream in one batch
    Sequence,
    /// The first batch of a stream with more to come
    Partial,
}

impl ResponseShape {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseShape::Atom => "atom",
            ResponseShape::Sequence => "sequence",
            ResponseShape::Partial => "partial",
        }
    }
}

/// Results of one query.
pub struct Cursor {
    pool: ConnectionPool,
    /// Held only while more batches are outstanding
    conn: Option<Connection>,
    token: i64,
    shape: Option<ResponseShape>,
    buffer: VecDeque<Datum>,
    current: Option<Datum>,
    /// No more batches will arrive from the server
    complete: bool,
    closed: bool,
    err: Option<Error>,
    timeout: Option<Duration>,
    convert_times: bool,
    /// Rendered query, attached to server errors
    query: String,
}

impl Cursor {
    /// A cursor that failed before a response arrived.
    pub(crate) fn failed(pool: ConnectionPool, token: i64, err: Error) -> Self {
        Self {
            pool,
            conn: None,
            token,
            shape: None,
            buffer: VecDeque::new(),
            current: None,
            complete: true,
            closed: true,
            err: Some(err),
            timeout: None,
            convert_times: true,
            query: String::new(),
        }
    }

    /// Build a cursor from the first response to a START query.
    ///
    /// The connection is kept only for partial responses; otherwise it goes
    /// back to the pool here.
    pub(crate) fn from_response(
        pool: ConnectionPool,
        conn: Connection,
        response: Response,
        timeout: Option<Duration>,
        convert_times: bool,
        query: String,
    ) -> Self {
        let mut cursor = Self {
            pool,
            conn: Some(conn),
            token: response.token,
            shape: None,
            buffer: VecDeque::new(),
            current: None,
            complete: false,
            closed: false,
            err: None,
            timeout,
            convert_times,
            query,
        };

        cursor.shape = match response.response_type {
            ResponseType::SuccessAtom => Some(ResponseShape::Atom),
            ResponseType::SuccessSequence => Some(ResponseShape::Sequence),
            ResponseType::SuccessPartial => Some(ResponseShape::Partial),
            _ => None,
        };
        cursor.absorb(response);
        cursor
    }

    /// Apply a response to the cursor state.
    fn absorb(&mut self, response: Response) {
        match response.response_type {
            ResponseType::SuccessPartial => {
                if let Err(e) = self.refill(&response) {
                    self.fail(e);
                }
            }
            ResponseType::SuccessAtom | ResponseType::SuccessSequence => {
                self.complete = true;
                self.release();
                if let Err(e) = self.refill(&response) {
                    self.fail(e);
                }
            }
            ResponseType::ClientError => {
                let message = response.error_message();
                self.fail(Error::broken_client(message, Some(response)));
            }
            ResponseType::CompileError => {
                let err = ServerError::from_response(response, self.query.clone());
                self.fail(Error::BadQuery(err));
            }
            ResponseType::RuntimeError => {
                let err = ServerError::from_response(response, self.query.clone());
                self.fail(Error::Runtime(err));
            }
        }
    }

    fn refill(&mut self, response: &Response) -> Result<()> {
        for wire in &response.datums {
            self.buffer
                .push_back(datum::unmarshal_with(wire, self.convert_times)?);
        }
        Ok(())
    }

    /// Latch `err` and give the connection back.
    fn fail(&mut self, err: Error) {
        self.err = Some(err);
        self.complete = true;
        self.closed = true;
        self.buffer.clear();
        self.current = None;
        self.release();
    }

    /// Return the connection to the pool, at most once.
    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            trace!(token = self.token, conn = conn.id(), "cursor.release");
            self.pool.release(conn);
        }
    }

    fn deadline(&self) -> Option<tokio::time::Instant> {
        self.timeout.map(|t| tokio::time::Instant::now() + t)
    }

    /// Issue a CONTINUE and absorb the reply.
    async fn fetch_more(&mut self) -> Result<()> {
        let deadline = self.deadline();
        let token = self.token;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::broken_client("stream has no connection", None))?;
        conn.set_deadline(deadline);

        trace!(token, "cursor.continue");
        let result = match conn.send_query(&Query::continue_stream(token)).await {
            Ok(()) => conn.receive_response(token).await,
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let err = Error::from(e);
                if err.is_timeout() {
                    debug!(token, "cursor.continue.timeout");
                }
                self.release();
                return Err(err);
            }
        };

        crate::debug_response(&response);
        match response.response_type {
            ResponseType::SuccessAtom => {
                self.release();
                Err(Error::broken_client(
                    "unexpected atom response to CONTINUE",
                    Some(response),
                ))
            }
            _ => {
                self.absorb(response);
                match self.err.take() {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
        }
    }

    /// Advance to the next datum. Returns `false` at the end of the results
    /// or on error; check [`Cursor::err`] to tell them apart.
    pub async fn next(&mut self) -> bool {
        if self.err.is_some() || self.closed {
            return false;
        }

        loop {
            if let Some(datum) = self.buffer.pop_front() {
                self.current = Some(datum);
                return true;
            }

            if self.complete {
                self.current = None;
                self.closed = true;
                self.release();
                return false;
            }

            if let Err(e) = self.fetch_more().await {
                self.fail(e);
                return false;
            }
        }
    }

    /// The datum `next` moved to.
    pub fn current(&self) -> Option<&Datum> {
        self.current.as_ref()
    }

    /// Deserialize the current datum.
    pub fn scan<T: DeserializeOwned>(&self) -> Result<T> {
        match self.current {
            Some(ref datum) => datum.deserialize_into(),
            None => Err(Error::Scan("no current row".to_string())),
        }
    }

    /// The sticky error, if any. End of results is not an error.
    pub fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Shape of the first response, if one arrived.
    pub fn shape(&self) -> Option<ResponseShape> {
        self.shape
    }

    pub fn token(&self) -> i64 {
        self.token
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_shape(&self, accepted: &[ResponseShape], expected: &'static str) -> Result<ResponseShape> {
        match self.shape {
            Some(shape) if accepted.contains(&shape) => Ok(shape),
            Some(shape) => Err(Error::WrongResponseType {
                expected,
                actual: shape.as_str(),
            }),
            None => Err(Error::WrongResponseType {
                expected,
                actual: "none",
            }),
        }
    }

    /// Deserialize the single value of an atom response.
    ///
    /// Fails with `NoSuchRow` when the value is null.
    pub async fn one<T: DeserializeOwned>(&mut self) -> Result<T> {
        if let Some(ref e) = self.err {
            return Err(e.clone());
        }
        self.check_shape(&[ResponseShape::Atom], "atom")?;

        let found = self.next().await;
        let result = match (found, self.current.as_ref()) {
            (true, Some(datum)) if !datum.is_null() => datum.deserialize_into(),
            _ => match self.err {
                Some(ref e) => Err(e.clone()),
                None => Err(Error::NoSuchRow),
            },
        };
        self.close().await?;
        result
    }

    /// Collect every remaining value, following continuations.
    ///
    /// An atom response is deserialized as the whole collection; a null
    /// atom yields an empty vector.
    pub async fn all<T: DeserializeOwned>(&mut self) -> Result<Vec<T>> {
        if let Some(ref e) = self.err {
            return Err(e.clone());
        }
        let shape = self.check_shape(
            &[ResponseShape::Atom, ResponseShape::Sequence, ResponseShape::Partial],
            "atom, sequence or partial",
        )?;

        let mut out = Vec::new();
        if shape == ResponseShape::Atom {
            if self.next().await {
                if let Some(datum) = self.current.take() {
                    if !datum.is_null() {
                        out = datum.deserialize_into()?;
                    }
                }
            }
        } else {
            while self.next().await {
                out.push(self.scan()?);
            }
        }

        if let Some(ref e) = self.err {
            return Err(e.clone());
        }
        self.close().await?;
        Ok(out)
    }

    /// Drain the cursor, discarding values but reporting errors.
    pub async fn exec(&mut self) -> Result<()> {
        if let Some(ref e) = self.err {
            return Err(e.clone());
        }
        self.check_shape(
            &[ResponseShape::Atom, ResponseShape::Sequence, ResponseShape::Partial],
            "atom, sequence or partial",
        )?;

        while self.next().await {}
        if let Some(ref e) = self.err {
            return Err(e.clone());
        }
        self.close().await
    }

    /// Stop the query if it is still streaming and release the connection.
    pub async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.buffer.clear();
        self.current = None;

        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let mut result = Ok(());
        if !self.complete {
            self.complete = true;
            conn.set_deadline(self.deadline());
            debug!(token = self.token, conn = conn.id(), "cursor.stop");
            result = stop_stream(&mut conn, self.token).await;
        }
        self.pool.release(conn);
        result
    }
}

/// Send STOP for `token` and read the server's acknowledgement.
async fn stop_stream(conn: &mut Connection, token: i64) -> Result<()> {
    conn.send_query(&Query::stop(token)).await?;
    conn.receive_response(token).await?;
    Ok(())
}

impl Drop for Cursor {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if self.complete {
            self.pool.release(conn);
            return;
        }

        // Best effort: stop the stream on the runtime if there is one,
        // otherwise the connection is dropped with the query still open.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pool = self.pool.clone();
            let token = self.token;
            let deadline = self.deadline();
            debug!(token, conn = conn.id(), "cursor.drop.stop");
            handle.spawn(async move {
                conn.set_deadline(deadline);
                if stop_stream(&mut conn, token).await.is_ok() {
                    pool.release(conn);
                }
            });
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("token", &self.token)
            .field("shape", &self.shape)
            .field("buffered", &self.buffer.len())
            .field("complete", &self.complete)
            .field("closed", &self.closed)
            .field("err", &self.err)
            .finish()
    }
}
