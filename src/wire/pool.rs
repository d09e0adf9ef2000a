//! Idle connection pool.
//!
//! A bounded LIFO stack of idle connections behind a mutex. Connections are
//! taken from the tail and pushed back to the tail; when the stack is empty
//! a new connection is dialed inline.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::connection::Connection;
use super::error::{WireError, WireResult};

/// Default number of idle connections kept per pool.
pub const DEFAULT_MAX_IDLE: usize = 5;

// ============================================================================
// Pool Inner
// ============================================================================

/// State guarded by the pool mutex.
struct PoolState {
    /// Idle connections waiting to be used
    idle: Vec<Connection>,
    /// Set by `close()`; cleared by `reopen()`
    closed: bool,
}

/// Internal pool state.
struct PoolInner {
    /// Server address (`host:port`)
    address: String,
    /// Maximum number of idle connections retained
    max_idle: usize,
    state: Mutex<PoolState>,
}

// ============================================================================
// Connection Pool
// ============================================================================

/// A pool of idle connections to one server.
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create an empty pool for `address`.
    pub fn new(address: &str, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                address: address.to_string(),
                max_idle,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    closed: false,
                }),
            }),
        }
    }

    /// Take an idle connection, or dial a new one if none is available.
    ///
    /// `deadline` is applied to the connection before it is returned and
    /// bounds the dial when one is needed.
    pub async fn acquire(&self, deadline: Option<Instant>) -> WireResult<Connection> {
        loop {
            let conn = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(WireError::PoolClosed);
                }
                state.idle.pop()
            };

            match conn {
                Some(mut c) if !c.is_closed() => {
                    c.set_deadline(deadline);
                    return Ok(c);
                }
                Some(_) => continue,
                None => return Connection::connect(&self.inner.address, deadline).await,
            }
        }
    }

    /// Return a connection after use.
    ///
    /// The connection is dropped instead when it is closed, when the pool is
    /// closed, or when the pool already holds `max_idle` connections.
    pub fn release(&self, mut conn: Connection) {
        conn.set_deadline(None);
        if conn.is_closed() {
            return;
        }

        let mut state = self.inner.state.lock();
        if state.closed || state.idle.len() >= self.inner.max_idle {
            drop(state);
            trace!(conn = conn.id(), "wire.pool.discard");
            return;
        }
        state.idle.push(conn);
    }

    /// Close all idle connections and refuse further acquisitions.
    ///
    /// Returns the last error raised while closing a connection, if any.
    pub async fn close(&self) -> WireResult<()> {
        let connections = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };

        debug!(count = connections.len(), "wire.pool.close");
        let mut last_err = None;
        for mut conn in connections {
            if let Err(e) = conn.close().await {
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Accept acquisitions again after `close()`.
    pub fn reopen(&self) {
        self.inner.state.lock().closed = false;
    }

    /// Whether `close()` has been called without a later `reopen()`.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the current number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Maximum number of idle connections retained.
    pub fn max_idle(&self) -> usize {
        self.inner.max_idle
    }

    /// Server address this pool dials.
    pub fn address(&self) -> &str {
        &self.inner.address
    }
}
