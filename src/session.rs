//! Sessions: configuration, token allocation and query submission.
//!
//! A session owns a pool of idle connections to one server. Each query
//! takes a connection, writes one START frame and reads the first response;
//! the resulting [`Cursor`] keeps the connection only while a stream is
//! still open.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::query::{build_query, Context, Expr};
use crate::wire::{ConnectionPool, Query, DEFAULT_MAX_IDLE};

/// Default server port for client connections.
pub const DEFAULT_PORT: u16 = 28015;

/// Database used when none is configured.
pub const DEFAULT_DATABASE: &str = "test";

// ============================================================================
// Configuration
// ============================================================================

/// Session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Server address (`host:port`)
    pub address: String,
    /// Database for tables given without one
    pub database: String,
    /// Maximum number of idle connections kept
    pub max_idle: usize,
    /// Deadline applied to each network round-trip
    pub timeout: Option<Duration>,
}

impl SessionConfig {
    /// Create a configuration for `address` with default settings.
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            max_idle: DEFAULT_MAX_IDLE,
            timeout: None,
        }
    }

    /// Parse `rethinkdb://host[:port][/database]`.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("rethinkdb://")
            .ok_or_else(|| Error::bad_client(format!("Invalid URL scheme: {}", url)))?;

        let (host_port, database) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash + 1..]),
            None => (rest, ""),
        };

        let (host, port) = match host_port.rfind(':') {
            Some(colon) => {
                let port_str = &host_port[colon + 1..];
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| Error::bad_client(format!("Invalid port: {}", port_str)))?;
                (&host_port[..colon], port)
            }
            None => (host_port, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(Error::bad_client(format!("Missing host: {}", url)));
        }

        let mut config = Self::new(&format!("{}:{}", host, port));
        if !database.is_empty() {
            config.database = database.to_string();
        }
        Ok(config)
    }

    /// Set the default database.
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the maximum number of idle connections.
    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Set the per-round-trip timeout. `Duration::ZERO` disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }
}

// ============================================================================
// Session
// ============================================================================

/// A client session.
///
/// Not meant to be shared between tasks running queries concurrently; give
/// each task its own session.
pub struct Session {
    pool: ConnectionPool,
    next_token: AtomicI64,
    database: String,
    timeout: Option<Duration>,
}

impl Session {
    /// Connect to `address` using `database` as the default database.
    pub async fn connect(address: &str, database: &str) -> Result<Self> {
        Self::connect_with_config(SessionConfig::new(address).database(database)).await
    }

    /// Connect with a full configuration. A trial connection is dialed and
    /// kept idle in the pool.
    pub async fn connect_with_config(config: SessionConfig) -> Result<Self> {
        let session = Self {
            pool: ConnectionPool::new(&config.address, config.max_idle),
            next_token: AtomicI64::new(1),
            database: config.database,
            timeout: config.timeout,
        };
        session.open_trial_connection().await?;
        debug!(address = session.pool.address(), "session.connect");
        Ok(session)
    }

    async fn open_trial_connection(&self) -> Result<()> {
        let conn = self.pool.acquire(self.deadline()).await?;
        self.pool.release(conn);
        Ok(())
    }

    /// Close every pooled connection and connect again.
    pub async fn reconnect(&self) -> Result<()> {
        if let Err(e) = self.pool.close().await {
            warn!(error = %e, "session.reconnect.close_failed");
        }
        self.pool.reopen();
        self.open_trial_connection().await
    }

    /// Close the session. Closing a closed session does nothing.
    ///
    /// Returns the last error raised while closing a connection.
    pub async fn close(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Ok(());
        }
        debug!(address = self.pool.address(), "session.close");
        self.pool.close().await.map_err(Error::from)
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Change the default database.
    pub fn use_database(&mut self, database: &str) {
        self.database = database.to_string();
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Set the per-round-trip timeout. `Duration::ZERO` disables it.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of idle connections held by the pool.
    pub fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }

    /// Absolute deadline for a round-trip starting now.
    fn deadline(&self) -> Option<tokio::time::Instant> {
        self.timeout.map(|t| tokio::time::Instant::now() + t)
    }

    /// Allocate the next query token.
    fn next_token(&self) -> i64 {
        self.next_token.fetch_add(1, Ordering::SeqCst)
    }

    /// Run a query. Failures are latched on the returned cursor.
    pub async fn run(&self, expr: &Expr) -> Cursor {
        let token = self.next_token();
        match self.start(expr, token).await {
            Ok(cursor) => cursor,
            Err(e) => Cursor::failed(self.pool.clone(), token, e),
        }
    }

    async fn start(&self, expr: &Expr, token: i64) -> Result<Cursor> {
        if self.pool.is_closed() {
            return Err(Error::SessionClosed);
        }

        let rendered = expr.to_string();
        let ctx = Context::new(&self.database);
        let (term, global_optargs) =
            build_query(&ctx, expr).map_err(|e| e.with_query(&rendered))?;
        let convert_times = !global_optargs
            .iter()
            .any(|(k, v)| k == "time_format" && v.datum.as_ref().and_then(|d| d.as_str()) == Some("raw"));

        crate::debug_query(token, &term);
        let query = Query::start(token, term, global_optargs);

        let mut conn = self.pool.acquire(self.deadline()).await.map_err(|e| {
            let err = Error::from(e);
            if err.is_timeout() {
                warn!(token, address = self.pool.address(), "session.dial.timeout");
            }
            err
        })?;
        debug!(token, conn = conn.id(), "session.query.start");

        let result = match conn.send_query(&query).await {
            Ok(()) => conn.receive_response(token).await,
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let err = Error::from(e);
                if err.is_timeout() {
                    warn!(token, conn = conn.id(), "session.query.timeout");
                }
                // Failed connections are closed and dropped by the pool.
                self.pool.release(conn);
                return Err(err);
            }
        };

        crate::debug_response(&response);
        Ok(Cursor::from_response(
            self.pool.clone(),
            conn,
            response,
            self.timeout,
            convert_times,
            rendered,
        ))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.pool.address())
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .field("idle", &self.pool.idle_count())
            .finish()
    }
}

impl Expr {
    /// Run this expression on `session`.
    pub async fn run(&self, session: &Session) -> Cursor {
        session.run(self).await
    }
}
