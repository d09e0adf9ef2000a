//! reqlkit - an async client driver for ReQL servers.
//!
//! Queries are built as immutable expression trees, compiled into wire
//! terms and run on a [`Session`], which hands back a streaming [`Cursor`].
//!
//! ```ignore
//! use reqlkit as r;
//!
//! let session = r::Session::connect("localhost:28015", "test").await?;
//! let adults: Vec<User> = r::table("users")
//!     .filter(r::row().attr("age").ge(18))
//!     .run(&session)
//!     .await
//!     .all()
//!     .await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

pub mod cursor;
pub mod datum;
pub mod error;
pub mod query;
pub mod session;
pub mod wire;

#[cfg(test)]
mod tests;

pub use cursor::{Cursor, ResponseShape};
pub use datum::Datum;
pub use error::{Error, Result, ServerError};
pub use query::ops::{
    april, asc, august, avg, branch, count, db, db_create, db_drop, db_list, december, desc,
    epoch_time, error, expr, february, friday, iso8601, iso8601_in, january, js,
    js_with_timeout, json, july, june, literal, march, may, monday, now, november, october,
    row, saturday, september, sum, sunday, table, table_create, table_drop, table_list,
    thursday, time, time_hms, tuesday, wednesday,
};
pub use query::{func0, func1, func2, Context, Expr, Func, TableSpec, TermType};
pub use session::{Session, SessionConfig};

use wire::{Response, Term};

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Print every query term and response to stderr.
pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::Relaxed);
}

pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

pub(crate) fn debug_query(token: i64, term: &Term) {
    if debug_enabled() {
        eprintln!("reqlkit: query token={} {}", token, term);
    }
}

pub(crate) fn debug_response(response: &Response) {
    if debug_enabled() {
        let datums: Vec<String> = response.datums.iter().map(ToString::to_string).collect();
        eprintln!(
            "reqlkit: response token={} type={:?} [{}]",
            response.token,
            response.response_type,
            datums.join(", ")
        );
    }
}
