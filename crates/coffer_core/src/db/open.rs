//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open raw SQLite connections for the pool.
//! - Configure connection pragmas required by core behavior.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout.
//! - Migrations are the caller's job; the pool migrates once on startup.

use super::DbResult;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a raw connection to the database file at `target`.
pub(crate) fn connect(target: &str) -> DbResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let mut conn = Connection::open_with_flags(target, flags)?;
    bootstrap_connection(&mut conn)?;
    Ok(conn)
}

/// Opens a private in-memory connection.
pub(crate) fn connect_in_memory() -> DbResult<Connection> {
    let mut conn = Connection::open_in_memory()?;
    bootstrap_connection(&mut conn)?;
    Ok(conn)
}

fn bootstrap_connection(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
