//! Shared database handle with a small connection pool.
//!
//! # Responsibility
//! - Migrate the schema once, then hand out pre-configured connections.
//! - Let concurrent callers (API threads, the pruning scheduler) each work on
//!   their own connection for file databases; SQLite's own locking serialises
//!   conflicting writes.
//! - Serialise callers of in-memory databases on their single connection.
//!
//! # Invariants
//! - A connection is used by exactly one caller at a time.
//! - An in-memory database lives exactly as long as its handle.

use super::migrations::apply_migrations;
use super::open::{connect, connect_in_memory};
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

const MAX_IDLE_CONNECTIONS: usize = 8;
const MEMORY_PATH: &str = ":memory:";

/// Cloneable handle to one vault database.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    backend: Backend,
    location: Option<PathBuf>,
    freshly_created: bool,
}

enum Backend {
    File {
        target: String,
        idle: Mutex<Vec<Connection>>,
    },
    // A private in-memory database is only visible to the connection that
    // created it.
    Memory(Mutex<Connection>),
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match &self.inner.backend {
            Backend::File { target, .. } => target.as_str(),
            Backend::Memory(_) => MEMORY_PATH,
        };
        f.debug_struct("Database")
            .field("target", &target)
            .field("freshly_created", &self.inner.freshly_created)
            .finish()
    }
}

impl Database {
    /// Opens (creating if needed) a database file and applies migrations.
    ///
    /// The SQLite path `:memory:` opens an in-memory database instead.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str() == MEMORY_PATH {
            return Self::open_in_memory();
        }
        let started_at = Instant::now();
        info!(
            "event=db_open module=db status=start mode=file path={}",
            path.display()
        );

        let target = path.to_string_lossy().into_owned();
        let result = connect(&target).and_then(|mut conn| {
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| {
                row.get::<_, String>(0)
            })?;
            let previous = apply_migrations(&mut conn)?;
            Ok((conn, previous))
        });

        match result {
            Ok((conn, previous)) => {
                info!(
                    "event=db_open module=db status=ok mode=file duration_ms={} fresh={}",
                    started_at.elapsed().as_millis(),
                    previous == 0
                );
                Ok(Self::from_backend(
                    Backend::File {
                        target,
                        idle: Mutex::new(vec![conn]),
                    },
                    Some(path),
                    previous == 0,
                ))
            }
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode=file duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Opens a fresh in-memory database backed by one connection.
    ///
    /// Safe to share across threads: callers take turns on the connection.
    /// Data is lost when the last clone of the handle is dropped.
    pub fn open_in_memory() -> DbResult<Self> {
        let mut conn = connect_in_memory()?;
        let previous = apply_migrations(&mut conn)?;
        info!("event=db_open module=db status=ok mode=memory");
        Ok(Self::from_backend(
            Backend::Memory(Mutex::new(conn)),
            None,
            previous == 0,
        ))
    }

    fn from_backend(backend: Backend, location: Option<PathBuf>, freshly_created: bool) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                backend,
                location,
                freshly_created,
            }),
        }
    }

    /// Whether this handle created the schema from scratch.
    pub fn freshly_created(&self) -> bool {
        self.inner.freshly_created
    }

    /// Database file location, `None` for in-memory databases.
    pub fn location(&self) -> Option<&Path> {
        self.inner.location.as_deref()
    }

    /// Runs `f` with a connection nobody else is using.
    ///
    /// File databases lend a pooled connection and take it back afterwards;
    /// in-memory databases hold their connection's lock for the call.
    pub fn with_conn<T, E>(&self, f: impl FnOnce(&mut Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        match &self.inner.backend {
            Backend::File { target, idle } => {
                let mut conn = checkout(target, idle)?;
                let result = f(&mut conn);
                checkin(idle, conn);
                result
            }
            Backend::Memory(conn) => {
                let mut conn = conn.lock().map_err(|_| DbError::PoolPoisoned)?;
                f(&mut conn)
            }
        }
    }
}

fn checkout(target: &str, idle: &Mutex<Vec<Connection>>) -> DbResult<Connection> {
    let pooled = idle.lock().map_err(|_| DbError::PoolPoisoned)?.pop();
    match pooled {
        Some(conn) => Ok(conn),
        None => connect(target),
    }
}

fn checkin(idle: &Mutex<Vec<Connection>>, conn: Connection) {
    if let Ok(mut idle) = idle.lock() {
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::db::DbError;

    #[test]
    fn in_memory_handles_are_isolated() {
        let first = Database::open_in_memory().unwrap();
        let second = Database::open_in_memory().unwrap();

        first
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO stores (title, created_at, updated_at) VALUES ('a', 1, 1);",
                    [],
                )
                .map_err(DbError::from)
            })
            .unwrap();

        let count = |db: &Database| {
            db.with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM stores;", [], |row| row.get::<_, i64>(0))
                    .map_err(DbError::from)
            })
            .unwrap()
        };
        assert_eq!(count(&first), 1);
        assert_eq!(count(&second), 0);
    }

    #[test]
    fn memory_path_opens_a_migrated_in_memory_database() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.freshly_created());
        assert_eq!(db.location(), None);

        let count = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM stores;", [], |row| row.get::<_, i64>(0))
                    .map_err(DbError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn reopening_a_file_is_not_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");

        let first = Database::open(&path).unwrap();
        assert!(first.freshly_created());
        drop(first);

        let second = Database::open(&path).unwrap();
        assert!(!second.freshly_created());
        assert_eq!(second.location(), Some(path.as_path()));
    }
}
