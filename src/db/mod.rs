//! SQLite-backed store for identities, RBAC pivots, route plans and activity recces.
//!
//! The database defaults to `~/.fieldops/fieldops.db`. One connection is opened
//! per process and shared behind a lock (see `api::state`); every accessor here is
//! synchronous and meant to be called from a blocking context.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

pub mod activities;
pub mod filter;
pub mod identity;
pub mod maintenance;
pub mod route_plans;
pub mod stats;
pub mod types;

pub use filter::SqlFilter;
pub use types::*;

pub struct FieldDb {
    conn: Connection,
}

impl FieldDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front, so a read-then-write
    /// inside `f` cannot interleave with another writer.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(DbError::from)?;
        match f(self) {
            Ok(val) => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(DbError::from(e).into());
                }
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `path` and apply the schema.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL keeps dashboard reads from blocking ingestion writes.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.fieldops/fieldops.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".fieldops").join("fieldops.db"))
    }

    /// `SELECT last_insert_rowid()` for the shared connection.
    pub(crate) fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Collect a `query_map` iterator, propagating the first row error.
pub(crate) fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, DbError> {
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
