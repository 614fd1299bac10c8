//! SQLite persistence for deals, engagement data, score history, and the
//! scoring-run log.
//!
//! The database lives at `~/.pipescore/pipescore.db` (overridable via
//! `PIPESCORE_DB`). Background workers never share a connection: each one
//! calls [`Db::open`] (or [`Db::open_at`] with the shared path) and relies
//! on WAL mode plus a busy timeout for coordination. SQLite serializes
//! writes, so a per-deal UPDATE is never torn even when concurrent
//! triggers race; the history table keeps every attempt regardless of
//! which writer lands last.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

pub mod types;
pub use types::*;

mod engagement;
mod history;
mod queue;
mod recommendations;
mod runs;
mod settings;

pub use engagement::InviteMilestoneKind;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct Db {
    conn: Connection,
}

impl Db {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at the default path and apply the
    /// schema.
    pub fn open() -> Result<Self, DbError> {
        Self::open_at(Self::default_path()?)
    }

    /// Open a database at an explicit path. Workers and tests use this
    /// with a shared path so each holds its own connection.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL keeps readers unblocked while a batch worker writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Resolve the database path: `$PIPESCORE_DB` if set, otherwise
    /// `~/.pipescore/pipescore.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        if let Ok(path) = std::env::var("PIPESCORE_DB") {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".pipescore").join("pipescore.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_at_creates_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open_at(dir.path().join("test.db")).expect("open");

        let count: i64 = db
            .conn_ref()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('recommendations', 'call_scores', 'invites', 'communications',
                  'pipeline_score_history', 'pipeline_score_events', 'scoring_runs', 'settings')",
                [],
                |row| row.get(0),
            )
            .expect("schema query");
        assert_eq!(count, 8);
    }

    #[test]
    fn test_open_at_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        drop(Db::open_at(&path).expect("first open"));
        drop(Db::open_at(&path).expect("second open"));
    }

    #[test]
    fn test_transaction_rolls_back_on_err() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open_at(dir.path().join("test.db")).expect("open");

        let result: Result<(), DbError> = db.with_transaction(|db| {
            db.conn_ref()
                .execute(
                    "INSERT INTO settings (key, value, updated_at) VALUES ('k', 'v', '2026-01-01')",
                    [],
                )
                .map_err(DbError::Sqlite)?;
            Err(DbError::Migration("forced".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM settings WHERE key = 'k'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
