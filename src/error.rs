//! Crate-level error types.
//!
//! The scoring engine itself is infallible; errors only arise at the
//! persistence boundary. The orchestrator converts every `ScoreError`
//! into a logged `None` so a scoring failure can never break the flow
//! that triggered it (invite acceptance, communication logging, cron).

use thiserror::Error;

use crate::db::DbError;

/// Errors surfaced by the assembler, writer, and audit reader.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("recommendation not found: {0}")]
    NotFound(i64),

    #[error("database error: {0}")]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for ScoreError {
    fn from(err: rusqlite::Error) -> Self {
        ScoreError::Db(DbError::Sqlite(err))
    }
}
