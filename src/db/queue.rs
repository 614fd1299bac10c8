//! The score event queue. External triggers (tracking pixels, UI
//! actions, webhooks) insert rows; the batch runner drains distinct ids
//! and stamps `processed_at` in one idempotent sweep, so concurrent
//! drainers cannot double-charge or lose events.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{Db, DbError};

impl Db {
    /// Queue a deal for rescoring on the next drain.
    pub fn enqueue_score_event(&self, recommendation_id: i64) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn_ref().execute(
            "INSERT INTO pipeline_score_events (recommendation_id, created_at) VALUES (?1, ?2)",
            params![recommendation_id, now],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    /// Distinct deals with unprocessed events, oldest event first.
    pub fn unprocessed_event_ids(&self) -> Result<Vec<i64>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT recommendation_id FROM pipeline_score_events
             WHERE processed_at IS NULL
             GROUP BY recommendation_id
             ORDER BY MIN(id) ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Stamp every unprocessed event. Returns the number of rows marked.
    pub fn mark_events_processed(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let affected = self.conn_ref().execute(
            "UPDATE pipeline_score_events SET processed_at = ?1 WHERE processed_at IS NULL",
            params![now.to_rfc3339()],
        )?;
        Ok(affected)
    }

    /// Unprocessed event count, for diagnostics.
    pub fn pending_event_count(&self) -> Result<i64, DbError> {
        let count = self.conn_ref().query_row(
            "SELECT COUNT(*) FROM pipeline_score_events WHERE processed_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
