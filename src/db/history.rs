//! Append-only score history. Every scoring attempt lands here with its
//! full breakdown; rows are never mutated.

use rusqlite::params;

use super::{Db, DbError, DbScoreHistory};

impl Db {
    /// Append one history event. `breakdown` is the serialized
    /// `ScoringResult`; `None` only when serialization itself failed.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_score_history(
        &self,
        recommendation_id: i64,
        scored_at: &str,
        trigger_source: &str,
        confidence_score: i64,
        confidence_percent: f64,
        weighted_monthly: f64,
        weighted_onetime: f64,
        breakdown: Option<&str>,
    ) -> Result<i64, DbError> {
        self.conn_ref().execute(
            "INSERT INTO pipeline_score_history
                 (recommendation_id, scored_at, trigger_source, confidence_score,
                  confidence_percent, weighted_monthly, weighted_onetime, breakdown)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                recommendation_id,
                scored_at,
                trigger_source,
                confidence_score,
                confidence_percent,
                weighted_monthly,
                weighted_onetime,
                breakdown,
            ],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    /// All history for a deal, oldest first. Insertion id breaks ties
    /// between events scored within the same instant.
    pub fn get_score_history(&self, recommendation_id: i64) -> Result<Vec<DbScoreHistory>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, recommendation_id, scored_at, trigger_source, confidence_score,
                    confidence_percent, weighted_monthly, weighted_onetime, breakdown
             FROM pipeline_score_history
             WHERE recommendation_id = ?1
             ORDER BY scored_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![recommendation_id], |row| {
            Ok(DbScoreHistory {
                id: row.get(0)?,
                recommendation_id: row.get(1)?,
                scored_at: row.get(2)?,
                trigger_source: row.get(3)?,
                confidence_score: row.get(4)?,
                confidence_percent: row.get(5)?,
                weighted_monthly: row.get(6)?,
                weighted_onetime: row.get(7)?,
                breakdown: row.get(8)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}
