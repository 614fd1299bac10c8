//! Queries over the `recommendations` table: CRUD, the score-field
//! UPDATE the writer issues, and the scans the batch runner drives.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{Db, DbError, DbRecommendation, NewRecommendation};
use crate::scoring::ScoringResult;

fn row_to_recommendation(row: &Row) -> rusqlite::Result<DbRecommendation> {
    Ok(DbRecommendation {
        id: row.get("id")?,
        title: row.get("title")?,
        owner: row.get("owner")?,
        status: row.get("status")?,
        sent_at: row.get("sent_at")?,
        predicted_monthly: row.get("predicted_monthly")?,
        predicted_onetime: row.get("predicted_onetime")?,
        snoozed_until: row.get("snoozed_until")?,
        revived_at: row.get("revived_at")?,
        archived_at: row.get("archived_at")?,
        confidence_score: row.get("confidence_score")?,
        confidence_percent: row.get("confidence_percent")?,
        weighted_monthly: row.get("weighted_monthly")?,
        weighted_onetime: row.get("weighted_onetime")?,
        base_score: row.get("base_score")?,
        total_penalties: row.get("total_penalties")?,
        total_bonus: row.get("total_bonus")?,
        penalty_email_not_opened: row.get("penalty_email_not_opened")?,
        penalty_proposal_not_viewed: row.get("penalty_proposal_not_viewed")?,
        penalty_silence: row.get("penalty_silence")?,
        last_scored_at: row.get("last_scored_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Db {
    /// Insert a new deal and return its id.
    pub fn insert_recommendation(&self, rec: &NewRecommendation) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn_ref().execute(
            "INSERT INTO recommendations
                 (title, owner, status, sent_at, predicted_monthly, predicted_onetime,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                rec.title,
                rec.owner,
                rec.status,
                rec.sent_at,
                rec.predicted_monthly,
                rec.predicted_onetime,
                now,
            ],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    pub fn get_recommendation(&self, id: i64) -> Result<Option<DbRecommendation>, DbError> {
        let mut stmt = self
            .conn_ref()
            .prepare("SELECT * FROM recommendations WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], row_to_recommendation)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Materialize a scoring result onto the deal row.
    ///
    /// Returns the number of rows affected — 0 means the deal vanished
    /// between assembly and write, which the writer reports as NotFound.
    pub fn update_score_fields(
        &self,
        id: i64,
        result: &ScoringResult,
        now: DateTime<Utc>,
    ) -> Result<usize, DbError> {
        let now = now.to_rfc3339();
        let affected = self.conn_ref().execute(
            "UPDATE recommendations SET
                 confidence_score            = ?2,
                 confidence_percent          = ?3,
                 weighted_monthly            = ?4,
                 weighted_onetime            = ?5,
                 base_score                  = ?6,
                 total_penalties             = ?7,
                 total_bonus                 = ?8,
                 penalty_email_not_opened    = ?9,
                 penalty_proposal_not_viewed = ?10,
                 penalty_silence             = ?11,
                 last_scored_at              = ?12,
                 updated_at                  = ?12
             WHERE id = ?1",
            params![
                id,
                result.confidence_score,
                result.confidence_percent,
                result.weighted_monthly,
                result.weighted_onetime,
                result.base_score,
                result.total_penalties,
                result.total_bonus,
                result.penalty_breakdown.email_not_opened,
                result.penalty_breakdown.proposal_not_viewed,
                result.penalty_breakdown.silence,
                now,
            ],
        )?;
        Ok(affected)
    }

    /// Active deals whose score is stale: never scored, or last scored
    /// before `cutoff`. Ordered oldest-first so the longest-neglected
    /// deals rescore first.
    pub fn stale_recommendation_ids(&self, cutoff: &str) -> Result<Vec<i64>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id FROM recommendations
             WHERE status IN ('sent', 'declined')
               AND archived_at IS NULL
               AND (last_scored_at IS NULL OR last_scored_at < ?1)
             ORDER BY last_scored_at ASC NULLS FIRST, id ASC",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Every non-archived active deal, for a full manual refresh.
    pub fn active_recommendation_ids(&self) -> Result<Vec<i64>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id FROM recommendations
             WHERE status IN ('sent', 'declined') AND archived_at IS NULL
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Non-archived `sent` deals — the population the pipeline view
    /// buckets and projects revenue from.
    pub fn sent_pipeline_recommendations(&self) -> Result<Vec<DbRecommendation>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT * FROM recommendations
             WHERE status = 'sent' AND archived_at IS NULL
             ORDER BY confidence_score DESC, id ASC",
        )?;
        let rows = stmt.query_map([], row_to_recommendation)?;
        let mut recs = Vec::new();
        for row in rows {
            recs.push(row?);
        }
        Ok(recs)
    }

    /// Change a deal's lifecycle status. A transition to `sent` stamps
    /// `sent_at` if it was never set. Enqueues a `status_changed` rescore.
    pub fn set_status(&self, id: i64, status: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn_ref().execute(
            "UPDATE recommendations SET
                 status = ?2,
                 sent_at = CASE WHEN ?2 = 'sent' AND sent_at IS NULL THEN ?3 ELSE sent_at END,
                 updated_at = ?3
             WHERE id = ?1",
            params![id, status, now],
        )?;
        self.enqueue_score_event(id)?;
        Ok(())
    }

    /// Snooze a deal until `until` (or clear the snooze with `None`).
    /// Scoring continues while snoozed; only the pipeline view parks the
    /// deal in On Hold. Enqueues a rescore so history records the change.
    pub fn set_snoozed(&self, id: i64, until: Option<&str>) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn_ref().execute(
            "UPDATE recommendations SET snoozed_until = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, until, now],
        )?;
        self.enqueue_score_event(id)?;
        Ok(())
    }

    /// Revive a deal: clears the snooze and re-anchors its pipeline age
    /// at `revived_at` so it doesn't jump straight into Closing Soon.
    pub fn revive(&self, id: i64) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn_ref().execute(
            "UPDATE recommendations SET revived_at = ?2, snoozed_until = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, now],
        )?;
        self.enqueue_score_event(id)?;
        Ok(())
    }

    /// Archive or unarchive a deal. Archived deals leave the stale scan
    /// and the pipeline view entirely.
    pub fn set_archived(&self, id: i64, archived: bool) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        if archived {
            self.conn_ref().execute(
                "UPDATE recommendations SET archived_at = ?2, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
        } else {
            self.conn_ref().execute(
                "UPDATE recommendations SET archived_at = NULL, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
        }
        self.enqueue_score_event(id)?;
        Ok(())
    }
}
