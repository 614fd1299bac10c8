//! Queries over the engagement tables: call scores, invites, and
//! communications. These feed the input assembler; the tracking setters
//! are what external webhook/UI triggers call before enqueueing a
//! rescore.

use chrono::Utc;
use rusqlite::params;

use super::{Db, DbCallScores, DbCommunication, DbError, DbInvite};

impl Db {
    /// The deal's call scores, if the rep has graded the call.
    pub fn get_call_scores(&self, recommendation_id: i64) -> Result<Option<DbCallScores>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT recommendation_id, budget_clarity, competition, engagement, plan_fit, updated_at
             FROM call_scores WHERE recommendation_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![recommendation_id], |row| {
            Ok(DbCallScores {
                recommendation_id: row.get(0)?,
                budget_clarity: row.get(1)?,
                competition: row.get(2)?,
                engagement: row.get(3)?,
                plan_fit: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the deal's call scores and enqueue a rescore.
    pub fn upsert_call_scores(
        &self,
        recommendation_id: i64,
        budget_clarity: Option<&str>,
        competition: Option<&str>,
        engagement: Option<&str>,
        plan_fit: Option<&str>,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn_ref().execute(
            "INSERT INTO call_scores
                 (recommendation_id, budget_clarity, competition, engagement, plan_fit, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(recommendation_id) DO UPDATE SET
                 budget_clarity = excluded.budget_clarity,
                 competition    = excluded.competition,
                 engagement     = excluded.engagement,
                 plan_fit       = excluded.plan_fit,
                 updated_at     = excluded.updated_at",
            params![recommendation_id, budget_clarity, competition, engagement, plan_fit, now],
        )?;
        self.enqueue_score_event(recommendation_id)?;
        Ok(())
    }

    pub fn get_invites(&self, recommendation_id: i64) -> Result<Vec<DbInvite>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, recommendation_id, email, sent_at, email_opened_at,
                    account_created_at, viewed_at
             FROM invites WHERE recommendation_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![recommendation_id], |row| {
            Ok(DbInvite {
                id: row.get(0)?,
                recommendation_id: row.get(1)?,
                email: row.get(2)?,
                sent_at: row.get(3)?,
                email_opened_at: row.get(4)?,
                account_created_at: row.get(5)?,
                viewed_at: row.get(6)?,
            })
        })?;
        let mut invites = Vec::new();
        for row in rows {
            invites.push(row?);
        }
        Ok(invites)
    }

    /// Record a new invite for the deal and enqueue a rescore.
    pub fn insert_invite(
        &self,
        recommendation_id: i64,
        email: Option<&str>,
    ) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn_ref().execute(
            "INSERT INTO invites (recommendation_id, email, sent_at) VALUES (?1, ?2, ?3)",
            params![recommendation_id, email, now],
        )?;
        let id = self.conn_ref().last_insert_rowid();
        self.enqueue_score_event(recommendation_id)?;
        Ok(id)
    }

    /// Stamp an engagement milestone on an invite. The first stamp wins;
    /// repeated tracking events for the same milestone are ignored.
    /// Enqueues a rescore on the owning deal.
    pub fn mark_invite_milestone(
        &self,
        invite_id: i64,
        milestone: InviteMilestoneKind,
        at: &str,
    ) -> Result<(), DbError> {
        let column = milestone.column();
        let sql = format!(
            "UPDATE invites SET {col} = COALESCE({col}, ?2) WHERE id = ?1",
            col = column
        );
        self.conn_ref().execute(&sql, params![invite_id, at])?;

        let rec_id: Option<i64> = self
            .conn_ref()
            .query_row(
                "SELECT recommendation_id FROM invites WHERE id = ?1",
                params![invite_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(rec_id) = rec_id {
            self.enqueue_score_event(rec_id)?;
        }
        Ok(())
    }

    pub fn get_communications(
        &self,
        recommendation_id: i64,
    ) -> Result<Vec<DbCommunication>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, recommendation_id, direction, contact_at, note
             FROM communications WHERE recommendation_id = ?1
             ORDER BY contact_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![recommendation_id], |row| {
            Ok(DbCommunication {
                id: row.get(0)?,
                recommendation_id: row.get(1)?,
                direction: row.get(2)?,
                contact_at: row.get(3)?,
                note: row.get(4)?,
            })
        })?;
        let mut comms = Vec::new();
        for row in rows {
            comms.push(row?);
        }
        Ok(comms)
    }

    /// Log a communication and enqueue a rescore.
    pub fn insert_communication(
        &self,
        recommendation_id: i64,
        direction: &str,
        contact_at: &str,
        note: Option<&str>,
    ) -> Result<i64, DbError> {
        self.conn_ref().execute(
            "INSERT INTO communications (recommendation_id, direction, contact_at, note)
             VALUES (?1, ?2, ?3, ?4)",
            params![recommendation_id, direction, contact_at, note],
        )?;
        let id = self.conn_ref().last_insert_rowid();
        self.enqueue_score_event(recommendation_id)?;
        Ok(id)
    }
}

/// Which invite milestone a tracking event landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteMilestoneKind {
    EmailOpened,
    AccountCreated,
    Viewed,
}

impl InviteMilestoneKind {
    fn column(self) -> &'static str {
        match self {
            InviteMilestoneKind::EmailOpened => "email_opened_at",
            InviteMilestoneKind::AccountCreated => "account_created_at",
            InviteMilestoneKind::Viewed => "viewed_at",
        }
    }
}
