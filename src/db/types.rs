//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

/// A row from the `recommendations` table — one pipeline deal plus its
/// last-computed score fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbRecommendation {
    pub id: i64,
    pub title: String,
    pub owner: Option<String>,
    pub status: String,
    pub sent_at: Option<String>,
    pub predicted_monthly: f64,
    pub predicted_onetime: f64,
    pub snoozed_until: Option<String>,
    pub revived_at: Option<String>,
    pub archived_at: Option<String>,
    pub confidence_score: i64,
    pub confidence_percent: f64,
    pub weighted_monthly: f64,
    pub weighted_onetime: f64,
    pub base_score: i64,
    pub total_penalties: f64,
    pub total_bonus: f64,
    pub penalty_email_not_opened: f64,
    pub penalty_proposal_not_viewed: f64,
    pub penalty_silence: f64,
    pub last_scored_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields a caller provides when creating a deal; everything score-side
/// starts at zero.
#[derive(Debug, Clone, Default)]
pub struct NewRecommendation {
    pub title: String,
    pub owner: Option<String>,
    pub status: String,
    pub sent_at: Option<String>,
    pub predicted_monthly: f64,
    pub predicted_onetime: f64,
}

/// Rep-entered qualitative call factors (0..1 row per deal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCallScores {
    pub recommendation_id: i64,
    pub budget_clarity: Option<String>,
    pub competition: Option<String>,
    pub engagement: Option<String>,
    pub plan_fit: Option<String>,
    pub updated_at: String,
}

/// One proposal invite and its engagement milestones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbInvite {
    pub id: i64,
    pub recommendation_id: i64,
    pub email: Option<String>,
    pub sent_at: Option<String>,
    pub email_opened_at: Option<String>,
    pub account_created_at: Option<String>,
    pub viewed_at: Option<String>,
}

/// One logged communication. `direction` is `inbound` (from the
/// prospect) or `outbound` (from the team).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCommunication {
    pub id: i64,
    pub recommendation_id: i64,
    pub direction: String,
    pub contact_at: String,
    pub note: Option<String>,
}

/// A row from `pipeline_score_history`. `breakdown` is the full
/// `ScoringResult` JSON captured at scoring time; older rows may carry
/// an earlier shape, which the audit reader tolerates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbScoreHistory {
    pub id: i64,
    pub recommendation_id: i64,
    pub scored_at: String,
    pub trigger_source: String,
    pub confidence_score: i64,
    pub confidence_percent: f64,
    pub weighted_monthly: f64,
    pub weighted_onetime: f64,
    pub breakdown: Option<String>,
}

/// A row from the `scoring_runs` log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbScoringRun {
    pub id: i64,
    pub run_type: String,
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub skipped: i64,
    pub duration_ms: i64,
    pub errors: Option<String>,
    pub completed_at: String,
}
