//! Score-history audit: per-event deltas explaining every score change.
//!
//! Reads the append-only history for one deal and annotates each event
//! (beyond the first) with the score delta, the weighted-MRR delta, and
//! the breakdown fields that actually moved. Breakdowns are deserialized
//! lazily and tolerantly — a history row written by an older build just
//! has fewer fields, all defaulting to 0.

use serde::Serialize;

use crate::db::{Db, DbScoreHistory};
use crate::error::ScoreError;
use crate::scoring::ScoringResult;
use crate::timeutil::round2;

/// Breakdown fields tracked for change detection, in display order.
const TRACKED_FIELDS: [&str; 6] = [
    "base_score",
    "penalty_email_not_opened",
    "penalty_proposal_not_viewed",
    "penalty_silence",
    "multi_invite_bonus",
    "total_bonus",
];

/// One changed breakdown field between two adjacent events.
#[derive(Debug, Clone, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub from: f64,
    pub to: f64,
    pub delta: f64,
}

/// One history event annotated with deltas against its predecessor.
/// The first event of a deal has no deltas and no changes.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub scored_at: String,
    pub trigger_source: String,
    pub confidence_score: i64,
    pub confidence_percent: f64,
    pub weighted_monthly: f64,
    pub weighted_onetime: f64,
    pub score_delta: Option<i64>,
    pub weighted_mrr_delta: Option<f64>,
    pub changes: Vec<FieldChange>,
}

/// Chronological audit trail for one deal.
#[derive(Debug, Clone, Serialize)]
pub struct AuditTrail {
    pub recommendation_id: i64,
    pub events: Vec<AuditEvent>,
}

/// Build the audit trail for a deal. Fails with `NotFound` when the
/// deal itself doesn't exist; a deal with no history yields an empty
/// trail.
pub fn get_audit(db: &Db, recommendation_id: i64) -> Result<AuditTrail, ScoreError> {
    if db.get_recommendation(recommendation_id)?.is_none() {
        return Err(ScoreError::NotFound(recommendation_id));
    }

    let history = db.get_score_history(recommendation_id)?;
    let mut events = Vec::with_capacity(history.len());
    let mut previous: Option<&DbScoreHistory> = None;

    for row in &history {
        let (score_delta, weighted_mrr_delta, changes) = match previous {
            None => (None, None, Vec::new()),
            Some(prev) => (
                Some(row.confidence_score - prev.confidence_score),
                Some(round2(row.weighted_monthly - prev.weighted_monthly)),
                field_changes(prev, row),
            ),
        };

        events.push(AuditEvent {
            scored_at: row.scored_at.clone(),
            trigger_source: row.trigger_source.clone(),
            confidence_score: row.confidence_score,
            confidence_percent: row.confidence_percent,
            weighted_monthly: row.weighted_monthly,
            weighted_onetime: row.weighted_onetime,
            score_delta,
            weighted_mrr_delta,
            changes,
        });
        previous = Some(row);
    }

    Ok(AuditTrail {
        recommendation_id,
        events,
    })
}

/// Per-field comparison of two adjacent breakdowns. Either side missing
/// its breakdown means no field comparison is possible — the top-level
/// deltas still stand, but `changes` stays empty.
fn field_changes(prev: &DbScoreHistory, curr: &DbScoreHistory) -> Vec<FieldChange> {
    let (Some(prev_breakdown), Some(curr_breakdown)) =
        (parse_breakdown(prev), parse_breakdown(curr))
    else {
        return Vec::new();
    };

    TRACKED_FIELDS
        .iter()
        .filter_map(|&field| {
            let from = breakdown_field(&prev_breakdown, field);
            let to = breakdown_field(&curr_breakdown, field);
            let delta = round2(to - from);
            if (to - from).abs() > 1e-9 {
                Some(FieldChange { field, from, to, delta })
            } else {
                None
            }
        })
        .collect()
}

fn parse_breakdown(row: &DbScoreHistory) -> Option<ScoringResult> {
    row.breakdown
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok())
}

fn breakdown_field(result: &ScoringResult, field: &str) -> f64 {
    match field {
        "base_score" => result.base_score as f64,
        "penalty_email_not_opened" => result.penalty_breakdown.email_not_opened,
        "penalty_proposal_not_viewed" => result.penalty_breakdown.proposal_not_viewed,
        "penalty_silence" => result.penalty_breakdown.silence,
        "multi_invite_bonus" => result.penalty_breakdown.multi_invite_bonus,
        "total_bonus" => result.total_bonus,
        _ => 0.0,
    }
}
