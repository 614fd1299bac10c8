//! Score persistence: materialize the result onto the deal row, then
//! append the history event.
//!
//! The UPDATE always precedes the INSERT. The pair is deliberately not
//! wrapped in a transaction: the materialized score is what revenue
//! dashboards run on, while the history row is an audit artifact — if
//! appending it fails we log and keep the score.

use chrono::{DateTime, Utc};

use crate::db::Db;
use crate::error::ScoreError;
use crate::scoring::ScoringResult;

/// Write one scoring result. Fails with `NotFound` when the deal row
/// vanished between assembly and write; a history-append failure is
/// logged and swallowed.
pub fn write_score(
    db: &Db,
    id: i64,
    result: &ScoringResult,
    trigger_source: &str,
    now: DateTime<Utc>,
) -> Result<(), ScoreError> {
    let affected = db.update_score_fields(id, result, now)?;
    if affected == 0 {
        return Err(ScoreError::NotFound(id));
    }

    let breakdown = match serde_json::to_string(result) {
        Ok(json) => Some(json),
        Err(e) => {
            log::warn!("Failed to serialize breakdown for deal {}: {}", id, e);
            None
        }
    };

    if let Err(e) = db.insert_score_history(
        id,
        &now.to_rfc3339(),
        trigger_source,
        result.confidence_score,
        result.confidence_percent,
        result.weighted_monthly,
        result.weighted_onetime,
        breakdown.as_deref(),
    ) {
        log::warn!("History append failed for deal {} ({}): {}", id, trigger_source, e);
    }

    Ok(())
}
