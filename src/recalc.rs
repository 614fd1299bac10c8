//! Recalculation orchestrator: assemble → compute → write for one deal.
//!
//! The public entry points never propagate errors upward. A recalc runs
//! inside flows that must not break (invite acceptance, communication
//! logging, tracking webhooks), so every failure becomes an error-level
//! log line plus a `None` return. Batch callers that need to distinguish
//! skipped from failed use `recalculate_inner`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use crate::assemble::assemble_input;
use crate::db::Db;
use crate::error::ScoreError;
use crate::scoring::{compute, ScoringResult};
use crate::writer::write_score;

/// Orchestrator options.
#[derive(Debug, Clone, Copy)]
pub struct RecalcOptions {
    /// Leave `accepted` / `closed_lost` deals untouched (their scores are
    /// frozen at the short-circuit values from the status change itself).
    pub skip_terminal: bool,
}

impl Default for RecalcOptions {
    fn default() -> Self {
        Self { skip_terminal: true }
    }
}

/// What a single recalculation attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum RecalcOutcome {
    Scored(ScoringResult),
    Skipped,
}

/// Full-fidelity variant for callers that count skips and failures
/// separately (the batch runner).
pub fn recalculate_inner(
    db: &Db,
    id: i64,
    trigger_source: &str,
    opts: RecalcOptions,
    now: DateTime<Utc>,
) -> Result<RecalcOutcome, ScoreError> {
    let input = assemble_input(db, id, now)?;

    if opts.skip_terminal && input.deal.status.is_terminal() {
        log::debug!("Recalc skipped for terminal deal {} ({})", id, trigger_source);
        return Ok(RecalcOutcome::Skipped);
    }

    let result = compute(&input);
    write_score(db, id, &result, trigger_source, now)?;

    log::info!(
        "Rescored deal {}: score={} weighted_monthly={} ({})",
        id,
        result.confidence_score,
        result.weighted_monthly,
        trigger_source
    );
    Ok(RecalcOutcome::Scored(result))
}

/// Recalculate one deal at an explicit instant. Errors are logged and
/// converted to `None`; a terminal-status skip is also `None`.
pub fn recalculate_at(
    db: &Db,
    id: i64,
    trigger_source: &str,
    opts: RecalcOptions,
    now: DateTime<Utc>,
) -> Option<ScoringResult> {
    match recalculate_inner(db, id, trigger_source, opts, now) {
        Ok(RecalcOutcome::Scored(result)) => Some(result),
        Ok(RecalcOutcome::Skipped) => None,
        Err(e) => {
            log::error!("Recalculation failed for deal {} ({}): {}", id, trigger_source, e);
            None
        }
    }
}

/// Recalculate one deal now, with default options.
pub fn recalculate(db: &Db, id: i64, trigger_source: &str) -> Option<ScoringResult> {
    recalculate_at(db, id, trigger_source, RecalcOptions::default(), Utc::now())
}

/// Recalculate many deals in parallel. Each worker opens its own
/// connection against `db_path`; results come back in input order, with
/// `None` for failures and skips.
pub async fn recalculate_many(
    db_path: &Path,
    ids: &[i64],
    trigger_source: &str,
) -> Vec<Option<ScoringResult>> {
    let now = Utc::now();
    let mut join_set: JoinSet<(usize, Option<ScoringResult>)> = JoinSet::new();

    for (index, id) in ids.iter().copied().enumerate() {
        let path: PathBuf = db_path.to_path_buf();
        let trigger = trigger_source.to_string();
        join_set.spawn_blocking(move || {
            let result = match Db::open_at(&path) {
                Ok(db) => recalculate_at(&db, id, &trigger, RecalcOptions::default(), now),
                Err(e) => {
                    log::error!("Worker failed to open database for deal {}: {}", id, e);
                    None
                }
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<ScoringResult>> = vec![None; ids.len()];
    while let Some(joined) = join_set.join_next().await {
        if let Ok((index, result)) = joined {
            results[index] = result;
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewRecommendation;
    use crate::timeutil::parse_utc;

    fn test_db_at(dir: &std::path::Path) -> Db {
        Db::open_at(dir.join("test.db")).expect("open")
    }

    fn seed(db: &Db, status: &str) -> i64 {
        let id = db
            .insert_recommendation(&NewRecommendation {
                title: "Acme".to_string(),
                status: status.to_string(),
                sent_at: Some("2026-03-01T09:00:00+00:00".to_string()),
                predicted_monthly: 500.0,
                predicted_onetime: 1000.0,
                ..Default::default()
            })
            .unwrap();
        db.upsert_call_scores(id, Some("clear"), Some("none"), Some("high"), Some("strong"))
            .unwrap();
        id
    }

    #[test]
    fn test_recalculate_writes_score_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db_at(dir.path());
        let id = seed(&db, "sent");

        let now = parse_utc("2026-03-21T09:00:00Z").unwrap();
        let result = recalculate_at(&db, id, "manual_refresh", RecalcOptions::default(), now)
            .expect("scored");
        // Perfect call, 20 days, nothing opened: email 9.0 + silence 12.0
        assert_eq!(result.confidence_score, 79);

        let rec = db.get_recommendation(id).unwrap().unwrap();
        assert_eq!(rec.confidence_score, 79);
        assert_eq!(db.get_score_history(id).unwrap().len(), 1);
    }

    #[test]
    fn test_terminal_deal_skipped_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db_at(dir.path());
        let id = seed(&db, "accepted");

        let now = parse_utc("2026-03-21T09:00:00Z").unwrap();
        assert!(recalculate_at(&db, id, "daily_cron", RecalcOptions::default(), now).is_none());
        assert!(db.get_score_history(id).unwrap().is_empty());

        let outcome = recalculate_inner(&db, id, "daily_cron", RecalcOptions::default(), now).unwrap();
        assert_eq!(outcome, RecalcOutcome::Skipped);
    }

    #[test]
    fn test_terminal_deal_scored_when_forced() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db_at(dir.path());
        let id = seed(&db, "accepted");

        let now = parse_utc("2026-03-21T09:00:00Z").unwrap();
        let opts = RecalcOptions { skip_terminal: false };
        let result = recalculate_at(&db, id, "status_changed", opts, now).expect("scored");
        assert_eq!(result.confidence_score, 100);
        assert_eq!(result.weighted_monthly, 500.0);
    }

    #[test]
    fn test_missing_deal_returns_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db_at(dir.path());

        let now = parse_utc("2026-03-21T09:00:00Z").unwrap();
        assert!(recalculate_at(&db, 404, "tracking_event", RecalcOptions::default(), now).is_none());
    }

    #[tokio::test]
    async fn test_recalculate_many_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db_at(dir.path());
        let a = seed(&db, "sent");
        let b = seed(&db, "accepted");
        let c = seed(&db, "sent");
        drop(db);

        let results =
            recalculate_many(&dir.path().join("test.db"), &[a, 404, b, c], "manual_refresh").await;
        assert_eq!(results.len(), 4);
        assert!(results[0].is_some());
        assert!(results[1].is_none(), "missing deal");
        assert!(results[2].is_none(), "terminal skip");
        assert!(results[3].is_some());
    }
}
