//! Batch recalculation: queue drain, stale rescore, and the daily run.
//!
//! Deals are scored in chunks of [`BATCH_SIZE`] with a short sleep
//! between chunks so a large book doesn't monopolize the database. Every
//! per-deal failure is collected, never propagated — one broken deal
//! must not starve the rest of the sweep. Each operation appends a row
//! to the `scoring_runs` log and raises an alert when more than half of
//! its attempts failed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::alerts::{AlertSink, LogAlertSink};
use crate::db::{Db, DbError};
use crate::recalc::{recalculate_inner, RecalcOptions, RecalcOutcome};

/// Deals in flight at once per operation.
pub const BATCH_SIZE: usize = 25;

/// Pause between chunks.
pub const BATCH_DELAY_MS: u64 = 200;

/// A deal is stale once unscored for this long. 23 rather than 24 hours
/// absorbs cron drift — a run that starts a few minutes early must still
/// pick up yesterday's deals.
pub const STALE_AFTER_HOURS: i64 = 23;

/// Cap on errors persisted per run row.
const MAX_LOGGED_ERRORS: usize = 50;

/// Run-log rows kept by the daily housekeeping prune.
const RUN_LOG_KEEP: usize = 500;

/// Failure ratio above which an operation raises an alert.
const HIGH_ERROR_RATE: f64 = 0.5;

/// One failed recalculation attempt.
#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub recommendation_id: i64,
    pub message: String,
}

/// Result record for one batch operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub errors: Vec<BatchError>,
}

/// Result of the full daily job: queue drain followed by stale rescore.
#[derive(Debug, Clone, Serialize)]
pub struct DailyBatchOutcome {
    pub queue: BatchOutcome,
    pub stale: BatchOutcome,
    pub total_duration_ms: u64,
}

/// Drives the batch operations against one database path. Workers open
/// their own connections; the runner itself holds none.
pub struct BatchRunner {
    db_path: PathBuf,
    alerts: Arc<dyn AlertSink>,
    stop: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            alerts: Arc::new(LogAlertSink),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Cooperative stop flag. Setting it lets in-flight deals finish but
    /// prevents any further chunk from starting.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Drain the score event queue: rescore every deal with at least one
    /// unprocessed event, then stamp the queue in one idempotent sweep.
    pub async fn process_score_event_queue(&self) -> Result<BatchOutcome, DbError> {
        let db = Db::open_at(&self.db_path)?;
        let ids = db.unprocessed_event_ids()?;
        log::info!("Draining score event queue: {} deals", ids.len());

        let outcome = self.score_ids(ids, "tracking_event").await;

        // A cancelled drain leaves its events unstamped so the next run
        // picks them up
        if !self.stopped() {
            if let Err(e) = db.mark_events_processed(Utc::now()) {
                log::warn!("Failed to mark score events processed: {}", e);
            }
        }

        self.finish_run(&db, "event_queue", &outcome);
        Ok(outcome)
    }

    /// Rescore every active deal whose score is older than
    /// [`STALE_AFTER_HOURS`] (or that has never been scored).
    pub async fn recalculate_stale(&self) -> Result<BatchOutcome, DbError> {
        let db = Db::open_at(&self.db_path)?;
        let cutoff = (Utc::now() - Duration::hours(STALE_AFTER_HOURS)).to_rfc3339();
        let ids = db.stale_recommendation_ids(&cutoff)?;
        log::info!("Stale rescore: {} deals past cutoff", ids.len());

        let outcome = self.score_ids(ids, "daily_cron").await;
        self.finish_run(&db, "daily_cron", &outcome);
        Ok(outcome)
    }

    /// Rescore every active deal regardless of staleness.
    pub async fn recalculate_all_active(&self, trigger_source: &str) -> Result<BatchOutcome, DbError> {
        let db = Db::open_at(&self.db_path)?;
        let ids = db.active_recommendation_ids()?;
        log::info!("Full refresh: {} active deals ({})", ids.len(), trigger_source);

        let outcome = self.score_ids(ids, trigger_source).await;
        self.finish_run(&db, "manual", &outcome);
        Ok(outcome)
    }

    /// The daily job: drain the queue, then rescore stale deals.
    pub async fn run_daily(&self) -> Result<DailyBatchOutcome, DbError> {
        let started = Instant::now();
        let queue = self.process_score_event_queue().await?;
        let stale = self.recalculate_stale().await?;
        let total_duration_ms = started.elapsed().as_millis() as u64;

        // Housekeeping: the run log is append-only, bound it
        if let Ok(db) = Db::open_at(&self.db_path) {
            match db.prune_scoring_runs(RUN_LOG_KEEP) {
                Ok(0) => {}
                Ok(removed) => log::debug!("Pruned {} old scoring-run rows", removed),
                Err(e) => log::warn!("Run-log prune failed: {}", e),
            }
        }

        log::info!(
            "Daily batch done in {}ms: queue {}/{} ok, stale {}/{} ok",
            total_duration_ms,
            queue.succeeded,
            queue.processed,
            stale.succeeded,
            stale.processed,
        );
        Ok(DailyBatchOutcome {
            queue,
            stale,
            total_duration_ms,
        })
    }

    /// Score a list of deals in bounded-concurrency chunks.
    async fn score_ids(&self, ids: Vec<i64>, trigger_source: &str) -> BatchOutcome {
        let started = Instant::now();
        let mut outcome = BatchOutcome::default();
        let chunk_count = ids.len().div_ceil(BATCH_SIZE).max(1);

        for (chunk_index, chunk) in ids.chunks(BATCH_SIZE).enumerate() {
            if self.stopped() {
                log::info!(
                    "Batch stopped before chunk {}/{}; {} deals left unscored",
                    chunk_index + 1,
                    chunk_count,
                    ids.len() - outcome.processed,
                );
                break;
            }

            let now = Utc::now();
            let mut join_set: JoinSet<(i64, Result<RecalcOutcome, String>)> = JoinSet::new();
            for &id in chunk {
                let path = self.db_path.clone();
                let trigger = trigger_source.to_string();
                join_set.spawn_blocking(move || {
                    let result = Db::open_at(&path)
                        .map_err(|e| e.to_string())
                        .and_then(|db| {
                            recalculate_inner(&db, id, &trigger, RecalcOptions::default(), now)
                                .map_err(|e| e.to_string())
                        });
                    (id, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                outcome.processed += 1;
                match joined {
                    Ok((_, Ok(RecalcOutcome::Scored(_)))) => outcome.succeeded += 1,
                    Ok((_, Ok(RecalcOutcome::Skipped))) => outcome.skipped += 1,
                    Ok((id, Err(message))) => {
                        log::warn!("Batch recalc failed for deal {}: {}", id, message);
                        outcome.failed += 1;
                        outcome.errors.push(BatchError {
                            recommendation_id: id,
                            message,
                        });
                    }
                    Err(join_error) => {
                        outcome.failed += 1;
                        outcome.errors.push(BatchError {
                            recommendation_id: 0,
                            message: format!("worker panicked: {}", join_error),
                        });
                    }
                }
            }

            if chunk_index + 1 < chunk_count {
                tokio::time::sleep(std::time::Duration::from_millis(BATCH_DELAY_MS)).await;
            }
        }

        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    /// Alert on a high failure rate and append the run-log row. Both are
    /// best-effort: a logging failure never fails the operation.
    fn finish_run(&self, db: &Db, run_type: &str, outcome: &BatchOutcome) {
        if outcome.processed > 0 {
            let rate = outcome.failed as f64 / outcome.processed as f64;
            if rate > HIGH_ERROR_RATE {
                self.alerts.warn(
                    "Scoring batch failure rate",
                    &format!(
                        "{} run: {}/{} recalculations failed",
                        run_type, outcome.failed, outcome.processed
                    ),
                );
            }
        }

        let errors_json = if outcome.errors.is_empty() {
            None
        } else {
            let truncated: Vec<&BatchError> =
                outcome.errors.iter().take(MAX_LOGGED_ERRORS).collect();
            serde_json::to_string(&truncated).ok()
        };

        if let Err(e) = db.insert_scoring_run(
            run_type,
            outcome.processed as i64,
            outcome.succeeded as i64,
            outcome.failed as i64,
            outcome.skipped as i64,
            outcome.duration_ms as i64,
            errors_json.as_deref(),
            &Utc::now().to_rfc3339(),
        ) {
            log::warn!("Failed to append scoring run log ({}): {}", run_type, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::CollectingAlertSink;
    use crate::db::NewRecommendation;

    fn seeded_db(dir: &std::path::Path) -> Db {
        Db::open_at(dir.join("test.db")).expect("open")
    }

    fn seed_deal(db: &Db, status: &str) -> i64 {
        let id = db
            .insert_recommendation(&NewRecommendation {
                title: "Deal".to_string(),
                status: status.to_string(),
                sent_at: Some("2026-03-01T09:00:00+00:00".to_string()),
                predicted_monthly: 500.0,
                ..Default::default()
            })
            .unwrap();
        db.upsert_call_scores(id, Some("clear"), Some("none"), Some("high"), Some("strong"))
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_queue_drain_scores_and_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let a = seed_deal(&db, "sent");
        let b = seed_deal(&db, "declined");
        // call-score upserts already queued both; queue one again to
        // prove the DISTINCT drain
        db.enqueue_score_event(a).unwrap();

        let runner = BatchRunner::new(dir.path().join("test.db"));
        let outcome = runner.process_score_event_queue().await.unwrap();

        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(db.pending_event_count().unwrap(), 0);
        assert_eq!(db.get_score_history(a).unwrap().len(), 1);
        assert_eq!(db.get_score_history(b).unwrap().len(), 1);

        let run = db.latest_scoring_run("event_queue").unwrap().expect("run row");
        assert_eq!(run.processed, 2);
        assert_eq!(run.succeeded, 2);
    }

    #[tokio::test]
    async fn test_queue_drain_counts_terminal_skips() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let won = seed_deal(&db, "accepted");
        db.enqueue_score_event(won).unwrap();

        let runner = BatchRunner::new(dir.path().join("test.db"));
        let outcome = runner.process_score_event_queue().await.unwrap();

        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.succeeded + outcome.failed + outcome.skipped, outcome.processed);
    }

    #[tokio::test]
    async fn test_stale_rescore_covers_unscored_deals() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let ids: Vec<i64> = (0..4).map(|_| seed_deal(&db, "sent")).collect();
        seed_deal(&db, "draft"); // not active, not scanned

        let runner = BatchRunner::new(dir.path().join("test.db"));
        let outcome = runner.recalculate_stale().await.unwrap();

        assert_eq!(outcome.processed, ids.len());
        assert_eq!(outcome.succeeded, ids.len());
        for id in ids {
            let rec = db.get_recommendation(id).unwrap().unwrap();
            assert!(rec.last_scored_at.is_some());
        }

        // Immediately after, nothing is stale
        let again = runner.recalculate_stale().await.unwrap();
        assert_eq!(again.processed, 0);
    }

    #[tokio::test]
    async fn test_failures_collected_and_alerted() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        // Events for deals that don't exist: every attempt fails
        db.enqueue_score_event(901).unwrap();
        db.enqueue_score_event(902).unwrap();
        db.enqueue_score_event(903).unwrap();

        let sink = Arc::new(CollectingAlertSink::default());
        let runner =
            BatchRunner::new(dir.path().join("test.db")).with_alerts(sink.clone());
        let outcome = runner.process_score_event_queue().await.unwrap();

        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.errors.len(), 3);

        let alerts = sink.taken();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].1.contains("3/3"));

        let run = db.latest_scoring_run("event_queue").unwrap().unwrap();
        assert_eq!(run.failed, 3);
        assert!(run.errors.unwrap().contains("901"));
    }

    #[tokio::test]
    async fn test_one_bad_deal_does_not_poison_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let good = seed_deal(&db, "sent");
        db.enqueue_score_event(777).unwrap();

        let runner = BatchRunner::new(dir.path().join("test.db"));
        let outcome = runner.process_score_event_queue().await.unwrap();

        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(db.get_score_history(good).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_flag_prevents_new_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let id = seed_deal(&db, "sent");
        db.enqueue_score_event(id).unwrap();

        let runner = BatchRunner::new(dir.path().join("test.db"));
        runner.stop_flag().store(true, Ordering::Relaxed);
        let outcome = runner.process_score_event_queue().await.unwrap();

        assert_eq!(outcome.processed, 0);
        // Queue untouched: the next (uncancelled) run still sees the event
        assert!(db.pending_event_count().unwrap() > 0);
        // The partial run is still logged
        assert!(db.latest_scoring_run("event_queue").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_daily_reports_both_phases() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let a = seed_deal(&db, "sent");
        seed_deal(&db, "sent");

        let runner = BatchRunner::new(dir.path().join("test.db"));
        let daily = runner.run_daily().await.unwrap();

        // The queue phase scores both (call-score upserts queued them),
        // then the stale phase finds nothing left
        assert_eq!(daily.queue.processed, 2);
        assert_eq!(daily.stale.processed, 0);
        assert_eq!(db.get_score_history(a).unwrap().len(), 1);
        assert!(db.latest_scoring_run("daily_cron").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_database_is_an_error() {
        // A plain file where the parent directory should be
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let runner = BatchRunner::new(blocker.join("pipescore.db"));
        assert!(runner.process_score_event_queue().await.is_err());
    }
}
