//! Scheduler for the daily scoring batch.
//!
//! A 60-second poll loop with:
//! - Cron expression parsing (5-field, timezone-aware)
//! - Sleep/wake detection via time-jump polling
//! - Missed-job handling (runs if within the grace period)
//!
//! The last daily run is recovered from the newest `daily_cron` row in
//! `scoring_runs`, so a restarted daemon neither double-runs nor forgets
//! a day.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;

use crate::batch::BatchRunner;
use crate::db::Db;
use crate::timeutil::parse_utc;

/// Grace period for missed jobs (2 hours).
const MISSED_JOB_GRACE_PERIOD_SECS: i64 = 7200;

/// Time jump threshold to detect sleep/wake (5 minutes).
const TIME_JUMP_THRESHOLD_SECS: i64 = 300;

/// Poll interval for the scheduler loop (1 minute).
const POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// When the daily batch fires.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// 5-field cron expression, e.g. `30 2 * * *`.
    pub cron: String,
    /// IANA timezone name the expression is evaluated in.
    pub timezone: String,
}

impl Default for ScheduleEntry {
    fn default() -> Self {
        Self {
            cron: "30 2 * * *".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// Long-running daemon that fires [`BatchRunner::run_daily`] on schedule.
pub struct Scheduler {
    db_path: PathBuf,
    entry: ScheduleEntry,
    runner: BatchRunner,
}

impl Scheduler {
    pub fn new(db_path: impl Into<PathBuf>, entry: ScheduleEntry) -> Self {
        let db_path = db_path.into();
        let runner = BatchRunner::new(&db_path);
        Self {
            db_path,
            entry,
            runner,
        }
    }

    /// Start the scheduler loop.
    ///
    /// Runs indefinitely, checking for due jobs every minute and
    /// handling sleep/wake.
    pub async fn run(&self) {
        log::info!(
            "Scheduler started: '{}' ({})",
            self.entry.cron,
            self.entry.timezone
        );
        let mut last_check = Utc::now();

        loop {
            tokio::time::sleep(std::time::Duration::from_secs(POLL_INTERVAL_SECS)).await;

            let now = Utc::now();

            // Detect sleep: time jumped more than the threshold
            let time_jump = (now - last_check).num_seconds();
            if time_jump > TIME_JUMP_THRESHOLD_SECS {
                log::info!(
                    "Detected system wake (time jumped {} seconds), checking for missed run",
                    time_jump
                );
                if let Ok(Some(missed)) = self.find_missed_job(now) {
                    log::info!("Found missed daily run (was due {}), running now", missed);
                    self.fire().await;
                }
            }

            match self.should_run_now(now) {
                Ok(true) => self.fire().await,
                Ok(false) => {}
                Err(e) => log::error!("Scheduler misconfigured: {}", e),
            }

            last_check = now;
        }
    }

    async fn fire(&self) {
        match self.runner.run_daily().await {
            Ok(outcome) => log::info!(
                "Scheduled daily batch complete: queue {} / stale {} deals in {}ms",
                outcome.queue.processed,
                outcome.stale.processed,
                outcome.total_duration_ms,
            ),
            Err(e) => log::error!("Scheduled daily batch failed: {}", e),
        }
    }

    /// Check whether the daily batch should run at `now`.
    fn should_run_now(&self, now: DateTime<Utc>) -> Result<bool, ScheduleError> {
        let schedule = parse_cron(&self.entry.cron)?;
        let tz: Tz = self
            .entry
            .timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(self.entry.timezone.clone()))?;

        let now_local = now.with_timezone(&tz);
        let last_run = self.last_daily_run();

        // Find the most recent scheduled time around now
        let mut scheduled_times = schedule.after(&(now_local - chrono::Duration::minutes(2)));

        if let Some(next_time) = scheduled_times.next() {
            let next_utc = next_time.with_timezone(&Utc);
            let diff = (now - next_utc).num_seconds().abs();

            // Within 1 minute of the scheduled time
            if diff < 60 {
                // Already ran this slot?
                if let Some(last) = last_run {
                    if (last - next_utc).num_seconds().abs() < 60 {
                        return Ok(false);
                    }
                }
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Find a run that was missed (while asleep) within the grace
    /// period.
    fn find_missed_job(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let schedule = parse_cron(&self.entry.cron)?;
        let tz: Tz = self
            .entry
            .timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(self.entry.timezone.clone()))?;

        let now_local = now.with_timezone(&tz);
        let grace_start = now_local - chrono::Duration::seconds(MISSED_JOB_GRACE_PERIOD_SECS);
        let last_run = self.last_daily_run();

        let mut iter = schedule.after(&grace_start);
        while let Some(scheduled) = iter.next() {
            let scheduled_utc = scheduled.with_timezone(&Utc);

            if scheduled_utc > now {
                break;
            }

            if let Some(last) = last_run {
                if last >= scheduled_utc {
                    continue; // Already ran
                }
            }

            return Ok(Some(scheduled_utc));
        }

        Ok(None)
    }

    /// Completion time of the newest daily run, recovered from the run
    /// log so it survives restarts.
    fn last_daily_run(&self) -> Option<DateTime<Utc>> {
        let db = Db::open_at(&self.db_path).ok()?;
        let run = db.latest_scoring_run("daily_cron").ok()??;
        parse_utc(&run.completed_at)
    }
}

/// Parse a 5-field cron expression.
///
/// The cron crate expects 6 fields (with seconds); we prepend `0`.
pub fn parse_cron(expr: &str) -> Result<Schedule, ScheduleError> {
    let full_expr = format!("0 {}", expr);
    full_expr
        .parse::<Schedule>()
        .map_err(|e| ScheduleError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })
}

/// Next fire time for an entry, for status output.
pub fn next_run_time(entry: &ScheduleEntry) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz: Tz = entry
        .timezone
        .parse()
        .map_err(|_| ScheduleError::InvalidTimezone(entry.timezone.clone()))?;

    schedule
        .upcoming(tz)
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::InvalidCron {
            expr: entry.cron.clone(),
            message: "no upcoming scheduled time".to_string(),
        })
}
