//! Standalone entry point for the batch machinery.
//!
//! `pipescore` with no arguments runs the daily job (queue drain + stale
//! rescore) once and exits — the shape a system cron invokes. `watch`
//! stays resident and self-schedules instead. Exits non-zero when the
//! database is unreachable.

use std::process::ExitCode;

use pipescore_lib::batch::BatchRunner;
use pipescore_lib::db::Db;
use pipescore_lib::pipeline::{self, PipelineFilters};
use pipescore_lib::recalc;
use pipescore_lib::scheduler::{next_run_time, ScheduleEntry, Scheduler};
use pipescore_lib::{audit, BatchOutcome};

const USAGE: &str = "usage: pipescore [command]

commands:
  daily                      run the daily batch (queue drain + stale rescore); default
  queue                      drain the score event queue
  stale                      rescore stale active deals
  refresh                    rescore every active deal now
  recalc <id> [trigger]      rescore one deal (default trigger: manual_refresh)
  enqueue <id>               queue a deal for the next drain
  audit <id>                 print the score-change audit trail as JSON
  pipeline [owner]           print the bucketed pipeline view as JSON
  summary <mrr> [clients]    print the revenue projection as JSON
  watch                      stay resident and run the daily batch on schedule

environment:
  PIPESCORE_DB    database path (default ~/.pipescore/pipescore.db)
  PIPESCORE_CRON  daily schedule for watch, 5-field cron (default '30 2 * * *')
  PIPESCORE_TZ    timezone for the schedule (default UTC)";

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("daily");

    let db_path = match Db::default_path() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("pipescore: cannot resolve database path: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match command {
        "daily" => {
            let runner = BatchRunner::new(&db_path);
            match runner.run_daily().await {
                Ok(outcome) => {
                    print_outcome("queue", &outcome.queue);
                    print_outcome("stale", &outcome.stale);
                    println!("total: {}ms", outcome.total_duration_ms);
                    ExitCode::SUCCESS
                }
                Err(e) => fail("daily batch", &e.to_string()),
            }
        }
        "queue" => {
            let runner = BatchRunner::new(&db_path);
            match runner.process_score_event_queue().await {
                Ok(outcome) => {
                    print_outcome("queue", &outcome);
                    ExitCode::SUCCESS
                }
                Err(e) => fail("queue drain", &e.to_string()),
            }
        }
        "stale" => {
            let runner = BatchRunner::new(&db_path);
            match runner.recalculate_stale().await {
                Ok(outcome) => {
                    print_outcome("stale", &outcome);
                    ExitCode::SUCCESS
                }
                Err(e) => fail("stale rescore", &e.to_string()),
            }
        }
        "refresh" => {
            let runner = BatchRunner::new(&db_path);
            match runner.recalculate_all_active("manual_refresh").await {
                Ok(outcome) => {
                    print_outcome("refresh", &outcome);
                    ExitCode::SUCCESS
                }
                Err(e) => fail("refresh", &e.to_string()),
            }
        }
        "recalc" => {
            let Some(id) = parse_id(&args, 1) else {
                return usage();
            };
            let trigger = args.get(2).map(String::as_str).unwrap_or("manual_refresh");
            let db = match Db::open_at(&db_path) {
                Ok(db) => db,
                Err(e) => return fail("open database", &e.to_string()),
            };
            match recalc::recalculate(&db, id, trigger) {
                Some(result) => {
                    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
                    ExitCode::SUCCESS
                }
                None => {
                    eprintln!("pipescore: deal {} not rescored (missing, terminal, or failed)", id);
                    ExitCode::FAILURE
                }
            }
        }
        "enqueue" => {
            let Some(id) = parse_id(&args, 1) else {
                return usage();
            };
            let db = match Db::open_at(&db_path) {
                Ok(db) => db,
                Err(e) => return fail("open database", &e.to_string()),
            };
            match db.enqueue_score_event(id) {
                Ok(_) => {
                    println!("queued deal {}", id);
                    ExitCode::SUCCESS
                }
                Err(e) => fail("enqueue", &e.to_string()),
            }
        }
        "audit" => {
            let Some(id) = parse_id(&args, 1) else {
                return usage();
            };
            let db = match Db::open_at(&db_path) {
                Ok(db) => db,
                Err(e) => return fail("open database", &e.to_string()),
            };
            match audit::get_audit(&db, id) {
                Ok(trail) => {
                    println!("{}", serde_json::to_string_pretty(&trail).unwrap_or_default());
                    ExitCode::SUCCESS
                }
                Err(e) => fail("audit", &e.to_string()),
            }
        }
        "pipeline" => {
            let filters = PipelineFilters {
                owner: args.get(1).cloned(),
            };
            let db = match Db::open_at(&db_path) {
                Ok(db) => db,
                Err(e) => return fail("open database", &e.to_string()),
            };
            match pipeline::get_pipeline_data(&db, &filters) {
                Ok(data) => {
                    println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
                    ExitCode::SUCCESS
                }
                Err(e) => fail("pipeline", &e.to_string()),
            }
        }
        "summary" => {
            let Some(current_mrr) = args.get(1).and_then(|v| v.parse::<f64>().ok()) else {
                return usage();
            };
            let clients = args
                .get(2)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            let db = match Db::open_at(&db_path) {
                Ok(db) => db,
                Err(e) => return fail("open database", &e.to_string()),
            };
            match pipeline::revenue_summary(&db, current_mrr, clients) {
                Ok(summary) => {
                    println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
                    ExitCode::SUCCESS
                }
                Err(e) => fail("summary", &e.to_string()),
            }
        }
        "watch" => {
            // Verify the database is reachable before going resident
            if let Err(e) = Db::open_at(&db_path) {
                return fail("open database", &e.to_string());
            }
            let entry = ScheduleEntry {
                cron: std::env::var("PIPESCORE_CRON").unwrap_or_else(|_| "30 2 * * *".to_string()),
                timezone: std::env::var("PIPESCORE_TZ").unwrap_or_else(|_| "UTC".to_string()),
            };
            match next_run_time(&entry) {
                Ok(next) => log::info!("Next daily batch at {}", next),
                Err(e) => return fail("schedule", &e.to_string()),
            }
            let scheduler = Scheduler::new(&db_path, entry);
            scheduler.run().await;
            ExitCode::SUCCESS
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("pipescore: unknown command '{}'\n\n{}", other, USAGE);
            ExitCode::FAILURE
        }
    }
}

fn parse_id(args: &[String], index: usize) -> Option<i64> {
    args.get(index).and_then(|v| v.parse::<i64>().ok())
}

fn usage() -> ExitCode {
    eprintln!("{}", USAGE);
    ExitCode::FAILURE
}

fn fail(what: &str, message: &str) -> ExitCode {
    eprintln!("pipescore: {} failed: {}", what, message);
    ExitCode::FAILURE
}

fn print_outcome(label: &str, outcome: &BatchOutcome) {
    println!(
        "{}: processed={} succeeded={} failed={} skipped={} in {}ms",
        label, outcome.processed, outcome.succeeded, outcome.failed, outcome.skipped,
        outcome.duration_ms,
    );
    for error in &outcome.errors {
        eprintln!("  deal {}: {}", error.recommendation_id, error.message);
    }
}
