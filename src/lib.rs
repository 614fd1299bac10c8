//! Pipeline deal-scoring engine.
//!
//! Continuously computes a 0–100 confidence score per deal from call
//! factors, engagement milestones, communication history, and lifecycle
//! state, then projects weighted monthly-recurring revenue from it.
//! The score itself comes from a pure, infallible function; everything
//! around it — input assembly, persistence, the event queue, the daily
//! batch, the audit trail — is the recalculation machinery this crate
//! provides.

pub mod alerts;
pub mod assemble;
pub mod audit;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
mod migrations;
pub mod pipeline;
pub mod recalc;
pub mod scheduler;
pub mod scoring;
pub mod timeutil;
pub mod writer;

pub use alerts::{AlertSink, LogAlertSink};
pub use audit::{get_audit, AuditEvent, AuditTrail, FieldChange};
pub use batch::{BatchOutcome, BatchRunner, DailyBatchOutcome, BATCH_SIZE, STALE_AFTER_HOURS};
pub use config::{load_scoring_config, ScoringConfig, SCORING_CONFIG_KEY};
pub use db::Db;
pub use error::ScoreError;
pub use pipeline::{
    classify, get_pipeline_data, revenue_summary, PipelineBucket, PipelineData, PipelineFilters,
    PipelineRevenueSummary,
};
pub use recalc::{recalculate, recalculate_at, recalculate_many, RecalcOptions};
pub use scoring::{compute, DealStatus, ScoringInput, ScoringResult};
