//! Pipeline view: bucket classification and the weighted revenue
//! projection.
//!
//! Works purely from persisted state — no rescoring happens here. The
//! projection is deliberately conservative: at-risk and on-hold deals
//! contribute nothing.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{Db, DbRecommendation};
use crate::error::ScoreError;
use crate::timeutil::{days_between, parse_utc_opt, round2};

/// Minimum confidence for the Closing Soon bucket.
pub const CLOSING_SOON_MIN_SCORE: i64 = 70;

/// Minimum pipeline age (days) for Closing Soon — a deal sent yesterday
/// isn't closing, however confident the score.
pub const CLOSING_SOON_MIN_AGE_DAYS: i64 = 14;

/// Minimum confidence for In Pipeline; anything below is At Risk.
pub const IN_PIPELINE_MIN_SCORE: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineBucket {
    OnHold,
    ClosingSoon,
    InPipeline,
    AtRisk,
}

/// Place one sent deal in its bucket.
///
/// Snooze wins over everything; after that the score thresholds apply,
/// with the deal's age anchored at `revived_at` when it has been brought
/// back from the dead (so revived deals re-earn Closing Soon).
pub fn classify(rec: &DbRecommendation, now: DateTime<Utc>) -> PipelineBucket {
    if let Some(snoozed_until) = parse_utc_opt(rec.snoozed_until.as_deref()) {
        if snoozed_until > now {
            return PipelineBucket::OnHold;
        }
    }

    let age_anchor = parse_utc_opt(rec.revived_at.as_deref())
        .or_else(|| parse_utc_opt(rec.sent_at.as_deref()));
    let age_days = days_between(age_anchor, now);

    if rec.confidence_score >= CLOSING_SOON_MIN_SCORE && age_days >= CLOSING_SOON_MIN_AGE_DAYS {
        PipelineBucket::ClosingSoon
    } else if rec.confidence_score >= IN_PIPELINE_MIN_SCORE {
        PipelineBucket::InPipeline
    } else {
        PipelineBucket::AtRisk
    }
}

/// Rolled-up stats for one bucket.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BucketStats {
    pub deal_count: usize,
    pub weighted_mrr: f64,
    pub raw_mrr: f64,
    pub avg_confidence: i64,
}

impl BucketStats {
    fn from_deals(deals: &[&DbRecommendation]) -> Self {
        if deals.is_empty() {
            return Self::default();
        }
        let weighted_mrr = round2(deals.iter().map(|d| d.weighted_monthly).sum());
        let raw_mrr = round2(deals.iter().map(|d| d.predicted_monthly).sum());
        let avg_confidence = (deals.iter().map(|d| d.confidence_score).sum::<i64>() as f64
            / deals.len() as f64)
            .round() as i64;
        Self {
            deal_count: deals.len(),
            weighted_mrr,
            raw_mrr,
            avg_confidence,
        }
    }
}

/// Per-bucket aggregates over the active pipeline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineAggregates {
    pub closing_soon: BucketStats,
    pub in_pipeline: BucketStats,
    pub at_risk: BucketStats,
    pub on_hold: BucketStats,
}

/// One deal as the pipeline view presents it.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineDeal {
    pub id: i64,
    pub title: String,
    pub owner: Option<String>,
    pub confidence_score: i64,
    pub predicted_monthly: f64,
    pub weighted_monthly: f64,
    pub sent_at: Option<String>,
    pub snoozed_until: Option<String>,
    pub last_scored_at: Option<String>,
    pub bucket: PipelineBucket,
}

/// Filters for the pipeline listing.
#[derive(Debug, Clone, Default)]
pub struct PipelineFilters {
    /// Restrict to one rep's deals.
    pub owner: Option<String>,
}

/// The pipeline page payload: deals, aggregates, and the rep list.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineData {
    pub deals: Vec<PipelineDeal>,
    pub aggregates: PipelineAggregates,
    pub reps: Vec<String>,
}

/// Revenue projection over the active pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRevenueSummary {
    pub current_mrr: f64,
    pub active_client_count: i64,
    pub aggregates: PipelineAggregates,
    /// Current MRR plus the weighted MRR of deals actually in motion.
    pub projected_mrr: f64,
    pub potential_growth: f64,
}

fn aggregate(recs: &[DbRecommendation], now: DateTime<Utc>) -> PipelineAggregates {
    let mut closing_soon = Vec::new();
    let mut in_pipeline = Vec::new();
    let mut at_risk = Vec::new();
    let mut on_hold = Vec::new();

    for rec in recs {
        match classify(rec, now) {
            PipelineBucket::ClosingSoon => closing_soon.push(rec),
            PipelineBucket::InPipeline => in_pipeline.push(rec),
            PipelineBucket::AtRisk => at_risk.push(rec),
            PipelineBucket::OnHold => on_hold.push(rec),
        }
    }

    PipelineAggregates {
        closing_soon: BucketStats::from_deals(&closing_soon),
        in_pipeline: BucketStats::from_deals(&in_pipeline),
        at_risk: BucketStats::from_deals(&at_risk),
        on_hold: BucketStats::from_deals(&on_hold),
    }
}

/// Load the pipeline view: all non-archived sent deals, bucketed and
/// aggregated, plus the distinct rep list (unfiltered, for the picker).
pub fn get_pipeline_data(db: &Db, filters: &PipelineFilters) -> Result<PipelineData, ScoreError> {
    let now = Utc::now();
    let all = db.sent_pipeline_recommendations()?;

    let mut reps: Vec<String> = all.iter().filter_map(|r| r.owner.clone()).collect();
    reps.sort();
    reps.dedup();

    let selected: Vec<DbRecommendation> = all
        .into_iter()
        .filter(|r| match &filters.owner {
            Some(owner) => r.owner.as_deref() == Some(owner.as_str()),
            None => true,
        })
        .collect();

    let aggregates = aggregate(&selected, now);
    let deals = selected
        .into_iter()
        .map(|rec| {
            let bucket = classify(&rec, now);
            PipelineDeal {
                id: rec.id,
                title: rec.title,
                owner: rec.owner,
                confidence_score: rec.confidence_score,
                predicted_monthly: rec.predicted_monthly,
                weighted_monthly: rec.weighted_monthly,
                sent_at: rec.sent_at,
                snoozed_until: rec.snoozed_until,
                last_scored_at: rec.last_scored_at,
                bucket,
            }
        })
        .collect();

    Ok(PipelineData {
        deals,
        aggregates,
        reps,
    })
}

/// Project revenue from the active pipeline on top of current MRR.
pub fn revenue_summary(
    db: &Db,
    current_mrr: f64,
    active_client_count: i64,
) -> Result<PipelineRevenueSummary, ScoreError> {
    let now = Utc::now();
    let recs = db.sent_pipeline_recommendations()?;
    let aggregates = aggregate(&recs, now);

    let projected_mrr = round2(
        current_mrr + aggregates.closing_soon.weighted_mrr + aggregates.in_pipeline.weighted_mrr,
    );
    let potential_growth = round2(projected_mrr - current_mrr);

    Ok(PipelineRevenueSummary {
        current_mrr,
        active_client_count,
        aggregates,
        projected_mrr,
        potential_growth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewRecommendation;
    use chrono::Duration;

    fn test_db() -> Db {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        Db::open_at(path).expect("open")
    }

    /// Seed a sent deal with a materialized score, aged `age_days`.
    fn seed_scored(
        db: &Db,
        owner: &str,
        score: i64,
        predicted: f64,
        age_days: i64,
    ) -> i64 {
        let sent_at = (Utc::now() - Duration::days(age_days)).to_rfc3339();
        let id = db
            .insert_recommendation(&NewRecommendation {
                title: format!("{} deal", owner),
                owner: Some(owner.to_string()),
                status: "sent".to_string(),
                sent_at: Some(sent_at),
                predicted_monthly: predicted,
                predicted_onetime: 0.0,
            })
            .unwrap();
        let percent = score as f64 / 100.0;
        db.conn_ref()
            .execute(
                "UPDATE recommendations SET confidence_score = ?2, confidence_percent = ?3,
                     weighted_monthly = ?4 WHERE id = ?1",
                rusqlite::params![id, score, percent, round2(predicted * percent)],
            )
            .unwrap();
        id
    }

    #[test]
    fn test_buckets_by_score_and_age() {
        let db = test_db();
        seed_scored(&db, "jordan", 85, 1000.0, 30); // closing soon
        seed_scored(&db, "jordan", 85, 1000.0, 3);  // confident but young → in pipeline
        seed_scored(&db, "sam", 45, 600.0, 20);     // in pipeline
        seed_scored(&db, "sam", 10, 400.0, 50);     // at risk

        let data = get_pipeline_data(&db, &PipelineFilters::default()).unwrap();
        assert_eq!(data.aggregates.closing_soon.deal_count, 1);
        assert_eq!(data.aggregates.in_pipeline.deal_count, 2);
        assert_eq!(data.aggregates.at_risk.deal_count, 1);
        assert_eq!(data.aggregates.on_hold.deal_count, 0);
        assert_eq!(data.reps, vec!["jordan", "sam"]);
    }

    #[test]
    fn test_snooze_wins_over_score() {
        let db = test_db();
        let id = seed_scored(&db, "jordan", 90, 1000.0, 30);
        let until = (Utc::now() + Duration::days(14)).to_rfc3339();
        db.conn_ref()
            .execute(
                "UPDATE recommendations SET snoozed_until = ?2 WHERE id = ?1",
                rusqlite::params![id, until],
            )
            .unwrap();

        let data = get_pipeline_data(&db, &PipelineFilters::default()).unwrap();
        assert_eq!(data.deals[0].bucket, PipelineBucket::OnHold);
        assert_eq!(data.aggregates.on_hold.deal_count, 1);
    }

    #[test]
    fn test_expired_snooze_is_ignored() {
        let db = test_db();
        let id = seed_scored(&db, "jordan", 90, 1000.0, 30);
        let until = (Utc::now() - Duration::days(2)).to_rfc3339();
        db.conn_ref()
            .execute(
                "UPDATE recommendations SET snoozed_until = ?2 WHERE id = ?1",
                rusqlite::params![id, until],
            )
            .unwrap();

        let data = get_pipeline_data(&db, &PipelineFilters::default()).unwrap();
        assert_eq!(data.deals[0].bucket, PipelineBucket::ClosingSoon);
    }

    #[test]
    fn test_revived_deal_ages_from_revival() {
        let db = test_db();
        let id = seed_scored(&db, "jordan", 90, 1000.0, 120);
        let revived = (Utc::now() - Duration::days(3)).to_rfc3339();
        db.conn_ref()
            .execute(
                "UPDATE recommendations SET revived_at = ?2 WHERE id = ?1",
                rusqlite::params![id, revived],
            )
            .unwrap();

        let data = get_pipeline_data(&db, &PipelineFilters::default()).unwrap();
        // 3 days since revival: back to In Pipeline despite the score
        assert_eq!(data.deals[0].bucket, PipelineBucket::InPipeline);
    }

    #[test]
    fn test_owner_filter_keeps_full_rep_list() {
        let db = test_db();
        seed_scored(&db, "jordan", 85, 1000.0, 30);
        seed_scored(&db, "sam", 45, 600.0, 20);

        let filters = PipelineFilters {
            owner: Some("sam".to_string()),
        };
        let data = get_pipeline_data(&db, &filters).unwrap();
        assert_eq!(data.deals.len(), 1);
        assert_eq!(data.deals[0].owner.as_deref(), Some("sam"));
        assert_eq!(data.reps, vec!["jordan", "sam"]);
    }

    #[test]
    fn test_projection_excludes_at_risk_and_on_hold() {
        let db = test_db();
        seed_scored(&db, "jordan", 85, 1000.0, 30); // closing soon: weighted 850
        seed_scored(&db, "sam", 45, 600.0, 20);     // in pipeline: weighted 270
        seed_scored(&db, "sam", 10, 400.0, 50);     // at risk: excluded
        let snoozed = seed_scored(&db, "kim", 95, 2000.0, 40);
        let until = (Utc::now() + Duration::days(30)).to_rfc3339();
        db.conn_ref()
            .execute(
                "UPDATE recommendations SET snoozed_until = ?2 WHERE id = ?1",
                rusqlite::params![snoozed, until],
            )
            .unwrap();

        let summary = revenue_summary(&db, 10_000.0, 42).unwrap();
        assert_eq!(summary.projected_mrr, 11_120.0);
        assert_eq!(summary.potential_growth, 1_120.0);
        assert_eq!(summary.aggregates.on_hold.weighted_mrr, 1900.0);
        assert_eq!(summary.active_client_count, 42);
    }

    #[test]
    fn test_average_confidence_is_rounded_integer() {
        let db = test_db();
        seed_scored(&db, "jordan", 40, 100.0, 20);
        seed_scored(&db, "jordan", 45, 100.0, 20);

        let data = get_pipeline_data(&db, &PipelineFilters::default()).unwrap();
        // (40 + 45) / 2 = 42.5 → 43
        assert_eq!(data.aggregates.in_pipeline.avg_confidence, 43);
    }
}
