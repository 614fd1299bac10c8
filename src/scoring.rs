//! The pure scoring engine.
//!
//! `compute` maps a fully-assembled [`ScoringInput`] to a
//! [`ScoringResult`] with no I/O, no clock reads, and no failure path:
//! unknown factor values contribute 0, missing timestamps behave like
//! events that never happened, and every component is clamped to its
//! configured cap. Determinism matters here — the daily cron replays
//! this function over thousands of deals and a bad row must degrade to a
//! conservative score, never abort the sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::timeutil::{clamp, days_between, hours_between, round2};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Deal lifecycle status as the engine understands it. Anything outside
/// the canonical set (legacy display values, typos) parses to `Other`
/// and takes the full scoring pipeline rather than a short-circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealStatus {
    Draft,
    Sent,
    Declined,
    Accepted,
    ClosedLost,
    Other,
}

impl DealStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "draft" => DealStatus::Draft,
            "sent" => DealStatus::Sent,
            "declined" => DealStatus::Declined,
            "accepted" => DealStatus::Accepted,
            "closed_lost" => DealStatus::ClosedLost,
            _ => DealStatus::Other,
        }
    }

    /// Terminal deals keep their last score; the orchestrator skips them
    /// unless explicitly told otherwise.
    pub fn is_terminal(self) -> bool {
        matches!(self, DealStatus::Accepted | DealStatus::ClosedLost)
    }
}

/// The deal fields the engine reads.
#[derive(Debug, Clone)]
pub struct DealSnapshot {
    pub status: DealStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub predicted_monthly: f64,
    pub predicted_onetime: f64,
}

/// Rep-entered call factors. Values are free-form strings looked up in
/// the config maps; anything unrecognized contributes 0.
#[derive(Debug, Clone, Default)]
pub struct CallScores {
    pub budget_clarity: Option<String>,
    pub competition: Option<String>,
    pub engagement: Option<String>,
    pub plan_fit: Option<String>,
}

/// Earliest engagement timestamp across all of the deal's invites.
#[derive(Debug, Clone, Copy, Default)]
pub struct InviteMilestones {
    pub first_email_opened_at: Option<DateTime<Utc>>,
    pub first_account_created_at: Option<DateTime<Utc>>,
    pub first_viewed_at: Option<DateTime<Utc>>,
}

/// How many invites exist and how many hit each milestone.
#[derive(Debug, Clone, Copy, Default)]
pub struct InviteStats {
    pub total_invites: usize,
    pub opened_count: usize,
    pub account_created_count: usize,
    pub viewed_count: usize,
}

/// Communication history distilled to what the silence penalty needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommsSummary {
    pub last_prospect_contact_at: Option<DateTime<Utc>>,
    pub last_team_contact_at: Option<DateTime<Utc>>,
    /// Outbound touches since the prospect last replied (all outbound
    /// touches when they never have).
    pub followup_count_since_last_reply: usize,
}

/// Everything `compute` needs, including the explicit `now`.
#[derive(Debug, Clone)]
pub struct ScoringInput {
    pub deal: DealSnapshot,
    pub call_scores: Option<CallScores>,
    pub milestones: InviteMilestones,
    pub invite_stats: InviteStats,
    pub comms: CommsSummary,
    pub config: ScoringConfig,
    pub now: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Per-penalty detail persisted in the history breakdown. Older history
/// rows may predate a field; deserialization defaults it to 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyBreakdown {
    pub email_not_opened: f64,
    pub proposal_not_viewed: f64,
    pub silence: f64,
    pub multi_invite_bonus: f64,
}

/// The full scoring outcome. This exact struct is serialized into the
/// history table as the audit breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringResult {
    pub confidence_score: i64,
    pub confidence_percent: f64,
    pub weighted_monthly: f64,
    pub weighted_onetime: f64,
    pub base_score: i64,
    pub total_penalties: f64,
    pub total_bonus: f64,
    pub penalty_breakdown: PenaltyBreakdown,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Compute the confidence score and weighted revenue for one deal.
pub fn compute(input: &ScoringInput) -> ScoringResult {
    match input.deal.status {
        // Lost deals carry no weight at all
        DealStatus::ClosedLost => ScoringResult::default(),
        // Accepted deals are certain: full predicted revenue
        DealStatus::Accepted => ScoringResult {
            confidence_score: 100,
            confidence_percent: 1.0,
            weighted_monthly: round2(input.deal.predicted_monthly),
            weighted_onetime: round2(input.deal.predicted_onetime),
            base_score: 100,
            ..Default::default()
        },
        // Drafts haven't been exposed to the prospect yet, so time-based
        // decay would be noise: base score only
        DealStatus::Draft => {
            let base = base_score(input.call_scores.as_ref(), &input.config);
            assemble(input, base, 0.0, 0.0, PenaltyBreakdown::default())
        }
        DealStatus::Sent | DealStatus::Declined | DealStatus::Other => {
            let base = base_score(input.call_scores.as_ref(), &input.config);
            let email = round2(email_not_opened_penalty(input));
            let viewed = round2(proposal_not_viewed_penalty(input));
            let silence = round2(silence_penalty(input));
            let bonus = multi_invite_bonus(input);
            let breakdown = PenaltyBreakdown {
                email_not_opened: email,
                proposal_not_viewed: viewed,
                silence,
                multi_invite_bonus: bonus,
            };
            let total_penalties = round2(email + viewed + silence);
            assemble(input, base, total_penalties, bonus, breakdown)
        }
    }
}

fn assemble(
    input: &ScoringInput,
    base: f64,
    total_penalties: f64,
    total_bonus: f64,
    breakdown: PenaltyBreakdown,
) -> ScoringResult {
    let raw = base - total_penalties + total_bonus;
    let confidence_score = clamp(raw, 0.0, 100.0).round() as i64;
    let confidence_percent = round2(confidence_score as f64 / 100.0);
    ScoringResult {
        confidence_score,
        confidence_percent,
        weighted_monthly: round2(input.deal.predicted_monthly * confidence_percent),
        weighted_onetime: round2(input.deal.predicted_onetime * confidence_percent),
        base_score: base.round() as i64,
        total_penalties,
        total_bonus,
        penalty_breakdown: breakdown,
    }
}

/// Weighted sum of the four call factors, or the configured default when
/// the call hasn't been scored yet.
fn base_score(call: Option<&CallScores>, config: &ScoringConfig) -> f64 {
    let Some(call) = call else {
        return config.default_base_score;
    };
    let base = &config.base;
    let weights = &base.weights;
    factor(&base.budget_clarity, weights.budget_clarity, call.budget_clarity.as_deref())
        + factor(&base.competition, weights.competition, call.competition.as_deref())
        + factor(&base.engagement, weights.engagement, call.engagement.as_deref())
        + factor(&base.plan_fit, weights.plan_fit, call.plan_fit.as_deref())
}

fn factor(map: &std::collections::HashMap<String, f64>, weight: f64, value: Option<&str>) -> f64 {
    let multiplier = value.and_then(|v| map.get(v)).copied().unwrap_or(0.0);
    weight * multiplier
}

/// Decay for invites nobody has opened, anchored at `sent_at`.
fn email_not_opened_penalty(input: &ScoringInput) -> f64 {
    if input.milestones.first_email_opened_at.is_some() {
        return 0.0;
    }
    let Some(sent_at) = input.deal.sent_at else {
        return 0.0;
    };
    let cfg = &input.config.email_not_opened;
    let hours = hours_between(Some(sent_at), input.now);
    if hours <= cfg.grace_period_hours {
        return 0.0;
    }
    let raw = ((hours - cfg.grace_period_hours) as f64 / 24.0) * cfg.daily_penalty;
    raw.min(cfg.max_penalty)
}

/// Decay for proposals never viewed, anchored at first engagement
/// (email open or account creation). Before any engagement exists the
/// email penalty governs that phase, so no anchor means no penalty.
fn proposal_not_viewed_penalty(input: &ScoringInput) -> f64 {
    if input.milestones.first_viewed_at.is_some() {
        return 0.0;
    }
    let anchor = match (
        input.milestones.first_email_opened_at,
        input.milestones.first_account_created_at,
    ) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    let Some(anchor) = anchor else {
        return 0.0;
    };
    let cfg = &input.config.proposal_not_viewed;
    let hours = hours_between(Some(anchor), input.now);
    if hours <= cfg.grace_period_hours {
        return 0.0;
    }
    let raw = ((hours - cfg.grace_period_hours) as f64 / 24.0) * cfg.daily_penalty;
    raw.min(cfg.max_penalty)
}

/// Decay for prospect silence, anchored at the last inbound contact (or
/// `sent_at` when they've never replied). Accelerates once the team has
/// sent `followup_threshold` unanswered follow-ups.
fn silence_penalty(input: &ScoringInput) -> f64 {
    if input.deal.sent_at.is_none() {
        return 0.0;
    }
    let anchor = input
        .comms
        .last_prospect_contact_at
        .or(input.deal.sent_at);
    let cfg = &input.config.silence;
    let days = days_between(anchor, input.now);
    if days <= cfg.grace_period_days {
        return 0.0;
    }
    let daily = if input.comms.followup_count_since_last_reply as i64 >= cfg.followup_threshold {
        cfg.daily_penalty * cfg.followup_multiplier
    } else {
        cfg.daily_penalty
    };
    let raw = (days - cfg.grace_period_days) as f64 * daily;
    raw.min(cfg.max_penalty)
}

/// Bonus for multi-invite deals where the whole buying group engaged.
fn multi_invite_bonus(input: &ScoringInput) -> f64 {
    let stats = &input.invite_stats;
    if stats.total_invites <= 1 {
        return 0.0;
    }
    let cfg = &input.config.multi_invite;
    let mut bonus = 0.0;
    if stats.opened_count >= stats.total_invites {
        bonus += cfg.all_opened_bonus;
    }
    if stats.viewed_count >= stats.total_invites {
        bonus += cfg.all_viewed_bonus;
    }
    bonus
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
