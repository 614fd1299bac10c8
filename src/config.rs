//! Scoring configuration: the weight/penalty tree behind every score.
//!
//! The live config is a JSON document in the `settings` table under
//! [`SCORING_CONFIG_KEY`]. Every field and every nesting level carries a
//! serde default, so a partial document (say, only a tweaked silence
//! rate) merges cleanly with the compiled defaults. A missing or
//! malformed row degrades to the defaults with a warning — config can
//! never stop a recalculation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::Db;

/// Settings-table key holding the scoring config JSON.
pub const SCORING_CONFIG_KEY: &str = "pipeline_scoring_config";

/// Full scoring configuration tree. See each section for the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Base score used when a deal has no call scores yet.
    pub default_base_score: f64,
    pub base: BaseScoreConfig,
    pub email_not_opened: EmailNotOpenedConfig,
    pub proposal_not_viewed: ProposalNotViewedConfig,
    pub silence: SilencePenaltyConfig,
    pub multi_invite: MultiInviteConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_base_score: 50.0,
            base: BaseScoreConfig::default(),
            email_not_opened: EmailNotOpenedConfig::default(),
            proposal_not_viewed: ProposalNotViewedConfig::default(),
            silence: SilencePenaltyConfig::default(),
            multi_invite: MultiInviteConfig::default(),
        }
    }
}

/// Weighted call-factor base score. Weights sum to 100 by default, so a
/// perfect call maps to a base of 100 before penalties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseScoreConfig {
    pub weights: FactorWeights,
    /// Per-factor value maps. Unrecognized values contribute 0.
    pub budget_clarity: HashMap<String, f64>,
    pub competition: HashMap<String, f64>,
    pub engagement: HashMap<String, f64>,
    pub plan_fit: HashMap<String, f64>,
}

impl Default for BaseScoreConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            budget_clarity: value_map(&[("clear", 1.0), ("vague", 0.5), ("none", 0.2), ("no_budget", 0.0)]),
            competition: value_map(&[("none", 1.0), ("some", 0.5), ("many", 0.15)]),
            engagement: value_map(&[("high", 1.0), ("medium", 0.70), ("low", 0.15)]),
            plan_fit: value_map(&[("strong", 1.0), ("medium", 0.65), ("weak", 0.25), ("poor", 0.0)]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub budget_clarity: f64,
    pub competition: f64,
    pub engagement: f64,
    pub plan_fit: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            budget_clarity: 25.0,
            competition: 20.0,
            engagement: 25.0,
            plan_fit: 30.0,
        }
    }
}

/// Penalty for invites whose email was never opened. Hour-anchored at
/// `sent_at`: nothing accrues inside the grace period, then
/// `daily_penalty` per 24h, capped at `max_penalty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailNotOpenedConfig {
    pub grace_period_hours: i64,
    pub daily_penalty: f64,
    pub max_penalty: f64,
}

impl Default for EmailNotOpenedConfig {
    fn default() -> Self {
        Self {
            grace_period_hours: 48,
            daily_penalty: 0.5,
            max_penalty: 25.0,
        }
    }
}

/// Penalty for proposals never viewed after the prospect first engaged
/// (opened the email or created an account). Same decay shape as
/// [`EmailNotOpenedConfig`] with a longer grace and a lower cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalNotViewedConfig {
    pub grace_period_hours: i64,
    pub daily_penalty: f64,
    pub max_penalty: f64,
}

impl Default for ProposalNotViewedConfig {
    fn default() -> Self {
        Self {
            grace_period_hours: 120,
            daily_penalty: 0.5,
            max_penalty: 20.0,
        }
    }
}

/// Day-anchored silence penalty with follow-up acceleration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilencePenaltyConfig {
    pub grace_period_days: i64,
    pub daily_penalty: f64,
    pub max_penalty: f64,
    /// Outbound follow-ups without a reply before acceleration kicks in.
    pub followup_threshold: i64,
    pub followup_multiplier: f64,
}

impl Default for SilencePenaltyConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 10,
            daily_penalty: 1.2,
            max_penalty: 60.0,
            followup_threshold: 3,
            followup_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiInviteConfig {
    pub all_opened_bonus: f64,
    pub all_viewed_bonus: f64,
}

impl Default for MultiInviteConfig {
    fn default() -> Self {
        Self {
            all_opened_bonus: 3.0,
            all_viewed_bonus: 5.0,
        }
    }
}

fn value_map(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Load the scoring config from the settings row, falling back to the
/// compiled defaults when the row is missing or malformed.
pub fn load_scoring_config(db: &Db) -> ScoringConfig {
    let raw = match db.get_setting(SCORING_CONFIG_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return ScoringConfig::default(),
        Err(e) => {
            log::warn!("Failed to read scoring config, using defaults: {}", e);
            return ScoringConfig::default();
        }
    };

    match serde_json::from_str::<ScoringConfig>(&raw) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Malformed scoring config row, using defaults: {}", e);
            ScoringConfig::default()
        }
    }
}
