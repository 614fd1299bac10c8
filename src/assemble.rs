//! Input assembly: read one deal's rows and shape the engine input.
//!
//! This is the only place raw table rows become a [`ScoringInput`].
//! Timestamps parse through `timeutil::parse_utc`; an unparseable value
//! is treated as absent so one corrupt row can't take down a batch.

use chrono::{DateTime, Utc};

use crate::config::load_scoring_config;
use crate::db::{Db, DbCommunication, DbInvite};
use crate::error::ScoreError;
use crate::scoring::{
    CallScores, CommsSummary, DealSnapshot, DealStatus, InviteMilestones, InviteStats, ScoringInput,
};
use crate::timeutil::parse_utc_opt;

/// Assemble everything `scoring::compute` needs for one deal.
///
/// Fails with `NotFound` when the deal doesn't exist; any other row
/// simply being absent (no call scores, no invites, no communications)
/// is a normal state the engine handles.
pub fn assemble_input(db: &Db, id: i64, now: DateTime<Utc>) -> Result<ScoringInput, ScoreError> {
    let rec = db
        .get_recommendation(id)?
        .ok_or(ScoreError::NotFound(id))?;

    let deal = DealSnapshot {
        status: DealStatus::parse(&rec.status),
        sent_at: parse_utc_opt(rec.sent_at.as_deref()),
        predicted_monthly: rec.predicted_monthly,
        predicted_onetime: rec.predicted_onetime,
    };

    let call_scores = db.get_call_scores(id)?.map(|row| CallScores {
        budget_clarity: row.budget_clarity,
        competition: row.competition,
        engagement: row.engagement,
        plan_fit: row.plan_fit,
    });

    let invites = db.get_invites(id)?;
    let (milestones, invite_stats) = summarize_invites(&invites);

    let comms = summarize_communications(&db.get_communications(id)?);

    Ok(ScoringInput {
        deal,
        call_scores,
        milestones,
        invite_stats,
        comms,
        config: load_scoring_config(db),
        now,
    })
}

/// Earliest timestamp per milestone plus per-milestone counts.
fn summarize_invites(invites: &[DbInvite]) -> (InviteMilestones, InviteStats) {
    let mut milestones = InviteMilestones::default();
    let mut stats = InviteStats {
        total_invites: invites.len(),
        ..Default::default()
    };

    for invite in invites {
        if let Some(opened) = parse_utc_opt(invite.email_opened_at.as_deref()) {
            stats.opened_count += 1;
            milestones.first_email_opened_at = Some(match milestones.first_email_opened_at {
                Some(existing) => existing.min(opened),
                None => opened,
            });
        }
        if let Some(created) = parse_utc_opt(invite.account_created_at.as_deref()) {
            stats.account_created_count += 1;
            milestones.first_account_created_at = Some(match milestones.first_account_created_at {
                Some(existing) => existing.min(created),
                None => created,
            });
        }
        if let Some(viewed) = parse_utc_opt(invite.viewed_at.as_deref()) {
            stats.viewed_count += 1;
            milestones.first_viewed_at = Some(match milestones.first_viewed_at {
                Some(existing) => existing.min(viewed),
                None => viewed,
            });
        }
    }

    (milestones, stats)
}

/// Last contact in each direction plus the unanswered-follow-up count.
fn summarize_communications(comms: &[DbCommunication]) -> CommsSummary {
    let mut summary = CommsSummary::default();

    for comm in comms {
        let Some(contact_at) = parse_utc_opt(Some(comm.contact_at.as_str())) else {
            continue;
        };
        match comm.direction.as_str() {
            "inbound" => {
                summary.last_prospect_contact_at = Some(match summary.last_prospect_contact_at {
                    Some(existing) => existing.max(contact_at),
                    None => contact_at,
                });
            }
            "outbound" => {
                summary.last_team_contact_at = Some(match summary.last_team_contact_at {
                    Some(existing) => existing.max(contact_at),
                    None => contact_at,
                });
            }
            _ => {}
        }
    }

    // Outbound touches after the prospect's last reply; all of them when
    // the prospect has never replied.
    summary.followup_count_since_last_reply = comms
        .iter()
        .filter(|c| c.direction == "outbound")
        .filter_map(|c| parse_utc_opt(Some(c.contact_at.as_str())))
        .filter(|at| match summary.last_prospect_contact_at {
            Some(last_reply) => *at > last_reply,
            None => true,
        })
        .count();

    summary
}
