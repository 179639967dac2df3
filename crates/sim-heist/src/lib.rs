#![deny(warnings)]

//! Heist engine: an asynchronous two-player mission modeled as a pure state
//! machine over persisted data.
//!
//! Participants never share a live session; plans and entry offsets are
//! declared intents validated once at start. Every transition is a guarded
//! function from `(state, input, now)` to `(new state, effects)`; terminal
//! settlements come back as [`Settlement`] values the runtime applies to
//! the player ledger in the same logical step.

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{Heist, HeistId, HeistPartner, HeistPlan, HeistStatus, HeistTarget, PlayerId};
use thiserror::Error;
use tracing::info;

/// Errors from heist transitions. Any failing call leaves the heist
/// unchanged.
#[derive(Debug, Error, PartialEq)]
pub enum HeistError {
    /// The operation is not legal in the heist's current state.
    #[error("operation not valid in heist state {0:?}")]
    InvalidHeistState(HeistStatus),
    /// The requester is neither the leader nor an accepted partner.
    #[error("player {0} is not a participant")]
    NotParticipant(PlayerId),
    /// Only the leader may perform this operation.
    #[error("player {0} is not the heist leader")]
    NotLeader(PlayerId),
    /// The plan is missing something required to proceed.
    #[error("plan incomplete: {0}")]
    PlanIncomplete(&'static str),
    /// Objectives must be completed in index order.
    #[error("objective {got} attempted, expected {expected}")]
    ObjectiveSequenceViolation { expected: u32, got: u32 },
    /// The accepting player does not match the invited partner.
    #[error("player {0} was not invited to this heist")]
    PartnerMismatch(PlayerId),
}

/// Tunable heist parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HeistTuning {
    /// Scheduled stealth decay per minute of execution.
    pub stealth_decay_per_min: u32,
    /// Random extra decay in [-jitter, +jitter] per decay application;
    /// 0 makes execution fully deterministic.
    pub stealth_jitter: u32,
    /// Stealth penalty when an objective is failed or fumbled.
    pub objective_fail_penalty: u32,
    /// Partner's share of the leader's base reward.
    pub partner_share: Decimal,
    /// Fraction of reputation risk applied on abort.
    pub abort_penalty_ratio: Decimal,
    /// Maximum allowed skew between the two entry offsets, in seconds.
    pub max_entry_skew_secs: i64,
    /// Seed for the jitter stream.
    pub rng_seed: u64,
}

impl Default for HeistTuning {
    fn default() -> Self {
        Self {
            stealth_decay_per_min: 1,
            stealth_jitter: 0,
            objective_fail_penalty: 15,
            partner_share: Decimal::new(50, 2),
            abort_penalty_ratio: Decimal::new(25, 2),
            max_entry_skew_secs: 300,
            rng_seed: 42,
        }
    }
}

/// Terminal effects to apply to the player ledger.
#[derive(Clone, Debug, PartialEq)]
pub struct Settlement {
    /// Terminal status this settlement belongs to.
    pub outcome: HeistStatus,
    /// Coin credits per participant; empty on failure and abort.
    pub payouts: Vec<(PlayerId, u64)>,
    /// Signed reputation adjustments per participant (always <= 0 here).
    pub reputation_deltas: Vec<(PlayerId, i32)>,
}

/// Create a heist in `Planning` with full stealth. The target's difficulty
/// doubles as the objective count.
pub fn create(id: HeistId, leader: PlayerId, target: HeistTarget) -> Heist {
    let total_objectives = target.difficulty.max(1);
    Heist {
        id,
        leader,
        partner: None,
        status: HeistStatus::Planning,
        target,
        stealth_meter: 100,
        plan: HeistPlan::default(),
        objectives_completed: 0,
        total_objectives,
        started_at: None,
        decay_applied_at: None,
    }
}

fn is_participant(heist: &Heist, player: &PlayerId) -> bool {
    if heist.leader == *player {
        return true;
    }
    matches!(&heist.partner, Some(HeistPartner::Accepted(p)) if p == player)
}

/// Replace the plan. Mutable only while planning, by a participant.
pub fn set_plan(heist: &mut Heist, requester: &PlayerId, plan: HeistPlan) -> Result<(), HeistError> {
    if heist.status != HeistStatus::Planning {
        return Err(HeistError::InvalidHeistState(heist.status));
    }
    if !is_participant(heist, requester) {
        return Err(HeistError::NotParticipant(requester.clone()));
    }
    heist.plan = plan;
    Ok(())
}

/// Leader invites a partner while planning.
pub fn invite_partner(
    heist: &mut Heist,
    requester: &PlayerId,
    partner: PlayerId,
) -> Result<(), HeistError> {
    if heist.status != HeistStatus::Planning {
        return Err(HeistError::InvalidHeistState(heist.status));
    }
    if heist.leader != *requester {
        return Err(HeistError::NotLeader(requester.clone()));
    }
    if partner == heist.leader {
        return Err(HeistError::PartnerMismatch(partner));
    }
    heist.partner = Some(HeistPartner::Invited(partner));
    Ok(())
}

/// Invited partner confirms participation.
pub fn accept_invite(heist: &mut Heist, player: &PlayerId) -> Result<(), HeistError> {
    if heist.status != HeistStatus::Planning {
        return Err(HeistError::InvalidHeistState(heist.status));
    }
    match &heist.partner {
        Some(HeistPartner::Invited(p)) if p == player => {
            heist.partner = Some(HeistPartner::Accepted(player.clone()));
            Ok(())
        }
        _ => Err(HeistError::PartnerMismatch(player.clone())),
    }
}

/// Planning -> Ready once the plan is complete and any invited partner has
/// accepted.
pub fn ready(heist: &mut Heist, requester: &PlayerId) -> Result<(), HeistError> {
    if heist.status != HeistStatus::Planning {
        return Err(HeistError::InvalidHeistState(heist.status));
    }
    if !is_participant(heist, requester) {
        // An invited-but-unaccepted partner is not yet a participant.
        return Err(HeistError::NotParticipant(requester.clone()));
    }
    if heist.plan.waypoints.is_empty() {
        return Err(HeistError::PlanIncomplete("at least one waypoint required"));
    }
    match &heist.partner {
        Some(HeistPartner::Invited(_)) => {
            return Err(HeistError::PlanIncomplete("partner has not accepted"));
        }
        Some(HeistPartner::Accepted(_)) => {
            if heist.plan.leader_entry_offset.is_none() || heist.plan.partner_entry_offset.is_none()
            {
                return Err(HeistError::PlanIncomplete(
                    "both entry offsets required for a two-player heist",
                ));
            }
        }
        None => {}
    }
    heist.status = HeistStatus::Ready;
    Ok(())
}

/// Ready -> Executing. Entry offsets are validated here, once, instead of
/// synchronizing the two players in real time: the partner enters at or
/// after the leader, within the configured skew.
pub fn start(
    heist: &mut Heist,
    requester: &PlayerId,
    tuning: &HeistTuning,
    now: DateTime<Utc>,
) -> Result<(), HeistError> {
    if heist.status != HeistStatus::Ready {
        return Err(HeistError::InvalidHeistState(heist.status));
    }
    if !is_participant(heist, requester) {
        return Err(HeistError::NotParticipant(requester.clone()));
    }
    if matches!(&heist.partner, Some(HeistPartner::Accepted(_))) {
        let leader_off = heist
            .plan
            .leader_entry_offset
            .ok_or(HeistError::PlanIncomplete("leader entry offset missing"))?;
        let partner_off = heist
            .plan
            .partner_entry_offset
            .ok_or(HeistError::PlanIncomplete("partner entry offset missing"))?;
        if partner_off < leader_off {
            return Err(HeistError::PlanIncomplete(
                "partner must enter at or after the leader",
            ));
        }
        if partner_off - leader_off > tuning.max_entry_skew_secs {
            return Err(HeistError::PlanIncomplete("entry offsets exceed maximum skew"));
        }
    }
    heist.status = HeistStatus::Executing;
    heist.started_at = Some(now);
    heist.decay_applied_at = Some(now);
    info!(heist = %heist.id, target = %heist.target.name, "heist started");
    Ok(())
}

/// Apply scheduled stealth decay owed since the last application.
fn apply_decay(heist: &mut Heist, tuning: &HeistTuning, now: DateTime<Utc>) {
    let Some(since) = heist.decay_applied_at else {
        return;
    };
    let minutes = (now - since).num_minutes();
    if minutes <= 0 {
        return;
    }
    let mut decay = (minutes as u64).saturating_mul(tuning.stealth_decay_per_min as u64);
    if tuning.stealth_jitter > 0 {
        let mut rng = ChaCha8Rng::seed_from_u64(jitter_seed(&heist.id, tuning.rng_seed, since));
        let j = tuning.stealth_jitter as i64;
        let jitter = rng.gen_range(-j..=j);
        decay = decay.saturating_add_signed(jitter);
    }
    heist.stealth_meter = heist.stealth_meter.saturating_sub(decay.min(u32::MAX as u64) as u32);
    heist.decay_applied_at = Some(since + chrono::Duration::minutes(minutes));
}

/// Seed for one decay application: the heist id folded with FNV-1a, the
/// configured base seed, and the start of the decay window. Replays
/// reproduce the same draw; successive applications draw fresh ones.
fn jitter_seed(id: &HeistId, base: u64, since: DateTime<Utc>) -> u64 {
    let mut folded: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.0.as_bytes() {
        folded ^= *byte as u64;
        folded = folded.wrapping_mul(0x0100_0000_01b3);
    }
    folded ^ base ^ since.timestamp() as u64
}

fn participants(heist: &Heist) -> Vec<PlayerId> {
    let mut out = vec![heist.leader.clone()];
    if let Some(HeistPartner::Accepted(p)) = &heist.partner {
        out.push(p.clone());
    }
    out
}

fn reputation_penalty(risk: u32, fraction: Decimal) -> i32 {
    let penalty = (Decimal::from(risk) * fraction).round().to_i32().unwrap_or(0);
    -penalty.max(0)
}

fn settle_failed(heist: &mut Heist) -> Settlement {
    heist.status = HeistStatus::Failed;
    let deltas = participants(heist)
        .into_iter()
        .map(|p| (p, -(heist.target.reputation_risk as i32)))
        .collect();
    info!(heist = %heist.id, "heist failed: stealth exhausted");
    Settlement {
        outcome: HeistStatus::Failed,
        payouts: Vec::new(),
        reputation_deltas: deltas,
    }
}

fn settle_succeeded(heist: &mut Heist, tuning: &HeistTuning) -> Settlement {
    heist.status = HeistStatus::Succeeded;
    let mut payouts = vec![(heist.leader.clone(), heist.target.reward)];
    if let Some(HeistPartner::Accepted(p)) = &heist.partner {
        let share = (Decimal::from(heist.target.reward) * tuning.partner_share)
            .floor()
            .to_u64()
            .unwrap_or(0);
        payouts.push((p.clone(), share));
    }
    // Sloppier runs cost more standing: penalty scales with how far the
    // stealth meter fell.
    let exposure =
        Decimal::ONE - Decimal::from(heist.stealth_meter.min(100)) / Decimal::from(100u32);
    let deltas = participants(heist)
        .into_iter()
        .map(|p| (p, reputation_penalty(heist.target.reputation_risk, exposure)))
        .collect();
    info!(heist = %heist.id, stealth = heist.stealth_meter, "heist succeeded");
    Settlement {
        outcome: HeistStatus::Succeeded,
        payouts,
        reputation_deltas: deltas,
    }
}

/// Complete the next objective, in index order.
///
/// Scheduled decay is applied first; if it exhausts the stealth meter the
/// heist fails instead. Completing the final objective settles success.
pub fn complete_objective(
    heist: &mut Heist,
    requester: &PlayerId,
    index: u32,
    tuning: &HeistTuning,
    now: DateTime<Utc>,
) -> Result<Option<Settlement>, HeistError> {
    if heist.status != HeistStatus::Executing {
        return Err(HeistError::InvalidHeistState(heist.status));
    }
    if !is_participant(heist, requester) {
        return Err(HeistError::NotParticipant(requester.clone()));
    }
    if index != heist.objectives_completed {
        return Err(HeistError::ObjectiveSequenceViolation {
            expected: heist.objectives_completed,
            got: index,
        });
    }
    apply_decay(heist, tuning, now);
    if heist.stealth_meter == 0 {
        return Ok(Some(settle_failed(heist)));
    }
    heist.objectives_completed += 1;
    if heist.objectives_completed == heist.total_objectives {
        return Ok(Some(settle_succeeded(heist, tuning)));
    }
    Ok(None)
}

/// Report a failed attempt at the current objective: the sequence does not
/// advance and the configured penalty hits the stealth meter, possibly
/// failing the heist.
pub fn fail_objective(
    heist: &mut Heist,
    requester: &PlayerId,
    index: u32,
    tuning: &HeistTuning,
    now: DateTime<Utc>,
) -> Result<Option<Settlement>, HeistError> {
    if heist.status != HeistStatus::Executing {
        return Err(HeistError::InvalidHeistState(heist.status));
    }
    if !is_participant(heist, requester) {
        return Err(HeistError::NotParticipant(requester.clone()));
    }
    if index != heist.objectives_completed {
        return Err(HeistError::ObjectiveSequenceViolation {
            expected: heist.objectives_completed,
            got: index,
        });
    }
    apply_decay(heist, tuning, now);
    heist.stealth_meter = heist.stealth_meter.saturating_sub(tuning.objective_fail_penalty);
    if heist.stealth_meter == 0 {
        return Ok(Some(settle_failed(heist)));
    }
    Ok(None)
}

/// Abort from any pre-terminal state. No reward; a reduced reputation
/// penalty, since walking away is safer than getting caught.
pub fn abort(
    heist: &mut Heist,
    requester: &PlayerId,
    tuning: &HeistTuning,
) -> Result<Settlement, HeistError> {
    if heist.status.terminal() {
        return Err(HeistError::InvalidHeistState(heist.status));
    }
    if !is_participant(heist, requester) {
        return Err(HeistError::NotParticipant(requester.clone()));
    }
    heist.status = HeistStatus::Aborted;
    let deltas = participants(heist)
        .into_iter()
        .map(|p| {
            (
                p,
                reputation_penalty(heist.target.reputation_risk, tuning.abort_penalty_ratio),
            )
        })
        .collect();
    info!(heist = %heist.id, "heist aborted");
    Ok(Settlement {
        outcome: HeistStatus::Aborted,
        payouts: Vec::new(),
        reputation_deltas: deltas,
    })
}
