#![deny(warnings)]

//! Governance: policy proposals, one-vote-per-player tallies, and lazy,
//! idempotent resolution that enacts parameter changes.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{ParameterName, PlayerId, Policy, PolicyId, PolicyStatus};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

/// Errors from governance operations.
#[derive(Debug, Error, PartialEq)]
pub enum GovError {
    /// The player already voted on this policy.
    #[error("player {0} has already voted")]
    AlreadyVoted(PlayerId),
    /// Voting closed at `expires_at`.
    #[error("policy voting period has expired")]
    PolicyExpired,
    /// The policy is no longer (or not yet) active.
    #[error("policy is not active")]
    PolicyNotActive,
}

/// Tunable governance parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GovTuning {
    /// Length of the voting window.
    pub voting_period_hours: i64,
    /// Minimum total votes for a decisive resolution.
    pub quorum: u32,
}

impl Default for GovTuning {
    fn default() -> Self {
        Self {
            voting_period_hours: 72,
            quorum: 10,
        }
    }
}

/// Create an active policy with the voting deadline set from tuning.
/// `current_value` is the parameter table's value at proposal time.
#[allow(clippy::too_many_arguments)]
pub fn propose(
    id: PolicyId,
    proposer: PlayerId,
    parameter: ParameterName,
    current_value: Decimal,
    proposed_value: Decimal,
    title: impl Into<String>,
    description: impl Into<String>,
    tuning: &GovTuning,
    now: DateTime<Utc>,
) -> Policy {
    Policy {
        id,
        title: title.into(),
        description: description.into(),
        parameter,
        current_value,
        proposed_value,
        votes_for: 0,
        votes_against: 0,
        status: PolicyStatus::Active,
        proposer,
        expires_at: now + Duration::hours(tuning.voting_period_hours),
        voters: BTreeSet::new(),
    }
}

/// Record one vote. Each player votes at most once per policy.
pub fn vote(
    policy: &mut Policy,
    voter: PlayerId,
    in_favor: bool,
    now: DateTime<Utc>,
) -> Result<(), GovError> {
    if policy.status != PolicyStatus::Active {
        return Err(GovError::PolicyNotActive);
    }
    if now >= policy.expires_at {
        return Err(GovError::PolicyExpired);
    }
    if policy.voters.contains(&voter) {
        return Err(GovError::AlreadyVoted(voter));
    }
    if in_favor {
        policy.votes_for += 1;
    } else {
        policy.votes_against += 1;
    }
    policy.voters.insert(voter);
    Ok(())
}

/// Outcome of resolving a policy past its deadline.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Passed; write `value` into the parameter table.
    Enacted {
        parameter: ParameterName,
        value: Decimal,
    },
    /// Voted down or quorum missed.
    Rejected,
    /// Deadline passed with zero votes cast.
    Expired,
}

/// Resolve a policy if its deadline has passed.
///
/// Returns `None` when the policy is still open or already resolved, so
/// both lazy-on-read and background-sweep callers are idempotent. Enactment
/// itself (the parameter table write) is the caller's half of the step.
pub fn resolve(policy: &mut Policy, quorum: u32, now: DateTime<Utc>) -> Option<Resolution> {
    if policy.status != PolicyStatus::Active || now < policy.expires_at {
        return None;
    }
    let total = policy.votes_for + policy.votes_against;
    let resolution = if total == 0 {
        policy.status = PolicyStatus::Expired;
        Resolution::Expired
    } else if policy.votes_for > policy.votes_against && total >= quorum {
        policy.status = PolicyStatus::Enacted;
        Resolution::Enacted {
            parameter: policy.parameter.clone(),
            value: policy.proposed_value,
        }
    } else {
        policy.status = PolicyStatus::Rejected;
        Resolution::Rejected
    };
    info!(policy = %policy.id, status = ?policy.status, votes_for = policy.votes_for,
          votes_against = policy.votes_against, "policy resolved");
    Some(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn tax_policy() -> Policy {
        propose(
            PolicyId::new("pol1"),
            PlayerId::new("mayor"),
            ParameterName::packaging_tax(),
            Decimal::new(15, 2),
            Decimal::new(10, 2),
            "Reduce Packaging Tax",
            "Lower the tax on item packaging to stimulate trade",
            &GovTuning::default(),
            t0(),
        )
    }

    fn expiry() -> DateTime<Utc> {
        t0() + Duration::hours(72)
    }

    #[test]
    fn each_player_votes_once() {
        let mut p = tax_policy();
        vote(&mut p, PlayerId::new("a"), true, t0()).unwrap();
        let err = vote(&mut p, PlayerId::new("a"), false, t0()).unwrap_err();
        assert!(matches!(err, GovError::AlreadyVoted(_)));
        assert_eq!(p.votes_for, 1);
        assert_eq!(p.votes_against, 0);
    }

    #[test]
    fn vote_after_deadline_rejected() {
        let mut p = tax_policy();
        let err = vote(&mut p, PlayerId::new("a"), true, expiry()).unwrap_err();
        assert_eq!(err, GovError::PolicyExpired);
    }

    #[test]
    fn landslide_with_quorum_enacts() {
        let mut p = tax_policy();
        p.votes_for = 234;
        p.votes_against = 89;
        let res = resolve(&mut p, 10, expiry()).unwrap();
        assert_eq!(
            res,
            Resolution::Enacted {
                parameter: ParameterName::packaging_tax(),
                value: Decimal::new(10, 2),
            }
        );
        assert_eq!(p.status, PolicyStatus::Enacted);
    }

    #[test]
    fn majority_without_quorum_rejects() {
        let mut p = tax_policy();
        p.votes_for = 3;
        p.votes_against = 1;
        let res = resolve(&mut p, 10, expiry()).unwrap();
        assert_eq!(res, Resolution::Rejected);
        assert_eq!(p.status, PolicyStatus::Rejected);
    }

    #[test]
    fn tie_rejects() {
        let mut p = tax_policy();
        p.votes_for = 20;
        p.votes_against = 20;
        assert_eq!(
            resolve(&mut p, 10, expiry()),
            Some(Resolution::Rejected)
        );
    }

    #[test]
    fn zero_votes_expires() {
        let mut p = tax_policy();
        assert_eq!(
            resolve(&mut p, 10, expiry()),
            Some(Resolution::Expired)
        );
        assert_eq!(p.status, PolicyStatus::Expired);
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut p = tax_policy();
        p.votes_for = 234;
        p.votes_against = 89;
        assert!(resolve(&mut p, 10, expiry()).is_some());
        // Re-resolving a resolved policy is a no-op.
        assert_eq!(resolve(&mut p, 10, expiry()), None);
        assert_eq!(p.status, PolicyStatus::Enacted);
    }

    #[test]
    fn open_policy_does_not_resolve_early() {
        let mut p = tax_policy();
        p.votes_for = 234;
        assert_eq!(
            resolve(&mut p, 10, t0() + Duration::hours(1)),
            None
        );
        assert_eq!(p.status, PolicyStatus::Active);
    }
}
