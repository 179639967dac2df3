//! Policy proposals, voting, and lazy resolution over the shared town.
//!
//! Resolution is lazy: any read or vote past the deadline settles the
//! policy, and a periodic sweep catches policies nobody touches. Both paths
//! funnel through one idempotent settle step, so a policy enacts exactly
//! once no matter how many callers race past the deadline.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use sim_core::{ParameterName, PlayerId, Policy, PolicyId};
use sim_gov::{propose, resolve, vote, Resolution};

use crate::{lock, TelemetryEvent, Town, TownError};

impl Town {
    /// Submit a policy proposal against one economic parameter.
    pub fn propose_policy(
        &self,
        proposer: &PlayerId,
        parameter: ParameterName,
        proposed_value: Decimal,
        title: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Policy, TownError> {
        // existence check only; proposing costs nothing
        self.player_arc(proposer)?;
        let current_value = self.params.read().value(&parameter);
        let policy = propose(
            self.next_policy_id(),
            proposer.clone(),
            parameter,
            current_value,
            proposed_value,
            title,
            description,
            &self.tuning.governance,
            now,
        );
        info!(policy = %policy.id, player = %proposer, parameter = %policy.parameter,
              %proposed_value, expires_at = %policy.expires_at, "policy proposed");
        self.policies
            .insert(policy.id.clone(), Arc::new(Mutex::new(policy.clone())));
        Ok(policy)
    }

    /// Cast a vote. A vote arriving past the deadline settles the policy
    /// first and is then rejected as late.
    pub fn vote_policy(
        &self,
        voter: &PlayerId,
        policy_id: &PolicyId,
        in_favor: bool,
        now: DateTime<Utc>,
    ) -> Result<Policy, TownError> {
        self.player_arc(voter)?;
        let arc = self.policy_arc(policy_id)?;
        let mut policy = lock(&arc, "policy")?;
        self.settle(&mut policy, now);
        vote(&mut policy, voter.clone(), in_favor, now)?;
        Ok(policy.clone())
    }

    /// Read a policy snapshot, settling it first if its deadline passed.
    pub fn policy(&self, id: &PolicyId, now: DateTime<Utc>) -> Result<Policy, TownError> {
        let arc = self.policy_arc(id)?;
        let mut policy = lock(&arc, "policy")?;
        self.settle(&mut policy, now);
        Ok(policy.clone())
    }

    /// Settle every policy past its deadline. Returns how many resolved on
    /// this pass. Intended for a periodic background caller; safe to run
    /// concurrently with reads and votes.
    pub fn sweep_policies(&self, now: DateTime<Utc>) -> usize {
        let ids: Vec<PolicyId> = self.policies.iter().map(|e| e.key().clone()).collect();
        let mut settled = 0;
        for id in ids {
            let Ok(arc) = self.policy_arc(&id) else { continue };
            let Ok(mut policy) = lock(&arc, "policy") else { continue };
            if self.settle(&mut policy, now) {
                settled += 1;
            }
        }
        settled
    }

    /// Policies still open for voting at `now`.
    pub fn active_policies(&self, now: DateTime<Utc>) -> Vec<Policy> {
        let mut open: Vec<Policy> = self
            .policies
            .iter()
            .filter_map(|entry| {
                let mut policy = entry.value().try_lock()?;
                self.settle(&mut policy, now);
                (policy.status == sim_core::PolicyStatus::Active).then(|| policy.clone())
            })
            .collect();
        open.sort_by(|a, b| a.id.cmp(&b.id));
        open
    }

    /// Resolve one policy if due; writes the parameter table on enactment.
    /// The caller holds the policy lock, which serializes the status flip;
    /// the table write happens inside that critical section so a reader
    /// never sees an enacted policy with a stale table.
    fn settle(&self, policy: &mut Policy, now: DateTime<Utc>) -> bool {
        let Some(resolution) = resolve(policy, self.tuning.governance.quorum, now) else {
            return false;
        };
        if let Resolution::Enacted { parameter, value } = &resolution {
            self.params
                .write()
                .enact(&policy.id, parameter.clone(), *value, now);
        }
        self.telemetry.publish(&TelemetryEvent::PolicyResolved {
            policy: policy.id.clone(),
            status: policy.status,
            parameter: policy.parameter.clone(),
        });
        true
    }
}
