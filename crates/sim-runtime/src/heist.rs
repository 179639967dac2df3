//! Two-player heist orchestration over the shared town.
//!
//! All state machine rules live in `sim_heist`; this layer pins a heist
//! behind its lock, forwards the request, and applies any settlement to the
//! player ledger. Settlement payouts are pure credits and reputation
//! adjustments, so they are applied per player in sequence after the heist
//! itself commits; no ordering of the two player locks can fail midway.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use sim_core::{Heist, HeistId, HeistPlan, PlayerId};
use sim_heist::Settlement;

use crate::{lock, TelemetryEvent, Town, TownError};

impl Town {
    /// Open a heist in planning against one of the configured targets.
    pub fn create_heist(
        &self,
        leader: &PlayerId,
        target_id: &str,
    ) -> Result<Heist, TownError> {
        self.player_arc(leader)?;
        let target = self
            .targets
            .iter()
            .find(|t| t.id == target_id)
            .cloned()
            .ok_or_else(|| TownError::NotFound("heist target", target_id.to_string()))?;
        let heist = sim_heist::create(self.next_heist_id(), leader.clone(), target);
        info!(heist = %heist.id, player = %leader, target = target_id, "heist created");
        self.heists
            .insert(heist.id.clone(), Arc::new(Mutex::new(heist.clone())));
        Ok(heist)
    }

    /// Replace the heist plan while planning. Leader or accepted partner.
    pub fn set_heist_plan(
        &self,
        requester: &PlayerId,
        heist_id: &HeistId,
        plan: HeistPlan,
    ) -> Result<Heist, TownError> {
        let arc = self.heist_arc(heist_id)?;
        let mut heist = lock(&arc, "heist")?;
        sim_heist::set_plan(&mut heist, requester, plan)?;
        Ok(heist.clone())
    }

    /// Invite a second player. Leader only; the invitee must exist.
    pub fn invite_heist_partner(
        &self,
        requester: &PlayerId,
        heist_id: &HeistId,
        partner: &PlayerId,
    ) -> Result<Heist, TownError> {
        self.player_arc(partner)?;
        let arc = self.heist_arc(heist_id)?;
        let mut heist = lock(&arc, "heist")?;
        sim_heist::invite_partner(&mut heist, requester, partner.clone())?;
        info!(heist = %heist_id, leader = %requester, partner = %partner, "partner invited");
        Ok(heist.clone())
    }

    /// Invited partner confirms.
    pub fn accept_heist_invite(
        &self,
        requester: &PlayerId,
        heist_id: &HeistId,
    ) -> Result<Heist, TownError> {
        let arc = self.heist_arc(heist_id)?;
        let mut heist = lock(&arc, "heist")?;
        sim_heist::accept_invite(&mut heist, requester)?;
        Ok(heist.clone())
    }

    /// Planning to Ready, once the plan is complete.
    pub fn ready_heist(
        &self,
        requester: &PlayerId,
        heist_id: &HeistId,
    ) -> Result<Heist, TownError> {
        let arc = self.heist_arc(heist_id)?;
        let mut heist = lock(&arc, "heist")?;
        sim_heist::ready(&mut heist, requester)?;
        Ok(heist.clone())
    }

    /// Ready to Executing. Either participant may pull the trigger.
    pub fn start_heist(
        &self,
        requester: &PlayerId,
        heist_id: &HeistId,
        now: DateTime<Utc>,
    ) -> Result<Heist, TownError> {
        let arc = self.heist_arc(heist_id)?;
        let mut heist = lock(&arc, "heist")?;
        sim_heist::start(&mut heist, requester, &self.tuning.heist, now)?;
        info!(heist = %heist_id, player = %requester, "heist started");
        Ok(heist.clone())
    }

    /// Complete the next objective. Returns the updated heist; a terminal
    /// transition has already been settled into the ledger on return.
    pub fn complete_heist_objective(
        &self,
        requester: &PlayerId,
        heist_id: &HeistId,
        index: u32,
        now: DateTime<Utc>,
    ) -> Result<Heist, TownError> {
        let arc = self.heist_arc(heist_id)?;
        let mut heist = lock(&arc, "heist")?;
        let settlement =
            sim_heist::complete_objective(&mut heist, requester, index, &self.tuning.heist, now)?;
        if let Some(settlement) = settlement {
            self.apply_settlement(&heist, settlement)?;
        }
        Ok(heist.clone())
    }

    /// Report a botched attempt at the current objective.
    pub fn fail_heist_objective(
        &self,
        requester: &PlayerId,
        heist_id: &HeistId,
        index: u32,
        now: DateTime<Utc>,
    ) -> Result<Heist, TownError> {
        let arc = self.heist_arc(heist_id)?;
        let mut heist = lock(&arc, "heist")?;
        let settlement =
            sim_heist::fail_objective(&mut heist, requester, index, &self.tuning.heist, now)?;
        if let Some(settlement) = settlement {
            self.apply_settlement(&heist, settlement)?;
        }
        Ok(heist.clone())
    }

    /// Walk away from any pre-terminal state.
    pub fn abort_heist(
        &self,
        requester: &PlayerId,
        heist_id: &HeistId,
    ) -> Result<Heist, TownError> {
        let arc = self.heist_arc(heist_id)?;
        let mut heist = lock(&arc, "heist")?;
        let settlement = sim_heist::abort(&mut heist, requester, &self.tuning.heist)?;
        self.apply_settlement(&heist, settlement)?;
        Ok(heist.clone())
    }

    /// Read a heist snapshot.
    pub fn heist(&self, id: &HeistId) -> Result<Heist, TownError> {
        let arc = self.heist_arc(id)?;
        let guard = lock(&arc, "heist")?;
        Ok(guard.clone())
    }

    fn apply_settlement(&self, heist: &Heist, settlement: Settlement) -> Result<(), TownError> {
        for (player_id, amount) in &settlement.payouts {
            let arc = self.player_arc(player_id)?;
            let mut player = lock(&arc, "player")?;
            player.coins = player.coins.saturating_add(*amount);
        }
        for (player_id, delta) in &settlement.reputation_deltas {
            let arc = self.player_arc(player_id)?;
            let mut player = lock(&arc, "player")?;
            player.reputation = player.reputation.saturating_add(*delta);
        }
        info!(heist = %heist.id, outcome = ?settlement.outcome,
              payouts = settlement.payouts.len(), "heist settled");
        self.telemetry.publish(&TelemetryEvent::HeistResolved {
            heist: heist.id.clone(),
            outcome: settlement.outcome,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Town, TownTuning, TracingSink};
    use chrono::{Duration, TimeZone};
    use sim_core::{HeistStatus, MapPos, TownTemplate};
    use sim_heist::HeistError;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 22, 0, 0).unwrap()
    }

    fn town() -> Town {
        let town = Town::new(TownTuning::default(), Arc::new(TracingSink), t0()).unwrap();
        for id in ["lead", "mate"] {
            town.create_player(PlayerId::new(id), id, TownTemplate::Starter)
                .unwrap();
        }
        town
    }

    fn plan(duo: bool) -> HeistPlan {
        HeistPlan {
            waypoints: vec![MapPos { x: 1.0, y: 1.0 }, MapPos { x: 2.0, y: 2.0 }],
            leader_entry_offset: Some(0),
            partner_entry_offset: duo.then_some(30),
        }
    }

    fn executing_duo(town: &Town) -> HeistId {
        let lead = PlayerId::new("lead");
        let mate = PlayerId::new("mate");
        let h = town.create_heist(&lead, "museum_gallery").unwrap();
        town.set_heist_plan(&lead, &h.id, plan(true)).unwrap();
        town.invite_heist_partner(&lead, &h.id, &mate).unwrap();
        town.accept_heist_invite(&mate, &h.id).unwrap();
        town.ready_heist(&lead, &h.id).unwrap();
        town.start_heist(&lead, &h.id, t0()).unwrap();
        h.id
    }

    #[test]
    fn unknown_target_is_rejected() {
        let town = town();
        assert!(matches!(
            town.create_heist(&PlayerId::new("lead"), "candy_store"),
            Err(TownError::NotFound("heist target", _))
        ));
    }

    #[test]
    fn solo_success_pays_full_reward() {
        let town = town();
        let lead = PlayerId::new("lead");
        let h = town.create_heist(&lead, "museum_gallery").unwrap();
        town.set_heist_plan(&lead, &h.id, plan(false)).unwrap();
        town.ready_heist(&lead, &h.id).unwrap();
        town.start_heist(&lead, &h.id, t0()).unwrap();

        let mut at = t0();
        for i in 0..3 {
            at += Duration::seconds(20);
            town.complete_heist_objective(&lead, &h.id, i, at).unwrap();
        }
        let settled = town.heist(&h.id).unwrap();
        assert_eq!(settled.status, HeistStatus::Succeeded);
        // museum gallery pays 2500; stealth stayed at 100 so no penalty
        let player = town.player(&lead).unwrap();
        assert_eq!(player.coins, 1000 + 2500);
        assert_eq!(player.reputation, 0);
    }

    #[test]
    fn duo_success_splits_reward_and_penalty() {
        let town = town();
        let id = executing_duo(&town);
        let lead = PlayerId::new("lead");
        let mate = PlayerId::new("mate");

        // 40 minutes elapse before the first objective: stealth 100 -> 60
        let at = t0() + Duration::minutes(40);
        for i in 0..3 {
            town.complete_heist_objective(&lead, &id, i, at).unwrap();
        }
        let settled = town.heist(&id).unwrap();
        assert_eq!(settled.status, HeistStatus::Succeeded);
        assert_eq!(settled.stealth_meter, 60);

        // leader gets 2500, partner floor(2500 * 0.5) = 1250
        assert_eq!(town.player(&lead).unwrap().coins, 1000 + 2500);
        assert_eq!(town.player(&mate).unwrap().coins, 1000 + 1250);
        // exposure 0.4 of risk 15 rounds to -6 for both
        assert_eq!(town.player(&lead).unwrap().reputation, -6);
        assert_eq!(town.player(&mate).unwrap().reputation, -6);
    }

    #[test]
    fn accepted_partner_may_update_the_plan() {
        let town = town();
        let lead = PlayerId::new("lead");
        let mate = PlayerId::new("mate");
        let h = town.create_heist(&lead, "museum_gallery").unwrap();
        town.invite_heist_partner(&lead, &h.id, &mate).unwrap();
        town.accept_heist_invite(&mate, &h.id).unwrap();
        let updated = town.set_heist_plan(&mate, &h.id, plan(true)).unwrap();
        assert_eq!(updated.plan.waypoints.len(), 2);
    }

    #[test]
    fn partner_may_progress_objectives() {
        let town = town();
        let id = executing_duo(&town);
        let mate = PlayerId::new("mate");
        let h = town
            .complete_heist_objective(&mate, &id, 0, t0() + Duration::seconds(30))
            .unwrap();
        assert_eq!(h.objectives_completed, 1);
    }

    #[test]
    fn out_of_order_objective_is_rejected() {
        let town = town();
        let id = executing_duo(&town);
        let err = town
            .complete_heist_objective(&PlayerId::new("lead"), &id, 2, t0())
            .unwrap_err();
        assert!(matches!(
            err,
            TownError::Heist(HeistError::ObjectiveSequenceViolation { expected: 0, got: 2 })
        ));
    }

    #[test]
    fn stranger_cannot_touch_the_heist() {
        let town = town();
        town.create_player(PlayerId::new("rando"), "rando", TownTemplate::Starter)
            .unwrap();
        let id = executing_duo(&town);
        let err = town
            .complete_heist_objective(&PlayerId::new("rando"), &id, 0, t0())
            .unwrap_err();
        assert!(matches!(
            err,
            TownError::Heist(HeistError::NotParticipant(_))
        ));
    }

    #[test]
    fn repeated_failures_exhaust_stealth_and_fail() {
        let town = town();
        let id = executing_duo(&town);
        let lead = PlayerId::new("lead");
        // fail penalty 15: seven failures drain 100 stealth
        for _ in 0..7 {
            let h = town.fail_heist_objective(&lead, &id, 0, t0()).unwrap();
            if h.status == HeistStatus::Failed {
                break;
            }
        }
        let settled = town.heist(&id).unwrap();
        assert_eq!(settled.status, HeistStatus::Failed);
        // full risk penalty, no payout
        assert_eq!(town.player(&lead).unwrap().coins, 1000);
        assert_eq!(town.player(&lead).unwrap().reputation, -15);
        assert_eq!(town.player(&PlayerId::new("mate")).unwrap().reputation, -15);
        // terminal heists reject further progress
        assert!(matches!(
            town.complete_heist_objective(&lead, &id, 0, t0()),
            Err(TownError::Heist(HeistError::InvalidHeistState(
                HeistStatus::Failed
            )))
        ));
    }

    #[test]
    fn abort_applies_reduced_penalty() {
        let town = town();
        let id = executing_duo(&town);
        let lead = PlayerId::new("lead");
        let h = town.abort_heist(&lead, &id).unwrap();
        assert_eq!(h.status, HeistStatus::Aborted);
        // risk 15 x 0.25 = 3.75, rounds to -4
        assert_eq!(town.player(&lead).unwrap().reputation, -4);
        assert_eq!(town.player(&lead).unwrap().coins, 1000);
    }

    #[test]
    fn skewed_entry_offsets_block_start() {
        let town = town();
        let lead = PlayerId::new("lead");
        let mate = PlayerId::new("mate");
        let h = town.create_heist(&lead, "central_vault").unwrap();
        let mut bad = plan(true);
        bad.partner_entry_offset = Some(600); // default max skew is 300s
        town.set_heist_plan(&lead, &h.id, bad).unwrap();
        town.invite_heist_partner(&lead, &h.id, &mate).unwrap();
        town.accept_heist_invite(&mate, &h.id).unwrap();
        town.ready_heist(&lead, &h.id).unwrap();
        assert!(matches!(
            town.start_heist(&lead, &h.id, t0()),
            Err(TownError::Heist(HeistError::PlanIncomplete(_)))
        ));
    }
}
