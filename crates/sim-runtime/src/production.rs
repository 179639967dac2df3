//! Building placement, yield collection, and upgrades over the shared town.
//!
//! Lock order: building first, then owner. Placement takes only the player
//! lock; the building does not exist until the debit has committed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use sim_core::{Building, BuildingId, BuildingKind, MapPos, ParameterName, PlayerId};
use sim_production::{
    collect, placement_cost, start_upgrade, validate_placement, ProductionError, UpgradeStart,
};

use crate::{debit_coins, lock, Town, TownError};

impl Town {
    /// Place a new building for `owner`, debiting the placement cost.
    ///
    /// Separation is checked against the position table, which is complete
    /// regardless of which building locks are held elsewhere; placement
    /// itself is serialized by the owner's lock, so two calls from the same
    /// player cannot both commit a violating pair. Distinct players racing
    /// the same spot is tolerated (positions are cosmetic between towns,
    /// binding within one player's town).
    pub fn place_building(
        &self,
        owner: &PlayerId,
        kind: BuildingKind,
        position: MapPos,
        now: DateTime<Utc>,
    ) -> Result<Building, TownError> {
        sim_core::validate_position(position)?;

        let player_arc = self.player_arc(owner)?;
        let mut player = lock(&player_arc, "player")?;

        let existing: Vec<MapPos> = self
            .positions
            .iter()
            .filter_map(|entry| {
                let (who, pos) = entry.value();
                (who == owner).then_some(*pos)
            })
            .collect();
        validate_placement(position, &existing, &self.tuning.production)?;

        let cost = placement_cost(kind);
        debit_coins(&mut player, cost)?;

        let building = Building {
            id: self.next_building_id(),
            owner: owner.clone(),
            kind,
            level: 1,
            position,
            last_collected_at: now,
            upgrade_completes_at: None,
        };
        info!(building = %building.id, player = %owner, ?kind, cost, "building placed");
        self.positions
            .insert(building.id.clone(), (owner.clone(), position));
        self.buildings
            .insert(building.id.clone(), Arc::new(Mutex::new(building.clone())));
        Ok(building)
    }

    /// Collect accrued yield into the owner's balance. Returns the amount
    /// credited, which is zero when nothing has accrued.
    pub fn collect_building(
        &self,
        requester: &PlayerId,
        building_id: &BuildingId,
        now: DateTime<Utc>,
    ) -> Result<u64, TownError> {
        let building_arc = self.building_arc(building_id)?;
        let mut building = lock(&building_arc, "building")?;

        let multiplier = self.production_multiplier();
        let amount = collect(
            &mut building,
            requester,
            multiplier,
            &self.tuning.production,
            now,
        )?;

        if amount > 0 {
            let player_arc = self.player_arc(requester)?;
            let mut player = lock(&player_arc, "player")?;
            player.coins = player.coins.saturating_add(amount);
            info!(building = %building_id, player = %requester, amount, "yield collected");
        }
        Ok(amount)
    }

    /// Start an upgrade: pending yield is collected first, then the cost is
    /// debited and the upgrade lock set. Insufficient funds rolls the whole
    /// request back, including the collection.
    pub fn upgrade_building(
        &self,
        requester: &PlayerId,
        building_id: &BuildingId,
        now: DateTime<Utc>,
    ) -> Result<UpgradeStart, TownError> {
        let building_arc = self.building_arc(building_id)?;
        let mut building = lock(&building_arc, "building")?;
        let before = building.clone();

        let multiplier = self.production_multiplier();
        let start = start_upgrade(
            &mut building,
            requester,
            multiplier,
            &self.tuning.production,
            now,
        )?;

        let player_arc = self.player_arc(requester)?;
        let mut player = lock(&player_arc, "player")?;
        let funded = player.coins.saturating_add(start.collected);
        if funded < start.cost {
            *building = before;
            return Err(TownError::InsufficientFunds {
                needed: start.cost,
                available: funded,
            });
        }
        player.coins = funded - start.cost;
        info!(building = %building_id, player = %requester, cost = start.cost,
              collected = start.collected, completes_at = %start.completes_at,
              "upgrade started");
        Ok(start)
    }

    /// Read a building snapshot, resolving any finished upgrade first.
    pub fn building(
        &self,
        id: &BuildingId,
        now: DateTime<Utc>,
    ) -> Result<Building, TownError> {
        let arc = self.building_arc(id)?;
        let mut guard = lock(&arc, "building")?;
        sim_production::resolve_upgrade(&mut guard, now);
        Ok(guard.clone())
    }

    /// Remove a building. Only the owner may demolish; accrued yield is
    /// forfeited and no coins are refunded.
    pub fn demolish_building(
        &self,
        requester: &PlayerId,
        building_id: &BuildingId,
    ) -> Result<(), TownError> {
        let arc = self.building_arc(building_id)?;
        let guard = lock(&arc, "building")?;
        if guard.owner != *requester {
            return Err(ProductionError::NotOwner(requester.clone()).into());
        }
        drop(guard);
        self.buildings.remove(building_id);
        self.positions.remove(building_id);
        info!(building = %building_id, player = %requester, "building demolished");
        Ok(())
    }

    pub(crate) fn production_multiplier(&self) -> Decimal {
        self.params
            .read()
            .value(&ParameterName::production_multiplier())
    }

    pub(crate) fn packaging_tax(&self) -> Decimal {
        self.params.read().value(&ParameterName::packaging_tax())
    }
}
