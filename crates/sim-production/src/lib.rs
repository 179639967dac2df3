#![deny(warnings)]

//! Building production: placement rules, yield accrual and collection,
//! and the upgrade lifecycle with lazy completion.
//!
//! All operations are pure functions over a [`Building`]; the runtime crate
//! holds the locks and applies the returned coin deltas to the player
//! ledger in the same logical transaction.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{accrued_yield, validate_position, Building, BuildingKind, MapPos, PlayerId};
use thiserror::Error;
use tracing::debug;

/// Errors from production operations.
#[derive(Debug, Error, PartialEq)]
pub enum ProductionError {
    /// Requester does not own the building.
    #[error("player {0} does not own this building")]
    NotOwner(PlayerId),
    /// Collection blocked while an upgrade is in flight.
    #[error("collection blocked: upgrade in progress")]
    UpgradeInProgress,
    /// An upgrade is already running.
    #[error("building is already upgrading")]
    AlreadyUpgrading,
    /// Placement position is out of bounds or too close to another building.
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

/// Tunable production parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionTuning {
    /// Maximum hours of offline accrual counted at collection.
    pub accrual_cap_hours: i64,
    /// Minimum distance between two buildings, in map percent units.
    pub min_separation: f32,
}

impl Default for ProductionTuning {
    fn default() -> Self {
        Self {
            accrual_cap_hours: 24,
            min_separation: 5.0,
        }
    }
}

/// Coin cost to place a level-1 building of `kind`.
pub fn placement_cost(kind: BuildingKind) -> u64 {
    match kind {
        BuildingKind::TownCenter => 500,
        BuildingKind::Shop => 250,
        BuildingKind::Arcade => 300,
        BuildingKind::PuzzleHub => 300,
    }
}

/// Coins per hour generated by a building of `kind` at `level`.
///
/// Linear in level with a per-kind base rate.
pub fn yield_rate_per_hour(kind: BuildingKind, level: u32) -> Decimal {
    let base = match kind {
        BuildingKind::TownCenter => Decimal::new(10, 0),
        BuildingKind::Shop => Decimal::new(25, 0),
        BuildingKind::Arcade => Decimal::new(15, 0),
        BuildingKind::PuzzleHub => Decimal::new(12, 0),
    };
    base * Decimal::from(level.max(1))
}

/// Coin cost to upgrade a building of `kind` from `level` to `level + 1`.
pub fn upgrade_cost(kind: BuildingKind, level: u32) -> u64 {
    placement_cost(kind).saturating_mul(level.max(1) as u64)
}

/// Wall-clock duration of an upgrade from `level`.
pub fn upgrade_duration(level: u32) -> Duration {
    Duration::minutes(30).checked_mul(level.max(1) as i32).unwrap_or(Duration::hours(24))
}

/// Check a placement position against bounds and existing buildings.
pub fn validate_placement(
    pos: MapPos,
    existing: &[MapPos],
    tuning: &ProductionTuning,
) -> Result<(), ProductionError> {
    validate_position(pos).map_err(|e| ProductionError::InvalidPosition(e.to_string()))?;
    for other in existing {
        if pos.distance(*other) < tuning.min_separation {
            return Err(ProductionError::InvalidPosition(format!(
                "within {} units of an existing building",
                tuning.min_separation
            )));
        }
    }
    Ok(())
}

/// If the building's upgrade deadline has passed, bump the level and clear
/// the lock. Safe to call on every access; a no-op otherwise.
pub fn resolve_upgrade(building: &mut Building, now: DateTime<Utc>) {
    if let Some(done_at) = building.upgrade_completes_at {
        if done_at <= now {
            building.level += 1;
            building.upgrade_completes_at = None;
            debug!(building = %building.id, level = building.level, "upgrade completed");
        }
    }
}

/// Yield accrued since the last collection, under the given multiplier.
pub fn pending_yield(
    building: &Building,
    multiplier: Decimal,
    tuning: &ProductionTuning,
    now: DateTime<Utc>,
) -> u64 {
    let rate = yield_rate_per_hour(building.kind, building.level);
    accrued_yield(
        rate,
        now - building.last_collected_at,
        multiplier,
        tuning.accrual_cap_hours,
    )
}

/// Collect accrued yield: resolves a finished upgrade first, rejects while
/// an upgrade lock is held, then resets the accrual clock and returns the
/// coins to credit. Collecting twice at the same instant yields zero.
pub fn collect(
    building: &mut Building,
    requester: &PlayerId,
    multiplier: Decimal,
    tuning: &ProductionTuning,
    now: DateTime<Utc>,
) -> Result<u64, ProductionError> {
    if building.owner != *requester {
        return Err(ProductionError::NotOwner(requester.clone()));
    }
    resolve_upgrade(building, now);
    if building.upgrading(now) {
        return Err(ProductionError::UpgradeInProgress);
    }
    let amount = pending_yield(building, multiplier, tuning, now);
    building.last_collected_at = now;
    Ok(amount)
}

/// Outcome of starting an upgrade: the pending yield collected atomically
/// beforehand, the coin cost to debit, and the completion time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpgradeStart {
    /// Yield collected before the lock was taken (credit this).
    pub collected: u64,
    /// Upgrade cost (debit this; caller checks sufficiency first).
    pub cost: u64,
    /// When the upgrade completes.
    pub completes_at: DateTime<Utc>,
}

/// Start an upgrade. Pending yield is collected first so accrual during the
/// lock window can never be double counted at completion.
pub fn start_upgrade(
    building: &mut Building,
    requester: &PlayerId,
    multiplier: Decimal,
    tuning: &ProductionTuning,
    now: DateTime<Utc>,
) -> Result<UpgradeStart, ProductionError> {
    if building.owner != *requester {
        return Err(ProductionError::NotOwner(requester.clone()));
    }
    resolve_upgrade(building, now);
    if building.upgrade_completes_at.is_some() {
        return Err(ProductionError::AlreadyUpgrading);
    }
    let collected = pending_yield(building, multiplier, tuning, now);
    building.last_collected_at = now;
    let cost = upgrade_cost(building.kind, building.level);
    let completes_at = now + upgrade_duration(building.level);
    building.upgrade_completes_at = Some(completes_at);
    Ok(UpgradeStart {
        collected,
        cost,
        completes_at,
    })
}
