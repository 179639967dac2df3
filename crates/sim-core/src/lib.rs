#![deny(warnings)]

//! Core domain models and invariants for the town simulation.
//!
//! This crate defines the serializable entity types shared by every engine
//! (production, market, governance, heist) together with validation helpers
//! that guarantee basic invariants. Engines never mutate these types outside
//! their own contracts; the runtime crate owns storage and locking.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub mod accrual;
pub mod params;

pub use accrual::accrued_yield;
pub use params::{EconomicParameterTable, ParameterName, ParameterValue};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Build an id from anything string-like.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a player.
    PlayerId
);
string_id!(
    /// Unique identifier for a placed building.
    BuildingId
);
string_id!(
    /// Unique identifier for a marketplace item.
    ItemId
);
string_id!(
    /// Unique identifier for a governance policy.
    PolicyId
);
string_id!(
    /// Unique identifier for a heist.
    HeistId
);

/// Starting loadout chosen at town creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TownTemplate {
    /// Default template: 1000 coins, 100 credits.
    Starter,
    /// Coin-heavy template for builders: 1500 coins, 75 credits.
    Balanced,
    /// Credit-heavy template for creators: 800 coins, 150 credits.
    Creator,
}

impl TownTemplate {
    /// Initial (coins, credits) grant for the template.
    pub fn starting_grant(self) -> (u64, u64) {
        match self {
            TownTemplate::Starter => (1000, 100),
            TownTemplate::Balanced => (1500, 75),
            TownTemplate::Creator => (800, 150),
        }
    }
}

/// A player with balances and progression state.
///
/// Balance invariant: `coins` and `credits` never go negative; every debit is
/// preceded by a sufficiency check under the same entity lock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    /// Player identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Primary soft currency.
    pub coins: u64,
    /// Secondary currency earned from creative systems.
    pub credits: u64,
    /// Social standing; heists can push this negative.
    pub reputation: i32,
    /// Town progression level (>= 1).
    pub town_level: u32,
    /// Template chosen at creation.
    pub town_template: TownTemplate,
}

impl Player {
    /// Create a player with the template's starting grant.
    pub fn new(id: PlayerId, name: impl Into<String>, template: TownTemplate) -> Self {
        let (coins, credits) = template.starting_grant();
        Self {
            id,
            name: name.into(),
            coins,
            credits,
            reputation: 0,
            town_level: 1,
            town_template: template,
        }
    }
}

/// Map position in percent-of-map coordinates, both axes in [0, 100].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapPos {
    pub x: f32,
    pub y: f32,
}

impl MapPos {
    /// Euclidean distance to another position, in map percent units.
    pub fn distance(self, other: MapPos) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Kinds of placeable buildings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingKind {
    /// Administrative hub; every town starts with one.
    TownCenter,
    /// Commercial building with the highest coin yield.
    Shop,
    /// Entertainment building feeding the arcade collaborator.
    Arcade,
    /// Creative building feeding the puzzle collaborator.
    PuzzleHub,
}

/// A placed building owned by a single player.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Building {
    /// Building identifier.
    pub id: BuildingId,
    /// Owning player; only the owner may collect, upgrade, or demolish.
    pub owner: PlayerId,
    /// Building kind.
    pub kind: BuildingKind,
    /// Current level (>= 1).
    pub level: u32,
    /// Position on the town map.
    pub position: MapPos,
    /// Last time yield was collected (accrual starts here).
    pub last_collected_at: DateTime<Utc>,
    /// When the in-flight upgrade finishes; `None` when not upgrading.
    pub upgrade_completes_at: Option<DateTime<Utc>>,
}

impl Building {
    /// Whether an upgrade lock is held at `now` (lazy completion pending).
    pub fn upgrading(&self, now: DateTime<Utc>) -> bool {
        matches!(self.upgrade_completes_at, Some(t) if t > now)
    }
}

/// Marketplace item categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    Consumable,
    Material,
    Cosmetic,
}

/// A marketplace item with dynamically priced stock.
///
/// `current_price` is only ever recomputed by the pricing algorithm in
/// `sim-econ`; trades never write it directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShopItem {
    /// Item identifier.
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Reference price the floor/ceiling bounds are anchored to.
    pub base_price: Decimal,
    /// Live price (>= 0, within the configured band around `base_price`).
    pub current_price: Decimal,
    /// Units available in the shared market pool.
    pub stock: u32,
    /// Signed volatility fraction from the last pricing evaluation.
    pub price_volatility: Decimal,
    /// Item category.
    pub category: ItemCategory,
    /// Circuit-breaker freeze; trades are rejected until this instant.
    pub trading_frozen_until: Option<DateTime<Utc>>,
}

impl ShopItem {
    /// Create an item priced at its base price with the given stock.
    pub fn new(
        id: ItemId,
        name: impl Into<String>,
        base_price: Decimal,
        stock: u32,
        category: ItemCategory,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            base_price,
            current_price: base_price,
            stock,
            price_volatility: Decimal::ZERO,
            category,
            trading_frozen_until: None,
        }
    }

    /// Whether trading is frozen at `now`.
    pub fn frozen(&self, now: DateTime<Utc>) -> bool {
        matches!(self.trading_frozen_until, Some(t) if t > now)
    }
}

/// Lifecycle status of a governance policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    /// Open for voting until `expires_at`.
    Active,
    /// Passed; its value has been written to the parameter table.
    Enacted,
    /// Voted down or quorum missed.
    Rejected,
    /// Expired with zero votes cast.
    Expired,
}

/// A proposed change to one economic parameter, resolved by player vote.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Policy {
    /// Policy identifier.
    pub id: PolicyId,
    /// Short title shown to voters.
    pub title: String,
    /// Longer rationale.
    pub description: String,
    /// The parameter this policy targets.
    pub parameter: ParameterName,
    /// Parameter value at proposal time (informational snapshot).
    pub current_value: Decimal,
    /// Value written to the table on enactment.
    pub proposed_value: Decimal,
    /// Votes in favor.
    pub votes_for: u32,
    /// Votes against.
    pub votes_against: u32,
    /// Lifecycle status.
    pub status: PolicyStatus,
    /// Proposing player.
    pub proposer: PlayerId,
    /// Voting deadline.
    pub expires_at: DateTime<Utc>,
    /// Players who have voted; enforces one vote per player.
    pub voters: BTreeSet<PlayerId>,
}

/// Partner slot on a heist: invited until the partner confirms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "player")]
pub enum HeistPartner {
    /// Invitation sent, not yet accepted.
    Invited(PlayerId),
    /// Partner confirmed; counts as a participant.
    Accepted(PlayerId),
}

impl HeistPartner {
    /// The player in the slot regardless of acceptance.
    pub fn player(&self) -> &PlayerId {
        match self {
            HeistPartner::Invited(p) | HeistPartner::Accepted(p) => p,
        }
    }
}

/// A heist target from the catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeistTarget {
    /// Target identifier, e.g. "central_vault".
    pub id: String,
    /// Display name.
    pub name: String,
    /// Difficulty 1..=5; doubles as the objective count.
    pub difficulty: u32,
    /// Coin reward on success (leader's base payout).
    pub reward: u64,
    /// Maximum reputation loss, 0..=100.
    pub reputation_risk: u32,
}

/// Declared approach for a heist: waypoints plus per-participant entry
/// offsets in seconds from mission start. Offsets are stored intents, not
/// live synchronization; consistency is checked once at start.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeistPlan {
    /// Ordered route through the target.
    pub waypoints: Vec<MapPos>,
    /// Leader's entry offset in seconds.
    pub leader_entry_offset: Option<i64>,
    /// Partner's entry offset in seconds.
    pub partner_entry_offset: Option<i64>,
}

/// Heist lifecycle. `Succeeded`, `Failed`, and `Aborted` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeistStatus {
    Planning,
    Ready,
    Executing,
    Succeeded,
    Failed,
    Aborted,
}

impl HeistStatus {
    /// Whether the heist can no longer change state.
    pub fn terminal(self) -> bool {
        matches!(
            self,
            HeistStatus::Succeeded | HeistStatus::Failed | HeistStatus::Aborted
        )
    }
}

/// An asynchronous two-player heist.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Heist {
    /// Heist identifier.
    pub id: HeistId,
    /// Creating player; always a participant.
    pub leader: PlayerId,
    /// Optional second participant.
    pub partner: Option<HeistPartner>,
    /// Lifecycle status.
    pub status: HeistStatus,
    /// Target being hit.
    pub target: HeistTarget,
    /// Stealth resource, 0..=100; reaching 0 fails the mission.
    pub stealth_meter: u32,
    /// Declared plan.
    pub plan: HeistPlan,
    /// Objectives completed so far, in index order.
    pub objectives_completed: u32,
    /// Total objectives required for success.
    pub total_objectives: u32,
    /// When execution began; `None` before start.
    pub started_at: Option<DateTime<Utc>>,
    /// Last instant scheduled stealth decay was applied through.
    pub decay_applied_at: Option<DateTime<Utc>>,
}

/// The built-in heist target catalog.
pub fn heist_targets() -> Vec<HeistTarget> {
    vec![
        HeistTarget {
            id: "central_vault".to_string(),
            name: "Central Vault".to_string(),
            difficulty: 5,
            reward: 5000,
            reputation_risk: 25,
        },
        HeistTarget {
            id: "museum_gallery".to_string(),
            name: "Museum Gallery".to_string(),
            difficulty: 3,
            reward: 2500,
            reputation_risk: 15,
        },
        HeistTarget {
            id: "research_lab".to_string(),
            name: "Research Lab".to_string(),
            difficulty: 4,
            reward: 3500,
            reputation_risk: 20,
        },
    ]
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Coordinates outside the [0, 100] map bounds.
    #[error("position ({0}, {1}) is outside map bounds [0, 100]")]
    PositionOutOfBounds(f32, f32),
    /// Coordinates must be finite.
    #[error("non-finite coordinate encountered")]
    NonFinite,
    /// Price or monetary value must be non-negative.
    #[error("negative monetary value is invalid")]
    NegativeMoney,
    /// Building level must be >= 1.
    #[error("building level must be >= 1")]
    ZeroLevel,
    /// Bounded percentage field outside [0, 100].
    #[error("{0} must be within [0, 100]")]
    PercentOutOfRange(&'static str),
    /// A name field was empty.
    #[error("empty name")]
    EmptyName,
    /// Quantity must be >= 1.
    #[error("quantity must be >= 1")]
    ZeroQuantity,
}

/// Validate a map position.
pub fn validate_position(pos: MapPos) -> Result<(), ValidationError> {
    if !(pos.x.is_finite() && pos.y.is_finite()) {
        return Err(ValidationError::NonFinite);
    }
    if !(0.0..=100.0).contains(&pos.x) || !(0.0..=100.0).contains(&pos.y) {
        return Err(ValidationError::PositionOutOfBounds(pos.x, pos.y));
    }
    Ok(())
}

/// Validate a building.
pub fn validate_building(b: &Building) -> Result<(), ValidationError> {
    validate_position(b.position)?;
    if b.level == 0 {
        return Err(ValidationError::ZeroLevel);
    }
    Ok(())
}

/// Validate a marketplace item.
pub fn validate_shop_item(item: &ShopItem) -> Result<(), ValidationError> {
    if item.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if item.base_price < Decimal::ZERO || item.current_price < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney);
    }
    Ok(())
}

/// Validate a heist target.
pub fn validate_heist_target(t: &HeistTarget) -> Result<(), ValidationError> {
    if t.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if t.reputation_risk > 100 {
        return Err(ValidationError::PercentOutOfRange("reputation_risk"));
    }
    Ok(())
}

/// Validate a heist's bounded fields.
pub fn validate_heist(h: &Heist) -> Result<(), ValidationError> {
    validate_heist_target(&h.target)?;
    if h.stealth_meter > 100 {
        return Err(ValidationError::PercentOutOfRange("stealth_meter"));
    }
    for wp in &h.plan.waypoints {
        validate_position(*wp)?;
    }
    Ok(())
}
