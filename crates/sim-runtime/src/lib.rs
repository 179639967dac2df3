#![deny(warnings)]

//! Concurrent town runtime: per-entity locked tables over the pure engine
//! crates.
//!
//! Every operation is a discrete, idempotent-by-state request: clients poll
//! and mutate through these calls, there is no live simulation tick. The
//! required discipline is per-entity mutual exclusion with read-modify-write
//! atomicity: each entity lives behind its own lock, cross-entity operations
//! acquire entity locks before player locks, and player locks across one
//! operation are taken in sorted id order. There is no global lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use sim_core::{
    Building, BuildingId, EconomicParameterTable, Heist, HeistId, HeistTarget, ItemCategory,
    ItemId, MapPos, Player, PlayerId, Policy, PolicyId, ShopItem, TownTemplate,
};
use sim_econ::{validate_tuning, MarketTuning, TradeWindow};
use sim_gov::GovTuning;
use sim_heist::HeistTuning;
use sim_production::ProductionTuning;

mod error;
pub mod governance;
pub mod heist;
pub mod market;
pub mod production;
pub mod telemetry;

pub use error::TownError;
pub use market::TradeReceipt;
pub use telemetry::{TelemetryEvent, TelemetrySink, TracingSink};

/// How long any single entity lock acquisition may wait before the
/// operation fails with [`TownError::Contention`].
const LOCK_TIMEOUT: StdDuration = StdDuration::from_millis(250);

/// All engine tunings in one serde-loadable bundle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TownTuning {
    pub market: MarketTuning,
    pub production: ProductionTuning,
    pub governance: GovTuning,
    pub heist: HeistTuning,
}

/// A marketplace item together with its private trailing trade window.
#[derive(Debug)]
pub(crate) struct MarketEntry {
    pub item: ShopItem,
    pub window: TradeWindow,
}

/// Shared town state: one instance serves many concurrent player requests.
pub struct Town {
    pub(crate) players: DashMap<PlayerId, Arc<Mutex<Player>>>,
    pub(crate) buildings: DashMap<BuildingId, Arc<Mutex<Building>>>,
    pub(crate) items: DashMap<ItemId, Arc<Mutex<MarketEntry>>>,
    pub(crate) policies: DashMap<PolicyId, Arc<Mutex<Policy>>>,
    pub(crate) heists: DashMap<HeistId, Arc<Mutex<Heist>>>,
    /// Per-player item holdings; mutated only while holding the traded
    /// item's lock, which serializes all trades touching one key.
    pub(crate) holdings: DashMap<(PlayerId, ItemId), u32>,
    /// Building positions, immutable once placed. Separation checks read
    /// this table instead of taking building locks.
    pub(crate) positions: DashMap<BuildingId, (PlayerId, MapPos)>,
    pub(crate) params: RwLock<EconomicParameterTable>,
    pub(crate) tuning: TownTuning,
    pub(crate) telemetry: Arc<dyn TelemetrySink>,
    pub(crate) targets: Vec<HeistTarget>,
    building_seq: AtomicU64,
    policy_seq: AtomicU64,
    heist_seq: AtomicU64,
}

impl std::fmt::Debug for Town {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Town").finish_non_exhaustive()
    }
}

impl Town {
    /// Empty town with the given tuning and telemetry sink.
    ///
    /// Market tuning is validated here, once; trades then never re-hit a
    /// tuning failure after their ledger mutations have committed.
    pub fn new(
        tuning: TownTuning,
        telemetry: Arc<dyn TelemetrySink>,
        now: DateTime<Utc>,
    ) -> Result<Self, TownError> {
        validate_tuning(&tuning.market)?;
        Ok(Self::assemble(tuning, telemetry, now))
    }

    fn assemble(tuning: TownTuning, telemetry: Arc<dyn TelemetrySink>, now: DateTime<Utc>) -> Self {
        Self {
            players: DashMap::new(),
            buildings: DashMap::new(),
            items: DashMap::new(),
            policies: DashMap::new(),
            heists: DashMap::new(),
            holdings: DashMap::new(),
            positions: DashMap::new(),
            params: RwLock::new(EconomicParameterTable::with_defaults(now)),
            tuning,
            telemetry,
            targets: sim_core::heist_targets(),
            building_seq: AtomicU64::new(1),
            policy_seq: AtomicU64::new(1),
            heist_seq: AtomicU64::new(1),
        }
    }

    /// Town with default tuning, tracing telemetry, and the seed item
    /// catalog stocked.
    pub fn seeded(now: DateTime<Utc>) -> Self {
        let town = Self::assemble(TownTuning::default(), Arc::new(TracingSink), now);
        for item in seed_items() {
            town.stock_item(item);
        }
        town
    }

    /// Insert an item into the marketplace, replacing any existing entry
    /// (and its trade window) under the same id.
    pub fn stock_item(&self, item: ShopItem) {
        self.items.insert(
            item.id.clone(),
            Arc::new(Mutex::new(MarketEntry {
                item,
                window: TradeWindow::default(),
            })),
        );
    }

    // -- players / ledger ---------------------------------------------------

    /// Register a player with their template's starting grant. Player ids
    /// come from the session service, not from this core.
    pub fn create_player(
        &self,
        id: PlayerId,
        name: impl Into<String>,
        template: TownTemplate,
    ) -> Result<Player, TownError> {
        let player = Player::new(id.clone(), name, template);
        if self.players.contains_key(&id) {
            return Err(TownError::AlreadyExists("player", id.0));
        }
        info!(player = %id, ?template, "player created");
        self.players
            .insert(id, Arc::new(Mutex::new(player.clone())));
        Ok(player)
    }

    /// Read a player snapshot.
    pub fn player(&self, id: &PlayerId) -> Result<Player, TownError> {
        let arc = self.player_arc(id)?;
        let guard = lock(&arc, "player")?;
        Ok(guard.clone())
    }

    /// Credit coins and credits from an external collaborator (arcade,
    /// puzzle rewards). Credits never fail; balances only grow here.
    pub fn grant_reward(
        &self,
        id: &PlayerId,
        coins: u64,
        credits: u64,
    ) -> Result<Player, TownError> {
        let arc = self.player_arc(id)?;
        let mut guard = lock(&arc, "player")?;
        guard.coins = guard.coins.saturating_add(coins);
        guard.credits = guard.credits.saturating_add(credits);
        info!(player = %id, coins, credits, "external reward granted");
        Ok(guard.clone())
    }

    /// Units of `item` held by `player`.
    pub fn holding(&self, player: &PlayerId, item: &ItemId) -> u32 {
        self.holdings
            .get(&(player.clone(), item.clone()))
            .map(|q| *q)
            .unwrap_or(0)
    }

    /// Current parameter table snapshot.
    pub fn parameters(&self) -> EconomicParameterTable {
        self.params.read().snapshot()
    }

    // -- internal -----------------------------------------------------------

    pub(crate) fn player_arc(&self, id: &PlayerId) -> Result<Arc<Mutex<Player>>, TownError> {
        self.players
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TownError::NotFound("player", id.0.clone()))
    }

    pub(crate) fn building_arc(&self, id: &BuildingId) -> Result<Arc<Mutex<Building>>, TownError> {
        self.buildings
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TownError::NotFound("building", id.0.clone()))
    }

    pub(crate) fn item_arc(&self, id: &ItemId) -> Result<Arc<Mutex<MarketEntry>>, TownError> {
        self.items
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TownError::NotFound("item", id.0.clone()))
    }

    pub(crate) fn policy_arc(&self, id: &PolicyId) -> Result<Arc<Mutex<Policy>>, TownError> {
        self.policies
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TownError::NotFound("policy", id.0.clone()))
    }

    pub(crate) fn heist_arc(&self, id: &HeistId) -> Result<Arc<Mutex<Heist>>, TownError> {
        self.heists
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TownError::NotFound("heist", id.0.clone()))
    }

    pub(crate) fn next_building_id(&self) -> BuildingId {
        BuildingId::new(format!("bld:{}", self.building_seq.fetch_add(1, Ordering::Relaxed)))
    }

    pub(crate) fn next_policy_id(&self) -> PolicyId {
        PolicyId::new(format!("pol:{}", self.policy_seq.fetch_add(1, Ordering::Relaxed)))
    }

    pub(crate) fn next_heist_id(&self) -> HeistId {
        HeistId::new(format!("heist:{}", self.heist_seq.fetch_add(1, Ordering::Relaxed)))
    }
}

/// Acquire an entity lock, surfacing sustained contention instead of
/// blocking forever.
pub(crate) fn lock<'a, T>(
    arc: &'a Arc<Mutex<T>>,
    what: &'static str,
) -> Result<MutexGuard<'a, T>, TownError> {
    arc.try_lock_for(LOCK_TIMEOUT)
        .ok_or(TownError::Contention(what))
}

/// Debit coins after a sufficiency check; the caller already holds the
/// player's lock, so check and debit are one atomic step.
pub(crate) fn debit_coins(player: &mut Player, amount: u64) -> Result<(), TownError> {
    if player.coins < amount {
        return Err(TownError::InsufficientFunds {
            needed: amount,
            available: player.coins,
        });
    }
    player.coins -= amount;
    Ok(())
}

/// The starting marketplace catalog.
pub fn seed_items() -> Vec<ShopItem> {
    let item = |id: &str, name: &str, price: i64, stock: u32, cat: ItemCategory| {
        ShopItem::new(ItemId::new(id), name, Decimal::new(price, 0), stock, cat)
    };
    vec![
        item("wood", "Wood", 10, 200, ItemCategory::Material),
        item("stone", "Stone", 15, 200, ItemCategory::Material),
        item("iron", "Iron", 40, 120, ItemCategory::Material),
        item("apple", "Apple", 5, 300, ItemCategory::Consumable),
        item("magic_potion", "Magic Potion", 120, 60, ItemCategory::Consumable),
        item("time_booster", "Time Booster", 90, 80, ItemCategory::Consumable),
        item("hammer", "Hammer", 60, 100, ItemCategory::Material),
        item("shield", "Shield", 75, 90, ItemCategory::Cosmetic),
        item("magic_staff", "Magic Staff", 250, 40, ItemCategory::Cosmetic),
        item("golden_crown", "Golden Crown", 500, 25, ItemCategory::Cosmetic),
    ]
}
