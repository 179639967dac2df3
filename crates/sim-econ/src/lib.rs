#![deny(warnings)]

//! Market pricing: trade-pressure repricing and the volatility circuit
//! breaker.
//!
//! Everything here is pure math over a per-item trailing trade window; the
//! runtime crate owns the item entity and applies the returned update
//! atomically with the stock and balance mutations. All thresholds are
//! tunables on [`MarketTuning`], never magic constants.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::warn;

/// Errors produced by market math.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Trade quantity must be >= 1.
    #[error("trade quantity must be >= 1")]
    ZeroQuantity,
    /// A tuning field is out of its valid range.
    #[error("invalid market tuning: {0}")]
    InvalidTuning(&'static str),
    /// Numeric conversion out of range.
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// Tunable market parameters. Defaults are a starting balance pass, not
/// fixed constants; operators override them from configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketTuning {
    /// Volume that normalizes trade pressure to a fraction.
    pub reference_volume: u32,
    /// Clamp on |price_volatility| per evaluation.
    pub max_volatility: Decimal,
    /// Price floor as a ratio of base price.
    pub min_floor_ratio: Decimal,
    /// Price ceiling as a ratio of base price.
    pub max_ceil_ratio: Decimal,
    /// Trailing window bound by trade count.
    pub window_max_trades: usize,
    /// Trailing window bound by trade age in seconds.
    pub window_max_age_secs: i64,
    /// |volatility| at or above this counts toward the breaker run.
    pub breaker_threshold: Decimal,
    /// Consecutive hot evaluations that trip the breaker.
    pub breaker_consecutive: u32,
    /// Trading freeze length once the breaker trips, in seconds.
    pub freeze_cooldown_secs: i64,
}

impl Default for MarketTuning {
    fn default() -> Self {
        Self {
            reference_volume: 20,
            max_volatility: Decimal::new(25, 2),
            min_floor_ratio: Decimal::new(50, 2),
            max_ceil_ratio: Decimal::new(300, 2),
            window_max_trades: 32,
            window_max_age_secs: 3600,
            breaker_threshold: Decimal::new(20, 2),
            breaker_consecutive: 3,
            freeze_cooldown_secs: 900,
        }
    }
}

/// Validate tuning ranges before use.
pub fn validate_tuning(t: &MarketTuning) -> Result<(), EconError> {
    if t.reference_volume == 0 {
        return Err(EconError::InvalidTuning("reference_volume must be >= 1"));
    }
    if t.max_volatility <= Decimal::ZERO {
        return Err(EconError::InvalidTuning("max_volatility must be > 0"));
    }
    if t.min_floor_ratio <= Decimal::ZERO || t.min_floor_ratio > Decimal::ONE {
        return Err(EconError::InvalidTuning("min_floor_ratio must be in (0, 1]"));
    }
    if t.max_ceil_ratio < Decimal::ONE {
        return Err(EconError::InvalidTuning("max_ceil_ratio must be >= 1"));
    }
    if t.window_max_trades == 0 || t.window_max_age_secs <= 0 {
        return Err(EconError::InvalidTuning("window bounds must be positive"));
    }
    if t.breaker_consecutive == 0 || t.freeze_cooldown_secs <= 0 {
        return Err(EconError::InvalidTuning("breaker bounds must be positive"));
    }
    Ok(())
}

/// Side of a trade from the player's perspective.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One executed trade in the trailing window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TradeRecord {
    pub side: TradeSide,
    pub quantity: u32,
    pub at: DateTime<Utc>,
}

/// Per-item trailing trade window plus breaker run counter.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TradeWindow {
    trades: VecDeque<TradeRecord>,
    /// Consecutive evaluations at or above the breaker threshold.
    breaker_run: u32,
}

impl TradeWindow {
    /// Record a trade and drop entries outside the window bounds.
    fn record(&mut self, side: TradeSide, quantity: u32, tuning: &MarketTuning, now: DateTime<Utc>) {
        self.trades.push_back(TradeRecord { side, quantity, at: now });
        let cutoff = now - Duration::seconds(tuning.window_max_age_secs);
        while let Some(front) = self.trades.front() {
            if front.at < cutoff || self.trades.len() > tuning.window_max_trades {
                self.trades.pop_front();
            } else {
                break;
            }
        }
    }

    /// Net bought-minus-sold units inside the window.
    fn net_units(&self) -> i64 {
        self.trades.iter().fold(0_i64, |acc, t| match t.side {
            TradeSide::Buy => acc + t.quantity as i64,
            TradeSide::Sell => acc - t.quantity as i64,
        })
    }

    /// Number of trades currently in the window.
    pub fn len(&self) -> usize {
        self.trades.len()
    }

    /// Whether the window holds no trades.
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

/// Result of one pricing evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceUpdate {
    /// Raw (unclamped) trade pressure.
    pub pressure: Decimal,
    /// Clamped signed volatility applied to the price.
    pub volatility: Decimal,
    /// New current price, inside the floor/ceiling band.
    pub new_price: Decimal,
    /// Set when this evaluation tripped the circuit breaker.
    pub freeze_until: Option<DateTime<Utc>>,
}

/// Reprice an item after a trade.
///
/// Executed atomically with the stock/balance mutation by the caller:
/// records the trade in the window, derives pressure and clamped
/// volatility, moves the price inside `[base * floor, base * ceil]`, and
/// advances the circuit-breaker run.
pub fn reprice(
    base_price: Decimal,
    current_price: Decimal,
    window: &mut TradeWindow,
    side: TradeSide,
    quantity: u32,
    tuning: &MarketTuning,
    now: DateTime<Utc>,
) -> Result<PriceUpdate, EconError> {
    if quantity == 0 {
        return Err(EconError::ZeroQuantity);
    }
    validate_tuning(tuning)?;

    window.record(side, quantity, tuning, now);

    let pressure = Decimal::from(window.net_units()) / Decimal::from(tuning.reference_volume);
    let volatility = pressure.clamp(-tuning.max_volatility, tuning.max_volatility);

    let floor = base_price * tuning.min_floor_ratio;
    let ceil = base_price * tuning.max_ceil_ratio;
    let new_price = (current_price * (Decimal::ONE + volatility)).clamp(floor, ceil);

    let hot = volatility.abs() >= tuning.breaker_threshold;
    if hot {
        window.breaker_run += 1;
    } else {
        window.breaker_run = 0;
    }

    let freeze_until = if window.breaker_run >= tuning.breaker_consecutive {
        window.breaker_run = 0;
        let until = now + Duration::seconds(tuning.freeze_cooldown_secs);
        warn!(%volatility, ?until, "circuit breaker tripped, trading frozen");
        Some(until)
    } else {
        None
    };

    Ok(PriceUpdate {
        pressure,
        volatility,
        new_price,
        freeze_until,
    })
}

/// Total coins debited for a buy of `quantity` units at `price`, with the
/// packaging tax surcharge applied. Rounded up to whole coins.
pub fn buy_cost(price: Decimal, quantity: u32, packaging_tax: Decimal) -> Result<u64, EconError> {
    if quantity == 0 {
        return Err(EconError::ZeroQuantity);
    }
    let tax = packaging_tax.max(Decimal::ZERO);
    let total = price * Decimal::from(quantity) * (Decimal::ONE + tax);
    total.ceil().to_u64().ok_or(EconError::NonFinite)
}

/// Coins credited for selling `quantity` units at `price`. Rounded down.
pub fn sell_proceeds(price: Decimal, quantity: u32) -> Result<u64, EconError> {
    if quantity == 0 {
        return Err(EconError::ZeroQuantity);
    }
    let total = price * Decimal::from(quantity);
    total.floor().to_u64().ok_or(EconError::NonFinite)
}
