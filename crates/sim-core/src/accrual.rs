//! Pure clock/accrual utility shared by the production and heist engines.

use chrono::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Yield accrued over `elapsed` at `rate_per_hour`, scaled by `multiplier`
/// and capped at `cap_hours` of accrual.
///
/// Monotonic non-decreasing in elapsed time, zero for non-positive elapsed,
/// and floored to whole coins. The cap bounds idle-time exploitation.
pub fn accrued_yield(
    rate_per_hour: Decimal,
    elapsed: Duration,
    multiplier: Decimal,
    cap_hours: i64,
) -> u64 {
    if rate_per_hour <= Decimal::ZERO || multiplier <= Decimal::ZERO {
        return 0;
    }
    let seconds = elapsed.num_seconds();
    if seconds <= 0 {
        return 0;
    }
    let capped = seconds.min(cap_hours.saturating_mul(3600));
    let hours = Decimal::from(capped) / Decimal::from(3600u32);
    let yield_dec = rate_per_hour * hours * multiplier;
    yield_dec.floor().to_u64().unwrap_or(0)
}
