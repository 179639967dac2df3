//! Versioned economic parameter table.
//!
//! Governance enactment is the only writer; the production and market
//! engines read named, timestamped values instead of ambient globals.
//! Each value carries an effective-since timestamp so in-flight
//! computations can pin a consistent snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::PolicyId;

/// Name of an economic parameter, e.g. `production_multiplier`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParameterName(pub String);

impl ParameterName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Global multiplier applied to building yield.
    pub fn production_multiplier() -> Self {
        Self::new("production_multiplier")
    }

    /// Surcharge fraction added to market buy cost.
    pub fn packaging_tax() -> Self {
        Self::new("packaging_tax")
    }

    /// Resource decay rate (consumed by collaborator systems).
    pub fn decay_rate() -> Self {
        Self::new("decay_rate")
    }
}

impl std::fmt::Display for ParameterName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parameter value stamped with the instant it took effect.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    /// Current value.
    pub value: Decimal,
    /// When this value became live.
    pub effective_since: DateTime<Utc>,
}

/// Mapping from parameter name to its current versioned value.
///
/// Unknown parameters read as their registered default; parameters with no
/// registered default read as 0.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EconomicParameterTable {
    entries: BTreeMap<ParameterName, ParameterValue>,
    defaults: BTreeMap<ParameterName, Decimal>,
}

impl EconomicParameterTable {
    /// Table with the built-in parameter defaults registered at `now`.
    pub fn with_defaults(now: DateTime<Utc>) -> Self {
        let mut defaults = BTreeMap::new();
        defaults.insert(ParameterName::production_multiplier(), Decimal::ONE);
        defaults.insert(ParameterName::packaging_tax(), Decimal::new(15, 2));
        defaults.insert(ParameterName::decay_rate(), Decimal::new(5, 2));
        let entries = defaults
            .iter()
            .map(|(name, value)| {
                (
                    name.clone(),
                    ParameterValue {
                        value: *value,
                        effective_since: now,
                    },
                )
            })
            .collect();
        Self { entries, defaults }
    }

    /// Read a parameter, falling back to its default.
    pub fn get(&self, name: &ParameterName) -> ParameterValue {
        self.entries
            .get(name)
            .copied()
            .unwrap_or_else(|| ParameterValue {
                value: self.defaults.get(name).copied().unwrap_or(Decimal::ZERO),
                effective_since: DateTime::<Utc>::MIN_UTC,
            })
    }

    /// Convenience accessor for just the value.
    pub fn value(&self, name: &ParameterName) -> Decimal {
        self.get(name).value
    }

    /// Write a parameter on policy enactment. Single atomic write; readers
    /// see it on their next snapshot, never retroactively.
    pub fn enact(&mut self, policy: &PolicyId, name: ParameterName, value: Decimal, now: DateTime<Utc>) {
        info!(policy = %policy, parameter = %name, %value, "parameter enacted");
        self.entries.insert(
            name,
            ParameterValue {
                value,
                effective_since: now,
            },
        );
    }

    /// Consistent point-in-time copy for in-flight computations.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }
}
