//! Runtime error taxonomy.
//!
//! Validation errors reject before any mutation; state-conflict and
//! resource errors surface verbatim for the caller; `Contention` covers
//! exhausted lock acquisition. Every mutation either fully applies or
//! fully fails.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Typed failures returned by every town operation.
#[derive(Debug, Error, PartialEq)]
pub enum TownError {
    /// Bad input shape or range, rejected before any mutation.
    #[error(transparent)]
    Validation(#[from] sim_core::ValidationError),

    /// Balance too low for the attempted debit.
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    /// Market pool does not have the requested units.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },

    /// Seller does not hold the requested units.
    #[error("insufficient holdings: requested {requested}, held {held}")]
    InsufficientHoldings { requested: u32, held: u32 },

    /// Circuit breaker freeze still in effect.
    #[error("item trading is frozen until {0}")]
    ItemFrozen(DateTime<Utc>),

    /// Production state conflict (ownership, upgrade lock, placement).
    #[error(transparent)]
    Production(#[from] sim_production::ProductionError),

    /// Market math rejection (zero quantity, bad tuning).
    #[error(transparent)]
    Market(#[from] sim_econ::EconError),

    /// Governance state conflict (double vote, closed policy).
    #[error(transparent)]
    Governance(#[from] sim_gov::GovError),

    /// Heist state machine violation.
    #[error(transparent)]
    Heist(#[from] sim_heist::HeistError),

    /// Entity lookup failed.
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    /// Entity id already taken.
    #[error("{0} already exists: {1}")]
    AlreadyExists(&'static str, String),

    /// Lock acquisition exhausted its bounded wait; the caller should
    /// re-read state and retry.
    #[error("contention on {0}, retry with fresh state")]
    Contention(&'static str),
}
