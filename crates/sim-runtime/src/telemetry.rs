//! Fire-and-forget telemetry seam.
//!
//! Terminal events are reported after the core mutation commits; a sink
//! failure (or a slow sink) must never roll back or block the mutation,
//! so the trait is infallible and implementations swallow their own errors.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sim_core::{HeistId, HeistStatus, ItemId, ParameterName, PolicyId, PolicyStatus};
use tracing::info;

/// Terminal events of interest to the notification collaborator.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A policy left the active state.
    PolicyResolved {
        policy: PolicyId,
        status: PolicyStatus,
        parameter: ParameterName,
    },
    /// A heist reached a terminal state.
    HeistResolved { heist: HeistId, outcome: HeistStatus },
    /// The volatility circuit breaker froze an item.
    MarketFrozen { item: ItemId, until: DateTime<Utc> },
}

/// Destination for terminal events.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, event: &TelemetryEvent);
}

/// Default sink: structured log lines via `tracing`.
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn publish(&self, event: &TelemetryEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => info!(target: "telemetry", %payload, "event"),
            Err(err) => info!(target: "telemetry", ?event, %err, "event (unserializable)"),
        }
    }
}
