use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::connector::ConnectorKind;
use crate::ids::ConnectorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Point-in-time view of one connector's resilience state.
///
/// Only the connector's resilience wrapper mutates the underlying state; this
/// struct is the read-only copy handed to routing and operators.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectorHealth {
    pub connector_id: ConnectorId,
    pub kind: ConnectorKind,
    /// Lower is preferred when ordering fallbacks.
    pub priority: u32,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Failures observed inside the breaker's sliding window.
    pub recent_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Exponentially weighted call latency in milliseconds.
    pub avg_latency_ms: f64,
}

impl ConnectorHealth {
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

/// Health of every registered connector, keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HealthSnapshot {
    pub sampled_at: Option<DateTime<Utc>>,
    pub connectors: BTreeMap<ConnectorId, ConnectorHealth>,
}

impl HealthSnapshot {
    pub fn new(sampled_at: DateTime<Utc>) -> Self {
        Self {
            sampled_at: Some(sampled_at),
            connectors: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, health: ConnectorHealth) {
        self.connectors.insert(health.connector_id.clone(), health);
    }

    pub fn get(&self, id: &ConnectorId) -> Option<&ConnectorHealth> {
        self.connectors.get(id)
    }

    pub fn of_kind(
        &self,
        kind: ConnectorKind,
    ) -> impl Iterator<Item = &ConnectorHealth> {
        self.connectors.values().filter(move |h| h.kind == kind)
    }
}
