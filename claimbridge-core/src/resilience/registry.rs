use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use claimbridge_model::{ConnectorId, ConnectorKind, HealthSnapshot};

use super::wrapper::ResilientConnector;
use crate::config::{BreakerConfig, RetryConfig};
use crate::connectors::{Connector, ConnectorDescriptor};
use crate::error::{ClaimError, Result};

/// Every configured connector, each behind its own resilience wrapper.
///
/// Registration order is kept; it is the submission order of parallel plans
/// and the final tie-break between otherwise equal connectors.
#[derive(Debug)]
pub struct ConnectorRegistry {
    retry: RetryConfig,
    breaker: BreakerConfig,
    ordered: Vec<Arc<ResilientConnector>>,
    index: HashMap<ConnectorId, usize>,
}

impl ConnectorRegistry {
    pub fn new(retry: RetryConfig, breaker: BreakerConfig) -> Self {
        Self {
            retry,
            breaker,
            ordered: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Result<()> {
        let id = connector.descriptor().id.clone();
        if id.is_blank() {
            return Err(ClaimError::Config("connector id cannot be empty".into()));
        }
        if self.index.contains_key(&id) {
            return Err(ClaimError::Config(format!(
                "connector {id} registered twice"
            )));
        }
        let wrapped = ResilientConnector::new(connector, &self.retry, &self.breaker);
        self.index.insert(id, self.ordered.len());
        self.ordered.push(Arc::new(wrapped));
        Ok(())
    }

    pub fn get(&self, id: &ConnectorId) -> Option<Arc<ResilientConnector>> {
        self.index.get(id).map(|&idx| Arc::clone(&self.ordered[idx]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResilientConnector>> {
        self.ordered.iter()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ConnectorDescriptor> {
        self.ordered.iter().map(|c| c.descriptor())
    }

    pub fn of_kind(
        &self,
        kind: ConnectorKind,
    ) -> impl Iterator<Item = &ConnectorDescriptor> {
        self.descriptors().filter(move |d| d.kind == kind)
    }

    /// Position in registration order.
    pub fn position(&self, id: &ConnectorId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Read-only copy of every breaker's state.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let mut snapshot = HealthSnapshot::new(Utc::now());
        for connector in &self.ordered {
            snapshot.insert(connector.health());
        }
        snapshot
    }
}
