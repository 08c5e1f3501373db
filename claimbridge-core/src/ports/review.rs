use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claimbridge_model::{ClaimId, Diagnostic};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// Risk score reached the review threshold; nothing was submitted.
    HighRisk,
    /// A queued submission never resolved within the polling window.
    PollingTimeout,
    /// No connector could be tried for the claim.
    NoEligibleConnector,
    /// Targets disagree or failed in a way an operator must reconcile.
    ManualReconciliation,
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReviewReason::HighRisk => "high_risk",
            ReviewReason::PollingTimeout => "polling_timeout",
            ReviewReason::NoEligibleConnector => "no_eligible_connector",
            ReviewReason::ManualReconciliation => "manual_reconciliation",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewTicket {
    pub ticket_id: Uuid,
    pub claim_id: ClaimId,
    pub reason: ReviewReason,
    pub diagnostics: Vec<Diagnostic>,
    pub created_at: DateTime<Utc>,
}

impl ReviewTicket {
    pub fn new(
        claim_id: ClaimId,
        reason: ReviewReason,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self {
            ticket_id: Uuid::now_v7(),
            claim_id,
            reason,
            diagnostics,
            created_at: Utc::now(),
        }
    }
}

/// Surfaces claims that need a human.
#[async_trait]
pub trait ReviewQueue: Send + Sync {
    async fn enqueue(&self, ticket: ReviewTicket) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryReviewQueue {
    tickets: Mutex<Vec<ReviewTicket>>,
}

impl InMemoryReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tickets(&self) -> Vec<ReviewTicket> {
        self.tickets.lock().clone()
    }

    pub fn for_claim(&self, claim_id: &ClaimId) -> Vec<ReviewTicket> {
        self.tickets
            .lock()
            .iter()
            .filter(|t| &t.claim_id == claim_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tickets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.lock().is_empty()
    }
}

#[async_trait]
impl ReviewQueue for InMemoryReviewQueue {
    async fn enqueue(&self, ticket: ReviewTicket) -> Result<()> {
        warn!(
            target: "claims::review",
            claim_id = %ticket.claim_id,
            reason = %ticket.reason,
            diagnostics = ticket.diagnostics.len(),
            "claim queued for manual review"
        );
        self.tickets.lock().push(ticket);
        Ok(())
    }
}
