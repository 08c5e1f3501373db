//! Submission targets.
//!
//! Every target exposes the same three operations so the orchestrator never
//! depends on portal-specific quirks. Markup scraping, message envelopes and
//! credential handling stay inside the individual implementations.

pub mod error;
pub mod gateway;
pub mod portal;

use async_trait::async_trait;
use claimbridge_model::{
    ClaimSubmission, ConnectorId, ConnectorKind, Disposition, TargetStatus,
};
use serde::{Deserialize, Serialize};

pub use error::ConnectorError;
pub use gateway::{GatewayConfig, GatewayConnector};
pub use portal::{PortalConfig, PortalConnector};

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Static facts about a configured connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    pub id: ConnectorId,
    pub kind: ConnectorKind,
    /// Fallback order among connectors of the same kind; lower goes first.
    pub priority: u32,
    /// Submissions must quote a verified eligibility reference.
    pub requires_eligibility: bool,
}

/// What a target returned for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub reference: String,
    pub disposition: Disposition,
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn descriptor(&self) -> &ConnectorDescriptor;

    /// Establish or refresh credentials. Called lazily by `submit` and again
    /// by the resilience wrapper after an authentication failure.
    async fn authenticate(&self) -> ConnectorResult<()>;

    async fn submit(
        &self,
        claim: &ClaimSubmission,
    ) -> ConnectorResult<SubmissionReceipt>;

    async fn check_status(&self, reference: &str)
    -> ConnectorResult<TargetStatus>;
}
