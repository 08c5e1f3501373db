//! Core data model definitions shared across claimbridge crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod attempt;
pub mod claim;
pub mod connector;
pub mod eligibility;
pub mod error;
pub mod health;
pub mod ids;
pub mod plan;
pub mod result;
pub mod validation;

// Intentionally curated re-exports for downstream consumers.
pub use attempt::{
    AttemptFailure, AttemptOutcome, Disposition, FailureKind,
    RejectionReason, SubmissionAttempt,
};
pub use claim::{ClaimSubmission, LineItem, Operation};
pub use connector::{ConnectorKind, TargetStatus};
pub use eligibility::{CoverageStatus, EligibilityKey, EligibilityRecord};
pub use error::{ModelError, Result as ModelResult};
pub use health::{CircuitState, ConnectorHealth, HealthSnapshot};
pub use ids::{AttemptId, ClaimId, ConnectorId, PatientId, PayerId, ProviderId};
pub use plan::{PlanMode, RoutingStrategy, SkippedTarget, SubmissionPlan};
pub use result::{Diagnostic, SubmissionResult, SubmissionStatus};
pub use validation::{
    IssueCode, RiskFactor, ValidationIssue, ValidationReport,
};
