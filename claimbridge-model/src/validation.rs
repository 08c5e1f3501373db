use chrono::{DateTime, Utc};

use crate::ids::ClaimId;

/// Machine-readable classification of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum IssueCode {
    MissingField,
    MalformedIdentifier,
    NoLineItems,
    InvalidQuantity,
    InvalidUnitPrice,
    MalformedDiagnosisCode,
    ServiceDateOutOfTolerance,
    StaleServiceDate,
    DuplicateDiagnosisCode,
    EligibilityRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValidationIssue {
    pub field: String,
    pub code: IssueCode,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(
        field: impl Into<String>,
        code: IssueCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

/// Contribution of one risk rule to the overall score.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RiskFactor {
    pub rule: String,
    pub weight: u8,
    pub detail: String,
}

/// Outcome of the validation and risk gate for one claim.
///
/// Produced once before routing and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValidationReport {
    pub claim_id: ClaimId,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Additive rule score, capped at 100.
    pub risk_score: u8,
    pub risk_factors: Vec<RiskFactor>,
    /// Set when `risk_score` reached the configured high-risk threshold.
    pub needs_review: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn has_hard_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_routable(&self) -> bool {
        !self.has_hard_errors()
    }

    /// Returns a copy with an extra hard error appended. Used when a later
    /// stage (eligibility mandate) discovers a structural problem.
    pub fn with_error(&self, issue: ValidationIssue) -> Self {
        let mut next = self.clone();
        next.errors.push(issue);
        next
    }

    pub fn error_messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }
}
