//! Validation & risk gate.
//!
//! Structural checks produce hard errors that block routing entirely. Soft
//! findings feed an additive 0-100 risk score; reaching the configured
//! threshold marks the claim for human review. The gate never mutates the
//! claim.

pub mod history;
pub mod rules;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use claimbridge_model::{
    ClaimSubmission, IssueCode, RiskFactor, ValidationIssue, ValidationReport,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::ValidationConfig;
use history::ClaimHistory;
use rules::{RiskRule, RuleContext};

static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$")
        .expect("identifier regex should compile")
});

static DIAGNOSIS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-TV-Z][0-9][0-9A-Z](\.?[0-9A-Z]{1,4})?$")
        .expect("diagnosis regex should compile")
});

const MAX_RISK_SCORE: u32 = 100;

pub struct ValidationGate {
    config: ValidationConfig,
    history: Arc<dyn ClaimHistory>,
    rules: Vec<Box<dyn RiskRule>>,
}

impl fmt::Debug for ValidationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<&str> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("ValidationGate")
            .field("config", &self.config)
            .field("rules", &rules)
            .finish()
    }
}

impl ValidationGate {
    pub fn new(config: ValidationConfig, history: Arc<dyn ClaimHistory>) -> Self {
        Self::with_rules(config, history, rules::default_rules())
    }

    pub fn with_rules(
        config: ValidationConfig,
        history: Arc<dyn ClaimHistory>,
        rules: Vec<Box<dyn RiskRule>>,
    ) -> Self {
        Self {
            config,
            history,
            rules,
        }
    }

    pub fn history(&self) -> &Arc<dyn ClaimHistory> {
        &self.history
    }

    pub fn validate(&self, claim: &ClaimSubmission) -> ValidationReport {
        self.validate_at(claim, Utc::now())
    }

    /// Validate against an explicit clock, so date tolerances are testable.
    pub fn validate_at(
        &self,
        claim: &ClaimSubmission,
        now: DateTime<Utc>,
    ) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        self.check_structure(claim, now, &mut errors, &mut warnings);

        // Scoring a structurally broken claim adds noise and changes nothing.
        let risk_factors = if errors.is_empty() {
            self.score(claim, now)
        } else {
            Vec::new()
        };
        let total: u32 =
            risk_factors.iter().map(|f| u32::from(f.weight)).sum();
        let risk_score = total.min(MAX_RISK_SCORE) as u8;
        let needs_review = errors.is_empty()
            && risk_score >= self.config.high_risk_threshold;

        debug!(
            target: "claims::validation",
            claim_id = %claim.claim_id,
            errors = errors.len(),
            warnings = warnings.len(),
            risk_score,
            needs_review,
            "claim validated"
        );

        ValidationReport {
            claim_id: claim.claim_id.clone(),
            errors,
            warnings,
            risk_score,
            risk_factors,
            needs_review,
            evaluated_at: now,
        }
    }

    fn score(
        &self,
        claim: &ClaimSubmission,
        now: DateTime<Utc>,
    ) -> Vec<RiskFactor> {
        let ctx = RuleContext {
            history: self.history.as_ref(),
            config: &self.config,
            now,
        };
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(claim, &ctx))
            .collect()
    }

    fn check_structure(
        &self,
        claim: &ClaimSubmission,
        now: DateTime<Utc>,
        errors: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationIssue>,
    ) {
        let identifiers = [
            ("claim_id", claim.claim_id.as_str()),
            ("patient_id", claim.patient_id.as_str()),
            ("payer_id", claim.payer_id.as_str()),
            ("provider_id", claim.provider_id.as_str()),
        ];
        for (field, value) in identifiers {
            if value.trim().is_empty() {
                errors.push(ValidationIssue::new(
                    field,
                    IssueCode::MissingField,
                    format!("{field} is required"),
                ));
            } else if !IDENTIFIER_PATTERN.is_match(value) {
                errors.push(ValidationIssue::new(
                    field,
                    IssueCode::MalformedIdentifier,
                    format!("{field} is malformed"),
                ));
            }
        }

        if claim.line_items.is_empty() {
            errors.push(ValidationIssue::new(
                "line_items",
                IssueCode::NoLineItems,
                "at least one line item is required",
            ));
        }
        for (idx, line) in claim.line_items.iter().enumerate() {
            let field = format!("line_items[{idx}]");
            if line.code.trim().is_empty() {
                errors.push(ValidationIssue::new(
                    format!("{field}.code"),
                    IssueCode::MissingField,
                    "procedure code is required",
                ));
            }
            if line.quantity <= 0 {
                errors.push(ValidationIssue::new(
                    format!("{field}.quantity"),
                    IssueCode::InvalidQuantity,
                    "quantity must be positive",
                ));
            }
            if line.unit_price_cents < 0 {
                errors.push(ValidationIssue::new(
                    format!("{field}.unit_price_cents"),
                    IssueCode::InvalidUnitPrice,
                    "unit price must not be negative",
                ));
            }
        }

        let today = now.date_naive();
        if claim.service_date
            > today + Duration::days(self.config.future_skew_days)
        {
            errors.push(ValidationIssue::new(
                "service_date",
                IssueCode::ServiceDateOutOfTolerance,
                "service date out of tolerance",
            ));
        } else if claim.service_date
            < today - Duration::days(self.config.stale_service_days)
        {
            warnings.push(ValidationIssue::new(
                "service_date",
                IssueCode::StaleServiceDate,
                "service date is older than the timely filing window",
            ));
        }

        if claim.operation.is_billable() && claim.diagnosis_codes.is_empty() {
            errors.push(ValidationIssue::new(
                "diagnosis_codes",
                IssueCode::MissingField,
                "at least one diagnosis code is required",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for (idx, code) in claim.diagnosis_codes.iter().enumerate() {
            if !DIAGNOSIS_PATTERN.is_match(code) {
                errors.push(ValidationIssue::new(
                    format!("diagnosis_codes[{idx}]"),
                    IssueCode::MalformedDiagnosisCode,
                    format!("diagnosis code {code:?} is malformed"),
                ));
            } else if !seen.insert(code.as_str()) {
                warnings.push(ValidationIssue::new(
                    format!("diagnosis_codes[{idx}]"),
                    IssueCode::DuplicateDiagnosisCode,
                    format!("diagnosis code {code} listed twice"),
                ));
            }
        }
    }
}
