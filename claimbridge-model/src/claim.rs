use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

use crate::ids::{ClaimId, PatientId, PayerId, ProviderId};

/// What the submission asks the payer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Operation {
    Eligibility,
    PriorAuth,
    Claim,
    Communication,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Eligibility => "eligibility",
            Operation::PriorAuth => "prior_auth",
            Operation::Claim => "claim",
            Operation::Communication => "communication",
        }
    }

    /// Whether the operation is billed and therefore subject to cost rules.
    pub fn is_billable(&self) -> bool {
        matches!(self, Operation::Claim | Operation::PriorAuth)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One billed service line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineItem {
    /// Procedure code (CPT/HCPCS or a local tariff code).
    pub code: String,
    pub quantity: i32,
    /// Unit price in minor currency units.
    pub unit_price_cents: i64,
}

impl LineItem {
    pub fn new(
        code: impl Into<String>,
        quantity: i32,
        unit_price_cents: i64,
    ) -> Self {
        Self {
            code: code.into(),
            quantity,
            unit_price_cents,
        }
    }

    pub fn total_cents(&self) -> i64 {
        i64::from(self.quantity).saturating_mul(self.unit_price_cents)
    }
}

/// Immutable claim payload handed to the engine once per business event.
///
/// Corrections never mutate an existing submission; they produce a new one
/// whose `corrects` field points at the original claim.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClaimSubmission {
    pub claim_id: ClaimId,
    pub patient_id: PatientId,
    pub payer_id: PayerId,
    pub provider_id: ProviderId,
    pub service_date: NaiveDate,
    pub line_items: Vec<LineItem>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub diagnosis_codes: Vec<String>,
    pub operation: Operation,
    #[cfg_attr(feature = "serde", serde(default))]
    pub corrects: Option<ClaimId>,
    pub created_at: DateTime<Utc>,
}

impl ClaimSubmission {
    pub fn total_billed_cents(&self) -> i64 {
        self.line_items
            .iter()
            .map(LineItem::total_cents)
            .fold(0i64, i64::saturating_add)
    }

    pub fn is_correction(&self) -> bool {
        self.corrects.is_some()
    }

    /// Procedure codes sorted and deduplicated, used for fingerprints.
    pub fn procedure_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> =
            self.line_items.iter().map(|l| l.code.as_str()).collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }
}
