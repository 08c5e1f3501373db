use chrono::{DateTime, NaiveDate, Utc};

use crate::ids::{ConnectorId, PatientId, PayerId};

/// Cache key for coverage checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EligibilityKey {
    pub patient_id: PatientId,
    pub payer_id: PayerId,
    pub service_date: NaiveDate,
}

impl EligibilityKey {
    pub fn new(
        patient_id: PatientId,
        payer_id: PayerId,
        service_date: NaiveDate,
    ) -> Self {
        Self {
            patient_id,
            payer_id,
            service_date,
        }
    }

    /// Member/payer pair without the date, used for early invalidation.
    pub fn member(&self) -> (PatientId, PayerId) {
        (self.patient_id.clone(), self.payer_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CoverageStatus {
    Active,
    Inactive,
    Unknown,
}

/// Result of one coverage verification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EligibilityRecord {
    pub key: EligibilityKey,
    pub status: CoverageStatus,
    /// Reference issued by the verifying system, quoted on later submissions.
    pub reference: Option<String>,
    pub verified_by: Option<ConnectorId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EligibilityRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// A record counts as verified when the payer confirmed active coverage.
    pub fn is_verified(&self) -> bool {
        self.status == CoverageStatus::Active
    }
}
