use async_trait::async_trait;
use claimbridge_model::{
    ClaimId, ClaimSubmission, SubmissionAttempt, SubmissionResult,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{ClaimError, Result};

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Stores the claim unless one with the same id exists. Returns whether
    /// the claim was new.
    async fn save_claim(&self, claim: &ClaimSubmission) -> Result<bool>;

    async fn claim(&self, claim_id: &ClaimId) -> Result<Option<ClaimSubmission>>;

    /// Attempt log is append-only.
    async fn append_attempt(&self, attempt: &SubmissionAttempt) -> Result<()>;

    async fn attempts(&self, claim_id: &ClaimId) -> Result<Vec<SubmissionAttempt>>;

    /// Insert or replace the claim's result. A replacement must not move the
    /// status backwards or away from a terminal state.
    async fn put_result(&self, result: &SubmissionResult) -> Result<()>;

    async fn result(&self, claim_id: &ClaimId) -> Result<Option<SubmissionResult>>;

    /// Results still waiting on a target.
    async fn pending_results(&self) -> Result<Vec<SubmissionResult>>;
}

/// Enforces the monotonic status rule between a stored result and its
/// replacement.
pub fn check_replacement(
    previous: &SubmissionResult,
    next: &SubmissionResult,
) -> Result<()> {
    if previous.status == next.status {
        if previous.is_terminal() && previous != next {
            return Err(ClaimError::Internal(format!(
                "terminal result for {} cannot be rewritten",
                previous.claim_id
            )));
        }
        return Ok(());
    }
    let mut probe = previous.clone();
    probe.transition(next.status, next.updated_at)?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryClaimStore {
    claims: DashMap<ClaimId, ClaimSubmission>,
    attempts: DashMap<ClaimId, Vec<SubmissionAttempt>>,
    results: DashMap<ClaimId, SubmissionResult>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn save_claim(&self, claim: &ClaimSubmission) -> Result<bool> {
        match self.claims.entry(claim.claim_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(claim.clone());
                Ok(true)
            }
        }
    }

    async fn claim(&self, claim_id: &ClaimId) -> Result<Option<ClaimSubmission>> {
        Ok(self.claims.get(claim_id).map(|c| c.clone()))
    }

    async fn append_attempt(&self, attempt: &SubmissionAttempt) -> Result<()> {
        self.attempts
            .entry(attempt.claim_id.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn attempts(&self, claim_id: &ClaimId) -> Result<Vec<SubmissionAttempt>> {
        Ok(self
            .attempts
            .get(claim_id)
            .map(|a| a.clone())
            .unwrap_or_default())
    }

    async fn put_result(&self, result: &SubmissionResult) -> Result<()> {
        match self.results.entry(result.claim_id.clone()) {
            Entry::Occupied(mut slot) => {
                check_replacement(slot.get(), result)?;
                slot.insert(result.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(result.clone());
            }
        }
        Ok(())
    }

    async fn result(&self, claim_id: &ClaimId) -> Result<Option<SubmissionResult>> {
        Ok(self.results.get(claim_id).map(|r| r.clone()))
    }

    async fn pending_results(&self) -> Result<Vec<SubmissionResult>> {
        Ok(self
            .results
            .iter()
            .filter(|r| r.status == claimbridge_model::SubmissionStatus::Pending)
            .map(|r| r.clone())
            .collect())
    }
}
