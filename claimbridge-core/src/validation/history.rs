//! Historical claim facts consulted by the risk rules.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use claimbridge_model::{ClaimId, ClaimSubmission, PayerId, ProviderId};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Mean unit price observed for one payer/procedure pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostBaseline {
    pub mean_unit_cents: f64,
    pub samples: u32,
}

/// Billing volume for one provider over a trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProviderProfile {
    pub claims: u32,
    pub avg_lines_per_claim: f64,
}

/// Read side of the claim history collaborator. Implementations must be
/// cheap to query; the gate calls them synchronously.
pub trait ClaimHistory: Send + Sync {
    /// Another claim with the same fingerprint, if one was seen.
    fn find_duplicate(
        &self,
        fingerprint: &str,
        exclude: &ClaimId,
    ) -> Option<ClaimId>;

    fn cost_baseline(&self, payer: &PayerId, code: &str)
    -> Option<CostBaseline>;

    fn provider_profile(
        &self,
        provider: &ProviderId,
        since: DateTime<Utc>,
    ) -> ProviderProfile;

    /// Record a validated claim so later claims are scored against it.
    fn record(&self, claim: &ClaimSubmission);
}

/// Stable content hash of the billable facts of a claim.
///
/// Two submissions for the same patient, payer, date and procedure set hash
/// identically regardless of claim id or line order.
pub fn fingerprint(claim: &ClaimSubmission) -> String {
    let mut hasher = Sha256::new();
    hasher.update(claim.patient_id.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(claim.payer_id.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(claim.service_date.to_string().as_bytes());
    for code in claim.procedure_codes() {
        hasher.update([0u8]);
        hasher.update(code.as_bytes());
    }
    hasher.update(claim.total_billed_cents().to_be_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
struct HistoryState {
    fingerprints: HashMap<String, ClaimId>,
    // Fingerprints in arrival order, for retention.
    seen: VecDeque<(DateTime<Utc>, String)>,
    // (payer, code) -> (sum of unit prices, samples)
    prices: HashMap<(PayerId, String), (f64, u32)>,
    providers: HashMap<ProviderId, Vec<(DateTime<Utc>, usize)>>,
}

/// Process-local history, sufficient for a single node deployment and tests.
///
/// Without a retention window duplicate fingerprints and provider samples
/// are kept forever. Price baselines are bounded by the number of distinct
/// payer/procedure pairs either way.
#[derive(Debug, Default)]
pub struct InMemoryClaimHistory {
    state: RwLock<HistoryState>,
    retention: Option<Duration>,
}

impl InMemoryClaimHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget fingerprints and provider volume samples older than
    /// `retention`, pruned on each write.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            state: RwLock::default(),
            retention: Some(retention),
        }
    }

    /// Seed a price baseline directly, e.g. from a fee schedule import.
    pub fn seed_baseline(
        &self,
        payer: PayerId,
        code: impl Into<String>,
        mean_unit_cents: f64,
        samples: u32,
    ) {
        let mut state = self.state.write();
        state.prices.insert(
            (payer, code.into()),
            (mean_unit_cents * f64::from(samples), samples),
        );
    }
}

impl ClaimHistory for InMemoryClaimHistory {
    fn find_duplicate(
        &self,
        fingerprint: &str,
        exclude: &ClaimId,
    ) -> Option<ClaimId> {
        let state = self.state.read();
        state
            .fingerprints
            .get(fingerprint)
            .filter(|existing| *existing != exclude)
            .cloned()
    }

    fn cost_baseline(
        &self,
        payer: &PayerId,
        code: &str,
    ) -> Option<CostBaseline> {
        let state = self.state.read();
        state
            .prices
            .get(&(payer.clone(), code.to_string()))
            .filter(|(_, samples)| *samples > 0)
            .map(|(sum, samples)| CostBaseline {
                mean_unit_cents: sum / f64::from(*samples),
                samples: *samples,
            })
    }

    fn provider_profile(
        &self,
        provider: &ProviderId,
        since: DateTime<Utc>,
    ) -> ProviderProfile {
        let state = self.state.read();
        let Some(entries) = state.providers.get(provider) else {
            return ProviderProfile::default();
        };
        let recent: Vec<usize> = entries
            .iter()
            .filter(|(at, _)| *at >= since)
            .map(|(_, lines)| *lines)
            .collect();
        if recent.is_empty() {
            return ProviderProfile::default();
        }
        let total: usize = recent.iter().sum();
        ProviderProfile {
            claims: recent.len() as u32,
            avg_lines_per_claim: total as f64 / recent.len() as f64,
        }
    }

    fn record(&self, claim: &ClaimSubmission) {
        let print = fingerprint(claim);
        let cutoff = self.retention.map(|r| claim.created_at - r);
        let mut state = self.state.write();
        if let Some(cutoff) = cutoff {
            while state.seen.front().is_some_and(|(at, _)| *at < cutoff) {
                if let Some((_, expired)) = state.seen.pop_front() {
                    state.fingerprints.remove(&expired);
                }
            }
        }
        if !state.fingerprints.contains_key(&print) {
            state.seen.push_back((claim.created_at, print.clone()));
            state.fingerprints.insert(print, claim.claim_id.clone());
        }

        for line in &claim.line_items {
            let entry = state
                .prices
                .entry((claim.payer_id.clone(), line.code.clone()))
                .or_insert((0.0, 0));
            entry.0 += line.unit_price_cents as f64;
            entry.1 += 1;
        }

        let samples = state
            .providers
            .entry(claim.provider_id.clone())
            .or_default();
        if let Some(cutoff) = cutoff {
            samples.retain(|(at, _)| *at >= cutoff);
        }
        samples.push((claim.created_at, claim.line_items.len()));
    }
}
