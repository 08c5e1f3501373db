//! Read-through cache of coverage checks.
//!
//! Hits are served from a concurrent map without touching the verifier.
//! Misses go through a single-flight gate: the first caller for a key
//! becomes the leader and performs the outbound check, later callers for the
//! same key wait on the leader and receive its result. A leader that is
//! dropped mid-check releases the key and fails its waiters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use claimbridge_model::{
    ConnectorId, CoverageStatus, EligibilityKey, EligibilityRecord, PatientId,
    PayerId,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::config::EligibilityConfig;
use crate::connectors::{ConnectorError, ConnectorResult};

/// Outcome of one outbound coverage verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCoverage {
    pub status: CoverageStatus,
    pub reference: Option<String>,
    pub verified_by: Option<ConnectorId>,
}

#[async_trait]
pub trait EligibilityVerifier: Send + Sync {
    async fn verify(
        &self,
        key: &EligibilityKey,
    ) -> ConnectorResult<VerifiedCoverage>;
}

#[derive(Debug, Default)]
struct InFlight {
    done: Notify,
    outcome: Mutex<Option<ConnectorResult<EligibilityRecord>>>,
}

/// Leader's registration in the in-flight map. Dropping it publishes the
/// outcome (or a cancellation error), frees the key and wakes waiters.
struct FlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<EligibilityKey, Arc<InFlight>>>,
    key: &'a EligibilityKey,
    flight: Arc<InFlight>,
}

impl FlightGuard<'_> {
    fn finish(self, outcome: ConnectorResult<EligibilityRecord>) {
        *self.flight.outcome.lock() = Some(outcome);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        {
            let mut outcome = self.flight.outcome.lock();
            if outcome.is_none() {
                debug!(
                    target: "claims::eligibility",
                    patient = %self.key.patient_id,
                    payer = %self.key.payer_id,
                    "eligibility check cancelled before completion"
                );
                *outcome = Some(Err(ConnectorError::transient(
                    "eligibility check was cancelled",
                )));
            }
        }
        let mut map = self.in_flight.lock();
        if map
            .get(self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.flight))
        {
            map.remove(self.key);
        }
        drop(map);
        self.flight.done.notify_waiters();
    }
}

pub struct EligibilityCache {
    verifier: Arc<dyn EligibilityVerifier>,
    ttl: chrono::Duration,
    records: DashMap<EligibilityKey, EligibilityRecord>,
    /// Last service date cached per member, for early invalidation.
    member_dates: DashMap<(PatientId, PayerId), NaiveDate>,
    in_flight: Mutex<HashMap<EligibilityKey, Arc<InFlight>>>,
    verifications: AtomicU64,
    coalesced: AtomicU64,
}

impl std::fmt::Debug for EligibilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EligibilityCache")
            .field("ttl", &self.ttl)
            .field("records", &self.records.len())
            .field(
                "verifications",
                &self.verifications.load(Ordering::Relaxed),
            )
            .field("coalesced", &self.coalesced.load(Ordering::Relaxed))
            .finish()
    }
}

impl EligibilityCache {
    pub fn new(
        verifier: Arc<dyn EligibilityVerifier>,
        config: &EligibilityConfig,
    ) -> Self {
        let ttl = chrono::Duration::from_std(config.ttl())
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        Self {
            verifier,
            ttl,
            records: DashMap::new(),
            member_dates: DashMap::new(),
            in_flight: Mutex::new(HashMap::new()),
            verifications: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    pub async fn check(
        &self,
        key: &EligibilityKey,
    ) -> ConnectorResult<EligibilityRecord> {
        self.check_at(key, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        key: &EligibilityKey,
        now: DateTime<Utc>,
    ) -> ConnectorResult<EligibilityRecord> {
        self.evict_other_dates(key);
        if let Some(record) = self.cached_at(key, now) {
            return Ok(record);
        }

        let (leader, flight) = {
            let mut map = self.in_flight.lock();
            match map.get(key) {
                Some(existing) => (false, Arc::clone(existing)),
                None => {
                    // A leader may have finished between the cache read and
                    // taking the lock.
                    if let Some(record) = self.cached_at(key, now) {
                        return Ok(record);
                    }
                    let flight = Arc::new(InFlight::default());
                    map.insert(key.clone(), Arc::clone(&flight));
                    (true, flight)
                }
            }
        };

        if !leader {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return self.wait_for(flight).await;
        }

        let guard = FlightGuard {
            in_flight: &self.in_flight,
            key,
            flight,
        };
        self.verifications.fetch_add(1, Ordering::Relaxed);
        let outcome = self.verifier.verify(key).await.map(|coverage| {
            let record = EligibilityRecord {
                key: key.clone(),
                status: coverage.status,
                reference: coverage.reference,
                verified_by: coverage.verified_by,
                created_at: now,
                expires_at: now + self.ttl,
            };
            self.records.insert(key.clone(), record.clone());
            self.member_dates.insert(key.member(), key.service_date);
            record
        });
        debug!(
            target: "claims::eligibility",
            patient = %key.patient_id,
            payer = %key.payer_id,
            service_date = %key.service_date,
            ok = outcome.is_ok(),
            "eligibility verified"
        );

        guard.finish(outcome.clone());
        outcome
    }

    async fn wait_for(
        &self,
        flight: Arc<InFlight>,
    ) -> ConnectorResult<EligibilityRecord> {
        let notified = flight.done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if let Some(outcome) = flight.outcome.lock().clone() {
            return outcome;
        }
        notified.await;
        flight.outcome.lock().clone().unwrap_or_else(|| {
            Err(ConnectorError::transient(
                "eligibility check finished without a result",
            ))
        })
    }

    /// Unexpired record for `key`, if any. Never calls the verifier.
    pub fn cached(&self, key: &EligibilityKey) -> Option<EligibilityRecord> {
        self.cached_at(key, Utc::now())
    }

    fn cached_at(
        &self,
        key: &EligibilityKey,
        now: DateTime<Utc>,
    ) -> Option<EligibilityRecord> {
        let record = self.records.get(key)?;
        if record.is_expired_at(now) {
            drop(record);
            self.records.remove(key);
            return None;
        }
        Some(record.clone())
    }

    fn evict_other_dates(&self, key: &EligibilityKey) {
        let member = key.member();
        let Some(previous) = self.member_dates.get(&member).map(|d| *d) else {
            return;
        };
        if previous == key.service_date {
            return;
        }
        let stale = EligibilityKey::new(
            key.patient_id.clone(),
            key.payer_id.clone(),
            previous,
        );
        if self.records.remove(&stale).is_some() {
            debug!(
                target: "claims::eligibility",
                patient = %key.patient_id,
                payer = %key.payer_id,
                evicted = %previous,
                requested = %key.service_date,
                "evicted eligibility for a different service date"
            );
        }
        self.member_dates.remove(&member);
    }

    pub fn invalidate(&self, key: &EligibilityKey) {
        self.records.remove(key);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Outbound verifications performed so far.
    pub fn verification_count(&self) -> u64 {
        self.verifications.load(Ordering::Relaxed)
    }
}
