#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, Utc};
use claimbridge_core::OrchestratorConfig;
use claimbridge_core::config::{BreakerConfig, PollerConfig, RetryConfig};
use claimbridge_core::connectors::{
    Connector, ConnectorDescriptor, ConnectorError, ConnectorResult,
    SubmissionReceipt,
};
use claimbridge_core::eligibility::{EligibilityVerifier, VerifiedCoverage};
use claimbridge_model::{
    ClaimSubmission, ConnectorKind, CoverageStatus, Disposition,
    EligibilityKey, LineItem, Operation, RejectionReason, TargetStatus,
};
use parking_lot::Mutex;

pub type Reply = ConnectorResult<SubmissionReceipt>;

/// In-process connector that answers from a script.
pub struct ScriptedConnector {
    descriptor: ConnectorDescriptor,
    replies: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    statuses: Mutex<VecDeque<ConnectorResult<TargetStatus>>>,
    delay: Option<Duration>,
    submits: AtomicUsize,
    status_checks: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(id: &str, kind: ConnectorKind, priority: u32) -> Self {
        Self {
            descriptor: ConnectorDescriptor {
                id: id.into(),
                kind,
                priority,
                requires_eligibility: false,
            },
            replies: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(transient()),
            statuses: Mutex::new(VecDeque::new()),
            delay: None,
            submits: AtomicUsize::new(0),
            status_checks: AtomicUsize::new(0),
        }
    }

    pub fn gateway(id: &str) -> Self {
        Self::new(id, ConnectorKind::StandardsGateway, 0)
    }

    pub fn portal(id: &str, priority: u32) -> Self {
        Self::new(id, ConnectorKind::LegacyPortal, priority)
    }

    pub fn requiring_eligibility(mut self) -> Self {
        self.descriptor.requires_eligibility = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reply used once the script runs out.
    pub fn always(self, reply: Reply) -> Self {
        *self.fallback.lock() = reply;
        self
    }

    pub fn then(self, reply: Reply) -> Self {
        self.replies.lock().push_back(reply);
        self
    }

    /// Answers for successive status checks; `queued` once exhausted.
    pub fn statuses(self, statuses: Vec<ConnectorResult<TargetStatus>>) -> Self {
        self.statuses.lock().extend(statuses);
        self
    }

    /// Queue a reply on an already shared connector.
    pub fn enqueue(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn status_checks(&self) -> usize {
        self.status_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn descriptor(&self) -> &ConnectorDescriptor {
        &self.descriptor
    }

    async fn authenticate(&self) -> ConnectorResult<()> {
        Ok(())
    }

    async fn submit(&self, _claim: &ClaimSubmission) -> Reply {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().clone())
    }

    async fn check_status(&self, _reference: &str) -> ConnectorResult<TargetStatus> {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .pop_front()
            .unwrap_or(Ok(TargetStatus::Queued))
    }
}

/// Verifier with a fixed answer and a call counter.
pub struct CountingVerifier {
    status: CoverageStatus,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingVerifier {
    pub fn new(status: CoverageStatus) -> Arc<Self> {
        Arc::new(Self {
            status,
            delay: Duration::from_millis(200),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EligibilityVerifier for CountingVerifier {
    async fn verify(&self, _key: &EligibilityKey) -> ConnectorResult<VerifiedCoverage> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        Ok(VerifiedCoverage {
            status: self.status,
            reference: Some(format!("ELIG-{n}")),
            verified_by: Some("gateway".into()),
        })
    }
}

pub fn receipt(reference: &str, disposition: Disposition) -> Reply {
    Ok(SubmissionReceipt {
        reference: reference.to_string(),
        disposition,
    })
}

pub fn accepted(reference: &str) -> Reply {
    receipt(reference, Disposition::Accepted)
}

pub fn queued(reference: &str) -> Reply {
    receipt(reference, Disposition::Queued)
}

pub fn rejected(code: &str) -> Reply {
    Err(ConnectorError::rejection(vec![RejectionReason::new(
        code,
        "not covered under plan",
    )]))
}

pub fn transient() -> Reply {
    Err(ConnectorError::transient("upstream returned HTTP 503"))
}

/// A clean claim; `patient` varies the content so claims do not look like
/// duplicates of each other.
pub fn claim(id: &str, patient: &str) -> ClaimSubmission {
    let today = Utc::now().date_naive();
    ClaimSubmission {
        claim_id: id.into(),
        patient_id: patient.into(),
        payer_id: "ACME".into(),
        provider_id: "PRV-7".into(),
        service_date: today - Days::new(3),
        line_items: vec![LineItem::new("99213", 1, 12_000)],
        diagnosis_codes: vec!["J06.9".into()],
        operation: Operation::Claim,
        corrects: None,
        created_at: Utc::now(),
    }
}

/// Short delays so paused-clock tests stay readable.
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig {
        retry: RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 10,
            backoff_max_ms: 100,
        },
        breaker: BreakerConfig {
            failure_threshold: 3,
            failure_window_ms: 60_000,
            cooldown_ms: 1_000,
            max_cooldown_ms: 8_000,
        },
        poller: PollerConfig {
            schedule_secs: vec![1, 2],
            steady_interval_secs: 5,
            max_wait_secs: 20,
        },
        ..OrchestratorConfig::default()
    };
    config.routing.parallel_timeout_ms = 5_000;
    config
}
