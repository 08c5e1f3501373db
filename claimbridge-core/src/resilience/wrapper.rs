use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use claimbridge_model::{
    ClaimSubmission, ConnectorHealth, ConnectorId, FailureKind, TargetStatus,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::breaker::{CircuitBreaker, Permit};
use super::retry::RetryPolicy;
use crate::config::{BreakerConfig, RetryConfig};
use crate::connectors::{
    Connector, ConnectorDescriptor, ConnectorError, ConnectorResult,
    SubmissionReceipt,
};

/// What one wrapped call did, retries included.
#[derive(Debug, Clone)]
pub struct CallReport<T> {
    pub result: ConnectorResult<T>,
    /// Calls made after the first one.
    pub retries: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Breaker permit held for the duration of one network call. A call dropped
/// before it finishes, such as one cut off by a fan-out deadline, is recorded
/// as a failure.
struct InFlightCall<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<Permit>,
    started: Instant,
}

impl<'a> InFlightCall<'a> {
    fn new(breaker: &'a CircuitBreaker, permit: Permit) -> Self {
        Self {
            breaker,
            permit: Some(permit),
            started: Instant::now(),
        }
    }

    fn succeeded(mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record_success(permit, self.started.elapsed());
        }
    }

    fn failed(mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record_failure(permit, self.started.elapsed());
        }
    }
}

impl Drop for InFlightCall<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record_failure(permit, self.started.elapsed());
        }
    }
}

/// A connector behind its circuit breaker and retry policy.
///
/// Connector errors are classified here and never escape as anything other
/// than a [`ConnectorError`] inside a [`CallReport`].
pub struct ResilientConnector {
    inner: Arc<dyn Connector>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ResilientConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientConnector")
            .field("connector", &self.inner.descriptor().id)
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ResilientConnector {
    pub fn new(
        inner: Arc<dyn Connector>,
        retry: &RetryConfig,
        breaker: &BreakerConfig,
    ) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(breaker),
            retry: RetryPolicy::new(retry),
        }
    }

    pub fn descriptor(&self) -> &ConnectorDescriptor {
        self.inner.descriptor()
    }

    pub fn id(&self) -> &ConnectorId {
        &self.inner.descriptor().id
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn health(&self) -> ConnectorHealth {
        self.breaker.health(self.inner.descriptor())
    }

    pub async fn submit(
        &self,
        claim: &ClaimSubmission,
    ) -> CallReport<SubmissionReceipt> {
        self.call("submit", || self.inner.submit(claim)).await
    }

    pub async fn check_status(&self, reference: &str) -> CallReport<TargetStatus> {
        self.call("check_status", || self.inner.check_status(reference))
            .await
    }

    async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> CallReport<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        let started_at = Utc::now();
        let id = self.id().clone();
        let mut calls: u32 = 0;
        let mut budget = self.retry.max_attempts();
        let mut reauthenticated = false;
        let mut malformed_seen = false;
        let mut last_error: Option<ConnectorError> = None;

        let result = loop {
            let permit = match self.breaker.acquire() {
                Ok(permit) => permit,
                Err(retry_after) => {
                    // Mid-retry the caller gets the real failure; a call that
                    // never reached the network gets the synthetic one.
                    break Err(last_error.take().unwrap_or(
                        ConnectorError::CircuitOpen {
                            connector: id.clone(),
                            retry_after,
                        },
                    ));
                }
            };

            calls += 1;
            let in_flight = InFlightCall::new(&self.breaker, permit);
            let err = match f().await {
                Ok(value) => {
                    in_flight.succeeded();
                    break Ok(value);
                }
                Err(err) if !err.counts_against_health() => {
                    // A payer decline means the connector is healthy.
                    in_flight.succeeded();
                    break Err(err);
                }
                Err(err) => {
                    in_flight.failed();
                    err
                }
            };

            match err.kind() {
                FailureKind::Authentication if !reauthenticated => {
                    reauthenticated = true;
                    // The re-authentication retry is on top of the
                    // transient budget.
                    budget += 1;
                    if let Err(auth_err) = self.inner.authenticate().await {
                        warn!(
                            target: "claims::resilience",
                            connector = %id,
                            error = %auth_err,
                            "re-authentication failed"
                        );
                        break Err(auth_err);
                    }
                    debug!(
                        target: "claims::resilience",
                        connector = %id,
                        op,
                        "re-authenticated; retrying"
                    );
                    last_error = Some(err);
                    continue;
                }
                FailureKind::MalformedResponse if malformed_seen => {
                    break Err(err);
                }
                FailureKind::MalformedResponse => malformed_seen = true,
                _ => {}
            }

            if calls >= budget {
                break Err(err);
            }
            let delay = self.retry.next_delay(calls - 1);
            debug!(
                target: "claims::resilience",
                connector = %id,
                op,
                attempt = calls,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after failure"
            );
            last_error = Some(err);
            tokio::time::sleep(delay).await;
        };

        if let Err(err) = &result {
            debug!(
                target: "claims::resilience",
                connector = %id,
                op,
                calls,
                kind = %err.kind(),
                "call failed"
            );
        }

        CallReport {
            result,
            retries: calls.saturating_sub(1),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use claimbridge_model::{
        ConnectorKind, Disposition, LineItem, Operation, RejectionReason,
    };

    struct Scripted {
        descriptor: ConnectorDescriptor,
        replies: parking_lot::Mutex<VecDeque<ConnectorResult<SubmissionReceipt>>>,
        submits: AtomicUsize,
        logins: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<ConnectorResult<SubmissionReceipt>>) -> Arc<Self> {
            Arc::new(Self {
                descriptor: ConnectorDescriptor {
                    id: "scripted".into(),
                    kind: ConnectorKind::LegacyPortal,
                    priority: 1,
                    requires_eligibility: false,
                },
                replies: parking_lot::Mutex::new(replies.into()),
                submits: AtomicUsize::new(0),
                logins: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Connector for Scripted {
        fn descriptor(&self) -> &ConnectorDescriptor {
            &self.descriptor
        }

        async fn authenticate(&self) -> ConnectorResult<()> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn submit(
            &self,
            _claim: &ClaimSubmission,
        ) -> ConnectorResult<SubmissionReceipt> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ConnectorError::transient("script exhausted")))
        }

        async fn check_status(
            &self,
            _reference: &str,
        ) -> ConnectorResult<TargetStatus> {
            Ok(TargetStatus::Complete)
        }
    }

    fn accepted() -> ConnectorResult<SubmissionReceipt> {
        Ok(SubmissionReceipt {
            reference: "REF-1".into(),
            disposition: Disposition::Accepted,
        })
    }

    fn claim() -> ClaimSubmission {
        ClaimSubmission {
            claim_id: "CLM-1".into(),
            patient_id: "PAT-1".into(),
            payer_id: "PAYER".into(),
            provider_id: "PRV".into(),
            service_date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
            line_items: vec![LineItem::new("99213", 1, 100)],
            diagnosis_codes: vec!["J06.9".into()],
            operation: Operation::Claim,
            corrects: None,
            created_at: Utc::now(),
        }
    }

    fn wrap(connector: Arc<Scripted>) -> ResilientConnector {
        ResilientConnector::new(
            connector,
            &RetryConfig::default(),
            &BreakerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_use_the_whole_budget() {
        let connector = Scripted::new(vec![]);
        let wrapped = wrap(Arc::clone(&connector));
        let report = wrapped.submit(&claim()).await;
        assert!(matches!(report.result, Err(ConnectorError::Transient { .. })));
        assert_eq!(report.retries, 2);
        assert_eq!(connector.submits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success_reports_retry_count() {
        let connector = Scripted::new(vec![
            Err(ConnectorError::timeout("slow")),
            accepted(),
        ]);
        let wrapped = wrap(Arc::clone(&connector));
        let report = wrapped.submit(&claim()).await;
        assert_eq!(report.result.unwrap().reference, "REF-1");
        assert_eq!(report.retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn business_rejection_is_never_retried() {
        let connector = Scripted::new(vec![Err(ConnectorError::rejection(vec![
            RejectionReason::new("R1", "not covered"),
        ]))]);
        let wrapped = wrap(Arc::clone(&connector));
        let report = wrapped.submit(&claim()).await;
        assert!(matches!(
            report.result,
            Err(ConnectorError::BusinessRejection { .. })
        ));
        assert_eq!(report.retries, 0);
        assert_eq!(wrapped.health().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_reauthenticates_once_then_retries() {
        let connector = Scripted::new(vec![
            Err(ConnectorError::Authentication("session expired".into())),
            accepted(),
        ]);
        let wrapped = wrap(Arc::clone(&connector));
        let report = wrapped.submit(&claim()).await;
        assert!(report.result.is_ok());
        assert_eq!(connector.logins.load(Ordering::SeqCst), 1);
        assert_eq!(report.retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_is_retried_once_then_escalated() {
        let connector = Scripted::new(vec![
            Err(ConnectorError::MalformedResponse("no token".into())),
            Err(ConnectorError::MalformedResponse("no token".into())),
            accepted(),
        ]);
        let wrapped = wrap(Arc::clone(&connector));
        let report = wrapped.submit(&claim()).await;
        assert!(matches!(
            report.result,
            Err(ConnectorError::MalformedResponse(_))
        ));
        assert_eq!(connector.submits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_call_counts_as_failure() {
        let connector = Scripted::new(vec![]);
        let wrapped = wrap(Arc::clone(&connector));
        let never = wrapped.call("submit", || {
            std::future::pending::<ConnectorResult<SubmissionReceipt>>()
        });
        let _ = tokio::time::timeout(std::time::Duration::from_millis(10), never).await;
        assert_eq!(wrapped.health().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_short_circuits_without_calling() {
        let connector = Scripted::new(vec![]);
        let wrapped = ResilientConnector::new(
            Arc::clone(&connector) as Arc<dyn Connector>,
            &RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
            &BreakerConfig::default(),
        );
        for _ in 0..5 {
            wrapped.submit(&claim()).await;
        }
        assert_eq!(connector.submits.load(Ordering::SeqCst), 5);

        let report = wrapped.submit(&claim()).await;
        assert!(matches!(
            report.result,
            Err(ConnectorError::CircuitOpen { .. })
        ));
        assert_eq!(report.retries, 0);
        assert_eq!(connector.submits.load(Ordering::SeqCst), 5);
    }
}
