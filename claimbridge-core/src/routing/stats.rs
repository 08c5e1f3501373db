use claimbridge_model::{AttemptOutcome, ConnectorId, PayerId, SubmissionAttempt};
use dashmap::DashMap;

const LATENCY_EWMA_ALPHA: f64 = 0.2;

/// Outcome counters for one (payer, connector) route.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RouteStats {
    pub successes: u64,
    pub failures: u64,
    /// Business rejections: the route worked, the payer said no.
    pub rejections: u64,
    pub avg_latency_ms: f64,
}

impl RouteStats {
    /// Laplace-smoothed delivery rate; an unseen route scores 0.5.
    pub fn success_rate(&self) -> f64 {
        let answered = self.successes + self.rejections;
        (answered as f64 + 1.0) / ((answered + self.failures) as f64 + 2.0)
    }
}

/// Per-payer routing history fed by the orchestrator and read by the
/// adaptive strategy.
#[derive(Debug, Default)]
pub struct PayerStats {
    routes: DashMap<(PayerId, ConnectorId), RouteStats>,
}

impl PayerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, payer: &PayerId, attempt: &SubmissionAttempt) {
        // Short-circuited calls say nothing about the route.
        if attempt.failure_kind()
            == Some(claimbridge_model::FailureKind::CircuitOpen)
        {
            return;
        }
        let mut entry = self
            .routes
            .entry((payer.clone(), attempt.connector_id.clone()))
            .or_default();
        match attempt.outcome {
            AttemptOutcome::Success => entry.successes += 1,
            AttemptOutcome::BusinessRejection => entry.rejections += 1,
            AttemptOutcome::TransientFailure | AttemptOutcome::AuthFailure => {
                entry.failures += 1
            }
        }
        let sample = attempt.latency_ms() as f64;
        entry.avg_latency_ms = if entry.avg_latency_ms == 0.0 {
            sample
        } else {
            entry.avg_latency_ms * (1.0 - LATENCY_EWMA_ALPHA)
                + sample * LATENCY_EWMA_ALPHA
        };
    }

    pub fn get(&self, payer: &PayerId, connector: &ConnectorId) -> RouteStats {
        self.routes
            .get(&(payer.clone(), connector.clone()))
            .map(|r| *r)
            .unwrap_or_default()
    }

    pub fn success_rate(&self, payer: &PayerId, connector: &ConnectorId) -> f64 {
        self.get(payer, connector).success_rate()
    }
}
