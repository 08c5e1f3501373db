use std::cmp::Ordering;
use std::sync::Arc;

use claimbridge_model::{
    CircuitState, ClaimSubmission, ConnectorHealth, ConnectorKind,
    HealthSnapshot, PlanMode, RoutingStrategy, SkippedTarget, SubmissionPlan,
    ValidationReport,
};
use tracing::debug;

use super::stats::PayerStats;

/// Probe-only connectors are worth half as much to the adaptive strategy.
const HALF_OPEN_PENALTY: f64 = 0.5;

/// Maps a claim, its report and current connector health onto a plan.
///
/// Selection depends only on its inputs and the payer statistics it reads;
/// it never calls a connector.
#[derive(Debug, Clone)]
pub struct RoutingSelector {
    stats: Arc<PayerStats>,
}

/// Fallback order: priority, then fewer recent failures, then lower
/// latency, then id for determinism.
fn fallback_order(a: &ConnectorHealth, b: &ConnectorHealth) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.recent_failures.cmp(&b.recent_failures))
        .then(a.avg_latency_ms.total_cmp(&b.avg_latency_ms))
        .then_with(|| a.connector_id.cmp(&b.connector_id))
}

fn ordered(snapshot: &HealthSnapshot, kind: ConnectorKind) -> Vec<&ConnectorHealth> {
    let mut targets: Vec<&ConnectorHealth> = snapshot.of_kind(kind).collect();
    targets.sort_by(|a, b| fallback_order(a, b));
    targets
}

impl RoutingSelector {
    pub fn new(stats: Arc<PayerStats>) -> Self {
        Self { stats }
    }

    pub fn stats(&self) -> &Arc<PayerStats> {
        &self.stats
    }

    pub fn select(
        &self,
        claim: &ClaimSubmission,
        report: &ValidationReport,
        snapshot: &HealthSnapshot,
        strategy: RoutingStrategy,
    ) -> SubmissionPlan {
        if report.needs_review {
            debug!(
                target: "claims::routing",
                claim_id = %claim.claim_id,
                risk_score = report.risk_score,
                requested = %strategy,
                "high risk claim held for review"
            );
            return SubmissionPlan::needs_review(claim.claim_id.clone(), strategy);
        }

        let gateways = ordered(snapshot, ConnectorKind::StandardsGateway);
        let legacy = ordered(snapshot, ConnectorKind::LegacyPortal);
        let mut skipped = Vec::new();

        let (mode, targets): (PlanMode, Vec<&ConnectorHealth>) = match strategy {
            RoutingStrategy::PrimaryOnly => (PlanMode::Sequential, gateways),
            RoutingStrategy::LegacyOnly => (PlanMode::Sequential, legacy),
            RoutingStrategy::PrimaryFirst => {
                (PlanMode::Sequential, gateways.into_iter().chain(legacy).collect())
            }
            RoutingStrategy::AllTargets => {
                (PlanMode::Parallel, gateways.into_iter().chain(legacy).collect())
            }
            RoutingStrategy::Adaptive => {
                let mut candidates = Vec::new();
                for health in gateways.into_iter().chain(legacy) {
                    if health.state == CircuitState::Open {
                        skipped.push(SkippedTarget {
                            connector_id: health.connector_id.clone(),
                            reason: "circuit open".to_string(),
                        });
                    } else {
                        let score = self.adaptive_score(claim, health);
                        candidates.push((score, health));
                    }
                }
                candidates.sort_by(|(sa, a), (sb, b)| {
                    sb.total_cmp(sa).then_with(|| fallback_order(a, b))
                });
                (
                    PlanMode::Sequential,
                    candidates.into_iter().map(|(_, h)| h).collect(),
                )
            }
        };

        let plan = SubmissionPlan {
            claim_id: claim.claim_id.clone(),
            strategy,
            mode,
            targets: targets.iter().map(|h| h.connector_id.clone()).collect(),
            skipped,
        };
        debug!(
            target: "claims::routing",
            claim_id = %claim.claim_id,
            strategy = %strategy,
            targets = ?plan.targets,
            skipped = plan.skipped.len(),
            "plan selected"
        );
        plan
    }

    fn adaptive_score(&self, claim: &ClaimSubmission, health: &ConnectorHealth) -> f64 {
        let rate = self.stats.success_rate(&claim.payer_id, &health.connector_id);
        if health.state == CircuitState::HalfOpen {
            rate * HALF_OPEN_PENALTY
        } else {
            rate
        }
    }
}
