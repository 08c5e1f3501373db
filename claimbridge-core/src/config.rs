use std::time::Duration;

use claimbridge_model::RoutingStrategy;
use serde::{Deserialize, Serialize};

/// Global knobs that tune the submission engine.
///
/// All fields carry defaults so deployments can override only what they need.
/// The numeric defaults are starting points to be tuned against observed
/// failure rates.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Retry/backoff policy applied to every connector call.
    pub retry: RetryConfig,
    /// Per-connector circuit breaker thresholds.
    pub breaker: BreakerConfig,
    /// Structural validation tolerances and risk scoring.
    pub validation: ValidationConfig,
    /// Coverage-check cache settings.
    pub eligibility: EligibilityConfig,
    /// Strategy defaults and the fan-out deadline.
    pub routing: RoutingConfig,
    /// Pending-result polling schedule.
    pub poller: PollerConfig,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts for transient failures, including the first call.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Failures further apart than this restart the consecutive count.
    pub failure_window_ms: u64,
    pub cooldown_ms: u64,
    /// Upper bound for the doubled cooldown after failed probes.
    pub max_cooldown_ms: u64,
}

impl BreakerConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms.max(self.cooldown_ms))
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            cooldown_ms: 30_000,
            max_cooldown_ms: 10 * 60 * 1_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// How far in the future a service date may lie.
    pub future_skew_days: i64,
    /// Service dates older than this only produce a warning.
    pub stale_service_days: i64,
    /// Scores at or above this force a `needs_review` plan.
    pub high_risk_threshold: u8,
    pub max_units_per_line: i32,
    /// Billed total above `baseline * factor` counts as a cost anomaly.
    pub cost_anomaly_factor: f64,
    /// Claims per provider in the trailing 30 days that mark high volume.
    pub provider_volume_threshold: u32,
    /// How long the default in-memory history remembers a claim.
    pub history_retention_days: i64,
    pub weights: RiskWeights,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            future_skew_days: 1,
            stale_service_days: 365,
            high_risk_threshold: 70,
            max_units_per_line: 100,
            cost_anomaly_factor: 3.0,
            provider_volume_threshold: 200,
            history_retention_days: 365,
            weights: RiskWeights::default(),
        }
    }
}

impl ValidationConfig {
    pub fn history_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.history_retention_days.max(1))
    }
}

/// Points each risk rule adds when it fires.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub duplicate: u8,
    pub cost_anomaly: u8,
    pub billing_pattern: u8,
    pub excessive_units: u8,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            duplicate: 40,
            cost_anomaly: 30,
            billing_pattern: 25,
            excessive_units: 15,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityConfig {
    pub ttl_secs: u64,
}

impl EligibilityConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub default_strategy: RoutingStrategy,
    /// Global deadline for `all_targets` fan-out.
    pub parallel_timeout_ms: u64,
}

impl RoutingConfig {
    pub fn parallel_timeout(&self) -> Duration {
        Duration::from_millis(self.parallel_timeout_ms)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_strategy: RoutingStrategy::PrimaryFirst,
            parallel_timeout_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Leading poll delays, in order.
    pub schedule_secs: Vec<u64>,
    /// Delay used once the leading schedule is exhausted.
    pub steady_interval_secs: u64,
    /// Total wait before a pending claim is escalated.
    pub max_wait_secs: u64,
}

impl PollerConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            schedule_secs: vec![60, 120, 300, 900],
            steady_interval_secs: 60 * 60,
            max_wait_secs: 48 * 60 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_payload_keeps_defaults() {
        let cfg: OrchestratorConfig = serde_json::from_str(
            r#"{"breaker":{"failure_threshold":2},"routing":{"default_strategy":"adaptive"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.breaker.failure_threshold, 2);
        assert_eq!(cfg.breaker.cooldown_ms, 30_000);
        assert_eq!(cfg.routing.default_strategy, RoutingStrategy::Adaptive);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.validation.high_risk_threshold, 70);
        assert_eq!(cfg.validation.history_retention_days, 365);
    }
}
