use std::fmt;
use std::str::FromStr;

use crate::ids::{ClaimId, ConnectorId};

/// Closed set of routing strategies a caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RoutingStrategy {
    PrimaryOnly,
    LegacyOnly,
    #[default]
    PrimaryFirst,
    AllTargets,
    Adaptive,
}

impl RoutingStrategy {
    pub const ALL: [RoutingStrategy; 5] = [
        RoutingStrategy::PrimaryOnly,
        RoutingStrategy::LegacyOnly,
        RoutingStrategy::PrimaryFirst,
        RoutingStrategy::AllTargets,
        RoutingStrategy::Adaptive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::PrimaryOnly => "primary_only",
            RoutingStrategy::LegacyOnly => "legacy_only",
            RoutingStrategy::PrimaryFirst => "primary_first",
            RoutingStrategy::AllTargets => "all_targets",
            RoutingStrategy::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoutingStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| format!("unknown routing strategy: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PlanMode {
    /// Targets are tried strictly in order until one gives a definitive answer.
    Sequential,
    /// Targets are called concurrently and their outcomes aggregated.
    Parallel,
    /// No automatic submission; the claim goes to a human queue.
    NeedsReview,
}

/// A connector the selector chose not to call, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkippedTarget {
    pub connector_id: ConnectorId,
    pub reason: String,
}

/// Ordered or parallel list of connectors chosen for one claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubmissionPlan {
    pub claim_id: ClaimId,
    pub strategy: RoutingStrategy,
    pub mode: PlanMode,
    pub targets: Vec<ConnectorId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub skipped: Vec<SkippedTarget>,
}

impl SubmissionPlan {
    pub fn needs_review(claim_id: ClaimId, strategy: RoutingStrategy) -> Self {
        Self {
            claim_id,
            strategy,
            mode: PlanMode::NeedsReview,
            targets: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn is_needs_review(&self) -> bool {
        self.mode == PlanMode::NeedsReview
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
