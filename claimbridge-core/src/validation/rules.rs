//! Independent, additive risk rules.

use chrono::{DateTime, Duration, Utc};
use claimbridge_model::{ClaimSubmission, RiskFactor};

use super::history::{ClaimHistory, fingerprint};
use crate::config::ValidationConfig;

/// Baselines with fewer samples than this are ignored.
const MIN_BASELINE_SAMPLES: u32 = 5;
/// Providers with fewer recent claims than this have no usable line profile.
const MIN_PROFILE_CLAIMS: u32 = 10;
const PROVIDER_WINDOW_DAYS: i64 = 30;

/// Everything a rule may look at besides the claim itself.
pub struct RuleContext<'a> {
    pub history: &'a dyn ClaimHistory,
    pub config: &'a ValidationConfig,
    pub now: DateTime<Utc>,
}

pub trait RiskRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns a factor when the rule fires. Rules must not depend on each
    /// other's results.
    fn evaluate(
        &self,
        claim: &ClaimSubmission,
        ctx: &RuleContext<'_>,
    ) -> Option<RiskFactor>;
}

fn factor(rule: &dyn RiskRule, weight: u8, detail: String) -> RiskFactor {
    RiskFactor {
        rule: rule.name().to_string(),
        weight,
        detail,
    }
}

/// Same patient, payer, date and procedures as an earlier claim.
#[derive(Debug, Default)]
pub struct DuplicateClaimRule;

impl RiskRule for DuplicateClaimRule {
    fn name(&self) -> &'static str {
        "duplicate_claim"
    }

    fn evaluate(
        &self,
        claim: &ClaimSubmission,
        ctx: &RuleContext<'_>,
    ) -> Option<RiskFactor> {
        let print = fingerprint(claim);
        let existing = ctx.history.find_duplicate(&print, &claim.claim_id)?;
        if claim.corrects.as_ref() == Some(&existing) {
            return None;
        }
        Some(factor(
            self,
            ctx.config.weights.duplicate,
            format!("matches previously submitted claim {existing}"),
        ))
    }
}

/// Unit price far above the payer's historical mean for the procedure.
#[derive(Debug, Default)]
pub struct CostAnomalyRule;

impl RiskRule for CostAnomalyRule {
    fn name(&self) -> &'static str {
        "cost_anomaly"
    }

    fn evaluate(
        &self,
        claim: &ClaimSubmission,
        ctx: &RuleContext<'_>,
    ) -> Option<RiskFactor> {
        if !claim.operation.is_billable() {
            return None;
        }
        let anomalous: Vec<String> = claim
            .line_items
            .iter()
            .filter_map(|line| {
                let baseline =
                    ctx.history.cost_baseline(&claim.payer_id, &line.code)?;
                if baseline.samples < MIN_BASELINE_SAMPLES {
                    return None;
                }
                let limit =
                    baseline.mean_unit_cents * ctx.config.cost_anomaly_factor;
                (line.unit_price_cents as f64 > limit).then(|| {
                    format!(
                        "{} billed {} vs mean {:.0}",
                        line.code, line.unit_price_cents, baseline.mean_unit_cents
                    )
                })
            })
            .collect();

        if anomalous.is_empty() {
            return None;
        }
        Some(factor(
            self,
            ctx.config.weights.cost_anomaly,
            anomalous.join(", "),
        ))
    }
}

/// Provider billing far outside its own recent pattern.
#[derive(Debug, Default)]
pub struct BillingPatternRule;

impl RiskRule for BillingPatternRule {
    fn name(&self) -> &'static str {
        "billing_pattern"
    }

    fn evaluate(
        &self,
        claim: &ClaimSubmission,
        ctx: &RuleContext<'_>,
    ) -> Option<RiskFactor> {
        let since = ctx.now - Duration::days(PROVIDER_WINDOW_DAYS);
        let profile = ctx.history.provider_profile(&claim.provider_id, since);

        if profile.claims >= ctx.config.provider_volume_threshold {
            return Some(factor(
                self,
                ctx.config.weights.billing_pattern,
                format!(
                    "provider {} submitted {} claims in {} days",
                    claim.provider_id, profile.claims, PROVIDER_WINDOW_DAYS
                ),
            ));
        }

        let lines = claim.line_items.len() as f64;
        if profile.claims >= MIN_PROFILE_CLAIMS
            && lines > profile.avg_lines_per_claim * 3.0
        {
            return Some(factor(
                self,
                ctx.config.weights.billing_pattern,
                format!(
                    "{} lines vs provider average {:.1}",
                    claim.line_items.len(),
                    profile.avg_lines_per_claim
                ),
            ));
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct ExcessiveUnitsRule;

impl RiskRule for ExcessiveUnitsRule {
    fn name(&self) -> &'static str {
        "excessive_units"
    }

    fn evaluate(
        &self,
        claim: &ClaimSubmission,
        ctx: &RuleContext<'_>,
    ) -> Option<RiskFactor> {
        let line = claim
            .line_items
            .iter()
            .find(|line| line.quantity > ctx.config.max_units_per_line)?;
        Some(factor(
            self,
            ctx.config.weights.excessive_units,
            format!("{} units of {}", line.quantity, line.code),
        ))
    }
}

pub fn default_rules() -> Vec<Box<dyn RiskRule>> {
    vec![
        Box::new(DuplicateClaimRule),
        Box::new(CostAnomalyRule),
        Box::new(BillingPatternRule),
        Box::new(ExcessiveUnitsRule),
    ]
}
