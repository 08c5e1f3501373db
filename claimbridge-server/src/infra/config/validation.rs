use std::collections::HashSet;

use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("connector id {id} is configured more than once")]
    DuplicateConnector { id: String },
    #[error("orchestrator.retry.max_attempts must be at least 1")]
    NoRetryAttempts,
    #[error("orchestrator.breaker.failure_threshold must be at least 1")]
    NoFailureThreshold,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let orchestrator = &config.orchestrator;

    if orchestrator.retry.max_attempts == 0 {
        return Err(ConfigGuardRailError::NoRetryAttempts);
    }
    if orchestrator.breaker.failure_threshold == 0 {
        return Err(ConfigGuardRailError::NoFailureThreshold);
    }

    let mut seen = HashSet::new();
    let ids = config
        .gateway
        .iter()
        .map(|g| &g.id)
        .chain(config.portals.iter().map(|p| &p.id));
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(ConfigGuardRailError::DuplicateConnector {
                id: id.to_string(),
            });
        }
    }

    if seen.is_empty() {
        warnings.push_with_hint(
            "no connectors configured; every claim will end in error",
            "Add a [gateway] table or [[portals]] entries to claimbridge.toml",
        );
    }

    match &config.gateway {
        Some(gateway)
            if gateway.client_secret.is_none()
                && gateway.identity_pem.is_none() =>
        {
            warnings.push_with_hint(
                "gateway has neither a client secret nor a client certificate",
                "Set GATEWAY_CLIENT_SECRET or gateway.identity_pem",
            );
        }
        Some(_) => {}
        None => {
            let demanding: Vec<&str> = config
                .portals
                .iter()
                .filter(|p| p.requires_eligibility)
                .map(|p| p.id.as_str())
                .collect();
            if !demanding.is_empty() {
                warnings.push_with_hint(
                    format!(
                        "portals {} require eligibility but no gateway is configured to verify it",
                        demanding.join(", ")
                    ),
                    "Claims routed to these portals will be blocked until a [gateway] is added",
                );
            }
        }
    }

    if orchestrator.validation.high_risk_threshold > 100 {
        warnings.push(format!(
            "high_risk_threshold {} is above the maximum score; no claim will be held for review",
            orchestrator.validation.high_risk_threshold
        ));
    }

    Ok(warnings)
}
