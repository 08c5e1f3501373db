use std::sync::Arc;

use anyhow::Context;
use claimbridge_core::{
    ClaimService, ClaimServiceBuilder,
    connectors::{GatewayConnector, PortalConnector},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::infra::config::Config;

/// Instantiate every configured connector and assemble the claim service.
///
/// The gateway doubles as the eligibility verifier when present.
pub fn build_claim_service(
    config: &Config,
    shutdown: CancellationToken,
) -> anyhow::Result<ClaimService> {
    let mut builder = ClaimServiceBuilder::new(config.orchestrator.clone())
        .with_shutdown(shutdown);

    if let Some(gateway_config) = &config.gateway {
        let gateway = Arc::new(
            GatewayConnector::new(gateway_config.clone()).with_context(|| {
                format!("failed to build gateway connector {}", gateway_config.id)
            })?,
        );
        info!(
            connector = %gateway_config.id,
            base_url = %gateway_config.base_url,
            "gateway connector configured"
        );
        builder = builder
            .with_connector(gateway.clone())
            .with_verifier(gateway);
    }

    for portal_config in &config.portals {
        info!(
            connector = %portal_config.id,
            base_url = %portal_config.base_url,
            priority = portal_config.priority,
            "portal connector configured"
        );
        builder = builder
            .with_connector(Arc::new(PortalConnector::new(portal_config.clone())));
    }

    builder.build().context("failed to assemble claim service")
}
