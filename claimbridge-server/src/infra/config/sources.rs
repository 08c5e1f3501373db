use std::{env, path::PathBuf};

use claimbridge_core::{
    OrchestratorConfig,
    connectors::{GatewayConfig, PortalConfig},
};
use claimbridge_model::RoutingStrategy;
use serde::{Deserialize, Serialize};

/// Raw shape of `claimbridge.toml`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: FileServerConfig,
    pub orchestrator: OrchestratorConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub portals: Vec<PortalConfig>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Values read from the process environment. These win over the file.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub default_strategy: Option<RoutingStrategy>,
    pub gateway_client_secret: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: env::var("CLAIMBRIDGE_CONFIG").ok().map(PathBuf::from),
            server_host: env::var("SERVER_HOST").ok(),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok()),
            default_strategy: env::var("CLAIMBRIDGE_DEFAULT_STRATEGY")
                .ok()
                .and_then(|v| v.parse().ok()),
            gateway_client_secret: env::var("GATEWAY_CLIENT_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}
