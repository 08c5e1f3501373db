use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use claimbridge_core::ClaimService;
use claimbridge_server::{
    AppState, create_app,
    infra::{
        config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions},
        startup::build_claim_service,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "claimbridge-server")]
#[command(
    about = "Claims submission orchestrator for standards gateways and legacy payer portals"
)]
struct Cli {
    /// Path to claimbridge.toml (overrides CLAIMBRIDGE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config,
        env_file: cli.env_file,
    })
    .load()
    .context("failed to load configuration")?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Quieter defaults; override via RUST_LOG.
                "info,claims::resilience=info,claims::poller=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration loaded");
    }
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    let shutdown = CancellationToken::new();
    let service = Arc::new(build_claim_service(&config, shutdown.clone())?);
    let resumed = service
        .resume_pending()
        .await
        .context("failed to resume pending claims")?;
    if resumed > 0 {
        info!(resumed, "resumed polling for pending claims");
    }

    let config = Arc::new(config);
    let addr = config.bind_address();
    let state = AppState::new(Arc::clone(&service), Arc::clone(&config));
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, connectors = config.connector_count(), "claimbridge server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&service)))
        .await
        .context("server terminated unexpectedly")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal(service: Arc<ClaimService>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
    service.shutdown();
}
