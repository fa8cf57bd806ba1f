mod config;
mod gate;
mod health;
mod identity;
mod membership;
mod metrics;
mod ssh;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::gate::{GatePipeline, Gates};
use crate::identity::{IdentityLookup, KeyServiceClient};
use crate::membership::{AdminClient, MembershipQuery};
use crate::metrics::MetricsRegistry;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gitgate", about = "Authenticating git-over-SSH gateway")]
struct Cli {
    #[command(flatten)]
    config: Config,
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Build the two remote clients and the gate pipeline that uses them.
fn build_gates(config: &Config, registry: &MetricsRegistry) -> Result<Arc<dyn Gates>> {
    let keys: Arc<dyn IdentityLookup> = Arc::new(KeyServiceClient::new(
        &config.keys_addr,
        config.keys_ca_cert.as_deref(),
        config.keys_tls_domain.as_deref(),
    )?);

    let admin: Arc<dyn MembershipQuery> = Arc::new(AdminClient::new(&config.admin_endpoint)?);
    tracing::info!(endpoint = %config.admin_endpoint, "admin client initialised");

    Ok(Arc::new(GatePipeline::new(
        config.ssh_user.clone(),
        keys,
        admin,
        Arc::clone(&registry.metrics),
    )))
}

/// Run every listener; returns as soon as any one of them stops.
async fn serve(config: Arc<Config>) -> Result<()> {
    let registry = MetricsRegistry::new();
    let gates = build_gates(&config, &registry)?;

    let ssh = ssh::start_ssh_server(
        Arc::clone(&config),
        gates,
        Arc::clone(&registry.metrics),
    );

    match config.metrics_listen_addr()? {
        Some(addr) => {
            tokio::select! {
                res = ssh => res.context("SSH listener stopped"),
                res = health::run_metrics_server(addr, registry) => {
                    res.context("metrics listener stopped")
                }
            }
        }
        None => ssh.await.context("SSH listener stopped"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = cli.config;
    if let Err(e) = config::validate_config(&config) {
        tracing::error!(error = %format!("{e:#}"), "invalid configuration");
        std::process::exit(1);
    }

    tracing::info!(
        ssh_listen = %config.ssh_listen,
        keys = %config.keys_addr,
        repos_dir = %config.repos_dir.display(),
        "starting gitgate"
    );

    // Any listener returning, with or without an error, ends the process.
    let outcome = serve(Arc::new(config)).await;
    match outcome {
        Ok(()) => tracing::error!("listener exited unexpectedly"),
        Err(e) => tracing::error!(error = %format!("{e:#}"), "fatal error"),
    }
    std::process::exit(1);
}
