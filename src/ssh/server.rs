//! SSH server bootstrap and the [`russh::server::Server`] implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::server::{self, Server};
use russh::MethodSet;
use russh_keys::key::KeyPair;
use tracing::{info, warn};

use super::session::SshSession;
use crate::config::Config;
use crate::gate::Gates;
use crate::metrics::Metrics;

// ---------------------------------------------------------------------------
// Server type
// ---------------------------------------------------------------------------

/// Hands each incoming connection to a fresh [`SshSession`] sharing the
/// same gate pipeline.
pub struct SshServer {
    config: Arc<Config>,
    gates: Arc<dyn Gates>,
    metrics: Arc<Metrics>,
}

impl SshServer {
    pub fn new(config: Arc<Config>, gates: Arc<dyn Gates>, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            gates,
            metrics,
        }
    }
}

impl server::Server for SshServer {
    type Handler = SshSession;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        info!(peer = ?peer_addr, "new SSH client connection");
        SshSession::new(
            Arc::clone(&self.config),
            Arc::clone(&self.gates),
            Arc::clone(&self.metrics),
            peer_addr,
        )
    }
}

// ---------------------------------------------------------------------------
// Host key
// ---------------------------------------------------------------------------

/// Load the configured host key, or generate an ephemeral Ed25519 key when
/// none is configured.
fn load_or_generate_host_key(config: &Config) -> Result<KeyPair> {
    match config.host_key {
        Some(ref path) => {
            let key = russh_keys::load_secret_key(path, None)
                .with_context(|| format!("failed to load SSH host key: {}", path.display()))?;
            info!(path = %path.display(), "loaded SSH host key");
            Ok(key)
        }
        None => {
            warn!("no SSH host key configured; generating ephemeral Ed25519 key");
            Ok(KeyPair::generate_ed25519())
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Run the SSH listener.  Only returns on an unrecoverable error.
pub async fn start_ssh_server(
    config: Arc<Config>,
    gates: Arc<dyn Gates>,
    metrics: Arc<Metrics>,
) -> Result<()> {
    let listen_addr = config.ssh_listen_addr()?;
    let host_key = load_or_generate_host_key(&config)?;

    let ssh_config = Arc::new(server::Config {
        keys: vec![host_key],
        methods: MethodSet::PUBLICKEY,
        preferred: russh::Preferred::DEFAULT,
        inactivity_timeout: Some(Duration::from_secs(600)),
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        max_auth_attempts: 6,
        ..Default::default()
    });

    info!(address = %listen_addr, user = %config.ssh_user, "starting SSH server");

    let mut ssh_server = SshServer::new(config, gates, metrics);
    ssh_server
        .run_on_address(ssh_config, listen_addr)
        .await
        .context("SSH server exited with error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_for_tests;
    use crate::gate::{ConnectionContext, GateError};
    use crate::metrics::MetricsRegistry;

    fn config(extra: &[&str]) -> Config {
        parse_for_tests(extra).unwrap()
    }

    #[test]
    fn ephemeral_host_key_when_unconfigured() {
        assert!(load_or_generate_host_key(&config(&[])).is_ok());
    }

    #[test]
    fn missing_host_key_file_is_an_error() {
        let cfg = config(&["--host-key", "/nonexistent/gitgate_host_ed25519"]);
        assert!(load_or_generate_host_key(&cfg).is_err());
    }

    struct DenyAll;

    #[async_trait::async_trait]
    impl Gates for DenyAll {
        fn is_expected_user(&self, _login_name: &str) -> bool {
            false
        }

        fn verify_user(&self, _login_name: &str) -> Result<(), GateError> {
            Err(GateError::MissingIdentity)
        }

        async fn verify_key(
            &self,
            _ctx: &mut ConnectionContext,
            _raw_key: &[u8],
        ) -> Result<(), GateError> {
            Err(GateError::MissingIdentity)
        }

        async fn authorise(
            &self,
            _ctx: &ConnectionContext,
            _repo_path: &str,
        ) -> Result<(), GateError> {
            Err(GateError::MissingIdentity)
        }
    }

    #[tokio::test]
    async fn invalid_listen_address_fails_fast() {
        let cfg = Arc::new(config(&["--ssh-listen", "sedfkl;dfl;kjsdf"]));
        let res = start_ssh_server(cfg, Arc::new(DenyAll), MetricsRegistry::new().metrics).await;
        assert!(res.is_err());
    }

    #[test]
    fn sessions_track_active_connections() {
        let registry = MetricsRegistry::new();
        let mut server = SshServer::new(
            Arc::new(config(&[])),
            Arc::new(DenyAll),
            Arc::clone(&registry.metrics),
        );

        let first = server.new_client(None);
        let second = server.new_client(None);
        assert_eq!(registry.metrics.active_connections.get(), 2);

        drop(first);
        drop(second);
        assert_eq!(registry.metrics.active_connections.get(), 0);
    }
}
