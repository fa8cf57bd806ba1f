//! SSH session handler implementing the `russh` 0.46 [`Handler`] trait.
//!
//! Each inbound SSH connection is served by a dedicated [`SshSession`] that
//! owns the connection's [`ConnectionContext`].  Authentication runs the
//! username and identity gates; every `exec` request runs the authorisation
//! gate before the matching `git` service is spawned against the local bare
//! repository.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use base64::Engine as _;
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::command::{parse_git_command, GitCommand};
use crate::config::Config;
use crate::gate::{ConnectionContext, Gates};
use crate::metrics::Metrics;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Per-connection SSH session state.
pub struct SshSession {
    config: Arc<Config>,
    gates: Arc<dyn Gates>,
    metrics: Arc<Metrics>,
    peer_addr: Option<SocketAddr>,
    ctx: ConnectionContext,
    /// Stdin of the running git service; client data is forwarded here.
    child_stdin: Option<tokio::process::ChildStdin>,
    /// `GIT_PROTOCOL` value sent by the client via SSH env request.
    git_protocol: Option<String>,
}

impl SshSession {
    pub fn new(
        config: Arc<Config>,
        gates: Arc<dyn Gates>,
        metrics: Arc<Metrics>,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        metrics.active_connections.inc();
        Self {
            config,
            gates,
            metrics,
            peer_addr,
            ctx: ConnectionContext::new(),
            child_stdin: None,
            git_protocol: None,
        }
    }

    fn reject() -> Auth {
        Auth::Reject {
            proceed_with_methods: None,
        }
    }

    /// Report a failed command on stderr and close the channel.  The
    /// connection itself stays up.
    fn fail_command(session: &mut Session, channel_id: ChannelId, message: &str) {
        session.extended_data(
            channel_id,
            1,
            CryptoVec::from_slice(error_line(message).as_bytes()),
        );
        finish_channel(session, channel_id, 1);
    }

    /// Decide whether an exec payload may run.  On refusal the error is the
    /// text to show the client.
    async fn authorise_exec(&self, raw_cmd: &str) -> Result<GitCommand, String> {
        let Some(command) = parse_git_command(raw_cmd) else {
            warn!(command = %raw_cmd, "unrecognised SSH exec command");
            return Err(
                "unknown command; only git-upload-pack and git-receive-pack are supported"
                    .to_string(),
            );
        };

        if let Err(e) = self.gates.authorise(&self.ctx, &command.repo).await {
            warn!(repo = %command.repo, error = %e, "git command rejected");
            return Err(e.client_message());
        }
        Ok(command)
    }

    /// Banner for a shell request, or the error to show when the connection
    /// has no identity.
    fn shell_banner(&self) -> Result<String, &'static str> {
        self.ctx
            .identity()
            .map(|identity| self.config.banner_for(&identity.display_name))
            .ok_or("connection is not authenticated")
    }

    /// Spawn `git <service> <repo_dir>` and wire it to the channel.
    async fn spawn_git_service(
        &mut self,
        command: &GitCommand,
        channel_id: ChannelId,
        session: &mut Session,
    ) {
        let repo_dir = command.repo_dir(&self.config.repos_dir);
        let is_repo = tokio::fs::metadata(repo_dir.join("HEAD"))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_repo {
            warn!(repo = %command.repo, path = %repo_dir.display(), "repository not found");
            Self::fail_command(
                session,
                channel_id,
                &format!("repository {} does not exist", command.repo),
            );
            return;
        }

        let mut cmd = Command::new("git");
        cmd.arg(command.service.subcommand()).arg(&repo_dir);

        // Forward the protocol version the client negotiated (v2 if
        // supported, v0/v1 otherwise).
        if let Some(ref proto) = self.git_protocol {
            cmd.env("GIT_PROTOCOL", proto);
        }

        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(repo = %command.repo, error = %e, "failed to spawn git service");
                Self::fail_command(session, channel_id, "failed to start git service");
                return;
            }
        };

        info!(
            repo = %command.repo,
            service = command.service.subcommand(),
            "git service started"
        );

        self.child_stdin = child.stdin.take();
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            error!(repo = %command.repo, "git service started without output pipes");
            Self::fail_command(session, channel_id, "failed to start git service");
            return;
        };
        let handle = session.handle();

        tokio::spawn(async move {
            let (_, _, status) = tokio::join!(
                relay(stdout, &handle, channel_id, None),
                relay(stderr, &handle, channel_id, Some(1)),
                child.wait(),
            );
            let exit_code = match status {
                Ok(status) => status.code().unwrap_or(1) as u32,
                Err(_) => 1,
            };

            // RFC 4254: exit-status → EOF → close.
            let _ = handle.exit_status_request(channel_id, exit_code).await;
            let _ = handle.eof(channel_id).await;
            let _ = handle.close(channel_id).await;
        });
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.metrics.active_connections.dec();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Send exit-status, EOF, and close on a channel in the order git's SSH
/// transport expects.
fn finish_channel(session: &mut Session, channel_id: ChannelId, exit_status: u32) {
    session.exit_status_request(channel_id, exit_status);
    session.eof(channel_id);
    session.close(channel_id);
}

/// Copy `reader` to the channel until EOF: plain data when `extended` is
/// `None`, otherwise the given extended-data stream.
async fn relay<R>(mut reader: R, handle: &Handle, channel_id: ChannelId, extended: Option<u32>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 65536];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, ?extended, "error reading git service output");
                break;
            }
        };
        let chunk = CryptoVec::from_slice(&buf[..n]);
        let sent = match extended {
            Some(code) => handle.extended_data(channel_id, code, chunk).await,
            None => handle.data(channel_id, chunk).await,
        };
        if sent.is_err() {
            break;
        }
    }
}

fn error_line(message: &str) -> String {
    format!("ERROR: {message}\n")
}

/// OpenSSH `authorized_keys` rendering of a key: `<algorithm> <base64>`.
/// This is the key blob sent to the keys service.
fn authorized_key_line(key: &PublicKey) -> String {
    format!("{} {}", key.name(), key.public_key_base64())
}

/// SHA-256 fingerprint in `ssh-keygen -l` format, for logs only.
fn fingerprint_of(key: &PublicKey) -> String {
    let blob = base64::engine::general_purpose::STANDARD
        .decode(key.public_key_base64().as_bytes())
        .unwrap_or_default();
    fingerprint_of_blob(&blob)
}

fn fingerprint_of_blob(blob: &[u8]) -> String {
    let hash = Sha256::digest(blob);
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    format!("SHA256:{encoded}")
}

// ---------------------------------------------------------------------------
// Handler implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl Handler for SshSession {
    type Error = anyhow::Error;

    /// Cheap early rejection of the wrong login name, before the client
    /// proves possession of the key.
    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        _key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.ctx.set_ssh_login_name(user);
        if self.gates.is_expected_user(user) {
            Ok(Auth::Accept)
        } else {
            info!(peer = ?self.peer_addr, user = %user, "SSH key offer rejected");
            Ok(Self::reject())
        }
    }

    /// Authenticate a client whose key signature has been verified: the
    /// login name must be the service account and the keys service must
    /// know the key.
    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let fp = fingerprint_of(key);
        info!(
            peer = ?self.peer_addr,
            user = %user,
            fingerprint = %fp,
            "SSH public-key auth attempt"
        );

        self.ctx.set_ssh_login_name(user);
        if let Err(e) = self.gates.verify_user(user) {
            warn!(fingerprint = %fp, error = %e, "SSH auth rejected");
            return Ok(Self::reject());
        }

        let raw_key = authorized_key_line(key);
        match self.gates.verify_key(&mut self.ctx, raw_key.as_bytes()).await {
            Ok(()) => {
                info!(fingerprint = %fp, "SSH key accepted");
                Ok(Auth::Accept)
            }
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "SSH key rejected");
                Ok(Self::reject())
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    /// Capture `GIT_PROTOCOL` so the git service can negotiate protocol v2.
    async fn env_request(
        &mut self,
        _channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if variable_name == "GIT_PROTOCOL" {
            debug!(value = %variable_value, "captured GIT_PROTOCOL from client");
            self.git_protocol = Some(variable_value.to_string());
        }
        Ok(())
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(ref mut stdin) = self.child_stdin {
            if let Err(e) = stdin.write_all(data).await {
                debug!(error = %e, "failed to write to git service stdin (process may have exited)");
                self.child_stdin.take();
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the ChildStdin closes the pipe.
        self.child_stdin.take();
        Ok(())
    }

    /// There is no shell; recognised users get a banner instead.
    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.shell_banner() {
            Ok(banner) => {
                session.data(channel_id, CryptoVec::from_slice(banner.as_bytes()));
                finish_channel(session, channel_id, 1);
            }
            Err(message) => Self::fail_command(session, channel_id, message),
        }
        Ok(())
    }

    /// Authorise and run `git-upload-pack` / `git-receive-pack`.  Anything
    /// else is refused with a message on stderr.
    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let raw_cmd = String::from_utf8_lossy(data);
        info!(
            peer = ?self.peer_addr,
            display_name = ?self.ctx.identity().map(|i| i.display_name.as_str()),
            command = %raw_cmd,
            "SSH exec request"
        );

        match self.authorise_exec(&raw_cmd).await {
            Ok(command) => self.spawn_git_service(&command, channel_id, session).await,
            Err(message) => Self::fail_command(session, channel_id, &message),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
