//! The three connection gates.
//!
//! The SSH transport calls into a [`Gates`] implementation at three points:
//!
//! 1. when a login name is presented ([`Gates::verify_user`]),
//! 2. when a public key is presented ([`Gates::verify_key`]),
//! 3. before every git command runs ([`Gates::authorise`]).
//!
//! A failure at (1) or (2) rejects the authentication attempt.  A failure at
//! (3) rejects only that command.  [`GatePipeline`] is the production
//! implementation; it owns no mutable state, so a single instance is shared
//! by every connection.

mod context;
mod error;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, instrument, warn};

pub use context::ConnectionContext;
pub use error::GateError;

use crate::identity::IdentityLookup;
use crate::membership::MembershipQuery;
use crate::metrics::{Gate, Metrics, Outcome, RemoteService};

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Callbacks the SSH transport requires from the gate layer.
#[async_trait::async_trait]
pub trait Gates: Send + Sync {
    /// Gate 1 without recording a decision.  Used for the key offer, which
    /// precedes the verified attempt that records it.
    fn is_expected_user(&self, login_name: &str) -> bool;

    /// Gate 1: is `login_name` the service account?
    fn verify_user(&self, login_name: &str) -> Result<(), GateError>;

    /// Gate 2: resolve `raw_key` and record the identity on `ctx`.
    async fn verify_key(
        &self,
        ctx: &mut ConnectionContext,
        raw_key: &[u8],
    ) -> Result<(), GateError>;

    /// Gate 3: may the connection's identity operate on `repo_path`?
    async fn authorise(&self, ctx: &ConnectionContext, repo_path: &str) -> Result<(), GateError>;
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct GatePipeline {
    expected_user: String,
    identities: Arc<dyn IdentityLookup>,
    memberships: Arc<dyn MembershipQuery>,
    metrics: Arc<Metrics>,
}

impl GatePipeline {
    pub fn new(
        expected_user: impl Into<String>,
        identities: Arc<dyn IdentityLookup>,
        memberships: Arc<dyn MembershipQuery>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            expected_user: expected_user.into(),
            identities,
            memberships,
            metrics,
        }
    }
}

#[async_trait::async_trait]
impl Gates for GatePipeline {
    fn is_expected_user(&self, login_name: &str) -> bool {
        login_name == self.expected_user
    }

    fn verify_user(&self, login_name: &str) -> Result<(), GateError> {
        if !self.is_expected_user(login_name) {
            warn!(user = %login_name, "rejected incorrect SSH user");
            self.metrics.record(Gate::Username, Outcome::Rejected);
            return Err(GateError::IncorrectUser {
                presented: login_name.to_string(),
            });
        }
        self.metrics.record(Gate::Username, Outcome::Accepted);
        Ok(())
    }

    #[instrument(skip_all, fields(user = %ctx.ssh_login_name()))]
    async fn verify_key(
        &self,
        ctx: &mut ConnectionContext,
        raw_key: &[u8],
    ) -> Result<(), GateError> {
        let started = Instant::now();
        let result = self.identities.lookup(raw_key).await;
        self.metrics
            .observe_call(RemoteService::Keys, started.elapsed().as_secs_f64());

        match result {
            Ok(identity) => {
                info!(display_name = %identity.display_name, "key resolved to identity");
                self.metrics.record(Gate::Identity, Outcome::Accepted);
                ctx.set_identity(identity);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "key lookup failed");
                self.metrics.record(Gate::Identity, Outcome::Rejected);
                ctx.clear_identity();
                Err(e.into())
            }
        }
    }

    #[instrument(skip_all, fields(repo = %repo_path))]
    async fn authorise(&self, ctx: &ConnectionContext, repo_path: &str) -> Result<(), GateError> {
        let Some(identity) = ctx.identity() else {
            error!("authorisation reached without a resolved identity");
            self.metrics.record(Gate::Authorization, Outcome::Error);
            return Err(GateError::MissingIdentity);
        };

        let path = normalize_repo_path(repo_path);

        let started = Instant::now();
        let result = self.memberships.members_of(path).await;
        self.metrics
            .observe_call(RemoteService::Admin, started.elapsed().as_secs_f64());

        let members = match result {
            Ok(members) => members,
            Err(e) => {
                error!(error = %e, path, "membership query failed; denying");
                self.metrics.record(Gate::Authorization, Outcome::Error);
                return Err(e.into());
            }
        };

        if members.iter().any(|m| *m == identity.display_name) {
            info!(display_name = %identity.display_name, path, "operation authorised");
            self.metrics.record(Gate::Authorization, Outcome::Accepted);
            return Ok(());
        }

        warn!(display_name = %identity.display_name, path, "operation denied");
        self.metrics.record(Gate::Authorization, Outcome::Rejected);
        Err(GateError::AccessDenied {
            repo: repo_path.to_string(),
            user: identity.display_name.clone(),
        })
    }
}

/// Strip a single trailing `.git` so both spellings share one lookup key.
pub fn normalize_repo_path(path: &str) -> &str {
    path.strip_suffix(".git").unwrap_or(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
