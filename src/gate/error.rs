use crate::identity::LookupError;
use crate::membership::QueryError;

/// Why a gate rejected a connection or a command.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The SSH login name is not the service account.
    #[error("incorrect SSH user {presented:?}")]
    IncorrectUser { presented: String },

    /// The keys service could not resolve the presented key.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// Authorisation ran without a resolved identity on the connection.
    #[error("no identity resolved for this connection")]
    MissingIdentity,

    /// The admin API could not produce a member list.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The identity is not a member of the repository's namespace.
    #[error("{user:?} does not have access to {repo:?}")]
    AccessDenied { repo: String, user: String },
}

impl GateError {
    /// Text that is safe to show to the SSH client.
    ///
    /// Remote failure details and identity internals stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::IncorrectUser { .. } | Self::Lookup(_) => "authentication failed".to_string(),
            Self::MissingIdentity => "connection is not authenticated".to_string(),
            Self::Query(_) => "unable to verify repository access".to_string(),
            Self::AccessDenied { repo, .. } => format!("access denied to repository {repo}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_names_repo_and_user() {
        let err = GateError::AccessDenied {
            repo: "ns/repo".to_string(),
            user: "test-user".to_string(),
        };
        assert_eq!(err.to_string(), "\"test-user\" does not have access to \"ns/repo\"");
        assert_eq!(err.client_message(), "access denied to repository ns/repo");
    }

    #[test]
    fn query_failure_details_are_not_client_visible() {
        let err = GateError::from(QueryError::Remote("db exploded at 10.0.0.7".to_string()));
        assert!(err.to_string().contains("10.0.0.7"));
        assert!(!err.client_message().contains("10.0.0.7"));
    }

    #[test]
    fn lookup_failure_wraps_transparently() {
        let err = GateError::from(LookupError::new("unknown key"));
        assert_eq!(err.to_string(), "identity lookup failed: unknown key");
    }
}
