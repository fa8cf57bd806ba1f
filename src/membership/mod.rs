//! Namespace membership lookups against the admin API.

pub mod graphql;

pub use graphql::AdminClient;

/// Failure to obtain a member list.  Always treated as a denial by callers.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("admin API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("admin API returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("admin API query failed: {0}")]
    Remote(String),
    #[error("admin API response carried no data")]
    MissingData,
}

/// Returns the display names of every member of the namespace that owns a
/// repository.
///
/// The path is used verbatim; normalisation is the caller's job.
#[async_trait::async_trait]
pub trait MembershipQuery: Send + Sync {
    async fn members_of(&self, repo_path: &str) -> Result<Vec<String>, QueryError>;
}
