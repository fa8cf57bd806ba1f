//! GraphQL client for the admin API's `repo → namespace → members` query.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::{MembershipQuery, QueryError};

const MEMBERS_QUERY: &str =
    "query ($path: String!) { repo(path: $path) { namespace { members { name } } } }";

// ---------------------------------------------------------------------------
// Response shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<MembersData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MembersData {
    repo: Option<Repo>,
}

#[derive(Debug, Deserialize)]
struct Repo {
    namespace: Option<Namespace>,
}

#[derive(Debug, Deserialize)]
struct Namespace {
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct Member {
    name: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Admin API client.  Cheap to clone; the inner connection pool is shared.
#[derive(Clone)]
pub struct AdminClient {
    http_client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl AdminClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .with_context(|| format!("invalid admin endpoint: {endpoint:?}"))?;
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("gitgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http_client,
            endpoint,
        })
    }
}

#[async_trait::async_trait]
impl MembershipQuery for AdminClient {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn members_of(&self, repo_path: &str) -> Result<Vec<String>, QueryError> {
        let body = json!({
            "query": MEMBERS_QUERY,
            "variables": { "path": repo_path },
        });

        let resp = self
            .http_client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "admin API returned non-success status");
            return Err(QueryError::Status(resp.status()));
        }

        let parsed: GraphqlResponse = resp.json().await?;
        let members = extract_members(parsed)?;
        debug!(count = members.len(), "resolved namespace members");
        Ok(members)
    }
}

/// Pull member names out of a decoded response.
///
/// An unknown repository (`repo: null`) or one without a namespace yields an
/// empty list, which the authorisation gate turns into a denial.
fn extract_members(resp: GraphqlResponse) -> Result<Vec<String>, QueryError> {
    if !resp.errors.is_empty() {
        let messages: Vec<String> = resp.errors.into_iter().map(|e| e.message).collect();
        return Err(QueryError::Remote(messages.join("; ")));
    }

    let data = resp.data.ok_or(QueryError::MissingData)?;
    Ok(data
        .repo
        .and_then(|r| r.namespace)
        .map(|ns| ns.members.into_iter().map(|m| m.name).collect())
        .unwrap_or_default())
}
