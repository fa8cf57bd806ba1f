//! In-memory stand-ins for the keys and admin services.

use std::sync::Mutex;

use crate::identity::{Identity, IdentityLookup, LookupError};
use crate::membership::{MembershipQuery, QueryError};

/// Resolves every key to `test-user`, or fails every lookup.
pub(crate) struct FakeKeys {
    pub fail: bool,
}

#[async_trait::async_trait]
impl IdentityLookup for FakeKeys {
    async fn lookup(&self, _raw_key: &[u8]) -> Result<Identity, LookupError> {
        if self.fail {
            return Err(LookupError::new("some error"));
        }
        Ok(Identity::new("u-1", "test-user"))
    }
}

/// Reports `foo`, `bar`, `baz` and a final member (`test-user` unless set)
/// for every repository, and remembers which paths were asked about.
#[derive(Default)]
pub(crate) struct FakeAdmin {
    pub fail: bool,
    pub final_user: Option<&'static str>,
    queried: Mutex<Vec<String>>,
}

impl FakeAdmin {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn ending_with(user: &'static str) -> Self {
        Self {
            final_user: Some(user),
            ..Self::default()
        }
    }

    pub fn queried(&self) -> Vec<String> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MembershipQuery for FakeAdmin {
    async fn members_of(&self, repo_path: &str) -> Result<Vec<String>, QueryError> {
        if self.fail {
            return Err(QueryError::Remote("some error".to_string()));
        }
        self.queried.lock().unwrap().push(repo_path.to_string());
        Ok(vec![
            "foo".to_string(),
            "bar".to_string(),
            "baz".to_string(),
            self.final_user.unwrap_or("test-user").to_string(),
        ])
    }
}
