//! Public-key to identity resolution.
//!
//! The [`IdentityLookup`] trait is the only way the gate pipeline learns who
//! is behind a presented SSH key.  The production implementation lives in
//! [`grpc`] and calls the keys service over a verified TLS channel.

pub mod grpc;

use std::fmt;

pub use grpc::KeyServiceClient;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The principal behind a public key, as reported by the keys service.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque identifier assigned by the keys service.
    pub id: String,
    /// Human-readable name used for namespace membership checks.
    pub display_name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

// The internal id stays out of logs and error messages.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Any failure to resolve a key.
///
/// Network errors, malformed keys, unknown keys and remote rejections all
/// collapse into this one type; callers only ever learn that the lookup did
/// not produce an identity.
#[derive(Debug, thiserror::Error)]
#[error("identity lookup failed: {source}")]
pub struct LookupError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl LookupError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Resolves a raw public-key blob to an [`Identity`].
///
/// Implementations must be safe to call concurrently from every connection
/// task, and must issue a fresh remote call on every invocation.
#[async_trait::async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn lookup(&self, raw_key: &[u8]) -> Result<Identity, LookupError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_internal_id() {
        let identity = Identity::new("usr_0192", "test-user");
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("test-user"));
        assert!(!rendered.contains("usr_0192"));
    }

    #[test]
    fn lookup_error_keeps_source_message() {
        let err = LookupError::new("connection refused");
        assert_eq!(err.to_string(), "identity lookup failed: connection refused");
        assert!(std::error::Error::source(&err).is_some());
    }
}
