//! gRPC client for the keys service.
//!
//! The wire messages mirror the keys service's `server` protobuf package and
//! are declared by hand with `prost` derives, so the build does not need
//! `protoc`.  The channel is always TLS with server certificate
//! verification; there is no switch to turn verification off.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info, instrument};

use super::{Identity, IdentityLookup, LookupError};

const LOOKUP_PATH: &str = "/server.KeyService/Lookup";

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum KeyType {
    Ssh = 0,
}

/// `server.PublicKey`
#[derive(Clone, PartialEq, prost::Message)]
pub struct PublicKey {
    #[prost(bytes = "vec", tag = "1")]
    pub contents: Vec<u8>,
    #[prost(enumeration = "KeyType", tag = "2")]
    pub r#type: i32,
}

/// `server.User`
#[derive(Clone, PartialEq, prost::Message)]
pub struct User {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Keys service client backed by a lazily-connected, shareable [`Channel`].
#[derive(Clone)]
pub struct KeyServiceClient {
    channel: Channel,
}

impl KeyServiceClient {
    /// Build a client for `addr` (`host:port` or an `https://` URI).
    ///
    /// System trust roots are always loaded; `ca_cert` adds a PEM bundle on
    /// top of them and `tls_domain` overrides the name checked against the
    /// server certificate.  No connection is made until the first lookup.
    pub fn new(addr: &str, ca_cert: Option<&Path>, tls_domain: Option<&str>) -> Result<Self> {
        let uri = endpoint_uri(addr)?;

        let mut tls = ClientTlsConfig::new().with_native_roots();
        if let Some(path) = ca_cert {
            let pem = std::fs::read(path)
                .with_context(|| format!("failed to read keys CA cert: {}", path.display()))?;
            tls = tls.ca_certificate(Certificate::from_pem(pem));
        }
        if let Some(domain) = tls_domain {
            tls = tls.domain_name(domain);
        }

        let channel = Endpoint::from_shared(uri.clone())
            .with_context(|| format!("invalid keys service address: {addr:?}"))?
            .tls_config(tls)
            .context("failed to configure TLS for keys service")?
            .connect_lazy();

        info!(uri = %uri, "keys service client initialised");
        Ok(Self { channel })
    }
}

#[async_trait::async_trait]
impl IdentityLookup for KeyServiceClient {
    #[instrument(skip_all, fields(key_len = raw_key.len()))]
    async fn lookup(&self, raw_key: &[u8]) -> Result<Identity, LookupError> {
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(LookupError::new)?;

        let request = tonic::Request::new(PublicKey {
            contents: raw_key.to_vec(),
            r#type: KeyType::Ssh as i32,
        });
        let codec = ProstCodec::<PublicKey, User>::default();

        let user = grpc
            .unary(request, PathAndQuery::from_static(LOOKUP_PATH), codec)
            .await
            .map_err(LookupError::new)?
            .into_inner();

        debug!(display_name = %user.display_name, "keys service resolved key");
        user_to_identity(user)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Turn a configured address into an `https://` URI, refusing plain text.
fn endpoint_uri(addr: &str) -> Result<String> {
    let addr = addr.trim();
    if addr.is_empty() {
        bail!("keys service address is empty");
    }
    if addr.starts_with("http://") {
        bail!("keys service must be reached over TLS, got {addr:?}");
    }
    if addr.starts_with("https://") {
        Ok(addr.to_string())
    } else {
        Ok(format!("https://{addr}"))
    }
}

/// A user without a display name can never match a namespace member.
fn user_to_identity(user: User) -> Result<Identity, LookupError> {
    if user.display_name.is_empty() {
        return Err(LookupError::new("keys service returned a user without a display name"));
    }
    Ok(Identity::new(user.id, user.display_name))
}
