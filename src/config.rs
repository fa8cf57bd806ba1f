use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

/// Banner written to clients that ask for a shell.  `{name}` is replaced by
/// the display name of the authenticated identity.
pub const DEFAULT_BANNER: &str = "Welcome {name}!\r\n\r\n\
This service does not provide shell access\r\n\
But please take this as a sign that your key is recognised... \
if it shouldn't be, then please shout up\r\n\r\n";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Immutable service configuration, read once at startup from flags or the
/// environment.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Address of the keys (identity) gRPC service, `host:port` or `https://...`.
    #[arg(long, env = "KEYS")]
    pub keys_addr: String,

    /// Socket address for the SSH listener.
    #[arg(long, env = "SSH_ADDR", default_value = "0.0.0.0:2222")]
    pub ssh_listen: String,

    /// URL of the admin GraphQL endpoint.
    #[arg(long, env = "ADMIN_ENDPOINT")]
    pub admin_endpoint: String,

    /// Root directory holding the bare repositories.
    #[arg(long, env = "REPOS_DIR")]
    pub repos_dir: PathBuf,

    /// The only SSH login name accepted (e.g. `git` in `git@host:ns/repo`).
    #[arg(long, env = "SSH_USER", default_value = "git")]
    pub ssh_user: String,

    /// OpenSSH private host key.  An ephemeral Ed25519 key is generated when
    /// unset.
    #[arg(long, env = "SSH_HOST_KEY")]
    pub host_key: Option<PathBuf>,

    /// Extra PEM CA bundle trusted when verifying the keys service.
    #[arg(long, env = "KEYS_CA_CERT")]
    pub keys_ca_cert: Option<PathBuf>,

    /// Server name to verify the keys service certificate against.
    #[arg(long, env = "KEYS_TLS_DOMAIN")]
    pub keys_tls_domain: Option<String>,

    /// Text written in response to shell requests.
    #[arg(long, env = "SSH_BANNER", default_value = DEFAULT_BANNER)]
    pub banner: String,

    /// Optional socket address for the `/healthz` and `/metrics` listener.
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_listen: Option<String>,
}

impl Config {
    pub fn ssh_listen_addr(&self) -> Result<SocketAddr> {
        self.ssh_listen
            .parse()
            .with_context(|| format!("invalid SSH listen address: {:?}", self.ssh_listen))
    }

    pub fn metrics_listen_addr(&self) -> Result<Option<SocketAddr>> {
        self.metrics_listen
            .as_deref()
            .map(|addr| {
                addr.parse()
                    .with_context(|| format!("invalid metrics listen address: {addr:?}"))
            })
            .transpose()
    }

    /// Render the shell banner for `display_name`.
    pub fn banner_for(&self, display_name: &str) -> String {
        self.banner.replace("{name}", display_name)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Sanity checks that clap cannot express.
pub fn validate_config(config: &Config) -> Result<()> {
    config.ssh_listen_addr()?;
    config.metrics_listen_addr()?;

    anyhow::ensure!(!config.ssh_user.is_empty(), "SSH user must not be empty");
    anyhow::ensure!(
        !config.keys_addr.trim().is_empty(),
        "keys service address must not be empty"
    );
    anyhow::ensure!(
        !config.keys_addr.starts_with("http://"),
        "keys service must be reached over TLS"
    );

    let admin = reqwest::Url::parse(&config.admin_endpoint)
        .with_context(|| format!("invalid admin endpoint: {:?}", config.admin_endpoint))?;
    anyhow::ensure!(
        matches!(admin.scheme(), "http" | "https"),
        "admin endpoint must be an http(s) URL"
    );

    anyhow::ensure!(
        !config.repos_dir.as_os_str().is_empty(),
        "repository directory must not be empty"
    );
    Ok(())
}

/// Build a [`Config`] from the three required flags plus `extra`.  Later
/// flags win, so `extra` may override a required value.
#[cfg(test)]
pub(crate) fn parse_for_tests(extra: &[&str]) -> Result<Config, clap::Error> {
    use clap::Parser;

    #[derive(Parser, Debug)]
    #[command(args_override_self = true)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    let mut args = vec![
        "gitgate",
        "--keys-addr",
        "keys.internal:443",
        "--admin-endpoint",
        "https://admin.internal/graphql",
        "--repos-dir",
        "/srv/repos",
    ];
    args.extend_from_slice(extra);
    TestCli::try_parse_from(args).map(|cli| cli.config)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser, Debug)]
    struct RequiredOnly {
        #[command(flatten)]
        config: Config,
    }

    fn parse(extra: &[&str]) -> Result<Config, clap::Error> {
        parse_for_tests(extra)
    }

    #[test]
    fn defaults_apply() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.ssh_listen, "0.0.0.0:2222");
        assert_eq!(config.ssh_user, "git");
        assert!(config.host_key.is_none());
        assert!(config.metrics_listen.is_none());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn required_flags_are_enforced() {
        let err = RequiredOnly::try_parse_from(["gitgate", "--keys-addr", "k:1"]);
        assert!(err.is_err());
    }

    #[test]
    fn invalid_ssh_listen_fails_validation() {
        let config = parse(&["--ssh-listen", "sedfkl;dfl;kjsdf"]).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn plaintext_keys_address_fails_validation() {
        let config = parse(&["--keys-addr", "http://keys.internal:80"]).unwrap();
        assert_eq!(config.keys_addr, "http://keys.internal:80");

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.to_string(), "keys service must be reached over TLS");
    }

    #[test]
    fn invalid_admin_endpoint_fails_validation() {
        let config = parse(&["--admin-endpoint", "ftp://admin.internal"]).unwrap();
        assert_eq!(config.admin_endpoint, "ftp://admin.internal");
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.to_string(), "admin endpoint must be an http(s) URL");

        let config = parse(&["--admin-endpoint", "::nope::"]).unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().starts_with("invalid admin endpoint"));
    }

    #[test]
    fn empty_ssh_user_fails_validation() {
        let config = parse(&["--ssh-user", ""]).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn metrics_listen_is_parsed() {
        let config = parse(&["--metrics-listen", "127.0.0.1:9090"]).unwrap();
        assert_eq!(
            config.metrics_listen_addr().unwrap(),
            Some("127.0.0.1:9090".parse().unwrap())
        );

        let config = parse(&["--metrics-listen", "nine-oh-nine-oh"]).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn banner_substitutes_display_name() {
        let config = parse(&[]).unwrap();
        let banner = config.banner_for("test-user");
        assert!(banner.starts_with("Welcome test-user!\r\n"));
        assert!(!banner.contains("{name}"));
    }
}
