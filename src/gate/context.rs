use crate::identity::Identity;

/// Per-connection state shared between the gates.
///
/// The transport owns one of these for each SSH connection and records the
/// login name.  Only the identity gate writes `identity`; the authorisation
/// gate reads it.
#[derive(Debug, Default)]
pub struct ConnectionContext {
    ssh_login_name: String,
    identity: Option<Identity>,
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ssh_login_name(&self) -> &str {
        &self.ssh_login_name
    }

    pub fn set_ssh_login_name(&mut self, name: &str) {
        self.ssh_login_name = name.to_string();
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub(super) fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub(super) fn clear_identity(&mut self) {
        self.identity = None;
    }
}
