//! SSH transport.
//!
//! Accepts SSH connections from git clients, authenticates them through the
//! [`Gates`](crate::gate::Gates) callbacks, and hands authorised
//! `git-upload-pack` / `git-receive-pack` requests to the local `git` binary.

pub mod command;
pub mod server;
pub mod session;

pub use server::start_ssh_server;
