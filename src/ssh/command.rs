//! Parsing of the `exec` payloads git sends over SSH.

use std::path::{Path, PathBuf};

use crate::gate::normalize_repo_path;

/// The git transport services a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    /// clone / fetch
    UploadPack,
    /// push
    ReceivePack,
}

impl GitService {
    /// Subcommand passed to the `git` binary.
    pub fn subcommand(self) -> &'static str {
        match self {
            Self::UploadPack => "upload-pack",
            Self::ReceivePack => "receive-pack",
        }
    }
}

/// A parsed exec request.  `repo` is the path exactly as the client named
/// it, minus quoting and a leading `/`; any `.git` suffix is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommand {
    pub service: GitService,
    pub repo: String,
}

impl GitCommand {
    /// On-disk location of the bare repository under `root`.
    ///
    /// `ns/repo` and `ns/repo.git` both map to `<root>/ns/repo.git`.
    pub fn repo_dir(&self, root: &Path) -> PathBuf {
        root.join(format!("{}.git", normalize_repo_path(&self.repo)))
    }
}

/// Parse an exec request such as:
///
/// ```text
/// git-upload-pack 'ns/repo.git'
/// git-receive-pack '/ns/repo'
/// ```
///
/// Returns `None` for anything that is not a git service request, and for
/// paths that are empty or try to leave the repository root.
pub fn parse_git_command(cmd: &str) -> Option<GitCommand> {
    let cmd = cmd.trim();
    let (service, rest) = if let Some(rest) = cmd.strip_prefix("git-upload-pack") {
        (GitService::UploadPack, rest)
    } else if let Some(rest) = cmd.strip_prefix("git-receive-pack") {
        (GitService::ReceivePack, rest)
    } else {
        return None;
    };

    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let rest = rest.trim();
    let rest = strip_quotes(rest)?;
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    let repo = rest.trim_end_matches('/');

    if !is_safe_repo_path(repo) {
        return None;
    }

    Some(GitCommand {
        service,
        repo: repo.to_string(),
    })
}

/// Strip one pair of matching quotes.  An unbalanced quote is rejected.
fn strip_quotes(s: &str) -> Option<&str> {
    for quote in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(quote) {
            return inner.strip_suffix(quote);
        }
    }
    if s.ends_with(['\'', '"']) {
        return None;
    }
    Some(s)
}

fn is_safe_repo_path(repo: &str) -> bool {
    if normalize_repo_path(repo).is_empty() || repo.contains('\0') {
        return false;
    }
    repo.split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_upload_pack_keeps_git_suffix() {
        let cmd = parse_git_command("git-upload-pack 'acme/widgets.git'").unwrap();
        assert_eq!(cmd.service, GitService::UploadPack);
        assert_eq!(cmd.repo, "acme/widgets.git");
    }

    #[test]
    fn parse_upload_pack_strips_leading_slash() {
        let cmd = parse_git_command("git-upload-pack '/acme/widgets'").unwrap();
        assert_eq!(cmd.repo, "acme/widgets");
    }

    #[test]
    fn parse_receive_pack() {
        let cmd = parse_git_command("git-receive-pack 'org/repo.git'").unwrap();
        assert_eq!(cmd.service, GitService::ReceivePack);
        assert_eq!(cmd.repo, "org/repo.git");
    }

    #[test]
    fn parse_double_quoted_and_unquoted() {
        let cmd = parse_git_command("git-upload-pack \"/my-org/my-repo.git\"").unwrap();
        assert_eq!(cmd.repo, "my-org/my-repo.git");

        let cmd = parse_git_command("git-upload-pack my-org/my-repo").unwrap();
        assert_eq!(cmd.repo, "my-org/my-repo");
    }

    #[test]
    fn parse_accepts_single_segment_paths() {
        let cmd = parse_git_command("git-upload-pack 'solo.git'").unwrap();
        assert_eq!(cmd.repo, "solo.git");
    }

    #[test]
    fn parse_rejects_non_git_commands() {
        assert!(parse_git_command("ls -la").is_none());
        assert!(parse_git_command("git-upload-packx 'a/b'").is_none());
        assert!(parse_git_command("git-upload-archive 'a/b'").is_none());
    }

    #[test]
    fn parse_rejects_empty_and_escaping_paths() {
        assert!(parse_git_command("git-upload-pack ''").is_none());
        assert!(parse_git_command("git-upload-pack '.git'").is_none());
        assert!(parse_git_command("git-upload-pack '../etc/passwd'").is_none());
        assert!(parse_git_command("git-upload-pack 'ns/../../x'").is_none());
        assert!(parse_git_command("git-upload-pack 'ns//repo'").is_none());
        assert!(parse_git_command("git-upload-pack 'ns/repo").is_none());
    }

    #[test]
    fn repo_dir_is_shared_by_both_spellings() {
        let root = Path::new("/srv/repos");
        let with = parse_git_command("git-upload-pack 'ns/repo.git'").unwrap();
        let without = parse_git_command("git-upload-pack 'ns/repo'").unwrap();
        assert_eq!(with.repo_dir(root), PathBuf::from("/srv/repos/ns/repo.git"));
        assert_eq!(with.repo_dir(root), without.repo_dir(root));
    }
}
