//! Best-effort git context for notifications. Every failure is silent.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub committer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_sha: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo_url: String,
}

impl GitMetadata {
    pub fn is_empty(&self) -> bool {
        self.committer.is_empty()
            && self.commit_sha.is_empty()
            && self.branch.is_empty()
            && self.repo_url.is_empty()
    }

    /// First 8 characters of the commit SHA.
    pub fn short_sha(&self) -> &str {
        match self.commit_sha.char_indices().nth(8) {
            Some((idx, _)) => &self.commit_sha[..idx],
            None => &self.commit_sha,
        }
    }
}

/// Extract git metadata for the repository containing `dir`.
///
/// Returns `None` when git is not installed or `dir` is not inside a
/// repository.
pub fn extract(dir: &Path) -> Option<GitMetadata> {
    let git = which::which("git").ok()?;

    let run = |args: &[&str]| -> String {
        Command::new(&git)
            .args(args)
            .current_dir(dir)
            .output()
            .ok()
            .filter(|output| output.status.success())
            .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
            .unwrap_or_default()
    };

    let commit_sha = run(&["rev-parse", "HEAD"]);
    if commit_sha.is_empty() {
        return None;
    }

    let metadata = GitMetadata {
        committer: run(&["config", "user.name"]),
        commit_sha,
        branch: run(&["rev-parse", "--abbrev-ref", "HEAD"]),
        repo_url: run(&["config", "--get", "remote.origin.url"]),
    };

    (!metadata.is_empty()).then_some(metadata)
}
