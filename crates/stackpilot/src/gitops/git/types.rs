//! Pure data types for git operations.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::model::{GitAuthType, GitRepository};

/// A branch head advertised by a remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub name: String,
    /// Commit the branch points at.
    pub commit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeEntryKind {
    File,
    Directory,
}

/// One entry of a directory listing inside a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEntry {
    pub name: String,
    /// Path relative to the repository root, `/` separated.
    pub path: String,
    pub kind: TreeEntryKind,
    pub size: Option<u64>,
}

/// Credentials handed to git for one operation.
#[derive(Debug, Clone, Default)]
pub struct GitAuthConfig {
    pub auth_type: GitAuthType,
    pub username: Option<String>,
    pub token: Option<SecretString>,
    pub ssh_key_path: Option<String>,
}

impl GitAuthConfig {
    pub fn from_repository(repo: &GitRepository) -> Self {
        Self {
            auth_type: repo.auth_type,
            username: repo.username.clone().filter(|u| !u.is_empty()),
            token: repo
                .token
                .clone()
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            ssh_key_path: repo.ssh_key_path.clone().filter(|p| !p.is_empty()),
        }
    }
}
