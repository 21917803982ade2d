//! GitOps sync bindings and the repositories they pull from.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(SyncStatus::Success),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}

/// Binding between a path in a git repository and a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsSync {
    pub id: String,
    pub name: String,
    pub environment_id: String,
    pub repository_id: String,
    pub branch: String,
    /// Path of the compose file relative to the repository root.
    pub compose_path: String,
    pub project_name: String,
    /// Bound project. Set once on first successful sync and never reassigned.
    pub project_id: Option<String>,
    pub auto_sync: bool,
    /// Minutes between automatic syncs.
    pub sync_interval: u32,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncStatus>,
    pub last_sync_error: Option<String>,
    pub last_sync_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GitOpsSync {
    pub fn new(
        name: impl Into<String>,
        repository_id: impl Into<String>,
        branch: impl Into<String>,
        compose_path: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            environment_id: "0".to_string(),
            repository_id: repository_id.into(),
            branch: branch.into(),
            compose_path: compose_path.into(),
            project_name: project_name.into(),
            project_id: None,
            auto_sync: true,
            sync_interval: default_sync_interval(),
            last_sync_at: None,
            last_sync_status: None,
            last_sync_error: None,
            last_sync_commit: None,
            created_at: now,
            updated_at: now,
        }
    }
}

fn default_sync_interval() -> u32 {
    5
}

/// Git authentication type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitAuthType {
    #[default]
    None,
    Token,
    SshKey,
}

impl GitAuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitAuthType::None => "none",
            GitAuthType::Token => "token",
            GitAuthType::SshKey => "ssh-key",
        }
    }
}

impl FromStr for GitAuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(GitAuthType::None),
            "token" | "http" => Ok(GitAuthType::Token),
            "ssh-key" | "ssh" => Ok(GitAuthType::SshKey),
            other => Err(format!("unknown git auth type '{}'", other)),
        }
    }
}

/// A remote git repository that syncs pull from.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepository {
    pub id: String,
    pub name: String,
    pub url: String,
    pub auth_type: GitAuthType,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub ssh_key_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitRepository")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &crate::sanitize::redact_repo_url(&self.url))
            .field("auth_type", &self.auth_type)
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "****"))
            .field("ssh_key_path", &self.ssh_key_path)
            .finish()
    }
}

impl GitRepository {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            url: url.into(),
            auth_type: GitAuthType::None,
            username: None,
            token: None,
            ssh_key_path: None,
            created_at: now,
            updated_at: now,
        }
    }
}
