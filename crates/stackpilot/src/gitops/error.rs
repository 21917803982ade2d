//! GitOps-specific error types.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::ProjectError;

/// Errors that can occur during GitOps operations.
#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error("GitOps sync not found: {0}")]
    SyncNotFound(String),

    #[error("Git repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Compose file '{0}' not found in repository")]
    ComposeFileNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git operation timed out after {0}s")]
    GitTimeout(u64),

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),

    #[error("Sync did not finish within {0}s")]
    SyncTimeout(u64),

    #[error("Sync {0} is already running")]
    SyncInProgress(String),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<std::io::Error> for GitOpsError {
    fn from(err: std::io::Error) -> Self {
        GitOpsError::FileOperation(err.to_string())
    }
}

impl GitOpsError {
    /// Returns true if the error is likely transient and the next scheduled
    /// sync may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GitOpsError::GitNetworkError(_)
                | GitOpsError::GitTimeout(_)
                | GitOpsError::SyncTimeout(_)
                | GitOpsError::SyncInProgress(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GitOpsError::SyncNotFound(_) | GitOpsError::RepositoryNotFound(_)
        )
    }
}

/// Classifies git stderr into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitOpsError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitOpsError::GitNetworkError(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("could not read username")
    {
        return GitOpsError::GitAuthFailed(stderr.trim().to_string());
    }

    GitOpsError::GitOperation(stderr.trim().to_string())
}

/// Result type for GitOps operations.
pub type Result<T> = std::result::Result<T, GitOpsError>;
