//! GitOps: compose files pulled from git and reconciled into projects.

pub mod error;
pub mod git;
pub mod scheduler;
pub mod sync;

pub use error::{classify_git_error, GitOpsError};
pub use git::{BranchInfo, CliGitClient, GitAuthConfig, GitClient, TreeEntry, TreeEntryKind};
pub use scheduler::SyncScheduler;
pub use sync::{
    is_sync_due, GitOpsSyncEngine, NewSync, SyncAllReport, SyncOutcome, SyncResult, SyncUpdate,
    SYNC_TIMEOUT,
};
