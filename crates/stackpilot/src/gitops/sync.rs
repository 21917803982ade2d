//! Reconciles compose files from git into bound projects.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::Instrument;

use super::error::{GitOpsError, Result};
use super::git::{resolve_in_checkout, BranchInfo, GitAuthConfig, GitClient, TreeEntry};
use crate::db::gitops_repo::{self, SyncRecord};
use crate::db::{project_repo, repository_repo, Database};
use crate::events::{self, EventSink, ProjectEvent};
use crate::model::{Actor, GitOpsSync, GitRepository, Project, ProjectStatus, SyncStatus};
use crate::orchestrator::{BatchFailure, ProjectOrchestrator, ProjectUpdate};
use crate::sanitize::redact_repo_url;
use crate::tasks::{spawn_detached, DEFAULT_DETACHED_TIMEOUT};

/// Ceiling for one sync, clone included.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(300);

/// A sync counts as due this many seconds before its interval elapses, so
/// scheduler jitter does not push it to the next tick.
const DUE_GRACE_SECS: i64 = 30;

/// What a sync did to its project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SyncOutcome {
    /// A project was created from the repository and bound to the sync.
    Created,
    /// The compose file changed and was written to the project.
    Updated { redeployed: bool },
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub sync_id: String,
    pub project_id: Option<String>,
    pub commit: Option<String>,
    pub outcome: SyncOutcome,
}

/// Summary of one scheduler pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAllReport {
    pub attempted: Vec<String>,
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
    /// Due syncs left alone because a run was already in flight.
    pub skipped: Vec<String>,
}

/// Fields for a new sync binding.
#[derive(Debug, Clone)]
pub struct NewSync {
    pub name: String,
    pub repository_id: String,
    pub branch: String,
    pub compose_path: String,
    pub project_name: String,
    pub auto_sync: bool,
    pub sync_interval: u32,
}

/// Editable fields of a sync. The bound project cannot be changed.
#[derive(Debug, Clone, Default)]
pub struct SyncUpdate {
    pub name: Option<String>,
    pub repository_id: Option<String>,
    pub branch: Option<String>,
    pub compose_path: Option<String>,
    pub project_name: Option<String>,
    pub auto_sync: Option<bool>,
    pub sync_interval: Option<u32>,
}

/// Whether `sync` should run at `now`. Never-synced bindings are always due.
pub fn is_sync_due(sync: &GitOpsSync, now: DateTime<Utc>) -> bool {
    match sync.last_sync_at {
        None => true,
        Some(last) => {
            let interval = chrono::Duration::minutes(i64::from(sync.sync_interval));
            now + chrono::Duration::seconds(DUE_GRACE_SECS) >= last + interval
        }
    }
}

#[derive(Default)]
struct SyncProgress {
    project_id: Option<String>,
    commit: Option<String>,
}

/// Removes a scratch checkout. Normally released explicitly; if the sync
/// future is dropped first (timeout), removal happens in the background.
struct CheckoutGuard {
    git: Arc<dyn GitClient>,
    path: Option<PathBuf>,
}

impl CheckoutGuard {
    fn new(git: Arc<dyn GitClient>, path: PathBuf) -> Self {
        Self {
            git,
            path: Some(path),
        }
    }

    async fn release(mut self) {
        if let Some(path) = self.path.take() {
            self.git.cleanup(&path).await;
        }
    }
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            log::warn!("No runtime to remove checkout {}", path.display());
            return;
        }
        let git = Arc::clone(&self.git);
        spawn_detached("gitops-checkout-cleanup", DEFAULT_DETACHED_TIMEOUT, async move {
            git.cleanup(&path).await;
        });
    }
}

/// One lock per sync id. Idle entries are dropped on the next acquisition.
#[derive(Default)]
struct SyncLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncLocks {
    fn try_acquire(&self, id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        lock.try_lock_owned().ok()
    }

    fn forget(&self, id: &str) {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

pub struct GitOpsSyncEngine {
    db: Database,
    orchestrator: Arc<ProjectOrchestrator>,
    git: Arc<dyn GitClient>,
    events: Arc<dyn EventSink>,
    locks: SyncLocks,
    timeout: Duration,
}

impl GitOpsSyncEngine {
    pub fn new(
        orchestrator: Arc<ProjectOrchestrator>,
        git: Arc<dyn GitClient>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            db: orchestrator.database().clone(),
            orchestrator,
            git,
            events,
            locks: SyncLocks::default(),
            timeout: SYNC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn orchestrator(&self) -> &Arc<ProjectOrchestrator> {
        &self.orchestrator
    }

    fn repository(&self, id: &str) -> Result<GitRepository> {
        repository_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| GitOpsError::RepositoryNotFound(id.to_string()))
    }

    /// Pulls the sync's compose file and reconciles it into its project.
    ///
    /// The outcome is recorded on the sync every time it runs, success or
    /// failure. An unknown sync id and a call that finds the same sync
    /// already running ([`GitOpsError::SyncInProgress`]) return without
    /// recording; the run in flight records its own result.
    pub async fn perform_sync(&self, sync_id: &str, actor: &Actor) -> Result<SyncResult> {
        let sync = self.get_sync(sync_id)?;

        let Some(_guard) = self.locks.try_acquire(&sync.id) else {
            log::info!("Sync '{}' is already running, not starting another", sync.name);
            return Err(GitOpsError::SyncInProgress(sync.id));
        };

        let span = tracing::info_span!("gitops.sync", sync = %sync.name, branch = %sync.branch);
        async {
            let mut progress = SyncProgress {
                project_id: sync.project_id.clone(),
                commit: None,
            };
            let run = tokio::time::timeout(self.timeout, self.run_sync(&sync, actor, &mut progress)).await;
            let result = run.unwrap_or_else(|_| Err(GitOpsError::SyncTimeout(self.timeout.as_secs())));

            let record = match &result {
                Ok(_) => SyncRecord {
                    at: Utc::now(),
                    status: SyncStatus::Success,
                    error: None,
                    commit: progress.commit.clone(),
                },
                Err(e) => SyncRecord {
                    at: Utc::now(),
                    status: SyncStatus::Failed,
                    error: Some(e.to_string()),
                    commit: progress.commit.clone(),
                },
            };
            if let Err(e) = gitops_repo::record_result(&self.db, &sync.id, &record) {
                log::error!("Failed to record result of sync '{}': {}", sync.name, e);
            }

            let mut event = ProjectEvent::new(
                if result.is_ok() {
                    events::GITOPS_SYNC
                } else {
                    events::GITOPS_SYNC_FAILED
                },
                &sync.id,
                &sync.name,
                actor,
            )
            .with("branch", sync.branch.clone())
            .with("composePath", sync.compose_path.clone());
            if let Some(commit) = &progress.commit {
                event = event.with("commit", commit.clone());
            }
            if let Some(project_id) = &progress.project_id {
                event = event.with("projectId", project_id.clone());
            }

            match result {
                Ok(outcome) => {
                    log::info!("Sync '{}' finished: {:?}", sync.name, outcome);
                    events::emit(&self.events, event.with("status", "success"));
                    Ok(SyncResult {
                        sync_id: sync.id.clone(),
                        project_id: progress.project_id,
                        commit: progress.commit,
                        outcome,
                    })
                }
                Err(e) => {
                    if e.is_retryable() {
                        log::warn!("Sync '{}' failed, will retry next interval: {}", sync.name, e);
                    } else {
                        log::error!("Sync '{}' failed: {}", sync.name, e);
                    }
                    events::emit(
                        &self.events,
                        event.with("status", "failed").with("error", e.to_string()),
                    );
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_sync(
        &self,
        sync: &GitOpsSync,
        actor: &Actor,
        progress: &mut SyncProgress,
    ) -> Result<SyncOutcome> {
        let repo = self.repository(&sync.repository_id)?;
        let auth = GitAuthConfig::from_repository(&repo);

        log::info!(
            "Syncing '{}' from {} ({})",
            sync.name,
            redact_repo_url(&repo.url),
            sync.branch
        );
        let checkout = self.git.clone_branch(&repo.url, &sync.branch, &auth).await?;
        let guard = CheckoutGuard::new(Arc::clone(&self.git), checkout.clone());
        let result = self.apply_checkout(sync, &checkout, actor, progress).await;
        guard.release().await;
        result
    }

    async fn apply_checkout(
        &self,
        sync: &GitOpsSync,
        checkout: &Path,
        actor: &Actor,
        progress: &mut SyncProgress,
    ) -> Result<SyncOutcome> {
        progress.commit = match self.git.current_commit(checkout).await {
            Ok(commit) if !commit.is_empty() => Some(commit),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Could not read commit for sync '{}': {}", sync.name, e);
                None
            }
        };

        if !self.git.file_exists(checkout, &sync.compose_path).await? {
            return Err(GitOpsError::ComposeFileNotFound(sync.compose_path.clone()));
        }
        let content = self.git.read_file(checkout, &sync.compose_path).await?;

        let bound = match &sync.project_id {
            Some(id) => project_repo::find_by_id(&self.db, id)?,
            None => None,
        };

        match bound {
            Some(project) => {
                progress.project_id = Some(project.id.clone());
                self.update_bound_project(sync, project, &content, actor).await
            }
            None => {
                let project_id = self.create_bound_project(sync, &content, actor).await?;
                progress.project_id = Some(project_id);
                Ok(SyncOutcome::Created)
            }
        }
    }

    async fn create_bound_project(
        &self,
        sync: &GitOpsSync,
        content: &str,
        actor: &Actor,
    ) -> Result<String> {
        let project = self
            .orchestrator
            .create_project(&sync.project_name, content, None, actor)
            .await?;

        let bound = match sync.project_id.as_deref() {
            None => gitops_repo::bind_project(&self.db, &sync.id, &project.id)?,
            Some(missing) => {
                log::warn!(
                    "Project {} of sync '{}' no longer exists, binding new project {}",
                    missing,
                    sync.name,
                    project.id
                );
                gitops_repo::rebind_missing_project(&self.db, &sync.id, missing, &project.id)?
            }
        };
        if !bound {
            log::warn!(
                "Sync '{}' was bound to another project meanwhile; {} stays unbound",
                sync.name,
                project.id
            );
        }

        self.orchestrator.set_gitops_managed(&project.id, Some(&sync.id))?;

        if let Err(e) = self.orchestrator.deploy_project(&project.id, actor).await {
            log::warn!("Initial deploy of '{}' failed: {}", project.name, e);
        }
        Ok(project.id)
    }

    async fn update_bound_project(
        &self,
        sync: &GitOpsSync,
        project: Project,
        content: &str,
        actor: &Actor,
    ) -> Result<SyncOutcome> {
        if project.gitops_managed_by.as_deref() != Some(sync.id.as_str()) {
            self.orchestrator.set_gitops_managed(&project.id, Some(&sync.id))?;
        }

        let current = self.orchestrator.read_compose_content(&project)?;
        if current.as_deref() == Some(content) {
            log::debug!("Compose file of '{}' is unchanged", project.name);
            return Ok(SyncOutcome::Unchanged);
        }

        let update = ProjectUpdate {
            compose: Some(content.to_string()),
            ..Default::default()
        };
        let updated = self.orchestrator.update_project(&project.id, update, actor).await?;

        let redeployed = matches!(
            updated.status,
            ProjectStatus::Running | ProjectStatus::PartiallyRunning
        );
        if redeployed {
            if let Err(e) = self.orchestrator.redeploy_project(&updated.id, actor).await {
                log::warn!("Redeploy of '{}' after sync failed: {}", updated.name, e);
            }
        } else {
            log::info!(
                "Updated '{}' from git; not redeploying while {}",
                updated.name,
                updated.status
            );
        }
        Ok(SyncOutcome::Updated { redeployed })
    }

    /// Runs every due auto-sync binding one after another. A failing sync
    /// does not stop the others.
    pub async fn sync_all_enabled(&self, now: DateTime<Utc>) -> Result<SyncAllReport> {
        let mut report = SyncAllReport::default();
        let actor = Actor::system();

        for sync in gitops_repo::list_auto_sync(&self.db)? {
            if !is_sync_due(&sync, now) {
                continue;
            }
            report.attempted.push(sync.id.clone());
            match self.perform_sync(&sync.id, &actor).await {
                Ok(_) => report.succeeded.push(sync.id),
                Err(GitOpsError::SyncInProgress(id)) => report.skipped.push(id),
                Err(e) => report.failed.push(BatchFailure {
                    id: sync.id,
                    error: e.to_string(),
                }),
            }
        }

        if !report.attempted.is_empty() {
            log::info!(
                "GitOps pass: {} attempted, {} failed",
                report.attempted.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    // ========================================================================
    // Sync bindings
    // ========================================================================

    pub fn get_sync(&self, id: &str) -> Result<GitOpsSync> {
        gitops_repo::find_by_id(&self.db, id)?.ok_or_else(|| GitOpsError::SyncNotFound(id.to_string()))
    }

    pub fn list_syncs(&self) -> Result<Vec<GitOpsSync>> {
        Ok(gitops_repo::list_all(&self.db)?)
    }

    pub fn create_sync(&self, new: NewSync) -> Result<GitOpsSync> {
        let mut sync = GitOpsSync::new(
            new.name.trim(),
            new.repository_id,
            new.branch.trim(),
            new.compose_path.trim(),
            new.project_name.trim(),
        );
        sync.auto_sync = new.auto_sync;
        sync.sync_interval = new.sync_interval;

        self.validate(&sync)?;
        gitops_repo::insert(&self.db, &sync)?;
        log::info!("Created sync '{}'", sync.name);
        Ok(sync)
    }

    pub fn update_sync(&self, id: &str, update: SyncUpdate) -> Result<GitOpsSync> {
        let mut sync = self.get_sync(id)?;

        if let Some(name) = update.name {
            sync.name = name.trim().to_string();
        }
        if let Some(repository_id) = update.repository_id {
            sync.repository_id = repository_id;
        }
        if let Some(branch) = update.branch {
            sync.branch = branch.trim().to_string();
        }
        if let Some(compose_path) = update.compose_path {
            sync.compose_path = compose_path.trim().to_string();
        }
        if let Some(project_name) = update.project_name {
            sync.project_name = project_name.trim().to_string();
        }
        if let Some(auto_sync) = update.auto_sync {
            sync.auto_sync = auto_sync;
        }
        if let Some(interval) = update.sync_interval {
            sync.sync_interval = interval;
        }
        sync.updated_at = Utc::now();

        self.validate(&sync)?;
        gitops_repo::update_definition(&self.db, &sync)?;
        Ok(sync)
    }

    /// Deletes a binding. Its project stays and is released from GitOps.
    pub fn delete_sync(&self, id: &str) -> Result<()> {
        if !gitops_repo::delete(&self.db, id)? {
            return Err(GitOpsError::SyncNotFound(id.to_string()));
        }
        self.locks.forget(id);
        log::info!("Deleted sync {}", id);
        Ok(())
    }

    fn validate(&self, sync: &GitOpsSync) -> Result<()> {
        if sync.sync_interval == 0 {
            return Err(GitOpsError::Validation(
                "sync interval must be greater than 0".to_string(),
            ));
        }
        for (field, value) in [
            ("name", &sync.name),
            ("branch", &sync.branch),
            ("compose path", &sync.compose_path),
            ("project name", &sync.project_name),
        ] {
            if value.is_empty() {
                return Err(GitOpsError::Validation(format!("{} must not be empty", field)));
            }
        }
        resolve_in_checkout(Path::new(""), &sync.compose_path)?;
        self.repository(&sync.repository_id)?;
        Ok(())
    }

    // ========================================================================
    // Repository helpers
    // ========================================================================

    pub async fn list_branches(&self, repository_id: &str) -> Result<Vec<BranchInfo>> {
        let repo = self.repository(repository_id)?;
        self.git
            .list_branches(&repo.url, &GitAuthConfig::from_repository(&repo))
            .await
    }

    pub async fn test_connection(&self, repository_id: &str, branch: &str) -> Result<()> {
        let repo = self.repository(repository_id)?;
        self.git
            .test_connection(&repo.url, branch, &GitAuthConfig::from_repository(&repo))
            .await
    }

    /// Lists one directory of `branch`, e.g. to pick a compose path.
    pub async fn browse_repository(
        &self,
        repository_id: &str,
        branch: &str,
        sub_path: &str,
    ) -> Result<Vec<TreeEntry>> {
        let repo = self.repository(repository_id)?;
        let checkout = self
            .git
            .clone_branch(&repo.url, branch, &GitAuthConfig::from_repository(&repo))
            .await?;
        let guard = CheckoutGuard::new(Arc::clone(&self.git), checkout.clone());
        let entries = self.git.browse_tree(&checkout, sub_path).await;
        guard.release().await;
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_with_last(interval: u32, last: Option<DateTime<Utc>>) -> GitOpsSync {
        let mut sync = GitOpsSync::new("s", "r", "main", "compose.yaml", "app");
        sync.sync_interval = interval;
        sync.last_sync_at = last;
        sync
    }

    #[test]
    fn test_sync_lock_is_exclusive_per_id() {
        let locks = SyncLocks::default();
        let held = locks.try_acquire("a").unwrap();
        assert!(locks.try_acquire("a").is_none());
        assert!(locks.try_acquire("b").is_some());
        drop(held);
        assert!(locks.try_acquire("a").is_some());
    }

    #[test]
    fn test_idle_sync_locks_are_pruned() {
        let locks = SyncLocks::default();
        for id in ["a", "b", "c"] {
            drop(locks.try_acquire(id).unwrap());
        }
        let _held = locks.try_acquire("d").unwrap();
        assert_eq!(locks.len(), 1);

        locks.forget("d");
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn test_never_synced_is_due() {
        assert!(is_sync_due(&sync_with_last(60, None), Utc::now()));
    }

    #[test]
    fn test_due_after_interval() {
        let now = Utc::now();
        let overdue = sync_with_last(60, Some(now - chrono::Duration::minutes(61)));
        let recent = sync_with_last(60, Some(now - chrono::Duration::minutes(30)));
        assert!(is_sync_due(&overdue, now));
        assert!(!is_sync_due(&recent, now));
    }

    #[test]
    fn test_due_within_grace() {
        let now = Utc::now();
        let almost = sync_with_last(5, Some(now - chrono::Duration::seconds(4 * 60 + 40)));
        let early = sync_with_last(5, Some(now - chrono::Duration::seconds(4 * 60)));
        assert!(is_sync_due(&almost, now));
        assert!(!is_sync_due(&early, now));
    }
}
