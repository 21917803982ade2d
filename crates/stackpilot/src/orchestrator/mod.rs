//! Project lifecycle orchestration.
//!
//! The orchestrator owns every state-changing project operation. Each one
//! persists a transitional status, performs the external call, then settles
//! the status through [`next_status`] using a fresh reconciliation.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::OnceCell;

use crate::compose;
use crate::db::{project_repo, Database};
use crate::error::ProjectError;
use crate::events::{self, EventSink, ProjectEvent};
use crate::files::FileManager;
use crate::model::{Project, ProjectStatus};
use crate::pathmap::{container_projects_root, resolve_path_mapper, PathMapper};
use crate::reconciler::ProjectReconciler;
use crate::runtime::{ComposeRuntime, ContainerRuntime, LoadedComposeProject};
use crate::settings::{self, SettingsProvider};
use crate::status::{next_status, OpOutcome, StatusOp};

mod batch;
mod discovery;
mod lifecycle;
mod logs;

pub use batch::{BatchFailure, BatchReport, ContainerAction, BULK_CONCURRENCY};
pub use discovery::FilesystemSyncReport;
pub use lifecycle::{enrich_deploy_error, DestroyOptions, ProjectUpdate};
pub use logs::LOG_CHANNEL_CAPACITY;

/// Collaborators the orchestrator is built from.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub db: Database,
    pub compose: Arc<dyn ComposeRuntime>,
    pub containers: Arc<dyn ContainerRuntime>,
    pub settings: Arc<dyn SettingsProvider>,
    pub events: Arc<dyn EventSink>,
}

pub struct ProjectOrchestrator {
    db: Database,
    compose: Arc<dyn ComposeRuntime>,
    containers: Arc<dyn ContainerRuntime>,
    settings: Arc<dyn SettingsProvider>,
    events: Arc<dyn EventSink>,
    reconciler: Arc<ProjectReconciler>,
    files: FileManager,
    path_mapper: OnceCell<Option<PathMapper>>,
}

impl ProjectOrchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        let reconciler = Arc::new(ProjectReconciler::new(
            deps.db.clone(),
            Arc::clone(&deps.compose),
            Arc::clone(&deps.settings),
        ));
        let files = FileManager::new(deps.db.clone(), Arc::clone(&deps.settings));
        Self {
            db: deps.db,
            compose: deps.compose,
            containers: deps.containers,
            settings: deps.settings,
            events: deps.events,
            reconciler,
            files,
            path_mapper: OnceCell::new(),
        }
    }

    pub fn reconciler(&self) -> &Arc<ProjectReconciler> {
        &self.reconciler
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn projects_root(&self) -> PathBuf {
        container_projects_root(&settings::projects_directory(self.settings.as_ref()))
    }

    /// Resolved once per orchestrator; `None` means no translation.
    async fn path_mapper(&self) -> Option<&PathMapper> {
        self.path_mapper
            .get_or_init(|| async {
                let configured = settings::projects_directory(self.settings.as_ref());
                resolve_path_mapper(&configured, self.containers.as_ref()).await
            })
            .await
            .as_ref()
    }

    pub fn get_project(&self, id: &str) -> Result<Project, ProjectError> {
        project_repo::find_by_id(&self.db, id)?.ok_or_else(|| ProjectError::NotFound(id.to_string()))
    }

    async fn load_compose(&self, project: &Project) -> Result<LoadedComposeProject, ProjectError> {
        let root = self.projects_root();
        let mapper = self.path_mapper().await;
        let loaded = self
            .compose
            .load_project(
                &project.path,
                &project.compose_project_name(),
                &root,
                settings::auto_inject_env(self.settings.as_ref()),
                mapper,
            )
            .await?;
        Ok(loaded)
    }

    /// Current compose file content, if the project has one.
    pub fn read_compose_content(&self, project: &Project) -> Result<Option<String>, ProjectError> {
        let Some(path) = compose::find_compose_file(&project.path) else {
            return Ok(None);
        };
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| ProjectError::ReadFile { path, source: e })
    }

    /// Marks a project as owned by a GitOps sync, or releases it.
    pub fn set_gitops_managed(
        &self,
        id: &str,
        sync_id: Option<&str>,
    ) -> Result<Project, ProjectError> {
        let mut project = self.get_project(id)?;
        project.gitops_managed_by = sync_id.map(str::to_string);
        project.updated_at = Utc::now();
        project_repo::update(&self.db, &project)?;
        Ok(project)
    }

    fn persist_transitional(&self, project: &Project, op: StatusOp) -> Result<(), ProjectError> {
        project_repo::update_status(&self.db, &project.id, op.transitional(), &Utc::now())?;
        Ok(())
    }

    /// Reverts a failed operation's status. Persistence failures are logged
    /// so the original error reaches the caller.
    fn settle_failure(&self, project: &Project, op: StatusOp) -> ProjectStatus {
        let status = next_status(op, OpOutcome::Failed);
        if let Err(e) = project_repo::update_status(&self.db, &project.id, status, &Utc::now()) {
            log::error!(
                "Failed to revert status of '{}' to {}: {}",
                project.name,
                status,
                e
            );
        }
        status
    }

    /// Settles a successful operation from a fresh reconciliation.
    async fn settle_success(
        &self,
        project: &Project,
        op: StatusOp,
    ) -> Result<ProjectStatus, ProjectError> {
        let now = Utc::now();
        match self.reconciler.refresh(project).await {
            Ok(live) => {
                let status = next_status(op, OpOutcome::Succeeded(live.status));
                project_repo::update_runtime_state(
                    &self.db,
                    &project.id,
                    status,
                    live.service_count,
                    live.running_count,
                    &now,
                )?;
                Ok(status)
            }
            Err(e) => {
                log::warn!(
                    "Could not reconcile '{}' after {:?}: {}",
                    project.name,
                    op,
                    e
                );
                let status = next_status(op, OpOutcome::Succeeded(ProjectStatus::Unknown));
                project_repo::update_status(&self.db, &project.id, status, &now)?;
                Ok(status)
            }
        }
    }

    fn emit(&self, event: ProjectEvent) {
        events::emit(&self.events, event);
    }
}
