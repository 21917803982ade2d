use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::Instrument;

use super::ProjectOrchestrator;
use crate::compose::{self, normalize_path, DEFAULT_COMPOSE_FILE, ENV_FILE};
use crate::db::project_repo;
use crate::error::ProjectError;
use crate::events::{self, ProjectEvent};
use crate::files::write_file;
use crate::model::{Actor, Project, ProjectStatus};
use crate::runtime::{LoadedComposeProject, UpOptions};
use crate::sanitize::project_slug;
use crate::status::StatusOp;

const MAX_DIRECTORY_ATTEMPTS: u32 = 1000;

/// Optional changes applied by [`ProjectOrchestrator::update_project`].
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub compose: Option<String>,
    pub env: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DestroyOptions {
    pub remove_files: bool,
    pub remove_volumes: bool,
}

/// Adds a hint to compose errors caused by services that never became healthy.
pub fn enrich_deploy_error(message: &str) -> String {
    let lower = message.to_lowercase();
    let readiness = lower.contains("unhealthy")
        || lower.contains("health check")
        || lower.contains("healthcheck")
        || lower.contains("dependency failed to start")
        || (lower.contains("timeout") && lower.contains("waiting"))
        || (lower.contains("timed out") && lower.contains("health"));

    if readiness {
        format!(
            "{} (a service did not become healthy in time; check its healthcheck and container logs)",
            message.trim()
        )
    } else {
        message.trim().to_string()
    }
}

impl ProjectOrchestrator {
    /// Creates a new project directory with its compose (and optional env) file.
    pub async fn create_project(
        &self,
        name: &str,
        compose_content: &str,
        env: Option<&str>,
        actor: &Actor,
    ) -> Result<Project, ProjectError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProjectError::InvalidName(
                "project name must not be empty".to_string(),
            ));
        }

        let root = self.projects_root();
        std::fs::create_dir_all(&root).map_err(|e| ProjectError::CreateDirectory {
            path: root.clone(),
            source: e,
        })?;

        let (dir_name, path) = self.allocate_directory(&root, &project_slug(name))?;
        let project = Project::new(name, dir_name, path.clone());

        if let Err(e) = project_repo::insert(&self.db, &project) {
            remove_dir_best_effort(&path);
            return Err(e.into());
        }

        let written = write_file(&path.join(DEFAULT_COMPOSE_FILE), compose_content).and_then(|_| {
            match env {
                Some(env) => write_file(&path.join(ENV_FILE), env),
                None => Ok(()),
            }
        });
        if let Err(e) = written {
            if let Err(db_err) = project_repo::delete(&self.db, &project.id) {
                log::warn!(
                    "Failed to roll back project row {} after write error: {}",
                    project.id,
                    db_err
                );
            }
            remove_dir_best_effort(&path);
            return Err(e);
        }

        log::info!("Created project '{}' at {}", project.name, path.display());
        self.emit(ProjectEvent::new(
            events::PROJECT_CREATE,
            &project.id,
            &project.name,
            actor,
        ));
        Ok(project)
    }

    /// Creates `<root>/<slug>`, or `<slug>-1`, `<slug>-2`, ... on collision.
    fn allocate_directory(&self, root: &Path, slug: &str) -> Result<(String, PathBuf), ProjectError> {
        for attempt in 0..MAX_DIRECTORY_ATTEMPTS {
            let dir_name = if attempt == 0 {
                slug.to_string()
            } else {
                format!("{}-{}", slug, attempt)
            };
            let path = root.join(&dir_name);

            match std::fs::create_dir(&path) {
                Ok(()) => {
                    if project_repo::find_by_path(&self.db, &path)?.is_some() {
                        // A stale row still claims this directory.
                        remove_dir_best_effort(&path);
                        continue;
                    }
                    return Ok((dir_name, path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(ProjectError::CreateDirectory { path, source: e }),
            }
        }
        Err(ProjectError::DirectoryExhausted(slug.to_string()))
    }

    /// Pulls images that are not present locally. Failures are only logged.
    async fn ensure_images(&self, loaded: &LoadedComposeProject) {
        for image in loaded.images() {
            match self.containers.image_exists(&image).await {
                Ok(true) => {}
                Ok(false) => {
                    log::info!("Pulling missing image {}", image);
                    if let Err(e) = self.containers.pull_image(&image).await {
                        log::warn!("Failed to pull {}: {}", image, e);
                    }
                }
                Err(e) => log::warn!("Could not check image {}: {}", image, e),
            }
        }
    }

    /// Brings the project up. Returns the settled live status.
    pub async fn deploy_project(&self, id: &str, actor: &Actor) -> Result<ProjectStatus, ProjectError> {
        let span = tracing::info_span!("project.deploy", project_id = %id);
        async {
            let mut project = self.get_project(id)?;
            self.files.ensure_project_path(&mut project)?;
            self.persist_transitional(&project, StatusOp::Deploy)?;

            let loaded = match self.load_compose(&project).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    self.settle_failure(&project, StatusOp::Deploy);
                    return Err(e);
                }
            };

            self.ensure_images(&loaded).await;

            let options = UpOptions {
                remove_orphans: project.is_gitops_managed(),
            };
            if let Err(e) = self.compose.up(&loaded, &options).await {
                self.settle_failure(&project, StatusOp::Deploy);
                let message = enrich_deploy_error(&e.to_string());
                log::error!("Deploy of '{}' failed: {}", project.name, message);
                self.emit(
                    ProjectEvent::new(events::PROJECT_DEPLOY_FAILED, &project.id, &project.name, actor)
                        .with("error", message.clone()),
                );
                return Err(ProjectError::DeployFailed(message));
            }

            let status = self.settle_success(&project, StatusOp::Deploy).await?;
            log::info!("Deployed '{}' ({})", project.name, status);
            self.emit(
                ProjectEvent::new(events::PROJECT_DEPLOY, &project.id, &project.name, actor)
                    .with("status", status.as_str()),
            );
            Ok::<_, ProjectError>(status)
        }
        .instrument(span)
        .await
    }

    /// Stops and removes the project's containers.
    pub async fn down_project(&self, id: &str, actor: &Actor) -> Result<ProjectStatus, ProjectError> {
        let project = self.get_project(id)?;
        self.persist_transitional(&project, StatusOp::Down)?;

        let result = match self.load_compose(&project).await {
            Ok(loaded) => self.compose.down(&loaded, false).await.map_err(ProjectError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.settle_failure(&project, StatusOp::Down);
            return Err(e);
        }

        let status = self.settle_success(&project, StatusOp::Down).await?;
        self.emit(ProjectEvent::new(
            events::PROJECT_STOP,
            &project.id,
            &project.name,
            actor,
        ));
        Ok(status)
    }

    pub async fn restart_project(
        &self,
        id: &str,
        actor: &Actor,
    ) -> Result<ProjectStatus, ProjectError> {
        let project = self.get_project(id)?;
        self.persist_transitional(&project, StatusOp::Restart)?;

        let result = match self.load_compose(&project).await {
            Ok(loaded) => self.compose.restart(&loaded).await.map_err(ProjectError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.settle_failure(&project, StatusOp::Restart);
            return Err(e);
        }

        let status = self.settle_success(&project, StatusOp::Restart).await?;
        self.emit(ProjectEvent::new(
            events::PROJECT_RESTART,
            &project.id,
            &project.name,
            actor,
        ));
        Ok(status)
    }

    /// Pulls every image of the project, then deploys as the system actor.
    pub async fn redeploy_project(
        &self,
        id: &str,
        actor: &Actor,
    ) -> Result<ProjectStatus, ProjectError> {
        let project = self.get_project(id)?;
        log::info!("Redeploying '{}' for {}", project.name, actor.username);

        match self.load_compose(&project).await {
            Ok(loaded) => {
                for image in loaded.images() {
                    if let Err(e) = self.containers.pull_image(&image).await {
                        log::debug!("Ignoring pull failure for {}: {}", image, e);
                    }
                }
            }
            Err(e) => log::debug!("Skipping image refresh for '{}': {}", project.name, e),
        }

        self.deploy_project(id, &Actor::system()).await
    }

    /// Tears a project down and deletes it.
    ///
    /// Stopping and volume removal are best effort. Removing the directory is
    /// not: it only happens inside the projects root and a failure aborts
    /// before the row is deleted.
    pub async fn destroy_project(
        &self,
        id: &str,
        options: DestroyOptions,
        actor: &Actor,
    ) -> Result<(), ProjectError> {
        let project = self.get_project(id)?;

        if let Err(e) = self.down_project(id, actor).await {
            log::warn!("Could not stop '{}' before destroy: {}", project.name, e);
        }

        if options.remove_volumes {
            match self.load_compose(&project).await {
                Ok(loaded) => {
                    if let Err(e) = self.compose.down(&loaded, true).await {
                        log::warn!("Could not remove volumes of '{}': {}", project.name, e);
                    }
                }
                Err(e) => log::warn!("Could not load '{}' to remove volumes: {}", project.name, e),
            }
        }

        if options.remove_files {
            let root = normalize_path(&self.projects_root());
            let dir = normalize_path(&project.path);
            if !dir.starts_with(&root) || dir == root {
                return Err(ProjectError::OutsideProjectsRoot { path: dir, root });
            }
            if dir.exists() {
                std::fs::remove_dir_all(&dir)
                    .map_err(|e| ProjectError::RemoveFiles { path: dir.clone(), source: e })?;
            }
        }

        project_repo::delete(&self.db, &project.id)?;
        log::info!("Destroyed project '{}'", project.name);
        self.emit(
            ProjectEvent::new(events::PROJECT_DESTROY, &project.id, &project.name, actor)
                .with("removeFiles", options.remove_files.to_string())
                .with("removeVolumes", options.remove_volumes.to_string()),
        );
        Ok(())
    }

    /// Renames a project and/or replaces its compose and env content.
    pub async fn update_project(
        &self,
        id: &str,
        update: ProjectUpdate,
        actor: &Actor,
    ) -> Result<Project, ProjectError> {
        let mut project = self.get_project(id)?;
        self.files.ensure_project_path(&mut project)?;

        if let Some(name) = update.name.as_deref().map(str::trim) {
            if name.is_empty() {
                return Err(ProjectError::InvalidName(
                    "project name must not be empty".to_string(),
                ));
            }
            project.name = name.to_string();
        }

        if let Some(content) = &update.compose {
            let path = compose::find_compose_file(&project.path)
                .unwrap_or_else(|| project.path.join(DEFAULT_COMPOSE_FILE));
            write_file(&path, content)?;
            match compose::count_services(content, &path) {
                Ok(count) => project.service_count = count,
                Err(e) => log::warn!("Updated compose file of '{}' does not parse: {}", project.name, e),
            }
        }

        if let Some(env) = &update.env {
            write_file(&project.path.join(ENV_FILE), env)?;
        }

        project.updated_at = Utc::now();
        project_repo::update(&self.db, &project)?;
        self.emit(ProjectEvent::new(
            events::PROJECT_UPDATE,
            &project.id,
            &project.name,
            actor,
        ));
        Ok(project)
    }
}

fn remove_dir_best_effort(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        log::warn!("Failed to remove {}: {}", path.display(), e);
    }
}
