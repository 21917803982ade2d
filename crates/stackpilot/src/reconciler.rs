//! Live status reconciliation.
//!
//! A single global container query is fanned out in memory to every project
//! being listed. Nothing is cached between calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::compose::{self, DeclaredService};
use crate::db::project_repo::{self, ProjectFilter, ProjectOrder};
use crate::db::Database;
use crate::error::{ProjectError, RuntimeError};
use crate::model::{ComposeContainer, Project, ProjectStatus, ProjectSummary, RuntimeService};
use crate::pathmap::container_projects_root;
use crate::settings::{self, SettingsProvider};
use crate::status::{normalize_compose_project_name, status_from_counts};
use crate::tasks::{spawn_detached, DEFAULT_DETACHED_TIMEOUT};

/// Status shown for declared services that have no container.
pub const NOT_CREATED: &str = "not created";

const DEFAULT_PAGE_SIZE: u64 = 20;

/// Live status and counts of one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveState {
    pub status: ProjectStatus,
    pub service_count: u32,
    pub running_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectSort {
    #[default]
    NameAsc,
    NameDesc,
    CreatedDesc,
    /// Sorts by live status; forces the in-memory path.
    StatusAsc,
    StatusDesc,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectListQuery {
    pub search: Option<String>,
    pub gitops_managed: Option<bool>,
    /// Filter on live status; forces the in-memory path.
    pub status: Option<ProjectStatus>,
    pub sort: ProjectSort,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ProjectListQuery {
    fn needs_live_state(&self) -> bool {
        self.status.is_some() || matches!(self.sort, ProjectSort::StatusAsc | ProjectSort::StatusDesc)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// Computes live project status from the compose runtime.
pub struct ProjectReconciler {
    db: Database,
    compose: Arc<dyn crate::runtime::ComposeRuntime>,
    settings: Arc<dyn SettingsProvider>,
}

impl ProjectReconciler {
    pub fn new(
        db: Database,
        compose: Arc<dyn crate::runtime::ComposeRuntime>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            db,
            compose,
            settings,
        }
    }

    /// Reconciles `projects` with one container query. When the query fails
    /// every project keeps its persisted status.
    pub async fn reconcile(&self, projects: Vec<Project>) -> Vec<ProjectSummary> {
        let groups = match self.compose.list_global_compose_containers().await {
            Ok(containers) => Some(group_by_project(containers)),
            Err(e) => {
                log::warn!("Container listing failed, using persisted status: {}", e);
                None
            }
        };

        let declared = match &groups {
            Some(_) => count_declared_services(&projects).await,
            None => HashMap::new(),
        };

        projects
            .into_iter()
            .map(|mut project| match &groups {
                Some(groups) => {
                    if let Some(&count) = declared.get(&project.id) {
                        project.service_count = count;
                        self.persist_service_count(&project.id, count);
                    }
                    let live = live_state(&project, groups);
                    ProjectSummary {
                        live_status: live.status,
                        live_running_count: live.running_count,
                        project,
                    }
                }
                None => ProjectSummary {
                    live_status: project.status,
                    live_running_count: project.running_count,
                    project,
                },
            })
            .collect()
    }

    /// Live state of a single project. Unlike [`reconcile`](Self::reconcile)
    /// a failing container query is reported to the caller.
    pub async fn refresh(&self, project: &Project) -> Result<LiveState, RuntimeError> {
        let groups = group_by_project(self.compose.list_global_compose_containers().await?);
        let mut project = project.clone();
        if let Some(&count) = count_declared_services(std::slice::from_ref(&project))
            .await
            .get(&project.id)
        {
            project.service_count = count;
        }
        Ok(live_state(&project, &groups))
    }

    fn persist_service_count(&self, project_id: &str, count: u32) {
        let db = self.db.clone();
        let id = project_id.to_string();
        spawn_detached("persist-service-count", DEFAULT_DETACHED_TIMEOUT, async move {
            if let Err(e) = project_repo::update_service_count(&db, &id, count) {
                log::warn!("Failed to persist service count for {}: {}", id, e);
            }
        });
    }

    /// Paginated listing with live status.
    ///
    /// Without a live-status filter or sort the database paginates and only
    /// the page is reconciled. Otherwise every matching project is
    /// reconciled and filtered, sorted and paginated in memory.
    pub async fn list_projects(
        &self,
        query: &ProjectListQuery,
    ) -> Result<Page<ProjectSummary>, ProjectError> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = query.offset.unwrap_or(0);

        let order = match query.sort {
            ProjectSort::NameDesc => ProjectOrder::NameDesc,
            ProjectSort::CreatedDesc => ProjectOrder::CreatedDesc,
            _ => ProjectOrder::NameAsc,
        };
        let mut filter = ProjectFilter {
            search: query.search.clone(),
            gitops_managed: query.gitops_managed,
            order,
            limit: Some(limit),
            offset: Some(offset),
        };

        if !query.needs_live_state() {
            let (projects, total) = project_repo::query(&self.db, &filter)?;
            return Ok(Page {
                items: self.reconcile(projects).await,
                total,
                limit,
                offset,
            });
        }

        filter.limit = Some(i64::MAX as u64);
        filter.offset = None;
        let (projects, _) = project_repo::query(&self.db, &filter)?;
        let mut items: Vec<ProjectSummary> = self
            .reconcile(projects)
            .await
            .into_iter()
            .filter(|s| query.status.map_or(true, |wanted| s.live_status == wanted))
            .collect();

        match query.sort {
            ProjectSort::StatusAsc => items.sort_by(|a, b| {
                a.live_status
                    .as_str()
                    .cmp(b.live_status.as_str())
                    .then_with(|| a.project.name.to_lowercase().cmp(&b.project.name.to_lowercase()))
            }),
            ProjectSort::StatusDesc => items.sort_by(|a, b| {
                b.live_status
                    .as_str()
                    .cmp(a.live_status.as_str())
                    .then_with(|| a.project.name.to_lowercase().cmp(&b.project.name.to_lowercase()))
            }),
            _ => {}
        }

        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Per-service view of one project: live containers merged with the
    /// declared services.
    pub async fn get_project_services(
        &self,
        project_id: &str,
    ) -> Result<Vec<RuntimeService>, ProjectError> {
        let project = project_repo::find_by_id(&self.db, project_id)?
            .ok_or_else(|| ProjectError::NotFound(project_id.to_string()))?;

        let root = container_projects_root(&settings::projects_directory(self.settings.as_ref()));
        let loaded = self
            .compose
            .load_project(
                &project.path,
                &project.compose_project_name(),
                &root,
                settings::auto_inject_env(self.settings.as_ref()),
                None,
            )
            .await?;
        let containers = self.compose.ps(&loaded).await?;
        Ok(merge_services(&loaded.services, containers))
    }
}

fn group_by_project(containers: Vec<ComposeContainer>) -> HashMap<String, Vec<ComposeContainer>> {
    let mut groups: HashMap<String, Vec<ComposeContainer>> = HashMap::new();
    for container in containers {
        groups
            .entry(normalize_compose_project_name(&container.project))
            .or_default()
            .push(container);
    }
    groups
}

fn live_state(project: &Project, groups: &HashMap<String, Vec<ComposeContainer>>) -> LiveState {
    let containers = groups
        .get(&project.compose_project_name())
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let running = containers.iter().filter(|c| c.is_running()).count() as u32;
    LiveState {
        status: status_from_counts(containers.len(), running, project.service_count),
        service_count: project.service_count,
        running_count: running,
    }
}

fn declared_service_count(dir: &Path) -> Option<u32> {
    let path = compose::find_compose_file(dir)?;
    let content = std::fs::read_to_string(&path).ok()?;
    match compose::count_services(&content, &path) {
        Ok(count) => Some(count),
        Err(e) => {
            log::debug!("Could not count services in {}: {}", path.display(), e);
            None
        }
    }
}

/// Declared service counts of the projects that have none stored, keyed by
/// project id. Only positive counts are returned. The compose files are
/// read on the blocking pool.
async fn count_declared_services(projects: &[Project]) -> HashMap<String, u32> {
    let pending: Vec<(String, PathBuf)> = projects
        .iter()
        .filter(|p| p.service_count == 0)
        .map(|p| (p.id.clone(), p.path.clone()))
        .collect();
    if pending.is_empty() {
        return HashMap::new();
    }

    let counted = tokio::task::spawn_blocking(move || {
        pending
            .into_iter()
            .filter_map(|(id, dir)| declared_service_count(&dir).filter(|c| *c > 0).map(|c| (id, c)))
            .collect::<HashMap<_, _>>()
    })
    .await;
    match counted {
        Ok(counts) => counts,
        Err(e) => {
            log::warn!("Counting declared services failed: {}", e);
            HashMap::new()
        }
    }
}

/// Declared services in order, each with its container(s), followed by
/// containers of services that are no longer declared.
pub fn merge_services(
    declared: &[DeclaredService],
    containers: Vec<ComposeContainer>,
) -> Vec<RuntimeService> {
    let mut by_service: HashMap<String, Vec<ComposeContainer>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for container in containers {
        if !by_service.contains_key(&container.service) {
            order.push(container.service.clone());
        }
        by_service
            .entry(container.service.clone())
            .or_default()
            .push(container);
    }

    let mut services = Vec::new();
    for decl in declared {
        match by_service.remove(&decl.name) {
            Some(found) => services.extend(
                found
                    .into_iter()
                    .map(|c| from_container(c, Some(decl.config.clone()))),
            ),
            None => services.push(RuntimeService {
                name: decl.name.clone(),
                image: decl.image.clone().unwrap_or_default(),
                status: NOT_CREATED.to_string(),
                container_id: None,
                container_name: None,
                ports: Vec::new(),
                health: None,
                service_config: Some(decl.config.clone()),
            }),
        }
    }

    for name in order {
        if let Some(orphans) = by_service.remove(&name) {
            services.extend(orphans.into_iter().map(|c| from_container(c, None)));
        }
    }
    services
}

fn from_container(c: ComposeContainer, config: Option<serde_json::Value>) -> RuntimeService {
    RuntimeService {
        name: c.service,
        image: c.image,
        status: if c.state.is_empty() { c.status } else { c.state },
        container_id: Some(c.id),
        container_name: Some(c.name),
        ports: c.ports,
        health: c.health,
        service_config: config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(project: &str, service: &str, state: &str) -> ComposeContainer {
        ComposeContainer {
            id: format!("{}-{}", project, service),
            name: format!("{}-{}-1", project, service),
            project: project.to_string(),
            service: service.to_string(),
            image: "nginx".to_string(),
            state: state.to_string(),
            status: String::new(),
            health: None,
            ports: Vec::new(),
        }
    }

    fn declared(name: &str) -> DeclaredService {
        DeclaredService {
            name: name.to_string(),
            image: Some("img".to_string()),
            config: serde_json::json!({"image": "img"}),
        }
    }

    #[test]
    fn test_live_state_from_groups() {
        let groups = group_by_project(vec![
            container("shop", "api", "running"),
            container("shop", "db", "exited"),
            container("Blog", "web", "running"),
        ]);

        let mut shop = Project::new("shop", "shop", "/p/shop".into());
        shop.service_count = 2;
        assert_eq!(live_state(&shop, &groups).status, ProjectStatus::PartiallyRunning);

        let mut blog = Project::new("blog", "blog", "/p/blog".into());
        blog.service_count = 1;
        let live = live_state(&blog, &groups);
        assert_eq!(live.status, ProjectStatus::Running);
        assert_eq!(live.running_count, 1);

        let idle = Project::new("idle", "idle", "/p/idle".into());
        assert_eq!(live_state(&idle, &groups).status, ProjectStatus::Stopped);
    }

    #[test]
    fn test_merge_marks_missing_services() {
        let services = merge_services(
            &[declared("web"), declared("db")],
            vec![container("p", "web", "running"), container("p", "old", "exited")],
        );
        let view: Vec<_> = services
            .iter()
            .map(|s| (s.name.as_str(), s.status.as_str()))
            .collect();
        assert_eq!(
            view,
            vec![("web", "running"), ("db", NOT_CREATED), ("old", "exited")]
        );
        assert!(services[0].service_config.is_some());
        assert!(services[2].service_config.is_none());
    }

    #[test]
    fn test_list_query_path_selection() {
        assert!(!ProjectListQuery::default().needs_live_state());
        assert!(ProjectListQuery {
            status: Some(ProjectStatus::Running),
            ..Default::default()
        }
        .needs_live_state());
        assert!(ProjectListQuery {
            sort: ProjectSort::StatusDesc,
            ..Default::default()
        }
        .needs_live_state());
    }
}
