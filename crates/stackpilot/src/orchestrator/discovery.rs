use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use super::ProjectOrchestrator;
use crate::compose::{self, normalize_path};
use crate::db::project_repo;
use crate::error::ProjectError;
use crate::model::{Project, ProjectStatus};

/// Outcome of a filesystem scan.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemSyncReport {
    /// Names of projects added for newly found directories.
    pub added: Vec<String>,
    /// Names of projects removed because their directory or compose file vanished.
    pub removed: Vec<String>,
    pub unchanged: usize,
}

impl ProjectOrchestrator {
    /// Makes the project table mirror the compose-bearing directories
    /// directly below the projects root.
    pub async fn sync_projects_from_filesystem(&self) -> Result<FilesystemSyncReport, ProjectError> {
        let root = self.projects_root();
        std::fs::create_dir_all(&root).map_err(|e| ProjectError::CreateDirectory {
            path: root.clone(),
            source: e,
        })?;

        let mut report = FilesystemSyncReport::default();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    log::warn!("Skipping unreadable entry in {}: {}", root.display(), err);
                    None
                }
            })
            .filter(|e| e.file_type().is_dir())
        {
            let dir = normalize_path(entry.path());
            let Some(compose_file) = compose::find_compose_file(&dir) else {
                continue;
            };
            seen.insert(dir.clone());

            if project_repo::find_by_path(&self.db, &dir)?.is_some() {
                report.unchanged += 1;
                continue;
            }

            let project = discovered_project(&dir, &compose_file);
            project_repo::insert(&self.db, &project)?;
            log::info!(
                "Discovered project '{}' with {} service(s)",
                project.name,
                project.service_count
            );
            report.added.push(project.name);
        }

        let mut stale = Vec::new();
        for project in project_repo::list_all(&self.db)? {
            let path = normalize_path(&project.path);
            if seen.contains(&path) {
                continue;
            }
            if !path.is_dir() || compose::find_compose_file(&path).is_none() {
                stale.push(project);
            }
        }

        if !stale.is_empty() {
            let ids: Vec<String> = stale.iter().map(|p| p.id.clone()).collect();
            project_repo::delete_many(&self.db, &ids)?;
            for project in stale {
                log::info!("Removed project '{}': directory or compose file is gone", project.name);
                report.removed.push(project.name);
            }
        }

        Ok(report)
    }
}

fn discovered_project(dir: &Path, compose_file: &Path) -> Project {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let service_count = match std::fs::read_to_string(compose_file)
        .map_err(|e| e.to_string())
        .and_then(|c| compose::count_services(&c, compose_file).map_err(|e| e.to_string()))
    {
        Ok(count) => count,
        Err(e) => {
            log::warn!("Could not read services of {}: {}", compose_file.display(), e);
            0
        }
    };

    let mut project = Project::new(dir_name.clone(), dir_name, dir.to_path_buf());
    project.status = ProjectStatus::Unknown;
    project.service_count = service_count;
    project
}
