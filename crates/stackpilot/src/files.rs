//! Path-confined access to the files of a project.
//!
//! Every path handed in by a caller goes through [`resolve_project_file_path`]
//! before anything touches the disk: it must land inside the project
//! directory or inside one of the allow-listed external paths.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::compose::{self, normalize_path, ENV_FILE};
use crate::db::{project_repo, Database};
use crate::error::ProjectError;
use crate::model::Project;
use crate::pathmap::container_projects_root;
use crate::sanitize::project_slug;
use crate::settings::{self, SettingsProvider};

/// Resolves `requested` against `root` and checks confinement.
///
/// Relative paths are joined onto `root`; both forms are normalized
/// lexically so `..` cannot climb out. The result must be strictly inside
/// `root` or inside one of `allowed`.
pub fn resolve_project_file_path(
    root: &Path,
    requested: &str,
    allowed: &[PathBuf],
) -> Result<PathBuf, ProjectError> {
    let requested = requested.trim();
    let root = normalize_path(root);
    let candidate = if Path::new(requested).is_absolute() {
        normalize_path(Path::new(requested))
    } else {
        normalize_path(&root.join(requested))
    };

    if candidate.starts_with(&root) && candidate != root {
        return Ok(candidate);
    }

    let allow_listed = allowed.iter().any(|a| {
        let a = normalize_path(a);
        a.is_absolute() && candidate.starts_with(&a) && candidate != a
    });
    if allow_listed {
        return Ok(candidate);
    }

    Err(ProjectError::PathNotAllowed(candidate))
}

/// Brings `project.path` back under `projects_root` when it is relative or
/// points elsewhere. Returns whether the path changed.
pub fn confine_project_path(projects_root: &Path, project: &mut Project) -> bool {
    let root = normalize_path(projects_root);
    let current = normalize_path(&project.path);
    if project.path.is_absolute() && current.starts_with(&root) && current != root {
        return false;
    }

    let dir_name = if project.dir_name.contains(['/', '\\']) || project.dir_name.starts_with('.') {
        project_slug(&project.dir_name)
    } else {
        project.dir_name.clone()
    };
    log::warn!(
        "Project '{}' had path {} outside the projects root; repairing to {}",
        project.name,
        project.path.display(),
        root.join(&dir_name).display()
    );
    project.path = root.join(&dir_name);
    project.dir_name = dir_name;
    true
}

/// A file belonging to a project, as shown to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    /// Registration form: relative to the project directory when inside it.
    pub path: String,
    pub absolute_path: PathBuf,
    pub exists: bool,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFiles {
    pub compose: Option<ProjectFile>,
    pub env: Option<ProjectFile>,
    pub includes: Vec<ProjectFile>,
    pub custom: Vec<ProjectFile>,
}

/// Reads, writes and registers project files.
#[derive(Clone)]
pub struct FileManager {
    db: Database,
    settings: Arc<dyn SettingsProvider>,
}

impl FileManager {
    pub fn new(db: Database, settings: Arc<dyn SettingsProvider>) -> Self {
        Self { db, settings }
    }

    pub fn projects_root(&self) -> PathBuf {
        container_projects_root(&settings::projects_directory(self.settings.as_ref()))
    }

    fn load(&self, project_id: &str) -> Result<Project, ProjectError> {
        project_repo::find_by_id(&self.db, project_id)?
            .ok_or_else(|| ProjectError::NotFound(project_id.to_string()))
    }

    /// Loads a project with its stored path confined to the projects root.
    fn load_confined(&self, project_id: &str) -> Result<Project, ProjectError> {
        let mut project = self.load(project_id)?;
        self.ensure_project_path(&mut project)?;
        Ok(project)
    }

    fn resolve(&self, project: &Project, requested: &str) -> Result<PathBuf, ProjectError> {
        let allowed = settings::allowed_external_paths(self.settings.as_ref());
        resolve_project_file_path(&project.path, requested, &allowed)
    }

    /// Repairs a corrupted project path and persists the repair.
    pub fn ensure_project_path(&self, project: &mut Project) -> Result<(), ProjectError> {
        if confine_project_path(&self.projects_root(), project) {
            project.updated_at = Utc::now();
            project_repo::update(&self.db, project)?;
        }
        Ok(())
    }

    fn registration_key(project: &Project, path: &Path) -> String {
        let base = normalize_path(&project.path);
        match path.strip_prefix(&base) {
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }

    /// Registers a custom file. Registering an already known path is a no-op.
    pub fn register_custom_file(
        &self,
        project_id: &str,
        requested: &str,
    ) -> Result<Project, ProjectError> {
        let mut project = self.load_confined(project_id)?;
        let path = self.resolve(&project, requested)?;
        let key = Self::registration_key(&project, &path);

        if project.custom_files.contains(&key) {
            return Ok(project);
        }

        project.custom_files.push(key);
        project.updated_at = Utc::now();
        project_repo::update(&self.db, &project)?;
        Ok(project)
    }

    /// Writes a custom file, registering it first when needed.
    pub fn update_custom_file(
        &self,
        project_id: &str,
        requested: &str,
        content: &str,
    ) -> Result<Project, ProjectError> {
        let project = self.register_custom_file(project_id, requested)?;
        let path = self.resolve(&project, requested)?;
        write_file(&path, content)?;
        Ok(project)
    }

    /// Drops a registration and optionally the file itself. Failing to delete
    /// the file is logged and does not undo the unregistration.
    pub fn remove_custom_file(
        &self,
        project_id: &str,
        requested: &str,
        delete_from_disk: bool,
    ) -> Result<Project, ProjectError> {
        let mut project = self.load_confined(project_id)?;
        let path = self.resolve(&project, requested)?;
        let key = Self::registration_key(&project, &path);

        let before = project.custom_files.len();
        project.custom_files.retain(|f| f != &key);
        if project.custom_files.len() != before {
            project.updated_at = Utc::now();
            project_repo::update(&self.db, &project)?;
        }

        if delete_from_disk {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to delete custom file {}: {}", path.display(), e);
            }
        }
        Ok(project)
    }

    pub fn read_custom_file(&self, project_id: &str, requested: &str) -> Result<String, ProjectError> {
        let project = self.load_confined(project_id)?;
        let path = self.resolve(&project, requested)?;
        std::fs::read_to_string(&path).map_err(|e| ProjectError::ReadFile { path, source: e })
    }

    /// Writes a file referenced from the compose `include:` list.
    pub fn write_include_file(
        &self,
        project_id: &str,
        requested: &str,
        content: &str,
    ) -> Result<PathBuf, ProjectError> {
        let project = self.load_confined(project_id)?;
        let path = self.resolve(&project, requested)?;
        write_file(&path, content)?;
        Ok(path)
    }

    /// Compose file, env file, include files and custom files of a project.
    pub fn read_project_files(&self, project_id: &str) -> Result<ProjectFiles, ProjectError> {
        let project = self.load_confined(project_id)?;

        let compose_path = compose::find_compose_file(&project.path);
        let compose = compose_path.as_ref().map(|p| self.describe(&project, p));

        let includes = match compose_path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok().map(|c| (p, c)))
            .and_then(|(p, c)| compose::parse_document(&c, p).ok())
        {
            Some(doc) => compose::include_paths(&doc)
                .iter()
                .filter_map(|inc| match self.resolve(&project, inc) {
                    Ok(path) => Some(self.describe(&project, &path)),
                    Err(e) => {
                        log::warn!("Skipping include '{}' of '{}': {}", inc, project.name, e);
                        None
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        let env_path = project.path.join(ENV_FILE);
        let env = env_path.is_file().then(|| self.describe(&project, &env_path));

        let custom = project
            .custom_files
            .iter()
            .filter_map(|f| self.resolve(&project, f).ok())
            .map(|path| self.describe(&project, &path))
            .collect();

        Ok(ProjectFiles {
            compose,
            env,
            includes,
            custom,
        })
    }

    fn describe(&self, project: &Project, path: &Path) -> ProjectFile {
        let content = std::fs::read_to_string(path).ok();
        ProjectFile {
            path: Self::registration_key(project, path),
            absolute_path: path.to_path_buf(),
            exists: content.is_some(),
            content,
        }
    }
}

/// Writes `content`, creating parent directories.
pub(crate) fn write_file(path: &Path, content: &str) -> Result<(), ProjectError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ProjectError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(path, content).map_err(|e| ProjectError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{StaticSettings, ALLOWED_EXTERNAL_PATHS, PROJECTS_DIRECTORY};

    #[test]
    fn test_resolve_inside_root() {
        let root = Path::new("/srv/stacks/web");
        assert_eq!(
            resolve_project_file_path(root, "config/app.yml", &[]).unwrap(),
            PathBuf::from("/srv/stacks/web/config/app.yml")
        );
        assert_eq!(
            resolve_project_file_path(root, "/srv/stacks/web/a/../b.txt", &[]).unwrap(),
            PathBuf::from("/srv/stacks/web/b.txt")
        );
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let root = Path::new("/srv/stacks/web");
        for bad in ["../other/compose.yaml", "/etc/passwd", "a/../../../x", "", "."] {
            let err = resolve_project_file_path(root, bad, &[]).unwrap_err();
            assert!(matches!(err, ProjectError::PathNotAllowed(_)), "{}", bad);
        }
        assert!(resolve_project_file_path(root, "/srv/stacks/web-evil/x", &[]).is_err());
    }

    #[test]
    fn test_resolve_allow_listed() {
        let root = Path::new("/srv/stacks/web");
        let allowed = vec![PathBuf::from("/etc/shared")];
        assert!(resolve_project_file_path(root, "/etc/shared/tls/cert.pem", &allowed).is_ok());
        assert!(resolve_project_file_path(root, "/etc/shared/../passwd", &allowed).is_err());
        assert!(resolve_project_file_path(root, "/etc/shared", &allowed).is_err());
    }

    #[test]
    fn test_confine_project_path() {
        let root = Path::new("/srv/stacks");
        let mut ok = Project::new("web", "web", PathBuf::from("/srv/stacks/web"));
        assert!(!confine_project_path(root, &mut ok));

        let mut relative = Project::new("web", "web", PathBuf::from("web"));
        assert!(confine_project_path(root, &mut relative));
        assert_eq!(relative.path, PathBuf::from("/srv/stacks/web"));

        let mut hostile = Project::new("x", "../../etc", PathBuf::from("/etc"));
        assert!(confine_project_path(root, &mut hostile));
        assert_eq!(hostile.path, PathBuf::from("/srv/stacks/etc"));
    }

    fn setup() -> (tempfile::TempDir, FileManager, Project) {
        let root = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let settings = StaticSettings::new()
            .with(PROJECTS_DIRECTORY, root.path().to_string_lossy())
            .with(ALLOWED_EXTERNAL_PATHS, "");
        let dir = root.path().join("web");
        std::fs::create_dir(&dir).unwrap();
        let project = Project::new("web", "web", dir);
        project_repo::insert(&db, &project).unwrap();
        let files = FileManager::new(db, Arc::new(settings));
        (root, files, project)
    }

    #[test]
    fn test_register_is_idempotent() {
        let (_root, files, project) = setup();
        files.register_custom_file(&project.id, "nginx.conf").unwrap();
        let updated = files.register_custom_file(&project.id, "./nginx.conf").unwrap();
        assert_eq!(updated.custom_files, vec!["nginx.conf"]);
    }

    #[test]
    fn test_update_registers_and_writes() {
        let (_root, files, project) = setup();
        let updated = files
            .update_custom_file(&project.id, "conf/app.ini", "[app]\n")
            .unwrap();
        assert_eq!(updated.custom_files, vec!["conf/app.ini"]);
        assert_eq!(
            files.read_custom_file(&project.id, "conf/app.ini").unwrap(),
            "[app]\n"
        );
    }

    #[test]
    fn test_remove_custom_file() {
        let (_root, files, project) = setup();
        files.update_custom_file(&project.id, "a.txt", "a").unwrap();

        let kept = files.remove_custom_file(&project.id, "a.txt", false).unwrap();
        assert!(kept.custom_files.is_empty());
        assert!(project.path.join("a.txt").exists());

        files.register_custom_file(&project.id, "a.txt").unwrap();
        files.remove_custom_file(&project.id, "a.txt", true).unwrap();
        assert!(!project.path.join("a.txt").exists());

        // Deleting a file that is already gone only warns.
        files.remove_custom_file(&project.id, "a.txt", true).unwrap();
    }

    #[test]
    fn test_write_rejected_outside_project() {
        let (_root, files, project) = setup();
        let err = files
            .update_custom_file(&project.id, "../other/x.txt", "x")
            .unwrap_err();
        assert!(matches!(err, ProjectError::PathNotAllowed(_)));
        let err = files
            .write_include_file(&project.id, "/tmp/escape.yaml", "x")
            .unwrap_err();
        assert!(matches!(err, ProjectError::PathNotAllowed(_)));
    }

    #[test]
    fn test_read_project_files_lists_includes() {
        let (_root, files, project) = setup();
        std::fs::write(
            project.path.join("compose.yaml"),
            "include:\n  - db.yaml\nservices:\n  web:\n    image: nginx\n",
        )
        .unwrap();
        std::fs::write(project.path.join(".env"), "A=1\n").unwrap();
        files
            .write_include_file(&project.id, "db.yaml", "services: {}\n")
            .unwrap();
        files.update_custom_file(&project.id, "extra.conf", "x").unwrap();

        let listing = files.read_project_files(&project.id).unwrap();
        assert_eq!(listing.compose.unwrap().path, "compose.yaml");
        assert_eq!(listing.env.unwrap().content.as_deref(), Some("A=1\n"));
        assert_eq!(listing.includes.len(), 1);
        assert_eq!(listing.includes[0].content.as_deref(), Some("services: {}\n"));
        assert_eq!(listing.custom[0].path, "extra.conf");
    }

    fn insert_stray_project(files: &FileManager, outside: &Path) -> Project {
        let project = Project::new("legacy", "legacy", outside.to_path_buf());
        project_repo::insert(&files.db, &project).unwrap();
        project
    }

    #[test]
    fn test_writes_repair_stray_project_path() {
        let (root, files, _project) = setup();
        let outside = tempfile::tempdir().unwrap();
        let stray = insert_stray_project(&files, outside.path());

        let updated = files.update_custom_file(&stray.id, "notes.txt", "x").unwrap();

        assert_eq!(updated.path, root.path().join("legacy"));
        assert!(root.path().join("legacy/notes.txt").exists());
        assert!(!outside.path().join("notes.txt").exists());
        let stored = project_repo::find_by_id(&files.db, &stray.id).unwrap().unwrap();
        assert_eq!(stored.path, root.path().join("legacy"));
    }

    #[test]
    fn test_remove_never_touches_stray_path() {
        let (root, files, _project) = setup();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("keep.txt"), "keep").unwrap();
        let stray = insert_stray_project(&files, outside.path());

        files.remove_custom_file(&stray.id, "keep.txt", true).unwrap();

        assert!(outside.path().join("keep.txt").exists());
        assert!(files.read_custom_file(&stray.id, "keep.txt").is_err());
        let stored = project_repo::find_by_id(&files.db, &stray.id).unwrap().unwrap();
        assert_eq!(stored.path, root.path().join("legacy"));
    }

    #[test]
    fn test_not_found() {
        let (_root, files, _project) = setup();
        assert!(matches!(
            files.read_project_files("missing"),
            Err(ProjectError::NotFound(_))
        ));
    }
}
