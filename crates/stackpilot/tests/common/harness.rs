//! Test harness with in-memory collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use stackpilot::db::project_repo;
use stackpilot::events::{EventSink, ProjectEvent};
use stackpilot::gitops::git::{BranchInfo, GitAuthConfig, GitClient, TreeEntry, TreeEntryKind};
use stackpilot::gitops::{GitOpsError, GitOpsSyncEngine};
use stackpilot::model::{ComposeContainer, GitRepository, ProjectStatus};
use stackpilot::orchestrator::{OrchestratorDeps, ProjectOrchestrator};
use stackpilot::runtime::{
    ComposeRuntime, ContainerRuntime, LoadedComposeProject, LogOptions, Mount, UpOptions,
};
use stackpilot::settings::{StaticSettings, ALLOWED_EXTERNAL_PATHS, PROJECTS_DIRECTORY};
use stackpilot::{Database, RuntimeError};

pub const NGINX_COMPOSE: &str = "services:\n  web:\n    image: nginx\n";

// ============================================================================
// Compose runtime
// ============================================================================

/// Keeps "containers" in memory, keyed by compose project name.
pub struct FakeCompose {
    db: Database,
    containers: Mutex<HashMap<String, Vec<ComposeContainer>>>,
    pub up_calls: AtomicUsize,
    pub down_calls: AtomicUsize,
    pub fail_up: Mutex<Option<String>>,
    pub fail_down: AtomicBool,
    pub fail_restart: AtomicBool,
    pub fail_global_listing: AtomicBool,
    /// Persisted status of the project at the moment `up` ran.
    pub status_during_up: Mutex<Vec<ProjectStatus>>,
    pub last_up_options: Mutex<Option<UpOptions>>,
    pub log_lines: Mutex<Vec<String>>,
}

impl FakeCompose {
    fn new(db: Database) -> Self {
        Self {
            db,
            containers: Mutex::new(HashMap::new()),
            up_calls: AtomicUsize::new(0),
            down_calls: AtomicUsize::new(0),
            fail_up: Mutex::new(None),
            fail_down: AtomicBool::new(false),
            fail_restart: AtomicBool::new(false),
            fail_global_listing: AtomicBool::new(false),
            status_during_up: Mutex::new(Vec::new()),
            last_up_options: Mutex::new(None),
            log_lines: Mutex::new(Vec::new()),
        }
    }

    pub fn up_count(&self) -> usize {
        self.up_calls.load(Ordering::SeqCst)
    }

    /// Names of the compose projects that currently have containers.
    pub fn project_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn fail_next_up(&self, message: &str) {
        *self.fail_up.lock().unwrap() = Some(message.to_string());
    }

    /// Puts a container for `project`/`service` in the given state.
    pub fn set_container(&self, project: &str, service: &str, state: &str) {
        let mut containers = self.containers.lock().unwrap();
        let list = containers.entry(project.to_string()).or_default();
        list.retain(|c| c.service != service);
        list.push(container(project, service, "nginx", state));
    }
}

fn container(project: &str, service: &str, image: &str, state: &str) -> ComposeContainer {
    ComposeContainer {
        id: format!("{}-{}-id", project, service),
        name: format!("{}-{}-1", project, service),
        project: project.to_string(),
        service: service.to_string(),
        image: image.to_string(),
        state: state.to_string(),
        status: if state == "running" {
            "Up 1 second".to_string()
        } else {
            "Exited (0)".to_string()
        },
        health: None,
        ports: Vec::new(),
    }
}

#[async_trait]
impl ComposeRuntime for FakeCompose {
    async fn up(&self, project: &LoadedComposeProject, options: &UpOptions) -> Result<(), RuntimeError> {
        self.up_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_up_options.lock().unwrap() = Some(options.clone());
        if let Ok(Some(p)) = project_repo::find_by_path(&self.db, &project.working_dir) {
            self.status_during_up.lock().unwrap().push(p.status);
        }

        if let Some(message) = self.fail_up.lock().unwrap().take() {
            return Err(RuntimeError::CommandFailed {
                command: "docker compose up".to_string(),
                message,
            });
        }

        let running = project
            .services
            .iter()
            .map(|s| {
                container(
                    &project.name,
                    &s.name,
                    s.image.as_deref().unwrap_or("unknown"),
                    "running",
                )
            })
            .collect();
        self.containers
            .lock()
            .unwrap()
            .insert(project.name.clone(), running);
        Ok(())
    }

    async fn down(&self, project: &LoadedComposeProject, _remove_volumes: bool) -> Result<(), RuntimeError> {
        self.down_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_down.load(Ordering::SeqCst) {
            return Err(RuntimeError::CommandFailed {
                command: "docker compose down".to_string(),
                message: "daemon not responding".to_string(),
            });
        }
        self.containers.lock().unwrap().remove(&project.name);
        Ok(())
    }

    async fn restart(&self, _project: &LoadedComposeProject) -> Result<(), RuntimeError> {
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(RuntimeError::CommandFailed {
                command: "docker compose restart".to_string(),
                message: "container is restarting, wait until the container is running".to_string(),
            });
        }
        Ok(())
    }

    async fn ps(&self, project: &LoadedComposeProject) -> Result<Vec<ComposeContainer>, RuntimeError> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(&project.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn logs(
        &self,
        _project: &LoadedComposeProject,
        options: &LogOptions,
        sink: mpsc::Sender<String>,
    ) -> Result<(), RuntimeError> {
        let lines = self.log_lines.lock().unwrap().clone();
        for line in lines {
            if sink.send(line).await.is_err() {
                return Ok(());
            }
        }
        if options.follow {
            // Followed logs never end on their own.
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn list_global_compose_containers(&self) -> Result<Vec<ComposeContainer>, RuntimeError> {
        if self.fail_global_listing.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("docker is down".to_string()));
        }
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .flatten()
            .cloned()
            .collect())
    }
}

// ============================================================================
// Container runtime
// ============================================================================

#[derive(Default)]
pub struct FakeContainers {
    pub local_images: Mutex<HashSet<String>>,
    pub pulled: Mutex<Vec<String>>,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
}

#[async_trait]
impl ContainerRuntime for FakeContainers {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.local_images.lock().unwrap().contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.pulled.lock().unwrap().push(image.to_string());
        if image.starts_with("private/") {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker pull {}", image),
                message: "pull access denied".to_string(),
            });
        }
        self.local_images.lock().unwrap().insert(image.to_string());
        Ok(())
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        if id.starts_with("bad") {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker start {}", id),
                message: format!("No such container: {}", id),
            });
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.started.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        if id.starts_with("bad") {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker stop {}", id),
                message: format!("No such container: {}", id),
            });
        }
        self.stopped.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn self_mounts(&self) -> Result<Vec<Mount>, RuntimeError> {
        Err(RuntimeError::Unavailable("not running in a container".to_string()))
    }
}

// ============================================================================
// Git
// ============================================================================

/// Serves a fixed file map as the content of every clone.
#[derive(Default)]
pub struct FakeGit {
    pub files: Mutex<HashMap<String, String>>,
    pub commit: Mutex<String>,
    pub clone_error: Mutex<Option<String>>,
    pub clones: AtomicUsize,
    /// Makes every clone take this long.
    pub clone_delay: Mutex<Option<Duration>>,
    pub cleanups: Mutex<Vec<PathBuf>>,
}

impl FakeGit {
    pub fn set_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    pub fn set_commit(&self, commit: &str) {
        *self.commit.lock().unwrap() = commit.to_string();
    }

    pub fn fail_clones(&self, message: &str) {
        *self.clone_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.lock().unwrap().len()
    }
}

#[async_trait]
impl GitClient for FakeGit {
    async fn clone_branch(&self, _url: &str, branch: &str, _auth: &GitAuthConfig) -> Result<PathBuf, GitOpsError> {
        if let Some(message) = self.clone_error.lock().unwrap().clone() {
            return Err(GitOpsError::GitNetworkError(message));
        }
        let delay = *self.clone_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.clones.fetch_add(1, Ordering::SeqCst);
        Ok(PathBuf::from(format!("/fake/checkouts/{}-{}", branch, n)))
    }

    async fn cleanup(&self, checkout: &Path) {
        self.cleanups.lock().unwrap().push(checkout.to_path_buf());
    }

    async fn current_commit(&self, _checkout: &Path) -> Result<String, GitOpsError> {
        Ok(self.commit.lock().unwrap().clone())
    }

    async fn file_exists(&self, _checkout: &Path, relative: &str) -> Result<bool, GitOpsError> {
        Ok(self.files.lock().unwrap().contains_key(relative))
    }

    async fn read_file(&self, _checkout: &Path, relative: &str) -> Result<String, GitOpsError> {
        self.files
            .lock()
            .unwrap()
            .get(relative)
            .cloned()
            .ok_or_else(|| GitOpsError::FileOperation(format!("{} missing", relative)))
    }

    async fn browse_tree(&self, _checkout: &Path, relative: &str) -> Result<Vec<TreeEntry>, GitOpsError> {
        let prefix = relative.trim_matches('/');
        let mut entries: Vec<TreeEntry> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| prefix.is_empty() || path.starts_with(&format!("{}/", prefix)))
            .map(|(path, content)| TreeEntry {
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                path: path.clone(),
                kind: TreeEntryKind::File,
                size: Some(content.len() as u64),
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn list_branches(&self, _url: &str, _auth: &GitAuthConfig) -> Result<Vec<BranchInfo>, GitOpsError> {
        Ok(vec![BranchInfo {
            name: "main".to_string(),
            commit: self.commit.lock().unwrap().clone(),
        }])
    }

    async fn test_connection(&self, _url: &str, branch: &str, _auth: &GitAuthConfig) -> Result<(), GitOpsError> {
        if branch == "main" {
            Ok(())
        } else {
            Err(GitOpsError::GitOperation(format!("branch '{}' not found", branch)))
        }
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProjectEvent>>,
}

impl RecordingSink {
    pub fn types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Waits for a detached event dispatch to land.
    pub async fn wait_for(&self, event_type: &str) -> ProjectEvent {
        for _ in 0..200 {
            if let Some(event) = self
                .events
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.event_type == event_type)
                .cloned()
            {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("event {} was never recorded; got {:?}", event_type, self.types());
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn record(&self, event: ProjectEvent) -> Result<(), String> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Isolated engine with a temp projects root and fake collaborators.
pub struct TestEnv {
    _temp: TempDir,
    pub root: PathBuf,
    pub external: PathBuf,
    pub db: Database,
    pub compose: Arc<FakeCompose>,
    pub containers: Arc<FakeContainers>,
    pub git: Arc<FakeGit>,
    pub events: Arc<RecordingSink>,
    pub orchestrator: Arc<ProjectOrchestrator>,
    pub engine: GitOpsSyncEngine,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let root = temp.path().join("projects");
        let external = temp.path().join("shared");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&external).unwrap();

        let db = Database::open_in_memory().expect("Failed to open database");
        let settings = Arc::new(
            StaticSettings::new()
                .with(PROJECTS_DIRECTORY, root.to_string_lossy())
                .with(ALLOWED_EXTERNAL_PATHS, external.to_string_lossy()),
        );
        let compose = Arc::new(FakeCompose::new(db.clone()));
        let containers = Arc::new(FakeContainers::default());
        let git = Arc::new(FakeGit::default());
        let events = Arc::new(RecordingSink::default());

        let orchestrator = Arc::new(ProjectOrchestrator::new(OrchestratorDeps {
            db: db.clone(),
            compose: compose.clone(),
            containers: containers.clone(),
            settings,
            events: events.clone(),
        }));
        let engine = GitOpsSyncEngine::new(Arc::clone(&orchestrator), git.clone(), events.clone());

        Self {
            _temp: temp,
            root,
            external,
            db,
            compose,
            containers,
            git,
            events,
            orchestrator,
            engine,
        }
    }

    /// Stores a repository the sync engine can clone from.
    pub fn add_repository(&self) -> GitRepository {
        let repo = GitRepository::new("infra", "https://git.example.com/acme/infra.git");
        stackpilot::db::repository_repo::insert(&self.db, &repo).unwrap();
        repo
    }

    /// Writes a compose-bearing directory straight into the projects root.
    pub fn write_project_dir(&self, dir: &str, file: &str, content: &str) -> PathBuf {
        let path = self.root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(file), content).unwrap();
        path
    }
}
