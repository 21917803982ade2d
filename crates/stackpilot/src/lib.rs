pub mod compose;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod files;
pub mod gitops;
pub mod model;
pub mod orchestrator;
pub mod pathmap;
pub mod reconciler;
pub mod runtime;
pub mod sanitize;
pub mod settings;
pub mod status;
pub mod tasks;

pub use config::{load_config, EngineConfig, LogFormat};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ProjectError, Result, RuntimeError, StackpilotError};
pub use events::{EventSink, LogEventSink, ProjectEvent};
pub use gitops::{GitClient, GitOpsError, GitOpsSyncEngine, SyncScheduler};
pub use model::{Actor, GitOpsSync, GitRepository, Project, ProjectStatus, RuntimeService};
pub use orchestrator::{OrchestratorDeps, ProjectOrchestrator};
pub use pathmap::PathMapper;
pub use reconciler::ProjectReconciler;
pub use runtime::{ComposeRuntime, ContainerRuntime, DockerCli};
pub use settings::{Settings, SettingsProvider, StaticSettings};
pub use status::{calculate_project_status, next_status, normalize_compose_project_name};
