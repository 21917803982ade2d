//! Project records and their lifecycle status.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted lifecycle status of a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Unknown,
    Stopped,
    Stopping,
    Deploying,
    Running,
    PartiallyRunning,
    Restarting,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Unknown => "unknown",
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Stopping => "stopping",
            ProjectStatus::Deploying => "deploying",
            ProjectStatus::Running => "running",
            ProjectStatus::PartiallyRunning => "partially_running",
            ProjectStatus::Restarting => "restarting",
        }
    }

    /// Whether at least part of the project is up.
    pub fn is_active(&self) -> bool {
        matches!(self, ProjectStatus::Running | ProjectStatus::PartiallyRunning)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(ProjectStatus::Unknown),
            "stopped" => Ok(ProjectStatus::Stopped),
            "stopping" => Ok(ProjectStatus::Stopping),
            "deploying" => Ok(ProjectStatus::Deploying),
            "running" => Ok(ProjectStatus::Running),
            "partially_running" => Ok(ProjectStatus::PartiallyRunning),
            "restarting" => Ok(ProjectStatus::Restarting),
            other => Err(format!("unknown project status '{}'", other)),
        }
    }
}

/// A compose project tracked by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Directory name below the projects root.
    pub dir_name: String,
    /// Absolute project directory; always below the projects root.
    pub path: PathBuf,
    pub status: ProjectStatus,
    pub service_count: u32,
    pub running_count: u32,
    /// Registered custom files, in registration order.
    pub custom_files: Vec<String>,
    /// Id of the GitOps sync that owns this project, if any.
    pub gitops_managed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, dir_name: impl Into<String>, path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            dir_name: dir_name.into(),
            path,
            status: ProjectStatus::Stopped,
            service_count: 0,
            running_count: 0,
            custom_files: Vec::new(),
            gitops_managed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_gitops_managed(&self) -> bool {
        self.gitops_managed_by.is_some()
    }

    /// Compose project name (`-p`) of the stack. Derived from the directory,
    /// so renaming the project keeps its containers attached.
    pub fn compose_project_name(&self) -> String {
        crate::status::normalize_compose_project_name(&self.dir_name)
    }
}

/// A project together with its freshly reconciled live state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub project: Project,
    /// Live status; falls back to the persisted status when the runtime is unreachable.
    pub live_status: ProjectStatus,
    pub live_running_count: u32,
}
