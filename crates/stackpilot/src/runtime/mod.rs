//! Container runtime collaborators.
//!
//! The engine never talks to Docker directly; it goes through
//! [`ComposeRuntime`] and [`ContainerRuntime`]. [`DockerCli`] implements both
//! by shelling out to the `docker` binary.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::compose::DeclaredService;
use crate::error::RuntimeError;
use crate::model::ComposeContainer;
use crate::pathmap::PathMapper;

pub mod docker_cli;

pub use docker_cli::DockerCli;

/// A compose project read from disk and ready to hand to the runtime.
#[derive(Debug, Clone)]
pub struct LoadedComposeProject {
    /// Normalized compose project name (`-p`).
    pub name: String,
    pub working_dir: PathBuf,
    pub compose_file: PathBuf,
    pub env_file: Option<PathBuf>,
    pub services: Vec<DeclaredService>,
    /// Parsed document with bind mounts already translated to host paths.
    pub document: serde_yaml::Value,
}

impl LoadedComposeProject {
    /// Images referenced by the declared services, deduplicated.
    pub fn images(&self) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        for image in self.services.iter().filter_map(|s| s.image.as_ref()) {
            if !images.contains(image) {
                images.push(image.clone());
            }
        }
        images
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    pub remove_orphans: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub follow: bool,
    pub tail: Option<u32>,
    pub timestamps: bool,
}

/// A bind mount of the container this process runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[async_trait]
pub trait ComposeRuntime: Send + Sync {
    /// Reads the compose project in `path`. See [`crate::compose::load_project`].
    async fn load_project(
        &self,
        path: &Path,
        name: &str,
        projects_dir: &Path,
        auto_inject_env: bool,
        path_mapper: Option<&PathMapper>,
    ) -> Result<LoadedComposeProject, RuntimeError> {
        crate::compose::load_project(path, name, projects_dir, auto_inject_env, path_mapper)
    }

    async fn up(&self, project: &LoadedComposeProject, options: &UpOptions)
        -> Result<(), RuntimeError>;

    async fn down(
        &self,
        project: &LoadedComposeProject,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError>;

    async fn restart(&self, project: &LoadedComposeProject) -> Result<(), RuntimeError>;

    async fn ps(&self, project: &LoadedComposeProject) -> Result<Vec<ComposeContainer>, RuntimeError>;

    /// Sends log lines to `sink` until EOF, or until the receiver is dropped.
    async fn logs(
        &self,
        project: &LoadedComposeProject,
        options: &LogOptions,
        sink: mpsc::Sender<String>,
    ) -> Result<(), RuntimeError>;

    /// Every container carrying a compose project label, across all projects.
    async fn list_global_compose_containers(&self) -> Result<Vec<ComposeContainer>, RuntimeError>;
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Mounts of the container this process runs in.
    async fn self_mounts(&self) -> Result<Vec<Mount>, RuntimeError>;
}
