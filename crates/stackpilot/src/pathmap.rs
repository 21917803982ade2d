//! Translation between the projects directory as seen by this process and
//! as seen by the Docker daemon.
//!
//! When the manager runs inside a container, bind-mount sources in compose
//! files must be expressed as host paths. The configured projects directory
//! is either a plain path or `containerPath:hostPath`; when only the
//! container side is known the host side is discovered from our own mounts.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::runtime::{ContainerRuntime, Mount};

static RE_WINDOWS_DRIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:[\\/]").unwrap());

/// The two halves of a configured projects directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectsDirectory {
    pub container_path: String,
    pub host_path: Option<String>,
}

/// Splits `containerPath:hostPath`. Drive-letter colons (`C:\`, `C:/`) are
/// never treated as the separator.
pub fn parse_projects_directory(configured: &str) -> ProjectsDirectory {
    let configured = configured.trim();
    let skip = if RE_WINDOWS_DRIVE.is_match(configured) { 2 } else { 0 };

    match configured[skip..].find(':') {
        Some(idx) => {
            let split = skip + idx;
            let container = &configured[..split];
            let host = &configured[split + 1..];
            if container.is_empty() || host.is_empty() {
                ProjectsDirectory {
                    container_path: configured.to_string(),
                    host_path: None,
                }
            } else {
                ProjectsDirectory {
                    container_path: container.to_string(),
                    host_path: Some(host.to_string()),
                }
            }
        }
        None => ProjectsDirectory {
            container_path: configured.to_string(),
            host_path: None,
        },
    }
}

/// Projects root as this process sees it.
pub fn container_projects_root(configured: &str) -> PathBuf {
    PathBuf::from(parse_projects_directory(configured).container_path)
}

/// Maps paths under `container_path` to the same location under `host_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    container_path: PathBuf,
    host_path: PathBuf,
}

impl PathMapper {
    pub fn new(container_path: impl Into<PathBuf>, host_path: impl Into<PathBuf>) -> Self {
        Self {
            container_path: container_path.into(),
            host_path: host_path.into(),
        }
    }

    pub fn container_path(&self) -> &Path {
        &self.container_path
    }

    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    pub fn is_translation_required(&self) -> bool {
        self.container_path != self.host_path
    }

    /// Paths outside the container prefix are returned unchanged.
    pub fn to_host_path(&self, path: &Path) -> PathBuf {
        swap_prefix(path, &self.container_path, &self.host_path)
    }

    pub fn to_container_path(&self, path: &Path) -> PathBuf {
        swap_prefix(path, &self.host_path, &self.container_path)
    }
}

fn swap_prefix(path: &Path, from: &Path, to: &Path) -> PathBuf {
    match path.strip_prefix(from) {
        Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
        Ok(rest) => to.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Host location of `container_path` according to the given mounts.
///
/// The mount with the longest destination that is a component-wise prefix
/// of `container_path` wins.
pub fn host_path_from_mounts(container_path: &Path, mounts: &[Mount]) -> Option<PathBuf> {
    mounts
        .iter()
        .filter(|m| container_path.starts_with(&m.destination))
        .max_by_key(|m| m.destination.components().count())
        .map(|m| swap_prefix(container_path, &m.destination, &m.source))
}

/// Builds the mapper for the configured projects directory.
///
/// Never fails: discovery problems are logged and yield `None`, which
/// callers treat as "no translation".
pub async fn resolve_path_mapper(
    configured: &str,
    runtime: &dyn ContainerRuntime,
) -> Option<PathMapper> {
    let parsed = parse_projects_directory(configured);
    let container_path = PathBuf::from(&parsed.container_path);

    if let Some(host) = parsed.host_path {
        return Some(PathMapper::new(container_path, host));
    }

    if container_path.components().any(|c| c == Component::ParentDir) {
        log::warn!(
            "Projects directory '{}' contains '..'; skipping host path discovery",
            parsed.container_path
        );
        return None;
    }

    match runtime.self_mounts().await {
        Ok(mounts) => match host_path_from_mounts(&container_path, &mounts) {
            Some(host) => {
                log::info!(
                    "Discovered host path {} for projects directory {}",
                    host.display(),
                    container_path.display()
                );
                Some(PathMapper::new(container_path, host))
            }
            None => {
                log::warn!(
                    "No mount covers projects directory {}; bind mounts will not be translated",
                    container_path.display()
                );
                None
            }
        },
        Err(e) => {
            log::warn!(
                "Could not inspect own container mounts ({}); bind mounts will not be translated",
                e
            );
            None
        }
    }
}
