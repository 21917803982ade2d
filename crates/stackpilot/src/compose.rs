//! Compose document handling: file discovery, service extraction, `include:`
//! resolution and bind-mount rewriting.
//!
//! Only the parts of the compose format the engine needs are interpreted;
//! everything else is carried through untouched as a `serde_yaml::Value`.

use std::path::{Component, Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::RuntimeError;
use crate::pathmap::PathMapper;
use crate::runtime::LoadedComposeProject;
use crate::status::normalize_compose_project_name;

/// Compose file names in lookup order.
pub const COMPOSE_FILE_NAMES: [&str; 4] = [
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// File name used when writing a new project.
pub const DEFAULT_COMPOSE_FILE: &str = "compose.yaml";

pub const ENV_FILE: &str = ".env";

/// A service as declared in the compose document.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredService {
    pub name: String,
    pub image: Option<String>,
    pub config: serde_json::Value,
}

/// Returns the first compose file present in `dir`.
pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
    COMPOSE_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}

pub fn parse_document(content: &str, path: &Path) -> Result<Value, RuntimeError> {
    let doc: Value = serde_yaml::from_str(content).map_err(|e| RuntimeError::ParseCompose {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    match doc {
        Value::Mapping(_) => Ok(doc),
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        _ => Err(RuntimeError::ParseCompose {
            path: path.to_path_buf(),
            message: "top level must be a mapping".to_string(),
        }),
    }
}

fn services_mapping(doc: &Value) -> Option<&Mapping> {
    doc.get("services").and_then(Value::as_mapping)
}

/// Services in declaration order.
pub fn declared_services(doc: &Value) -> Vec<DeclaredService> {
    let Some(services) = services_mapping(doc) else {
        return Vec::new();
    };

    services
        .iter()
        .filter_map(|(name, body)| {
            let name = name.as_str()?.to_string();
            let image = body.get("image").and_then(Value::as_str).map(str::to_string);
            let config = serde_json::to_value(body).unwrap_or(serde_json::Value::Null);
            Some(DeclaredService {
                name,
                image,
                config,
            })
        })
        .collect()
}

/// Number of services declared in `content`.
pub fn count_services(content: &str, path: &Path) -> Result<u32, RuntimeError> {
    let doc = parse_document(content, path)?;
    Ok(services_mapping(&doc).map(|s| s.len() as u32).unwrap_or(0))
}

/// Paths listed under the top-level `include:` key.
///
/// Accepts the short form (`- other.yaml`) and the long form
/// (`- path: other.yaml` or `- path: [a.yaml, b.yaml]`).
pub fn include_paths(doc: &Value) -> Vec<String> {
    let Some(entries) = doc.get("include").and_then(Value::as_sequence) else {
        return Vec::new();
    };

    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Value::String(path) => paths.push(path.clone()),
            Value::Mapping(_) => match entry.get("path") {
                Some(Value::String(path)) => paths.push(path.clone()),
                Some(Value::Sequence(list)) => {
                    paths.extend(list.iter().filter_map(Value::as_str).map(str::to_string))
                }
                _ => {}
            },
            _ => {}
        }
    }
    paths
}

/// Resolves `.` and `..` lexically without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

fn is_bind_source(source: &str) -> bool {
    source.starts_with('/') || source.starts_with("./") || source.starts_with("../") || source == "."
}

fn rewrite_source(source: &str, project_dir: &Path, mapper: &PathMapper) -> Option<String> {
    if !is_bind_source(source) {
        return None;
    }
    let absolute = normalize_path(&project_dir.join(source));
    let host = mapper.to_host_path(&absolute);
    let rewritten = host.to_string_lossy().into_owned();
    (rewritten != source).then_some(rewritten)
}

/// Rewrites bind-mount sources from container view to host view.
///
/// Handles the short `src:dst[:mode]` syntax and the long syntax with
/// `type: bind`. Relative sources are resolved against `project_dir` first.
/// Named volumes are left alone. Returns the number of rewritten mounts.
pub fn rewrite_bind_mounts(doc: &mut Value, project_dir: &Path, mapper: &PathMapper) -> usize {
    if !mapper.is_translation_required() {
        return 0;
    }

    let Some(services) = doc.get_mut("services").and_then(Value::as_mapping_mut) else {
        return 0;
    };

    let mut rewritten = 0;
    for (_, service) in services.iter_mut() {
        let Some(volumes) = service.get_mut("volumes").and_then(Value::as_sequence_mut) else {
            continue;
        };

        for volume in volumes.iter_mut() {
            match volume {
                Value::String(spec) => {
                    let (source, rest) = match spec.split_once(':') {
                        Some((source, rest)) => (source.to_string(), Some(rest.to_string())),
                        None => (spec.clone(), None),
                    };
                    // A lone path is an anonymous volume target, not a bind.
                    let Some(rest) = rest else { continue };
                    if let Some(host) = rewrite_source(&source, project_dir, mapper) {
                        *spec = format!("{}:{}", host, rest);
                        rewritten += 1;
                    }
                }
                Value::Mapping(long) => {
                    let is_bind = long.get("type").and_then(Value::as_str) == Some("bind");
                    if !is_bind {
                        continue;
                    }
                    let Some(source) = long.get("source").and_then(Value::as_str) else {
                        continue;
                    };
                    if let Some(host) = rewrite_source(source, project_dir, mapper) {
                        long.insert(Value::from("source"), Value::from(host));
                        rewritten += 1;
                    }
                }
                _ => {}
            }
        }
    }
    rewritten
}

/// Reads and prepares the compose project in `project_dir`.
///
/// The directory must lie inside `projects_dir`. The env file is attached
/// only when `auto_inject_env` is set and the file exists.
pub fn load_project(
    project_dir: &Path,
    name: &str,
    projects_dir: &Path,
    auto_inject_env: bool,
    path_mapper: Option<&PathMapper>,
) -> Result<LoadedComposeProject, RuntimeError> {
    let working_dir = normalize_path(project_dir);
    let root = normalize_path(projects_dir);
    if !working_dir.starts_with(&root) || working_dir == root {
        return Err(RuntimeError::OutsideProjectsRoot {
            path: working_dir,
            root,
        });
    }

    let compose_file = find_compose_file(&working_dir)
        .ok_or_else(|| RuntimeError::ComposeFileNotFound(working_dir.clone()))?;
    let content =
        std::fs::read_to_string(&compose_file).map_err(|e| RuntimeError::ParseCompose {
            path: compose_file.clone(),
            message: e.to_string(),
        })?;

    let mut document = parse_document(&content, &compose_file)?;
    if let Some(mapper) = path_mapper {
        let count = rewrite_bind_mounts(&mut document, &working_dir, mapper);
        if count > 0 {
            log::debug!(
                "Rewrote {} bind mount(s) for {} to host paths",
                count,
                working_dir.display()
            );
        }
    }

    let env_file = Some(working_dir.join(ENV_FILE)).filter(|p| auto_inject_env && p.is_file());
    let services = declared_services(&document);

    Ok(LoadedComposeProject {
        name: normalize_compose_project_name(name),
        working_dir,
        compose_file,
        env_file,
        services,
        document,
    })
}
