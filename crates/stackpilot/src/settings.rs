//! Runtime settings lookups used by the engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::config::EngineConfig;

pub const PROJECTS_DIRECTORY: &str = "projectsDirectory";
pub const AUTO_INJECT_ENV: &str = "autoInjectEnv";
pub const ALLOWED_EXTERNAL_PATHS: &str = "allowedExternalPaths";

pub const DEFAULT_PROJECTS_DIRECTORY: &str = "/app/data/projects";

/// String/bool settings lookups with caller-supplied defaults.
pub trait SettingsProvider: Send + Sync {
    fn get_string(&self, key: &str, default: &str) -> String;

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get_string(key, "").trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        }
    }
}

/// Raw configured projects directory (may contain a `container:host` mapping).
pub fn projects_directory(settings: &dyn SettingsProvider) -> String {
    settings.get_string(PROJECTS_DIRECTORY, DEFAULT_PROJECTS_DIRECTORY)
}

pub fn auto_inject_env(settings: &dyn SettingsProvider) -> bool {
    settings.get_bool(AUTO_INJECT_ENV, true)
}

/// Allow-listed external paths, stored as a comma separated string.
pub fn allowed_external_paths(settings: &dyn SettingsProvider) -> Vec<PathBuf> {
    settings
        .get_string(ALLOWED_EXTERNAL_PATHS, "")
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Settings backed by the daemon's [`EngineConfig`].
pub struct Settings {
    config: EngineConfig,
}

impl Settings {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl SettingsProvider for Settings {
    fn get_string(&self, key: &str, default: &str) -> String {
        let value = match key {
            PROJECTS_DIRECTORY => self.config.projects_directory.clone(),
            AUTO_INJECT_ENV => self.config.auto_inject_env.to_string(),
            ALLOWED_EXTERNAL_PATHS => self.config.allowed_external_paths.join(","),
            _ => String::new(),
        };
        if value.is_empty() {
            default.to_string()
        } else {
            value
        }
    }
}

/// In-memory key/value settings for embedding and tests.
#[derive(Default)]
pub struct StaticSettings {
    values: RwLock<HashMap<String, String>>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.into());
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(key).cloned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}
