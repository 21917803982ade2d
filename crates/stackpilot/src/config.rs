//! Daemon configuration loaded from YAML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration for `stackpilotd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// SQLite database location.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Projects root, either a plain path or `containerPath:hostPath`.
    #[serde(default = "default_projects_directory")]
    pub projects_directory: String,

    /// Pass the project's `.env` file to compose automatically.
    #[serde(default = "default_true")]
    pub auto_inject_env: bool,

    /// Absolute paths outside a project that custom files may point into.
    #[serde(default)]
    pub allowed_external_paths: Vec<String>,

    /// Seconds between GitOps scheduler ticks.
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,

    /// Ceiling for a single clone in seconds.
    #[serde(default = "default_git_timeout")]
    pub git_timeout_secs: u64,

    /// Scratch directory for clones. Defaults to the system temp dir.
    #[serde(default)]
    pub git_work_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".stackpilot").join("data").join("stackpilot.db"))
        .unwrap_or_else(|| PathBuf::from("data/stackpilot.db"))
}

fn default_projects_directory() -> String {
    "/app/data/projects".to_string()
}

fn default_true() -> bool {
    true
}

fn default_scheduler_interval() -> u64 {
    60
}

fn default_git_timeout() -> u64 {
    120
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            projects_directory: default_projects_directory(),
            auto_inject_env: true,
            allowed_external_paths: Vec::new(),
            scheduler_interval_secs: default_scheduler_interval(),
            git_timeout_secs: default_git_timeout(),
            git_work_dir: None,
            log_format: LogFormat::default(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = if content.trim().is_empty() {
        EngineConfig::default()
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.projects_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "projectsDirectory must not be empty".to_string(),
        });
    }

    if config.scheduler_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "schedulerIntervalSecs must be greater than 0".to_string(),
        });
    }

    if config.git_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "gitTimeoutSecs must be greater than 0".to_string(),
        });
    }

    for external in &config.allowed_external_paths {
        if !Path::new(external).is_absolute() {
            return Err(ConfigError::Validation {
                message: format!("allowedExternalPaths entry '{}' must be absolute", external),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.projects_directory, "/app/data/projects");
        assert!(config.auto_inject_env);
        assert_eq!(config.scheduler_interval_secs, 60);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
databasePath: /var/lib/stackpilot/db.sqlite
projectsDirectory: /app/data/projects:/srv/projects
autoInjectEnv: false
allowedExternalPaths:
  - /srv/shared
schedulerIntervalSecs: 30
logFormat: json
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(
            config.database_path,
            PathBuf::from("/var/lib/stackpilot/db.sqlite")
        );
        assert_eq!(config.projects_directory, "/app/data/projects:/srv/projects");
        assert!(!config.auto_inject_env);
        assert_eq!(config.allowed_external_paths, vec!["/srv/shared"]);
        assert_eq!(config.scheduler_interval_secs, 30);
        assert_eq!(config.git_timeout_secs, 120);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_relative_external_path_rejected() {
        let err = load_config_from_str("allowedExternalPaths: [shared]").unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(load_config_from_str("schedulerIntervalSecs: 0").is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/stackpilot.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
