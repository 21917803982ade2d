use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackpilotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Project error: {0}")]
    Project(#[from] ProjectError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("GitOps error: {0}")]
    GitOps(#[from] crate::gitops::GitOpsError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors raised by project lifecycle and file operations.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Invalid project name '{0}'")]
    InvalidName(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove project files at '{path}': {source}")]
    RemoveFiles {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path '{0}' is outside the project directory and not in the allowed external paths")]
    PathNotAllowed(PathBuf),

    #[error("Refusing to operate on '{path}': not inside projects root '{root}'")]
    OutsideProjectsRoot { path: PathBuf, root: PathBuf },

    #[error("No compose file found in '{0}'")]
    ComposeFileMissing(PathBuf),

    #[error("Could not allocate a directory for project '{0}'")]
    DirectoryExhausted(String),

    #[error("Deploy failed: {0}")]
    DeployFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

/// Errors reported by the compose and container runtime collaborators.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Failed to parse compose file '{path}': {message}")]
    ParseCompose { path: PathBuf, message: String },

    #[error("No compose file found in '{0}'")]
    ComposeFileNotFound(PathBuf),

    #[error("Project directory '{path}' is outside the projects root '{root}'")]
    OutsideProjectsRoot { path: PathBuf, root: PathBuf },

    #[error("Failed to parse runtime output: {0}")]
    ParseOutput(String),

    #[error("Operation timed out after {0}s")]
    Timeout(u64),

    #[error("Runtime unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StackpilotError>;
