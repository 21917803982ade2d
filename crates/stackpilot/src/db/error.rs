use std::path::PathBuf;
use thiserror::Error;

/// Failures of the project/sync store.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored column no longer maps onto its Rust type, e.g. an unknown
    /// status string written by a newer build.
    #[error("Cannot decode column '{column}': {reason}")]
    Decode { column: &'static str, reason: String },

    #[error("Database connection lock poisoned")]
    LockPoisoned,
}
