//! Versioned schema for the store.
//!
//! The applied version is tracked in `_migrations`. Each step runs in its
//! own transaction together with its bookkeeping row.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "projects",
        sql: include_str!("sql/001_create_projects.sql"),
    },
    Step {
        version: 2,
        name: "git_repositories",
        sql: include_str!("sql/002_create_git_repositories.sql"),
    },
    Step {
        version: 3,
        name: "gitops_syncs",
        sql: include_str!("sql/003_create_gitops_syncs.sql"),
    },
];

fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |r| {
        r.get(0)
    })?)
}

/// Brings the schema on `conn` up to the latest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;

    for step in STEPS.iter().filter(|s| s.version > current) {
        log::info!("Applying schema v{} ({})", step.version, step.name);

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(step.sql).map_err(|e| DatabaseError::Migration {
            version: step.version,
            reason: e.to_string(),
        })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![step.version, step.name],
        )?;
        tx.commit()?;
    }

    Ok(())
}
