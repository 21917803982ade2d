//! GitOps sync records: CRUD operations for the `gitops_syncs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{GitOpsSync, SyncStatus};

struct SyncRow {
    id: String,
    name: String,
    environment_id: String,
    repository_id: String,
    branch: String,
    compose_path: String,
    project_name: String,
    project_id: Option<String>,
    auto_sync: bool,
    sync_interval: u32,
    last_sync_at: Option<String>,
    last_sync_status: Option<String>,
    last_sync_error: Option<String>,
    last_sync_commit: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SyncRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            environment_id: row.get("environment_id")?,
            repository_id: row.get("repository_id")?,
            branch: row.get("branch")?,
            compose_path: row.get("compose_path")?,
            project_name: row.get("project_name")?,
            project_id: row.get("project_id")?,
            auto_sync: row.get("auto_sync")?,
            sync_interval: row.get("sync_interval")?,
            last_sync_at: row.get("last_sync_at")?,
            last_sync_status: row.get("last_sync_status")?,
            last_sync_error: row.get("last_sync_error")?,
            last_sync_commit: row.get("last_sync_commit")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_sync(self) -> Result<GitOpsSync, DatabaseError> {
        let last_sync_status = self
            .last_sync_status
            .as_deref()
            .map(str::parse::<SyncStatus>)
            .transpose()
            .map_err(|reason| DatabaseError::Decode {
                column: "last_sync_status",
                reason,
            })?;
        let last_sync_at = self
            .last_sync_at
            .as_deref()
            .map(|v| parse_timestamp("last_sync_at", v))
            .transpose()?;

        Ok(GitOpsSync {
            id: self.id,
            name: self.name,
            environment_id: self.environment_id,
            repository_id: self.repository_id,
            branch: self.branch,
            compose_path: self.compose_path,
            project_name: self.project_name,
            project_id: self.project_id,
            auto_sync: self.auto_sync,
            sync_interval: self.sync_interval,
            last_sync_at,
            last_sync_status,
            last_sync_error: self.last_sync_error,
            last_sync_commit: self.last_sync_commit,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

/// Result of one sync attempt, written on every invocation.
#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub at: DateTime<Utc>,
    pub status: SyncStatus,
    pub error: Option<String>,
    /// Only overwrites the stored commit when present.
    pub commit: Option<String>,
}

pub fn insert(db: &Database, sync: &GitOpsSync) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO gitops_syncs (id, name, environment_id, repository_id, branch, compose_path,
             project_name, project_id, auto_sync, sync_interval, last_sync_at, last_sync_status,
             last_sync_error, last_sync_commit, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                sync.id,
                sync.name,
                sync.environment_id,
                sync.repository_id,
                sync.branch,
                sync.compose_path,
                sync.project_name,
                sync.project_id,
                sync.auto_sync,
                sync.sync_interval,
                sync.last_sync_at.as_ref().map(format_timestamp),
                sync.last_sync_status.map(|s| s.as_str()),
                sync.last_sync_error,
                sync.last_sync_commit,
                format_timestamp(&sync.created_at),
                format_timestamp(&sync.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Updates the user-editable fields. `project_id` and the last-sync fields are
/// left alone; they have dedicated writers.
pub fn update_definition(db: &Database, sync: &GitOpsSync) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE gitops_syncs SET name=?2, environment_id=?3, repository_id=?4, branch=?5,
             compose_path=?6, project_name=?7, auto_sync=?8, sync_interval=?9, updated_at=?10
             WHERE id=?1",
            params![
                sync.id,
                sync.name,
                sync.environment_id,
                sync.repository_id,
                sync.branch,
                sync.compose_path,
                sync.project_name,
                sync.auto_sync,
                sync.sync_interval,
                format_timestamp(&sync.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Binds the sync to a project. Only succeeds while no project is bound yet.
/// Returns whether the binding was written.
pub fn bind_project(db: &Database, id: &str, project_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE gitops_syncs SET project_id = ?2 WHERE id = ?1 AND project_id IS NULL",
            params![id, project_id],
        )?;
        Ok(affected > 0)
    })
}

/// Replaces a dangling project binding (the bound project no longer exists).
pub fn rebind_missing_project(
    db: &Database,
    id: &str,
    missing_project_id: &str,
    project_id: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE gitops_syncs SET project_id = ?3 WHERE id = ?1 AND project_id = ?2",
            params![id, missing_project_id, project_id],
        )?;
        Ok(affected > 0)
    })
}

/// Persists the outcome of a sync attempt.
pub fn record_result(db: &Database, id: &str, record: &SyncRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE gitops_syncs SET last_sync_at = ?2, last_sync_status = ?3, last_sync_error = ?4,
             last_sync_commit = COALESCE(?5, last_sync_commit), updated_at = ?2
             WHERE id = ?1",
            params![
                id,
                format_timestamp(&record.at),
                record.status.as_str(),
                record.error,
                record.commit,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<GitOpsSync>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM gitops_syncs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], SyncRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(SyncRow::into_sync).transpose()
}

fn list_where(db: &Database, where_clause: &str) -> Result<Vec<GitOpsSync>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let sql = format!(
            "SELECT * FROM gitops_syncs {} ORDER BY name ASC",
            where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], SyncRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(SyncRow::into_sync).collect()
}

pub fn list_all(db: &Database) -> Result<Vec<GitOpsSync>, DatabaseError> {
    list_where(db, "")
}

/// Syncs with automatic syncing switched on.
pub fn list_auto_sync(db: &Database) -> Result<Vec<GitOpsSync>, DatabaseError> {
    list_where(db, "WHERE auto_sync = 1")
}

/// Deletes a sync and clears the `gitops_managed_by` back-reference of the
/// project it managed. The project itself is kept.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_transaction(|tx| {
        tx.execute(
            "UPDATE projects SET gitops_managed_by = NULL WHERE gitops_managed_by = ?1",
            params![id],
        )?;
        let affected = tx.execute("DELETE FROM gitops_syncs WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    })
}
