//! Project repository: CRUD operations for the `projects` table.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{Project, ProjectStatus};

/// A raw project row from the database.
#[derive(Debug, Clone)]
struct ProjectRow {
    id: String,
    name: String,
    dir_name: String,
    path: String,
    status: String,
    service_count: u32,
    running_count: u32,
    custom_files: String,
    gitops_managed_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            dir_name: row.get("dir_name")?,
            path: row.get("path")?,
            status: row.get("status")?,
            service_count: row.get("service_count")?,
            running_count: row.get("running_count")?,
            custom_files: row.get("custom_files")?,
            gitops_managed_by: row.get("gitops_managed_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_project(self) -> Result<Project, DatabaseError> {
        let status = self
            .status
            .parse::<ProjectStatus>()
            .map_err(|reason| DatabaseError::Decode {
                column: "status",
                reason,
            })?;
        let custom_files: Vec<String> =
            serde_json::from_str(&self.custom_files).map_err(|e| DatabaseError::Decode {
                column: "custom_files",
                reason: e.to_string(),
            })?;

        Ok(Project {
            id: self.id,
            name: self.name,
            dir_name: self.dir_name,
            path: PathBuf::from(self.path),
            status,
            service_count: self.service_count,
            running_count: self.running_count,
            custom_files,
            gitops_managed_by: self.gitops_managed_by,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

fn encode_custom_files(files: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(files).map_err(|e| DatabaseError::Decode {
        column: "custom_files",
        reason: e.to_string(),
    })
}

/// Sort order for the database-backed listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectOrder {
    #[default]
    NameAsc,
    NameDesc,
    CreatedDesc,
}

impl ProjectOrder {
    fn sql(&self) -> &'static str {
        match self {
            ProjectOrder::NameAsc => "name COLLATE NOCASE ASC",
            ProjectOrder::NameDesc => "name COLLATE NOCASE DESC",
            ProjectOrder::CreatedDesc => "created_at DESC",
        }
    }
}

/// Query filter parameters for project listing.
#[derive(Debug, Default, Clone)]
pub struct ProjectFilter {
    /// Case-insensitive substring match on the name.
    pub search: Option<String>,
    pub gitops_managed: Option<bool>,
    pub order: ProjectOrder,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new project row.
pub fn insert(db: &Database, project: &Project) -> Result<(), DatabaseError> {
    let custom_files = encode_custom_files(&project.custom_files)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO projects (id, name, dir_name, path, status, service_count, running_count,
             custom_files, gitops_managed_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                project.id,
                project.name,
                project.dir_name,
                project.path.to_string_lossy(),
                project.status.as_str(),
                project.service_count,
                project.running_count,
                custom_files,
                project.gitops_managed_by,
                format_timestamp(&project.created_at),
                format_timestamp(&project.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Updates an existing project row. All fields except `id` and `created_at` are overwritten.
pub fn update(db: &Database, project: &Project) -> Result<(), DatabaseError> {
    let custom_files = encode_custom_files(&project.custom_files)?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE projects SET name=?2, dir_name=?3, path=?4, status=?5, service_count=?6,
             running_count=?7, custom_files=?8, gitops_managed_by=?9, updated_at=?10
             WHERE id=?1",
            params![
                project.id,
                project.name,
                project.dir_name,
                project.path.to_string_lossy(),
                project.status.as_str(),
                project.service_count,
                project.running_count,
                custom_files,
                project.gitops_managed_by,
                format_timestamp(&project.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Updates status and container counts.
pub fn update_runtime_state(
    db: &Database,
    id: &str,
    status: ProjectStatus,
    service_count: u32,
    running_count: u32,
    updated_at: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE projects SET status = ?2, service_count = ?3, running_count = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                service_count,
                running_count,
                format_timestamp(updated_at)
            ],
        )?;
        Ok(())
    })
}

/// Updates only the status of a project.
pub fn update_status(
    db: &Database,
    id: &str,
    status: ProjectStatus,
    updated_at: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE projects SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), format_timestamp(updated_at)],
        )?;
        Ok(())
    })
}

/// Updates only the declared service count.
pub fn update_service_count(db: &Database, id: &str, count: u32) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE projects SET service_count = ?2 WHERE id = ?1",
            params![id, count],
        )?;
        Ok(())
    })
}

/// Finds a project by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Project>, DatabaseError> {
    find_one(db, "SELECT * FROM projects WHERE id = ?1", id)
}

/// Finds a project by its directory path.
pub fn find_by_path(db: &Database, path: &Path) -> Result<Option<Project>, DatabaseError> {
    find_one(
        db,
        "SELECT * FROM projects WHERE path = ?1",
        &path.to_string_lossy(),
    )
}

fn find_one(db: &Database, sql: &str, key: &str) -> Result<Option<Project>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query_map(params![key], ProjectRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(ProjectRow::into_project).transpose()
}

/// Returns every project ordered by name.
pub fn list_all(db: &Database) -> Result<Vec<Project>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM projects ORDER BY name COLLATE NOCASE ASC")?;
        let rows = stmt
            .query_map([], ProjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(ProjectRow::into_project).collect()
}

/// Queries projects with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &ProjectFilter) -> Result<(Vec<Project>, u64), DatabaseError> {
    let (rows, total) = db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref search) = filter.search {
            conditions.push(format!(
                "name LIKE ?{} ESCAPE '\\'",
                param_values.len() + 1
            ));
            let escaped = search
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            param_values.push(Box::new(format!("%{}%", escaped)));
        }
        match filter.gitops_managed {
            Some(true) => conditions.push("gitops_managed_by IS NOT NULL".to_string()),
            Some(false) => conditions.push("gitops_managed_by IS NULL".to_string()),
            None => {}
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM projects {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM projects {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
            where_clause,
            filter.order.sql(),
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<ProjectRow> = stmt
            .query_map(params_ref.as_slice(), ProjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })?;

    let projects = rows
        .into_iter()
        .map(ProjectRow::into_project)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((projects, total))
}

/// Deletes a project row. Returns whether a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    })
}

/// Deletes several project rows in one transaction.
pub fn delete_many(db: &Database, ids: &[String]) -> Result<usize, DatabaseError> {
    db.with_transaction(|tx| {
        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        }
        Ok(removed)
    })
}
