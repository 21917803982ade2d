//! Git repository records: CRUD operations for the `git_repositories` table.

use rusqlite::{params, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{GitAuthType, GitRepository};

struct RepositoryRow {
    id: String,
    name: String,
    url: String,
    auth_type: String,
    username: Option<String>,
    token: Option<String>,
    ssh_key_path: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RepositoryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            url: row.get("url")?,
            auth_type: row.get("auth_type")?,
            username: row.get("username")?,
            token: row.get("token")?,
            ssh_key_path: row.get("ssh_key_path")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_repository(self) -> Result<GitRepository, DatabaseError> {
        let auth_type = self
            .auth_type
            .parse::<GitAuthType>()
            .map_err(|reason| DatabaseError::Decode {
                column: "auth_type",
                reason,
            })?;

        Ok(GitRepository {
            id: self.id,
            name: self.name,
            url: self.url,
            auth_type,
            username: self.username,
            token: self.token,
            ssh_key_path: self.ssh_key_path,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

pub fn insert(db: &Database, repo: &GitRepository) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO git_repositories (id, name, url, auth_type, username, token, ssh_key_path,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                repo.id,
                repo.name,
                repo.url,
                repo.auth_type.as_str(),
                repo.username,
                repo.token,
                repo.ssh_key_path,
                format_timestamp(&repo.created_at),
                format_timestamp(&repo.updated_at),
            ],
        )?;
        Ok(())
    })
}

pub fn update(db: &Database, repo: &GitRepository) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE git_repositories SET name=?2, url=?3, auth_type=?4, username=?5, token=?6,
             ssh_key_path=?7, updated_at=?8 WHERE id=?1",
            params![
                repo.id,
                repo.name,
                repo.url,
                repo.auth_type.as_str(),
                repo.username,
                repo.token,
                repo.ssh_key_path,
                format_timestamp(&repo.updated_at),
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<GitRepository>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM git_repositories WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], RepositoryRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(RepositoryRow::into_repository).transpose()
}

pub fn list_all(db: &Database) -> Result<Vec<GitRepository>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM git_repositories ORDER BY name ASC")?;
        let rows = stmt
            .query_map([], RepositoryRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(RepositoryRow::into_repository).collect()
}

/// Deletes a repository. Syncs referencing it are removed by the foreign key cascade.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM git_repositories WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    })
}
