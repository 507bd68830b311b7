//! Project registry and user preferences
//!
//! Stored in the user-scope database (`user.db`). The registry knows every
//! project the user can see, local or remote, together with its location
//! and sync timestamps. Corpus data lives in the project databases.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::models::Project;
use crate::storage::schema::{init_user_schema, needs_init};
use crate::storage::StorageError;

/// The user-scope registry database
pub struct ProjectRegistry {
    conn: Connection,
}

const PROJECT_COLUMNS: &str = "id, name, members, location, server_state, created_at, updated_at,
     last_sync_time, server_updated_at, last_sync_server_time";

impl ProjectRegistry {
    /// Open or create `user.db` under the data directory
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_at(&config.user_db_path())
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory registry (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        if needs_init(&conn) {
            init_user_schema(&conn)?;
        }
        Ok(Self { conn })
    }

    // ==================== Projects ====================

    /// All registered projects ordered by name
    pub fn list(&self) -> Result<Vec<Project>> {
        let sql = format!("SELECT {} FROM projects ORDER BY name, id", PROJECT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], project_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ProjectRow::into_project).collect()
    }

    pub fn get(&self, id: &str) -> Result<Option<Project>> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
        let row = self.conn.query_row(&sql, [id], project_row).optional()?;
        row.map(ProjectRow::into_project).transpose()
    }

    /// Insert or update a project
    pub fn upsert(&self, project: &Project) -> Result<()> {
        let members = serde_json::to_string(&project.members)?;
        self.conn.execute(
            "INSERT INTO projects (id, name, members, location, server_state, created_at, updated_at,
                                   last_sync_time, server_updated_at, last_sync_server_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 name = ?2, members = ?3, location = ?4, server_state = ?5, updated_at = ?7,
                 last_sync_time = ?8, server_updated_at = ?9, last_sync_server_time = ?10",
            params![
                project.id,
                project.name,
                members,
                project.location.as_str(),
                project.server_state.map(|s| s.as_str()),
                project.created_at,
                project.updated_at,
                project.last_sync_time,
                project.server_updated_at,
                project.last_sync_server_time
            ],
        )?;
        debug!(project = %project.id, location = %project.location, "Registered project");
        Ok(())
    }

    /// Unregister a project; returns whether it existed
    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    // ==================== Preferences ====================

    pub fn preference(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM preferences WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn preferences(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM preferences ORDER BY key")?;
        let prefs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(prefs)
    }

    /// Close the connection, reporting any pending error
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

struct ProjectRow {
    id: String,
    name: String,
    members: String,
    location: String,
    server_state: Option<String>,
    created_at: i64,
    updated_at: i64,
    last_sync_time: i64,
    server_updated_at: i64,
    last_sync_server_time: i64,
}

impl ProjectRow {
    fn into_project(self) -> Result<Project> {
        Ok(Project {
            id: self.id,
            name: self.name,
            members: serde_json::from_str(&self.members)?,
            location: self.location.parse()?,
            server_state: self.server_state.map(|s| s.parse()).transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_sync_time: self.last_sync_time,
            server_updated_at: self.server_updated_at,
            last_sync_server_time: self.last_sync_server_time,
            corpora: Vec::new(),
        })
    }
}

fn project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        name: row.get(1)?,
        members: row.get(2)?,
        location: row.get(3)?,
        server_state: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        last_sync_time: row.get(7)?,
        server_updated_at: row.get(8)?,
        last_sync_server_time: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProjectLocation, ProjectState};

    #[test]
    fn test_upsert_and_get() {
        let registry = ProjectRegistry::open_in_memory().unwrap();
        let mut project = Project::with_id("p1", "Genesis");
        project.members = vec!["ana".into(), "ben".into()];
        registry.upsert(&project).unwrap();

        let stored = registry.get("p1").unwrap().unwrap();
        assert_eq!(stored, project);

        project.location = ProjectLocation::Synced;
        project.server_state = Some(ProjectState::Published);
        project.last_sync_time = 42;
        registry.upsert(&project).unwrap();

        let stored = registry.get("p1").unwrap().unwrap();
        assert_eq!(stored.location, ProjectLocation::Synced);
        assert_eq!(stored.server_state, Some(ProjectState::Published));
        assert_eq!(stored.last_sync_time, 42);
    }

    #[test]
    fn test_list_is_sorted_by_name() {
        let registry = ProjectRegistry::open_in_memory().unwrap();
        registry.upsert(&Project::with_id("b", "Ruth")).unwrap();
        registry.upsert(&Project::with_id("a", "Esther")).unwrap();

        let names: Vec<String> = registry.list().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Esther", "Ruth"]);
    }

    #[test]
    fn test_remove() {
        let registry = ProjectRegistry::open_in_memory().unwrap();
        registry.upsert(&Project::with_id("p1", "Jonah")).unwrap();
        assert!(registry.remove("p1").unwrap());
        assert!(!registry.remove("p1").unwrap());
        assert!(registry.get("p1").unwrap().is_none());
    }

    #[test]
    fn test_preferences() {
        let registry = ProjectRegistry::open_in_memory().unwrap();
        assert!(registry.preference("current_project").unwrap().is_none());

        registry.set_preference("current_project", "p1").unwrap();
        registry.set_preference("current_project", "p2").unwrap();
        registry.set_preference("alignment_view", "paragraph").unwrap();

        assert_eq!(registry.preference("current_project").unwrap().as_deref(), Some("p2"));
        assert_eq!(registry.preferences().unwrap().len(), 2);
    }

    #[test]
    fn test_file_backed_registry_persists() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = Config::with_data_dir(temp.path());
        {
            let registry = ProjectRegistry::open(&config).unwrap();
            registry.upsert(&Project::with_id("p1", "Amos")).unwrap();
            registry.close().unwrap();
        }
        let registry = ProjectRegistry::open(&config).unwrap();
        assert_eq!(registry.list().unwrap().len(), 1);
    }
}
