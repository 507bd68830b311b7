//! Workspace
//!
//! The `Workspace` is the explicitly constructed entry point to local data.
//! It owns:
//! - the configuration
//! - the project registry (`user.db`)
//! - the project databases opened so far
//!
//! Local edits go through the workspace so that the registry's `updated_at`
//! moves with every change to a project's data, which is what sync
//! eligibility is computed from.
//!
//! ## Usage
//!
//! ```ignore
//! let mut workspace = Workspace::open(Config::load()?)?;
//! let project = workspace.create_project("Ruth", &[source, target])?;
//!
//! workspace.save_links(&project.id, &[link])?;
//! let index = workspace.open_index(&project.id, AlignmentSide::Source)?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::PivotWordIndex;
use crate::models::{AlignmentSide, Corpus, Link, Project, ProjectLocation, Word};
use crate::storage::{ProjectDatabase, ProjectRegistry, StorageError};

/// Local state of every project the user can see
pub struct Workspace {
    config: Config,
    registry: ProjectRegistry,
    databases: HashMap<String, ProjectDatabase>,
}

impl Workspace {
    /// Open the workspace rooted at `config.data_dir`
    pub fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|source| StorageError::CreateDirectory {
            path: config.data_dir.clone(),
            source,
        })?;
        let registry = ProjectRegistry::open(&config)?;
        debug!(data_dir = ?config.data_dir, "Opened workspace");
        Ok(Self {
            config,
            registry,
            databases: HashMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    // ==================== Projects ====================

    /// Every registered project, without corpora
    pub fn projects(&self) -> Result<Vec<Project>> {
        self.registry.list()
    }

    /// A registered project, without corpora
    pub fn project(&self, id: &str) -> Result<Project> {
        self.registry
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("project '{}'", id)))
    }

    /// A registered project with its corpus metadata loaded
    ///
    /// Projects that only exist remotely come back without corpora.
    pub fn hydrated_project(&mut self, id: &str) -> Result<Project> {
        let mut project = self.project(id)?;
        if self.has_local_data(id) {
            project.corpora = self.database(id)?.corpora().corpora()?;
        }
        Ok(project)
    }

    /// Create a LOCAL project and persist its corpora
    pub fn create_project(&mut self, name: &str, corpora: &[Corpus]) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(Error::validation("project name must not be blank"));
        }
        let mut project = Project::new(name.trim());
        {
            let db = self.database(&project.id)?;
            for corpus in corpora {
                db.corpora().save_corpus(corpus)?;
            }
            project.corpora = db.corpora().corpora()?;
        }
        self.registry.upsert(&project)?;
        info!(project = %project.id, name = %project.name, "Created project");
        Ok(project)
    }

    /// Write registry fields of a project
    pub fn update_project(&self, project: &Project) -> Result<()> {
        self.registry.upsert(project)
    }

    /// Remove local data and the registry entry of a project
    pub fn delete_project(&mut self, id: &str) -> Result<()> {
        self.destroy_local_data(id)?;
        self.registry.remove(id)?;
        info!(project = id, "Deleted project");
        Ok(())
    }

    // ==================== Databases ====================

    /// Whether a project database exists on disk (or is open)
    pub fn has_local_data(&self, id: &str) -> bool {
        self.databases.contains_key(id) || self.config.project_db_path(id).exists()
    }

    /// The open database of a project, opening or creating it on demand
    pub fn database(&mut self, id: &str) -> Result<&mut ProjectDatabase> {
        if !self.databases.contains_key(id) {
            let db = ProjectDatabase::open(&self.config, id)?;
            self.databases.insert(id.to_string(), db);
        }
        self.databases
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("project database '{}'", id)))
    }

    pub fn close_database(&mut self, id: &str) -> Result<()> {
        if let Some(db) = self.databases.remove(id) {
            db.close()?;
        }
        Ok(())
    }

    /// Close and delete the database file and chunk files of a project
    pub fn destroy_local_data(&mut self, id: &str) -> Result<()> {
        self.close_database(id)?;
        ProjectDatabase::destroy(&self.config, id)
    }

    // ==================== Local edits ====================

    /// Save links and record the change on the project
    pub fn save_links(&mut self, id: &str, links: &[Link]) -> Result<usize> {
        let mut project = self.editable_project(id)?;
        let saved = self.database(id)?.links().save(links)?;
        self.touch(&mut project, saved)?;
        Ok(saved)
    }

    pub fn remove_links(&mut self, id: &str, link_ids: &[String]) -> Result<usize> {
        let mut project = self.editable_project(id)?;
        let removed = self.database(id)?.links().remove(link_ids)?;
        self.touch(&mut project, removed)?;
        Ok(removed)
    }

    /// Bulk-import links (journaled as BULK_INSERT chunks)
    pub fn import_links(&mut self, id: &str, links: &[Link]) -> Result<usize> {
        let mut project = self.editable_project(id)?;
        let imported = self.database(id)?.links().bulk_import(links)?;
        self.touch(&mut project, imported)?;
        Ok(imported)
    }

    pub fn save_corpus(&mut self, id: &str, corpus: &Corpus) -> Result<()> {
        let mut project = self.editable_project(id)?;
        self.database(id)?.corpora().save_corpus(corpus)?;
        self.touch(&mut project, 1)
    }

    /// Edit words; flags their corpora for the next sync
    pub fn update_words(&mut self, id: &str, words: &[Word]) -> Result<usize> {
        let mut project = self.editable_project(id)?;
        let updated = self.database(id)?.corpora().update_words(words)?;
        self.touch(&mut project, updated)?;
        Ok(updated)
    }

    fn editable_project(&self, id: &str) -> Result<Project> {
        let project = self.project(id)?;
        if project.location == ProjectLocation::Remote {
            return Err(Error::validation(format!(
                "project '{}' only exists on the server; download it first",
                id
            )));
        }
        Ok(project)
    }

    fn touch(&self, project: &mut Project, changes: usize) -> Result<()> {
        if changes > 0 {
            project.touch();
            self.registry.upsert(project)?;
        }
        Ok(())
    }

    // ==================== Index ====================

    /// Build a pivot-word index of one side of a project
    ///
    /// The index is seeded with the current links and follows every later
    /// change made through this workspace. Must be called from within a
    /// tokio runtime.
    pub fn open_index(&mut self, id: &str, side: AlignmentSide) -> Result<Arc<PivotWordIndex>> {
        self.project(id)?;
        let db = self.database(id)?;

        let mut corpora = db.corpora().corpora()?;
        corpora.retain(|c| c.side == side);
        for corpus in &mut corpora {
            corpus.words = db.corpora().words(&corpus.id)?;
        }

        let index = PivotWordIndex::spawn(side, &corpora);
        index.seed(&db.links().all_links()?);
        db.add_listener(index.clone());
        debug!(project = id, side = %side, corpora = corpora.len(), "Opened pivot word index");
        Ok(index)
    }

    /// Close every open database and the registry
    pub fn close(self) -> Result<()> {
        for (_, db) in self.databases {
            db.close()?;
        }
        self.registry.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PivotWordSort;
    use crate::models::Language;
    use crate::reference::Reference;
    use tempfile::TempDir;

    fn workspace(temp: &TempDir) -> Workspace {
        Workspace::open(Config::with_data_dir(temp.path())).unwrap()
    }

    fn corpus(id: &str, side: AlignmentSide, texts: &[&str]) -> Corpus {
        let mut corpus = Corpus::new(id, id, side, Language::new("eng"));
        corpus.words = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Word::new(Reference::word(8, 1, 1, i as u16 + 1).unwrap(), id, side, *text))
            .collect();
        corpus
    }

    fn r(w: u16) -> Reference {
        Reference::word(8, 1, 1, w).unwrap()
    }

    #[test]
    fn test_create_project_registers_and_persists_corpora() {
        let temp = TempDir::new().unwrap();
        let mut ws = workspace(&temp);

        let project = ws
            .create_project(
                "Ruth",
                &[
                    corpus("src", AlignmentSide::Source, &["In", "the", "days"]),
                    corpus("tgt", AlignmentSide::Target, &["Es", "war"]),
                ],
            )
            .unwrap();

        assert_eq!(project.location, ProjectLocation::Local);
        assert_eq!(project.corpora.len(), 2);
        assert!(ws.has_local_data(&project.id));

        let hydrated = ws.hydrated_project(&project.id).unwrap();
        assert_eq!(hydrated.corpora.len(), 2);
        assert_eq!(ws.projects().unwrap().len(), 1);
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut ws = workspace(&temp);
        assert!(matches!(ws.create_project("  ", &[]), Err(Error::Validation(_))));
    }

    #[test]
    fn test_edits_touch_project() {
        let temp = TempDir::new().unwrap();
        let mut ws = workspace(&temp);
        let project = ws
            .create_project(
                "Ruth",
                &[
                    corpus("src", AlignmentSide::Source, &["Love"]),
                    corpus("tgt", AlignmentSide::Target, &["Liebe"]),
                ],
            )
            .unwrap();

        let mut synced = project.clone();
        synced.location = ProjectLocation::Synced;
        synced.last_sync_time = synced.updated_at + 1_000_000;
        ws.update_project(&synced).unwrap();
        assert!(!ws.hydrated_project(&project.id).unwrap().is_sync_eligible());

        // An edit after the last sync makes the project eligible again
        let mut stored = ws.project(&project.id).unwrap();
        stored.updated_at = 0;
        stored.last_sync_time = 1;
        ws.update_project(&stored).unwrap();
        ws.save_links(&project.id, &[Link::with_id("l1", vec![r(1)], vec![r(1)])])
            .unwrap();
        assert!(ws.project(&project.id).unwrap().is_sync_eligible());
    }

    #[test]
    fn test_remote_projects_are_read_only() {
        let temp = TempDir::new().unwrap();
        let mut ws = workspace(&temp);
        let mut project = Project::with_id("remote-1", "Esther");
        project.location = ProjectLocation::Remote;
        ws.update_project(&project).unwrap();

        let err = ws
            .save_links("remote-1", &[Link::with_id("l1", vec![r(1)], vec![])])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!ws.has_local_data("remote-1"));
    }

    #[test]
    fn test_delete_project() {
        let temp = TempDir::new().unwrap();
        let mut ws = workspace(&temp);
        let project = ws.create_project("Ruth", &[]).unwrap();

        ws.delete_project(&project.id).unwrap();
        assert!(!ws.has_local_data(&project.id));
        assert!(matches!(ws.project(&project.id), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_index_follows_workspace_edits() {
        let temp = TempDir::new().unwrap();
        let mut ws = workspace(&temp);
        let project = ws
            .create_project(
                "Ruth",
                &[
                    corpus("src", AlignmentSide::Source, &["Love", "love", "faith"]),
                    corpus("tgt", AlignmentSide::Target, &["Liebe", "Liebe", "Glaube"]),
                ],
            )
            .unwrap();
        ws.save_links(&project.id, &[Link::with_id("l1", vec![r(1)], vec![r(1)])])
            .unwrap();

        let index = ws.open_index(&project.id, AlignmentSide::Source).unwrap();
        ws.save_links(&project.id, &[Link::with_id("l2", vec![r(2)], vec![r(2)])])
            .unwrap();
        index.wait_until_idle().await;

        let love = index.pivot_word("love").unwrap();
        assert_eq!(love.frequency, 2);
        assert_eq!(love.aligned_links, 2);
        assert_eq!(index.pivot_words(PivotWordSort::Text).len(), 2);
    }
}
