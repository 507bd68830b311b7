//! Project command handlers

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use alignsync_core::sync::{CorpusDto, TokenDto};
use alignsync_core::{Config, Corpus, ProjectLocation, Word, Workspace};

use crate::output::Output;
use crate::prompt::confirm;

/// A corpus with its words, as read by `project create --corpus`
#[derive(Debug, Deserialize)]
struct CorpusFile {
    corpus: CorpusDto,
    #[serde(default)]
    tokens: Vec<TokenDto>,
}

/// Open the workspace rooted at the configured data directory
pub fn open_workspace(config: Config) -> Result<Workspace> {
    let data_dir = config.data_dir.clone();
    Workspace::open(config).with_context(|| format!("Failed to open workspace at {:?}", data_dir))
}

/// List all projects
pub fn list(config: Config, output: &Output) -> Result<()> {
    let workspace = open_workspace(config)?;
    let projects = workspace.projects()?;
    output.print_projects(&projects);
    Ok(())
}

/// Create a local project from corpus files
pub fn create(config: Config, name: &str, corpus_files: &[PathBuf], output: &Output) -> Result<()> {
    let corpora = corpus_files
        .iter()
        .map(|path| read_corpus_file(path))
        .collect::<Result<Vec<_>>>()?;

    let mut workspace = open_workspace(config)?;
    let project = workspace
        .create_project(name, &corpora)
        .context("Failed to create project")?;

    output.success(&format!("Created project: {}", project.id));
    output.print_project(&project);
    Ok(())
}

/// Show a single project
pub fn show(config: Config, id: &str, output: &Output) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, id)?;
    let project = workspace.hydrated_project(&id)?;
    output.print_project(&project);
    Ok(())
}

/// Delete a project locally
pub fn delete(config: Config, id: &str, output: &Output) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let id = resolve_id(&workspace, id)?;
    let project = workspace.project(&id)?;

    if output.should_prompt() {
        println!("Delete project: {} - {}", project.id, project.name);
        if project.location == ProjectLocation::Synced {
            println!("The server copy is kept; use `alignsync unpublish` to remove it.");
        }
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    workspace
        .delete_project(&id)
        .context("Failed to delete project")?;
    output.success(&format!("Deleted project: {}", id));
    Ok(())
}

/// Resolve a project ID (full ID or unique prefix)
pub fn resolve_id(workspace: &Workspace, id: &str) -> Result<String> {
    if workspace.registry().get(id)?.is_some() {
        return Ok(id.to_string());
    }

    let projects = workspace.projects()?;
    let matches: Vec<_> = projects.iter().filter(|p| p.id.starts_with(id)).collect();

    match matches.len() {
        0 => bail!("No project found matching: {}", id),
        1 => Ok(matches[0].id.clone()),
        _ => {
            eprintln!("Multiple projects match '{}':", id);
            for project in &matches {
                eprintln!("  {} - {}", project.id, project.name);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

fn read_corpus_file(path: &Path) -> Result<Corpus> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {:?}", path))?;
    parse_corpus(&content).with_context(|| format!("Invalid corpus file: {:?}", path))
}

fn parse_corpus(content: &str) -> Result<Corpus> {
    let file: CorpusFile = serde_json::from_str(content)?;
    let mut corpus = file.corpus.into_corpus();

    for token in file.tokens {
        if token.corpus_id != corpus.id || token.side != corpus.side {
            bail!(
                "token {} belongs to {}/{}, not {}/{}",
                token.id,
                token.side,
                token.corpus_id,
                corpus.side,
                corpus.id
            );
        }
        corpus.words.push(Word::try_from(token)?);
    }
    corpus.words.sort_by(|a, b| a.id.cmp(&b.id));
    corpus.words.dedup_by(|a, b| a.id == b.id);
    Ok(corpus)
}
