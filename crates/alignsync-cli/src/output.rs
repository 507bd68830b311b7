//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{Local, TimeZone};
use serde_json::{json, Value};

use alignsync_core::sync::SyncReport;
use alignsync_core::{JournalEntry, Link, PivotWord, Project, ProjectLocation, Reference};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single project with its corpora
    pub fn print_project(&self, project: &Project) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:          {}", project.id);
                println!("Name:        {}", project.name);
                println!("Location:    {}", project.location);
                if let Some(state) = project.server_state {
                    println!("State:       {}", state.as_str());
                }
                if !project.members.is_empty() {
                    println!("Members:     {}", project.members.join(", "));
                }
                println!("Created:     {}", format_millis(project.created_at));
                println!("Updated:     {}", format_millis(project.updated_at));
                println!("Last sync:   {}", format_millis(project.last_sync_time));
                println!(
                    "Needs sync:  {}",
                    if project.is_sync_eligible() { "yes" } else { "no" }
                );

                if !project.corpora.is_empty() {
                    println!();
                    println!("── Corpora ({}) ──", project.corpora.len());
                    for corpus in &project.corpora {
                        let changed = if corpus.updated_since_sync { " *" } else { "" };
                        println!(
                            "[{}] {} - {} ({}){}",
                            corpus.side, corpus.id, corpus.full_name, corpus.language.code, changed
                        );
                    }
                }
            }
            OutputFormat::Json => {
                println!("{}", pretty(&project_json(project)));
            }
            OutputFormat::Quiet => {
                println!("{}", project.id);
            }
        }
    }

    /// Print a list of projects
    pub fn print_projects(&self, projects: &[Project]) {
        match self.format {
            OutputFormat::Human => {
                if projects.is_empty() {
                    println!("No projects found.");
                    return;
                }
                for project in projects {
                    let marker = if project.location != ProjectLocation::Remote
                        && project.is_sync_eligible()
                    {
                        " *"
                    } else {
                        ""
                    };
                    println!(
                        "{} | {:<6} | {}{}",
                        short_id(&project.id),
                        project.location.to_string(),
                        truncate(&project.name, 40),
                        marker
                    );
                }
                println!("\n{} project(s)", projects.len());
            }
            OutputFormat::Json => {
                let projects: Vec<Value> = projects.iter().map(project_json).collect();
                println!("{}", pretty(&Value::Array(projects)));
            }
            OutputFormat::Quiet => {
                for project in projects {
                    println!("{}", project.id);
                }
            }
        }
    }

    /// Print a single link
    pub fn print_link(&self, link: &Link, texts: Option<&(String, String)>) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", link.id);
                println!("Sources:  {}", references(&link.sources));
                println!("Targets:  {}", references(&link.targets));
                if let Some((sources, targets)) = texts {
                    println!("Text:     {} = {}", sources, targets);
                }
                println!("Origin:   {}", link.meta.origin.as_str());
                println!("Status:   {}", link.meta.status.as_str());
            }
            OutputFormat::Json => {
                let mut value = json!(link);
                if let Some((sources, targets)) = texts {
                    value["sourcesText"] = json!(sources);
                    value["targetsText"] = json!(targets);
                }
                println!("{}", pretty(&value));
            }
            OutputFormat::Quiet => {
                println!("{}", link.id);
            }
        }
    }

    /// Print a list of links
    pub fn print_links(&self, links: &[Link]) {
        match self.format {
            OutputFormat::Human => {
                if links.is_empty() {
                    println!("No links found.");
                    return;
                }
                for link in links {
                    println!(
                        "{} | {} | {} | {}",
                        short_id(&link.id),
                        truncate(&references(&link.sources), 30),
                        truncate(&references(&link.targets), 30),
                        link.meta.status.as_str()
                    );
                }
                println!("\n{} link(s)", links.len());
            }
            OutputFormat::Json => {
                println!("{}", pretty(&json!(links)));
            }
            OutputFormat::Quiet => {
                for link in links {
                    println!("{}", link.id);
                }
            }
        }
    }

    /// Print pivot words of one side
    pub fn print_pivot_words(&self, words: &[PivotWord]) {
        match self.format {
            OutputFormat::Human => {
                if words.is_empty() {
                    println!("No words found.");
                    return;
                }
                for word in words {
                    println!(
                        "{:<24} {:>7} {:>7}",
                        truncate(&word.normalized_text, 24),
                        word.frequency,
                        word.aligned_links
                    );
                }
                println!("\n{} word(s)", words.len());
            }
            OutputFormat::Json => {
                println!("{}", pretty(&json!(words)));
            }
            OutputFormat::Quiet => {
                for word in words {
                    println!("{}", word.normalized_text);
                }
            }
        }
    }

    /// Print pending journal entries
    pub fn print_journal(&self, total: usize, entries: &[JournalEntry]) {
        match self.format {
            OutputFormat::Human => {
                if total == 0 {
                    println!("No pending changes.");
                    return;
                }
                for entry in entries {
                    println!(
                        "{} | {:<11} | {} | {}",
                        short_id(&entry.id),
                        entry.entry_type.as_str(),
                        format_millis(entry.date),
                        entry.link_id.as_deref().unwrap_or("-")
                    );
                }
                if entries.len() < total {
                    println!("...");
                }
                println!("\n{} pending change(s)", total);
            }
            OutputFormat::Json => {
                let entries: Vec<Value> = entries
                    .iter()
                    .map(|e| {
                        json!({
                            "id": e.id,
                            "linkId": e.link_id,
                            "type": e.entry_type.as_str(),
                            "date": e.date,
                            "bulkInsertFile": e.bulk_insert_file,
                        })
                    })
                    .collect();
                println!("{}", pretty(&json!({ "pending": total, "entries": entries })));
            }
            OutputFormat::Quiet => {
                println!("{}", total);
            }
        }
    }

    /// Print what a sync operation did
    pub fn print_report(&self, report: &SyncReport) {
        match self.format {
            OutputFormat::Human => {
                if report.tokens_sent > 0 {
                    println!("  Tokens sent:      {}", report.tokens_sent);
                }
                if report.journal_entries_sent > 0 {
                    println!(
                        "  Changes sent:     {} in {} request(s)",
                        report.journal_entries_sent, report.journal_units_sent
                    );
                }
                if report.tokens_received > 0 {
                    println!("  Tokens received:  {}", report.tokens_received);
                }
                if report.links_received > 0 {
                    println!("  Links received:   {}", report.links_received);
                }
                if report.links_changed > 0 {
                    println!("  Links updated:    {}", report.links_changed);
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    json!({
                        "projectId": report.project_id,
                        "tokensSent": report.tokens_sent,
                        "journalEntriesSent": report.journal_entries_sent,
                        "journalUnitsSent": report.journal_units_sent,
                        "tokensReceived": report.tokens_received,
                        "linksReceived": report.links_received,
                        "linksChanged": report.links_changed,
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!("{}", json!({"status": "success", "message": message}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn project_json(project: &Project) -> Value {
    let corpora: Vec<Value> = project
        .corpora
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "fullName": c.full_name,
                "side": c.side,
                "language": c.language,
                "updatedSinceSync": c.updated_since_sync,
            })
        })
        .collect();
    json!({
        "id": project.id,
        "name": project.name,
        "members": project.members,
        "location": project.location,
        "state": project.server_state,
        "createdAt": project.created_at,
        "updatedAt": project.updated_at,
        "lastSyncTime": project.last_sync_time,
        "serverUpdatedAt": project.server_updated_at,
        "syncEligible": project.is_sync_eligible(),
        "corpora": corpora,
    })
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Local time of an epoch-millisecond timestamp; zero means never
pub fn format_millis(millis: i64) -> String {
    if millis <= 0 {
        return "never".to_string();
    }
    match Local.timestamp_millis_opt(millis).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
        None => millis.to_string(),
    }
}

fn references(refs: &[Reference]) -> String {
    refs.iter()
        .map(Reference::human_readable)
        .collect::<Vec<_>>()
        .join(", ")
}

/// First 8 characters of an id
fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
