//! alignsync CLI
//!
//! Command-line interface for alignsync - alignment projects, links and sync.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use alignsync_core::{AlignmentSide, Config, LinkStatus, PivotWordSort};

mod commands;
mod output;
mod prompt;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "alignsync")]
#[command(about = "alignsync - Word alignment projects with offline-first sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Import links from an alignment file
    Import {
        /// Project ID (full or prefix)
        project: String,
        /// Alignment file (JSON)
        file: PathBuf,
        /// Maximum number of problems to report
        #[arg(long, default_value_t = 20)]
        max_errors: usize,
        /// Only check the file, import nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Export links to an alignment file
    Export {
        /// Project ID (full or prefix)
        project: String,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Inspect and edit alignment links
    Link {
        #[command(subcommand)]
        command: LinkCommands,
    },
    /// Pivot words (concordance) of one side of a project
    Words {
        /// Project ID (full or prefix)
        project: String,
        #[arg(short, long, value_enum, default_value_t = SideArg::Sources)]
        side: SideArg,
        #[arg(long, value_enum, default_value_t = SortArg::Text)]
        sort: SortArg,
        /// Only words that appear in at least one link
        #[arg(long)]
        aligned: bool,
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },
    /// Show pending changes that the next sync will send
    Journal {
        /// Project ID (full or prefix)
        project: String,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Upload local changes and pull the server's links
    Sync {
        /// Project ID (full or prefix); all eligible projects if omitted
        project: Option<String>,
    },
    /// Publish a local project to the server
    Publish {
        /// Project ID (full or prefix)
        project: String,
    },
    /// Remove a project from the server and keep it locally
    Unpublish {
        /// Project ID (full or prefix)
        project: String,
    },
    /// Download a project from the server
    Download {
        /// Project ID (full or prefix)
        project: String,
    },
    /// Refresh the project list from the server
    Refresh,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show status (data location, server, projects)
    Status,
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// List all projects
    #[command(alias = "ls")]
    List,
    /// Create a new local project
    #[command(alias = "add")]
    Create {
        /// Project name
        name: String,
        /// Corpus file (JSON with `corpus` and `tokens`); may be repeated
        #[arg(short, long)]
        corpus: Vec<PathBuf>,
    },
    /// Show project details
    Show {
        /// Project ID (full or prefix)
        id: String,
    },
    /// Delete a project's local data and registry entry
    #[command(alias = "rm")]
    Delete {
        /// Project ID (full or prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum LinkCommands {
    /// List links in id order
    #[command(alias = "ls")]
    List {
        /// Project ID (full or prefix)
        project: String,
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show a link
    Show {
        /// Project ID (full or prefix)
        project: String,
        /// Link ID
        id: String,
    },
    /// Find links by word or verse reference
    Find {
        /// Project ID (full or prefix)
        project: String,
        /// Encoded reference (11-digit word or 8-digit verse)
        reference: String,
        #[arg(short, long, value_enum, default_value_t = SideArg::Sources)]
        side: SideArg,
    },
    /// Set the status of a link
    Status {
        /// Project ID (full or prefix)
        project: String,
        /// Link ID
        id: String,
        #[arg(value_enum)]
        status: StatusArg,
    },
    /// Delete a link
    #[command(alias = "rm")]
    Delete {
        /// Project ID (full or prefix)
        project: String,
        /// Link ID
        id: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, server_url, request_timeout_secs,
        /// bulk_chunk_size, upload_chunk_size, token_chunk_size)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    Sources,
    Targets,
}

impl From<SideArg> for AlignmentSide {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Sources => AlignmentSide::Source,
            SideArg::Targets => AlignmentSide::Target,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Text,
    Frequency,
    Aligned,
}

impl From<SortArg> for PivotWordSort {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Text => PivotWordSort::Text,
            SortArg::Frequency => PivotWordSort::Frequency,
            SortArg::Aligned => PivotWordSort::AlignedLinks,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Created,
    Approved,
    Rejected,
    NeedsReview,
}

impl From<StatusArg> for LinkStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Created => LinkStatus::Created,
            StatusArg::Approved => LinkStatus::Approved,
            StatusArg::Rejected => LinkStatus::Rejected,
            StatusArg::NeedsReview => LinkStatus::NeedsReview,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    match run(cli, &output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(hint) = recovery_hint(&e) {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Recovery suggestion of the first core error in the chain
fn recovery_hint(error: &anyhow::Error) -> Option<&'static str> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<alignsync_core::Error>())
        .and_then(alignsync_core::Error::recovery_suggestion)
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(Config::config_file_path);

    // Config commands must work even when the config file is broken
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), &config_path, output);
    }

    let config = Config::load_from_path(&config_path).context("Failed to load configuration")?;

    match cli.command {
        Commands::Project { command } => handle_project_command(command, config, output),
        Commands::Import {
            project,
            file,
            max_errors,
            dry_run,
        } => commands::transfer::import(config, &project, &file, max_errors, dry_run, output),
        Commands::Export { project, output: path } => {
            commands::transfer::export(config, &project, path.as_deref(), output)
        }
        Commands::Link { command } => handle_link_command(command, config, output),
        Commands::Words {
            project,
            side,
            sort,
            aligned,
            limit,
        } => {
            commands::words::list(config, &project, side.into(), sort.into(), aligned, limit, output)
                .await
        }
        Commands::Journal { project, limit } => {
            commands::journal::show(config, &project, limit, output)
        }
        Commands::Sync { project } => commands::sync::sync(config, project.as_deref(), output).await,
        Commands::Publish { project } => commands::sync::publish(config, &project, output).await,
        Commands::Unpublish { project } => {
            commands::sync::unpublish(config, &project, output).await
        }
        Commands::Download { project } => {
            commands::sync::download(config, &project, output).await
        }
        Commands::Refresh => commands::sync::refresh(config, output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Status => commands::status::show(config, output),
    }
}

fn handle_project_command(command: ProjectCommands, config: Config, output: &Output) -> Result<()> {
    match command {
        ProjectCommands::List => commands::project::list(config, output),
        ProjectCommands::Create { name, corpus } => {
            commands::project::create(config, &name, &corpus, output)
        }
        ProjectCommands::Show { id } => commands::project::show(config, &id, output),
        ProjectCommands::Delete { id } => commands::project::delete(config, &id, output),
    }
}

fn handle_link_command(command: LinkCommands, config: Config, output: &Output) -> Result<()> {
    match command {
        LinkCommands::List {
            project,
            limit,
            offset,
        } => commands::link::list(config, &project, limit, offset, output),
        LinkCommands::Show { project, id } => commands::link::show(config, &project, &id, output),
        LinkCommands::Find {
            project,
            reference,
            side,
        } => commands::link::find(config, &project, &reference, side.into(), output),
        LinkCommands::Status {
            project,
            id,
            status,
        } => commands::link::set_status(config, &project, &id, status.into(), output),
        LinkCommands::Delete { project, id } => {
            commands::link::delete(config, &project, &id, output)
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: &std::path::Path,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Log to stderr, filtered by `ALIGNSYNC_LOG` (default: warnings only)
fn init_logging() {
    let env_filter = EnvFilter::try_from_env("ALIGNSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
