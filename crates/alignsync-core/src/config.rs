//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/alignsync/config.toml)
//! 3. Environment variables (ALIGNSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "ALIGNSYNC";

/// Links per BULK_INSERT chunk file
pub const DEFAULT_BULK_CHUNK_SIZE: usize = 10_000;

/// Journal entries per upload request
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 1_000;

/// Tokens per upload request and per download append step
pub const DEFAULT_TOKEN_CHUNK_SIZE: usize = 2_000;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (user.db, project databases, chunk files)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the remote alignment service (optional)
    #[serde(default)]
    pub server_url: Option<String>,

    /// Per-request timeout against the remote service
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Links per BULK_INSERT chunk
    #[serde(default = "default_bulk_chunk_size")]
    pub bulk_chunk_size: usize,

    /// Maximum journal entries sent in one request
    #[serde(default = "default_upload_chunk_size")]
    pub upload_chunk_size: usize,

    /// Tokens per request
    #[serde(default = "default_token_chunk_size")]
    pub token_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            bulk_chunk_size: DEFAULT_BULK_CHUNK_SIZE,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            token_chunk_size: DEFAULT_TOKEN_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (ALIGNSYNC_DATA_DIR, ALIGNSYNC_SERVER_URL, ...)
    /// 2. Config file (~/.config/alignsync/config.toml or ALIGNSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Configuration rooted at `data_dir` with all other values defaulted
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Empty string clears the server
        if let Ok(val) = std::env::var(format!("{}_SERVER_URL", ENV_PREFIX)) {
            self.server_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Some(val) = env_number("REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = val;
        }
        if let Some(val) = env_number("BULK_CHUNK_SIZE")? {
            self.bulk_chunk_size = val;
        }
        if let Some(val) = env_number("UPLOAD_CHUNK_SIZE")? {
            self.upload_chunk_size = val;
        }
        if let Some(val) = env_number("TOKEN_CHUNK_SIZE")? {
            self.token_chunk_size = val;
        }

        self.validate()
    }

    /// Reject chunk sizes that would stall the journal drain
    pub fn validate(&self) -> Result<()> {
        if self.bulk_chunk_size == 0 {
            anyhow::bail!("bulk_chunk_size must be at least 1");
        }
        if self.upload_chunk_size == 0 {
            anyhow::bail!("upload_chunk_size must be at least 1");
        }
        if self.token_chunk_size == 0 {
            anyhow::bail!("token_chunk_size must be at least 1");
        }
        Ok(())
    }

    /// Ensure data directory exists
    pub fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with ALIGNSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("alignsync")
            .join("config.toml")
    }

    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the path to the user-scope database (registry + preferences)
    pub fn user_db_path(&self) -> PathBuf {
        self.data_dir.join("user.db")
    }

    /// Directory holding one SQLite file per project
    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    /// Get the path to a project's database
    pub fn project_db_path(&self, project_id: &str) -> PathBuf {
        self.projects_dir().join(format!("{}.sqlite", project_id))
    }

    /// Directory holding a project's BULK_INSERT chunk files
    pub fn chunk_dir(&self, project_id: &str) -> PathBuf {
        self.data_dir.join("journal_entries").join(project_id)
    }
}

fn env_number<T>(suffix: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let name = format!("{}_{}", ENV_PREFIX, suffix);
    match std::env::var(&name) {
        Ok(val) if !val.trim().is_empty() => {
            let parsed = val
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {}: {:?}", name, val))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("alignsync")
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_bulk_chunk_size() -> usize {
    DEFAULT_BULK_CHUNK_SIZE
}

fn default_upload_chunk_size() -> usize {
    DEFAULT_UPLOAD_CHUNK_SIZE
}

fn default_token_chunk_size() -> usize {
    DEFAULT_TOKEN_CHUNK_SIZE
}
