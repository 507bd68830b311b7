//! Config command handlers

use std::path::Path;

use anyhow::{bail, Context, Result};

use alignsync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: &Path, output: &Output) -> Result<()> {
    let config = Config::load_from_path(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "server_url": config.server_url,
                    "request_timeout_secs": config.request_timeout_secs,
                    "bulk_chunk_size": config.bulk_chunk_size,
                    "upload_chunk_size": config.upload_chunk_size,
                    "token_chunk_size": config.token_chunk_size
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!(
                "  server_url:           {}",
                config.server_url.as_deref().unwrap_or("(not set)")
            );
            println!("  request_timeout_secs: {}", config.request_timeout_secs);
            println!("  bulk_chunk_size:      {}", config.bulk_chunk_size);
            println!("  upload_chunk_size:    {}", config.upload_chunk_size);
            println!("  token_chunk_size:     {}", config.token_chunk_size);
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, config_path: &Path, output: &Output) -> Result<()> {
    let mut config = Config::load_from_path(config_path).context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.validate()?;

    config
        .save_to_path(config_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "server_url" => {
            config.server_url = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.trim_end_matches('/').to_string())
            };
        }
        "request_timeout_secs" => {
            config.request_timeout_secs = value
                .parse()
                .context("Invalid value for request_timeout_secs. Use a number of seconds.")?;
        }
        "bulk_chunk_size" => {
            config.bulk_chunk_size = parse_size(key, value)?;
        }
        "upload_chunk_size" => {
            config.upload_chunk_size = parse_size(key, value)?;
        }
        "token_chunk_size" => {
            config.token_chunk_size = parse_size(key, value)?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, server_url, request_timeout_secs, \
                 bulk_chunk_size, upload_chunk_size, token_chunk_size",
                key
            );
        }
    }
    Ok(())
}

fn parse_size(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .with_context(|| format!("Invalid value for {}. Use a positive number.", key))
}
