//! Config command handlers

use anyhow::{bail, Context, Result};

use tally_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => output.json(&config),
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:          {}", config.data_dir.display());
            println!(
                "  user_id:           {}",
                config.user_id.as_deref().unwrap_or("(not set)")
            );
            println!("  sync_enabled:      {}", config.sync_enabled);
            println!("  remote_path:       {}", config.remote_store_path().display());
            println!(
                "  log_file:          {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  debounce_ms:       {}", config.sync.debounce_ms);
            println!("  echo_window_ms:    {}", config.sync.echo_window_ms);
            println!("  commit_timeout_ms: {}", config.sync.commit_timeout_ms);
            println!("  load_timeout_ms:   {}", config.sync.load_timeout_ms);
            println!("  editor_writes:     {}", config.sync.editor_writes);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";

    match key {
        "data_dir" => config.data_dir = value.into(),
        "user_id" => config.user_id = (!unset).then(|| value.to_string()),
        "sync_enabled" => {
            config.sync_enabled = value
                .parse()
                .context("Invalid value for sync_enabled. Use 'true' or 'false'.")?;
        }
        "remote_path" => config.remote_path = (!unset).then(|| value.into()),
        "log_file" => config.log_file = (!unset).then(|| value.into()),
        "debounce_ms" => config.sync.debounce_ms = parse_ms(key, value)?,
        "echo_window_ms" => config.sync.echo_window_ms = parse_ms(key, value)?,
        "commit_timeout_ms" => config.sync.commit_timeout_ms = parse_ms(key, value)?,
        "load_timeout_ms" => config.sync.load_timeout_ms = parse_ms(key, value)?,
        "editor_writes" => {
            config.sync.editor_writes = value
                .parse()
                .context("Invalid value for editor_writes. Use 'true' or 'false'.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, user_id, sync_enabled, remote_path, log_file, \
                 debounce_ms, echo_window_ms, commit_timeout_ms, load_timeout_ms, editor_writes",
                key
            );
        }
    }
    Ok(())
}

fn parse_ms(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("Invalid value for {}. Use a number of milliseconds.", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();
        apply(&mut config, "user_id", "alice").unwrap();
        apply(&mut config, "sync_enabled", "true").unwrap();
        apply(&mut config, "remote_path", "/shared/cloud.json").unwrap();
        apply(&mut config, "debounce_ms", "250").unwrap();
        apply(&mut config, "editor_writes", "false").unwrap();

        assert_eq!(config.user_id.as_deref(), Some("alice"));
        assert!(config.sync_enabled);
        assert_eq!(config.remote_path, Some(PathBuf::from("/shared/cloud.json")));
        assert_eq!(config.sync.debounce_ms, 250);
        assert!(!config.sync.editor_writes);
    }

    #[test]
    fn test_apply_unsets_optional_values() {
        let mut config = Config::default();
        apply(&mut config, "user_id", "alice").unwrap();
        apply(&mut config, "user_id", "none").unwrap();
        assert!(config.user_id.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply(&mut config, "sync_enabled", "maybe").is_err());
        assert!(apply(&mut config, "debounce_ms", "soon").is_err());
        assert!(apply(&mut config, "colour", "blue").is_err());
    }
}
