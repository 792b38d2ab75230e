//! Config command handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use tandem_core::Config;

use crate::output::{Output, OutputFormat};

fn effective_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_file_path)
}

fn masked(token: Option<&str>) -> &'static str {
    match token {
        Some(_) => "********",
        None => "(not set)",
    }
}

/// Show current configuration
pub fn show(config_path: Option<&Path>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "server_url": config.server_url,
                    "room_id": config.room_id,
                    "access_token": config.access_token.as_ref().map(|_| "********"),
                    "user": {
                        "id": config.user.id,
                        "name": config.user.name,
                        "color": config.user.color,
                    },
                    "log": {
                        "level": config.log.level,
                        "file": config.log.file,
                    },
                    "session": {
                        "reconnect_delay_ms": config.session.reconnect_delay_ms,
                        "max_reconnect_delay_ms": config.session.max_reconnect_delay_ms,
                        "max_load_attempts": config.session.max_load_attempts,
                        "handshake_timeout_ms": config.session.handshake_timeout_ms,
                        "ping_interval_ms": config.session.ping_interval_ms,
                        "degraded_after_ms": config.session.degraded_after_ms,
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.server_url.as_deref().unwrap_or(""));
        }
        OutputFormat::Human => {
            let not_set = |v: &Option<String>| v.clone().unwrap_or_else(|| "(not set)".to_string());
            println!("Configuration:");
            println!("  server_url:   {}", not_set(&config.server_url));
            println!("  room_id:      {}", config.room_id);
            println!("  access_token: {}", masked(config.access_token.as_deref()));
            println!("  user.id:      {}", not_set(&config.user.id));
            println!("  user.name:    {}", not_set(&config.user.name));
            println!("  user.color:   {}", not_set(&config.user.color));
            println!("  log.level:    {}", config.log.level);
            println!(
                "  log.file:     {}",
                config
                    .log
                    .file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!(
                "  session:      reconnect {}ms (max {}ms), {} load attempts, ping {}ms",
                config.session.reconnect_delay_ms,
                config.session.max_reconnect_delay_ms,
                config.session.max_load_attempts,
                config.session.ping_interval_ms
            );
            println!();
            println!("Config file: {}", effective_path(config_path).display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: &str, value: &str, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    config.set(key, value)?;

    let path = effective_path(config_path);
    config.save_to(&path)?;

    let shown = if key == "access_token" && !value.is_empty() {
        masked(Some(value))
    } else {
        value
    };
    output.success(&format!("Set {} = {}", key, shown));
    Ok(())
}
