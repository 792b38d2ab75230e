//! Logging setup
//!
//! Logs go to stderr, or to `log.file` when configured, filtered by
//! `log.level` for the tandem crates and the session event target.

use std::fs::OpenOptions;

use tandem_core::remote::MULTIPLAYER_EVENT_TARGET;
use tandem_core::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Filter directives for a level
fn filter_directives(level: &str) -> String {
    format!(
        "tandem_core={level},tandem_cli={level},{target}={level}",
        level = level,
        target = MULTIPLAYER_EVENT_TARGET
    )
}

/// Install the global subscriber; a second call is a no-op
pub fn init(config: &Config) {
    let env_filter = EnvFilter::new(filter_directives(&config.log.level));

    let Some(ref log_path) = config.log.file else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    // Initialize file-based logging (ignore error if already initialized)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging to {:?}", log_path);
}
