//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde_json::{json, Value};
use tandem_core::{LocalStore, SessionStatus};

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

    /// Print one session status
    pub fn print_status<S: LocalStore>(&self, room_id: &str, status: &SessionStatus<S>) {
        match self.format {
            OutputFormat::Human => println!("{}", status_line(room_id, status)),
            OutputFormat::Json => println!("{}", status_json(room_id, status)),
            OutputFormat::Quiet => println!("{}", status.name()),
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

fn status_line<S: LocalStore>(room_id: &str, status: &SessionStatus<S>) -> String {
    match status {
        SessionStatus::Loading => format!("[{}] loading", room_id),
        SessionStatus::Error(e) => format!("[{}] error: {}", room_id, e),
        SessionStatus::SyncedRemote { connection, .. } => {
            format!("[{}] synced-remote ({})", room_id, connection)
        }
    }
}

fn status_json<S: LocalStore>(room_id: &str, status: &SessionStatus<S>) -> Value {
    let mut value = json!({
        "room_id": room_id,
        "status": status.name(),
    });
    if let Some(connection) = status.connection() {
        value["connection"] = json!(connection.as_str());
    }
    if let Some(e) = status.error() {
        value["error"] = json!(e.to_string());
        if let Some(reason) = e.sync_reason() {
            value["reason"] = json!(reason.as_str());
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::status::derive_status;
    use tandem_core::sync::SessionLifecycle;
    use tandem_core::{
        ConnectionStatus, DocumentStore, SessionError, StoreHandle, SyncError, SyncErrorReason,
    };

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_status_rendering() {
        let store = StoreHandle::new(DocumentStore::new());

        let loading = derive_status(None, ConnectionStatus::Connecting, &store);
        assert_eq!(status_line("r1", &loading), "[r1] loading");

        let offline = derive_status(
            Some(&SessionLifecycle::Loaded),
            ConnectionStatus::Error,
            &store,
        );
        assert_eq!(status_line("r1", &offline), "[r1] synced-remote (offline)");
        let value = status_json("r1", &offline);
        assert_eq!(value["status"], "synced-remote");
        assert_eq!(value["connection"], "offline");
    }

    #[test]
    fn test_error_json_carries_reason() {
        let store = StoreHandle::new(DocumentStore::new());
        let error: SessionError = SyncError::new(SyncErrorReason::ClientTooOld, "upgrade").into();
        let status = derive_status(
            Some(&SessionLifecycle::Failed(error)),
            ConnectionStatus::Online,
            &store,
        );

        let value = status_json("r1", &status);
        assert_eq!(value["status"], "error");
        assert_eq!(value["reason"], "clientTooOld");
        assert!(value.get("connection").is_none());
    }
}
