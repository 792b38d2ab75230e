//! Command handlers

pub mod chat;
pub mod config;
pub mod status;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use tandem_core::transport::StaticToken;
use tandem_core::{Config, ConnectionParameters, UserPreferences};

/// Connection parameters for a room, built from configuration
///
/// The returned sender feeds the preference source; keep it alive for the
/// lifetime of the session.
pub fn connection_parameters(
    config: &Config,
    room: Option<String>,
) -> Result<(ConnectionParameters, watch::Sender<UserPreferences>)> {
    let uri = config.server_url()?;
    let room_id = room.unwrap_or_else(|| config.room_id.clone());
    let (prefs_tx, prefs_rx) = watch::channel(config.user_preferences());

    let mut params = ConnectionParameters::new(uri)
        .with_room_id(room_id)
        .with_preferences(prefs_rx);
    if let Some(ref token) = config.access_token {
        params = params.with_access_token(Arc::new(StaticToken(token.clone())));
    }

    Ok((params, prefs_tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_server() -> Config {
        Config::load_from_str(
            r#"
server_url = "ws://localhost:5858/connect"
room_id = "lobby"

[user]
id = "cli-user"
name = "Ada"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parameters_from_config() {
        let config = config_with_server();
        let (params, _prefs) = connection_parameters(&config, None).unwrap();

        assert_eq!(params.uri.as_str(), "ws://localhost:5858/connect");
        assert_eq!(params.room_id, "lobby");
        let prefs = params.preferences.as_ref().unwrap().borrow().clone();
        assert_eq!(prefs.id, "cli-user");
        assert_eq!(prefs.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_room_flag_overrides_config() {
        let config = config_with_server();
        let (params, _prefs) = connection_parameters(&config, Some("side".to_string())).unwrap();
        assert_eq!(params.room_id, "side");
    }

    #[test]
    fn test_token_only_when_configured() {
        let mut config = config_with_server();
        config.access_token = None;
        let (params, _prefs) = connection_parameters(&config, None).unwrap();
        assert!(params.access_token.is_none());

        config.access_token = Some("secret".to_string());
        let (params, _prefs) = connection_parameters(&config, None).unwrap();
        assert!(params.access_token.is_some());
    }

    #[test]
    fn test_missing_server_url() {
        let mut config = config_with_server();
        config.server_url = None;
        let err = connection_parameters(&config, None).unwrap_err();
        assert!(err.to_string().contains("No server URL configured"));
    }
}
