//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/tandem/config.toml)
//! 3. Environment variables (TANDEM_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::presence::UserPreferences;
use crate::remote::DEFAULT_ROOM_ID;
use crate::sync::SessionConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "TANDEM";

/// Log levels accepted in `log.level`
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Keys accepted by [`Config::set`]
pub const CONFIG_KEYS: &[&str] = &[
    "server_url",
    "room_id",
    "access_token",
    "user.id",
    "user.name",
    "user.color",
    "log.level",
    "log.file",
    "session.reconnect_delay_ms",
    "session.max_reconnect_delay_ms",
    "session.max_load_attempts",
    "session.handshake_timeout_ms",
    "session.ping_interval_ms",
    "session.degraded_after_ms",
];

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sync server endpoint (ws:// or wss://)
    #[serde(default)]
    pub server_url: Option<String>,

    /// Room to join
    #[serde(default = "default_room_id")]
    pub room_id: String,

    /// Static access token sent with every connection attempt
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub user: UserConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub session: SessionSettings,
}

/// Presence preferences for the local user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Stable user id; a fresh one is used per process when unset
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Session tuning, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub max_load_attempts: u32,
    pub handshake_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub degraded_after_ms: u64,
}

impl SessionSettings {
    /// Every setting must be greater than zero
    fn validate(&self) -> Result<()> {
        let values = [
            ("session.reconnect_delay_ms", self.reconnect_delay_ms),
            ("session.max_reconnect_delay_ms", self.max_reconnect_delay_ms),
            ("session.max_load_attempts", u64::from(self.max_load_attempts)),
            ("session.handshake_timeout_ms", self.handshake_timeout_ms),
            ("session.ping_interval_ms", self.ping_interval_ms),
            ("session.degraded_after_ms", self.degraded_after_ms),
        ];
        for (key, value) in values {
            if value == 0 {
                bail!("{} must be greater than zero", key);
            }
        }
        Ok(())
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            reconnect_delay_ms: millis(defaults.initial_reconnect_delay),
            max_reconnect_delay_ms: millis(defaults.max_reconnect_delay),
            max_load_attempts: defaults.max_load_attempts,
            handshake_timeout_ms: millis(defaults.handshake_timeout),
            ping_interval_ms: millis(defaults.ping_interval),
            degraded_after_ms: millis(defaults.degraded_after),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: None,
            room_id: default_room_id(),
            access_token: None,
            user: UserConfig::default(),
            log: LogConfig::default(),
            session: SessionSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (TANDEM_SERVER_URL, TANDEM_ROOM_ID, ...)
    /// 2. Config file (~/.config/tandem/config.toml or TANDEM_CONFIG)
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
        config
            .session
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from `--config` when given, otherwise from the default location
    pub fn load_with_cli_override(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.session.validate()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // TANDEM_SERVER_URL
        if let Ok(val) = std::env::var(format!("{}_SERVER_URL", ENV_PREFIX)) {
            self.server_url = if val.is_empty() { None } else { Some(val) };
        }

        // TANDEM_ROOM_ID
        if let Ok(val) = std::env::var(format!("{}_ROOM_ID", ENV_PREFIX)) {
            if !val.is_empty() {
                self.room_id = val;
            }
        }

        // TANDEM_USER_NAME
        if let Ok(val) = std::env::var(format!("{}_USER_NAME", ENV_PREFIX)) {
            self.user.name = if val.is_empty() { None } else { Some(val) };
        }

        // TANDEM_USER_COLOR
        if let Ok(val) = std::env::var(format!("{}_USER_COLOR", ENV_PREFIX)) {
            self.user.color = if val.is_empty() { None } else { Some(val) };
        }

        // TANDEM_ACCESS_TOKEN
        if let Ok(val) = std::env::var(format!("{}_ACCESS_TOKEN", ENV_PREFIX)) {
            self.access_token = if val.is_empty() { None } else { Some(val) };
        }

        // TANDEM_LOG_LEVEL
        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log.level = val.to_lowercase();
            }
        }
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
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
    /// Can be overridden with TANDEM_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tandem")
            .join("config.toml")
    }

    /// Update one key, validating the value
    ///
    /// An empty value clears optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |v: &str| {
            if v.is_empty() {
                None
            } else {
                Some(v.to_string())
            }
        };

        match key {
            "server_url" => {
                if !value.is_empty() {
                    parse_server_url(value)?;
                }
                self.server_url = optional(value);
            }
            "room_id" => {
                if value.trim().is_empty() {
                    bail!("room_id cannot be empty");
                }
                self.room_id = value.to_string();
            }
            "access_token" => self.access_token = optional(value),
            "user.id" => self.user.id = optional(value),
            "user.name" => self.user.name = optional(value),
            "user.color" => {
                if !value.is_empty() && !is_hex_color(value) {
                    bail!("user.color must look like #RRGGBB, got '{}'", value);
                }
                self.user.color = optional(value);
            }
            "log.level" => {
                let level = value.to_lowercase();
                if !LOG_LEVELS.contains(&level.as_str()) {
                    bail!("log.level must be one of {}", LOG_LEVELS.join(", "));
                }
                self.log.level = level;
            }
            "log.file" => self.log.file = optional(value).map(PathBuf::from),
            "session.reconnect_delay_ms" => {
                self.session.reconnect_delay_ms = parse_positive(key, value)?
            }
            "session.max_reconnect_delay_ms" => {
                self.session.max_reconnect_delay_ms = parse_positive(key, value)?
            }
            "session.max_load_attempts" => {
                self.session.max_load_attempts = parse_positive(key, value)?
            }
            "session.handshake_timeout_ms" => {
                self.session.handshake_timeout_ms = parse_positive(key, value)?
            }
            "session.ping_interval_ms" => {
                self.session.ping_interval_ms = parse_positive(key, value)?
            }
            "session.degraded_after_ms" => {
                self.session.degraded_after_ms = parse_positive(key, value)?
            }
            _ => bail!(
                "Unknown config key '{}'. Valid keys: {}",
                key,
                CONFIG_KEYS.join(", ")
            ),
        }
        Ok(())
    }

    /// Parsed server endpoint
    pub fn server_url(&self) -> Result<Url> {
        match self.server_url.as_deref() {
            Some(url) => parse_server_url(url),
            None => bail!(
                "No server URL configured. Set server_url in {:?} or {}_SERVER_URL",
                Self::config_file_path(),
                ENV_PREFIX
            ),
        }
    }

    /// Session tuning
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            initial_reconnect_delay: Duration::from_millis(s.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(s.max_reconnect_delay_ms),
            max_load_attempts: s.max_load_attempts,
            handshake_timeout: Duration::from_millis(s.handshake_timeout_ms),
            ping_interval: Duration::from_millis(s.ping_interval_ms),
            degraded_after: Duration::from_millis(s.degraded_after_ms),
        }
    }

    /// Presence preferences for the local user
    pub fn user_preferences(&self) -> UserPreferences {
        let id = self
            .user
            .id
            .clone()
            .unwrap_or_else(|| UserPreferences::default_user().id.clone());
        UserPreferences {
            id,
            color: self.user.color.clone(),
            name: self.user.name.clone(),
        }
    }
}

fn default_room_id() -> String {
    DEFAULT_ROOM_ID.to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn parse_server_url(value: &str) -> Result<Url> {
    let url = Url::parse(value).with_context(|| format!("Invalid server URL '{}'", value))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => bail!("Server URL must use ws:// or wss://, got '{}://'", other),
    }
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let parsed: T = value
        .parse()
        .ok()
        .with_context(|| format!("{} must be a positive integer, got '{}'", key, value))?;
    if parsed == T::default() {
        bail!("{} must be greater than zero", key);
    }
    Ok(parsed)
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "TANDEM_SERVER_URL",
        "TANDEM_ROOM_ID",
        "TANDEM_USER_NAME",
        "TANDEM_USER_COLOR",
        "TANDEM_ACCESS_TOKEN",
        "TANDEM_LOG_LEVEL",
        "TANDEM_CONFIG",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.server_url.is_none());
        assert_eq!(config.room_id, "default");
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.session_config(), SessionConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = EnvGuard::new(ENV_VARS);
        let mut config = Config::default();

        env::set_var("TANDEM_SERVER_URL", "ws://localhost:8787/connect");
        env::set_var("TANDEM_ROOM_ID", "design-review");
        env::set_var("TANDEM_USER_NAME", "Ada");
        env::set_var("TANDEM_LOG_LEVEL", "DEBUG");
        config.apply_env_overrides();

        assert_eq!(
            config.server_url.as_deref(),
            Some("ws://localhost:8787/connect")
        );
        assert_eq!(config.room_id, "design-review");
        assert_eq!(config.user.name.as_deref(), Some("Ada"));
        assert_eq!(config.log.level, "debug");

        // Empty string clears optional values
        env::set_var("TANDEM_SERVER_URL", "");
        config.apply_env_overrides();
        assert!(config.server_url.is_none());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r##"
            server_url = "wss://sync.example.com/connect"
            room_id = "standup"

            [user]
            name = "Grace"
            color = "#11B3A3"

            [session]
            max_load_attempts = 2
            ping_interval_ms = 1500
        "##;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.room_id, "standup");
        assert_eq!(config.user.color.as_deref(), Some("#11B3A3"));

        let session = config.session_config();
        assert_eq!(session.max_load_attempts, 2);
        assert_eq!(session.ping_interval, Duration::from_millis(1500));
        // Unset keys keep their defaults
        assert_eq!(session.handshake_timeout, Duration::from_secs(10));

        let url = config.server_url().unwrap();
        assert_eq!(url.host_str(), Some("sync.example.com"));
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("server_url", "ws://localhost:8787/connect").unwrap();
        config.set("user.name", "Ada").unwrap();
        config.set("session.reconnect_delay_ms", "250").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_set_validates() {
        let mut config = Config::default();

        assert!(config.set("server_url", "http://example.com").is_err());
        assert!(config.set("server_url", "not a url").is_err());
        assert!(config.set("user.color", "red").is_err());
        assert!(config.set("log.level", "loud").is_err());
        assert!(config.set("session.max_load_attempts", "0").is_err());
        assert!(config.set("session.ping_interval_ms", "-5").is_err());
        assert!(config.set("room_id", " ").is_err());

        let err = config.set("colour", "x").unwrap_err();
        assert!(err.to_string().contains("Unknown config key"));

        // Nothing changed
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_rejects_zero_session_values() {
        let _guard = EnvGuard::new(ENV_VARS);

        let err = Config::load_from_str("[session]\nping_interval_ms = 0").unwrap_err();
        assert!(err.to_string().contains("session.ping_interval_ms"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nmax_load_attempts = 0\n").unwrap();
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("session.max_load_attempts"));
    }

    #[test]
    fn test_set_clears_optional() {
        let mut config = Config::default();
        config.set("access_token", "secret").unwrap();
        assert_eq!(config.access_token.as_deref(), Some("secret"));
        config.set("access_token", "").unwrap();
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_missing_server_url() {
        let _guard = EnvGuard::new(ENV_VARS);
        let err = Config::default().server_url().unwrap_err();
        assert!(err.to_string().contains("No server URL configured"));
    }

    #[test]
    fn test_user_preferences() {
        let mut config = Config::default();
        let prefs = config.user_preferences();
        assert_eq!(prefs.id, UserPreferences::default_user().id);

        config.user.id = Some("user-42".to_string());
        config.user.name = Some("Ada".to_string());
        let prefs = config.user_preferences();
        assert_eq!(prefs.id, "user-42");
        assert_eq!(prefs.name.as_deref(), Some("Ada"));
        assert_eq!(prefs.color, None);
    }
}
