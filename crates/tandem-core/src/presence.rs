//! Presence records
//!
//! A presence record is what other participants see of the local user:
//! identity, color, display name, and the cursor chat message. It is
//! recomputed whenever the preferences or the chat state change and only
//! the latest value is sent.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatState, MAX_MESSAGE_CHARS};

/// Name shown for users who never picked one
pub const DEFAULT_USER_NAME: &str = "New User";

/// Colors assigned to users without a color preference
pub const USER_COLORS: [&str; 12] = [
    "#FF802B", "#EC5E41", "#F2555A", "#F04F88", "#E34BA9", "#BD54C6", "#9D5BD2", "#7B66DC",
    "#02B1CC", "#11B3A3", "#39B178", "#55B467",
];

/// User preferences relevant to presence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserPreferences {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            color: None,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Preferences used when the caller supplies none
    ///
    /// The id is generated once per process.
    pub fn default_user() -> &'static UserPreferences {
        static DEFAULT_USER: OnceLock<UserPreferences> = OnceLock::new();
        DEFAULT_USER.get_or_init(|| UserPreferences::new(uuid::Uuid::new_v4().to_string()))
    }
}

/// Presence broadcast for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub color: String,
    pub name: String,
    #[serde(rename = "chatMessage", default, skip_serializing_if = "Option::is_none")]
    pub chat_message: Option<String>,
}

/// Palette color for a user id
///
/// FNV-1a over the id bytes, so the same id always gets the same color.
pub fn default_color(user_id: &str) -> &'static str {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in user_id.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    USER_COLORS[hash as usize % USER_COLORS.len()]
}

/// Build the presence record for a user
pub fn derive_presence(prefs: &UserPreferences, chat_message: Option<&str>) -> PresenceRecord {
    let color = prefs
        .color
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| default_color(&prefs.id).to_string());
    let name = prefs
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USER_NAME.to_string());
    let chat_message = chat_message
        .filter(|m| !m.trim().is_empty())
        .map(|m| m.chars().take(MAX_MESSAGE_CHARS).collect());

    PresenceRecord {
        user_id: prefs.id.clone(),
        color,
        name,
        chat_message,
    }
}

/// Keeps a presence record current
///
/// Dropping the deriver stops its task.
#[derive(Debug)]
pub struct PresenceDeriver {
    record: watch::Receiver<PresenceRecord>,
    task: JoinHandle<()>,
}

impl PresenceDeriver {
    /// Start deriving; without a preference source the process default
    /// user is used
    pub fn spawn(
        prefs: Option<watch::Receiver<UserPreferences>>,
        chat: Option<watch::Receiver<ChatState>>,
        token: CancellationToken,
    ) -> Self {
        let initial = compute(prefs.as_ref(), chat.as_ref());
        let (tx, record) = watch::channel(initial);
        let task = tokio::spawn(derive_loop(prefs, chat, tx, token));
        Self { record, task }
    }

    /// Subscribe to record changes
    pub fn subscribe(&self) -> watch::Receiver<PresenceRecord> {
        self.record.clone()
    }
}

impl Drop for PresenceDeriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn compute(
    prefs: Option<&watch::Receiver<UserPreferences>>,
    chat: Option<&watch::Receiver<ChatState>>,
) -> PresenceRecord {
    let message = chat.and_then(|c| c.borrow().current_message().map(str::to_string));
    match prefs {
        Some(prefs) => derive_presence(&prefs.borrow(), message.as_deref()),
        None => derive_presence(UserPreferences::default_user(), message.as_deref()),
    }
}

async fn derive_loop(
    mut prefs: Option<watch::Receiver<UserPreferences>>,
    mut chat: Option<watch::Receiver<ChatState>>,
    tx: watch::Sender<PresenceRecord>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            Ok(()) = changed(&mut prefs) => {}
            Ok(()) = changed(&mut chat) => {}
            else => break,
        }

        let record = compute(prefs.as_ref(), chat.as_ref());
        tx.send_if_modified(|current| {
            if *current == record {
                return false;
            }
            *current = record;
            true
        });
    }
}

/// Wait for a change on an optional source; never resolves without one
async fn changed<T>(rx: &mut Option<watch::Receiver<T>>) -> Result<(), watch::error::RecvError> {
    match rx {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::CursorChat;
    use tokio::time::Instant;

    #[test]
    fn test_defaults() {
        let record = derive_presence(&UserPreferences::new("user-1"), None);
        assert_eq!(record.user_id, "user-1");
        assert_eq!(record.name, DEFAULT_USER_NAME);
        assert_eq!(record.color, default_color("user-1"));
        assert_eq!(record.chat_message, None);
    }

    #[test]
    fn test_explicit_preferences_win() {
        let prefs = UserPreferences::new("user-1")
            .with_name("Ada")
            .with_color("#000000");
        let record = derive_presence(&prefs, Some("hello"));
        assert_eq!(record.name, "Ada");
        assert_eq!(record.color, "#000000");
        assert_eq!(record.chat_message.as_deref(), Some("hello"));
    }

    #[test]
    fn test_default_color_is_stable() {
        assert_eq!(default_color("abc"), default_color("abc"));
        assert!(USER_COLORS.contains(&default_color("abc")));
        assert!(USER_COLORS.contains(&default_color("")));
    }

    #[test]
    fn test_blank_chat_message_is_omitted() {
        let record = derive_presence(&UserPreferences::new("u"), Some("   "));
        assert_eq!(record.chat_message, None);
    }

    #[test]
    fn test_default_user_is_per_process() {
        let a = UserPreferences::default_user();
        let b = UserPreferences::default_user();
        assert_eq!(a.id, b.id);
        assert!(!a.id.is_empty());
    }

    #[tokio::test]
    async fn test_deriver_follows_sources() {
        let (prefs_tx, prefs_rx) = watch::channel(UserPreferences::new("u1").with_name("Ada"));
        let (chat_tx, chat_rx) = watch::channel(ChatState::default());
        let token = CancellationToken::new();

        let deriver = PresenceDeriver::spawn(Some(prefs_rx), Some(chat_rx), token.clone());
        let mut record = deriver.subscribe();
        assert_eq!(record.borrow().name, "Ada");

        prefs_tx.send_replace(UserPreferences::new("u1").with_name("Grace"));
        record.wait_for(|r| r.name == "Grace").await.unwrap();

        let mut chat = CursorChat::new();
        let now = Instant::now();
        chat.start(now);
        chat.type_text("hi", now);
        chat_tx.send_replace(chat.state().clone());
        let latest = record
            .wait_for(|r| r.chat_message.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(latest.chat_message.as_deref(), Some("hi"));
        assert_eq!(latest.name, "Grace");

        token.cancel();
    }

    #[test]
    fn test_record_serialization() {
        let record = derive_presence(&UserPreferences::new("u1"), Some("yo"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["chatMessage"], "yo");
    }
}
