//! Chat command handler

use anyhow::{bail, Context, Result};

use tandem_core::chat::MAX_MESSAGE_CHARS;
use tandem_core::{
    ChatKey, ChatPhase, Config, CursorChatHandle, DocumentStore, RemoteSync, SessionStatus,
    StoreHandle,
};

use super::connection_parameters;
use crate::output::Output;

/// Trim a message and report whether it will be cut short
fn prepare(message: &str) -> Result<(&str, bool)> {
    let text = message.trim();
    if text.is_empty() {
        bail!("Chat message cannot be empty");
    }
    Ok((text, text.chars().count() > MAX_MESSAGE_CHARS))
}

/// Join a room, show a cursor chat bubble until it expires, then leave
pub async fn send(
    config: &Config,
    message: &str,
    room: Option<String>,
    output: &Output,
) -> Result<()> {
    let (text, truncated) = prepare(message)?;
    if truncated {
        output.message(&format!(
            "Message truncated to {} characters",
            MAX_MESSAGE_CHARS
        ));
    }

    let (params, _prefs) = connection_parameters(config, room)?;
    let room_id = params.room_id.clone();

    let chat = CursorChatHandle::spawn();
    let store = StoreHandle::new(DocumentStore::new());
    let mut remote =
        RemoteSync::websocket(store, config.session_config()).with_cursor_chat(chat.subscribe());
    let mut status = remote
        .connect(params)
        .context("Failed to start sync session")?;

    let settled = status
        .wait_until_settled()
        .await
        .context("Session ended before loading")?;
    if let SessionStatus::Error(e) = settled {
        bail!("Could not join room '{}': {}", room_id, e);
    }

    let mut state = chat.subscribe();
    chat.start();
    chat.type_text(text);
    chat.key(ChatKey::Enter);

    state
        .wait_for(|s| s.phase() == ChatPhase::Displaying)
        .await
        .context("Cursor chat stopped")?;
    output.success(&format!("Showing \"{}\" in room '{}'", text, room_id));

    state
        .wait_for(|s| s.phase() == ChatPhase::Idle)
        .await
        .context("Cursor chat stopped")?;

    remote.disconnect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_trims() {
        let (text, truncated) = prepare("  hello  ").unwrap();
        assert_eq!(text, "hello");
        assert!(!truncated);
    }

    #[test]
    fn test_prepare_rejects_blank() {
        assert!(prepare("   ").is_err());
    }

    #[test]
    fn test_prepare_flags_long_messages() {
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        let (_, truncated) = prepare(&long).unwrap();
        assert!(truncated);

        let exact = "x".repeat(MAX_MESSAGE_CHARS);
        let (_, truncated) = prepare(&exact).unwrap();
        assert!(!truncated);
    }
}
