//! Status command handler

use anyhow::{bail, Context, Result};

use tandem_core::{Config, DocumentStore, RemoteSync, SessionStatus, StoreHandle};

use super::connection_parameters;
use crate::output::Output;

/// Connect to a room and print status changes
///
/// With `once`, exits as soon as the session has loaded or failed.
/// Otherwise keeps printing until Ctrl-C. A failed session is an error
/// either way.
pub async fn watch(config: &Config, room: Option<String>, once: bool, output: &Output) -> Result<()> {
    let (params, _prefs) = connection_parameters(config, room)?;
    let room_id = params.room_id.clone();

    let store = StoreHandle::new(DocumentStore::new());
    let mut remote = RemoteSync::websocket(store, config.session_config());
    let mut status = remote
        .connect(params)
        .context("Failed to start sync session")?;

    output.print_status(&room_id, &status.current());

    let result = loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = status.current();
                output.print_status(&room_id, &current);
                if let SessionStatus::Error(e) = current {
                    break Err(e);
                }
                if once && current.is_synced() {
                    break Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    remote.disconnect();
    if let Err(e) = result {
        bail!("Session for room '{}' failed: {}", room_id, e);
    }
    Ok(())
}
