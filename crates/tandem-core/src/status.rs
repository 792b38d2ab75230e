//! Session status
//!
//! What callers observe: `loading`, `error`, or `synced-remote` with a
//! connection quality. The status is a pure function of the session
//! lifecycle and the transport status, recomputed whenever either changes.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::store::{LocalStore, StoreHandle};
use crate::sync::{SessionLifecycle, SyncSession};
use crate::transport::ConnectionStatus;

/// Connection quality of a loaded session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Connecting,
    Online,
    Degraded,
    /// Connection dropped; the session keeps retrying
    Offline,
    Closed,
}

impl ConnectionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Connecting => "connecting",
            ConnectionQuality::Online => "online",
            ConnectionQuality::Degraded => "degraded",
            ConnectionQuality::Offline => "offline",
            ConnectionQuality::Closed => "closed",
        }
    }
}

impl From<ConnectionStatus> for ConnectionQuality {
    fn from(status: ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Connecting => ConnectionQuality::Connecting,
            ConnectionStatus::Online => ConnectionQuality::Online,
            ConnectionStatus::Degraded => ConnectionQuality::Degraded,
            ConnectionStatus::Error => ConnectionQuality::Offline,
            ConnectionStatus::Closed => ConnectionQuality::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the current session as seen by callers
pub enum SessionStatus<S: LocalStore> {
    /// No session, or not loaded yet
    Loading,
    /// Load or sync error; terminal for the session
    Error(SessionError),
    /// Loaded and syncing
    SyncedRemote {
        connection: ConnectionQuality,
        store: StoreHandle<S>,
    },
}

impl<S: LocalStore> SessionStatus<S> {
    /// Status name: `loading`, `error` or `synced-remote`
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Loading => "loading",
            SessionStatus::Error(_) => "error",
            SessionStatus::SyncedRemote { .. } => "synced-remote",
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SessionStatus::SyncedRemote { .. })
    }

    pub fn connection(&self) -> Option<ConnectionQuality> {
        match self {
            SessionStatus::SyncedRemote { connection, .. } => Some(*connection),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            SessionStatus::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn store(&self) -> Option<&StoreHandle<S>> {
        match self {
            SessionStatus::SyncedRemote { store, .. } => Some(store),
            _ => None,
        }
    }
}

impl<S: LocalStore> Clone for SessionStatus<S> {
    fn clone(&self) -> Self {
        match self {
            SessionStatus::Loading => SessionStatus::Loading,
            SessionStatus::Error(e) => SessionStatus::Error(e.clone()),
            SessionStatus::SyncedRemote { connection, store } => SessionStatus::SyncedRemote {
                connection: *connection,
                store: store.clone(),
            },
        }
    }
}

impl<S: LocalStore> PartialEq for SessionStatus<S> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SessionStatus::Loading, SessionStatus::Loading) => true,
            (SessionStatus::Error(a), SessionStatus::Error(b)) => a == b,
            (
                SessionStatus::SyncedRemote {
                    connection: a,
                    store: sa,
                },
                SessionStatus::SyncedRemote {
                    connection: b,
                    store: sb,
                },
            ) => a == b && sa.ptr_eq(sb),
            _ => false,
        }
    }
}

impl<S: LocalStore> std::fmt::Debug for SessionStatus<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Loading => f.write_str("Loading"),
            SessionStatus::Error(e) => f.debug_tuple("Error").field(e).finish(),
            SessionStatus::SyncedRemote { connection, store } => f
                .debug_struct("SyncedRemote")
                .field("connection", connection)
                .field("store", &store.id())
                .finish(),
        }
    }
}

/// Derive the status from a session's lifecycle and transport status
///
/// `None` means there is no session.
pub fn derive_status<S: LocalStore>(
    lifecycle: Option<&SessionLifecycle>,
    connection: ConnectionStatus,
    store: &StoreHandle<S>,
) -> SessionStatus<S> {
    match lifecycle {
        None | Some(SessionLifecycle::Connecting) => SessionStatus::Loading,
        Some(SessionLifecycle::Failed(error)) => SessionStatus::Error(error.clone()),
        Some(SessionLifecycle::Loaded) => SessionStatus::SyncedRemote {
            connection: connection.into(),
            store: store.clone(),
        },
    }
}

/// Observable session status
pub struct StatusView<S: LocalStore> {
    rx: watch::Receiver<SessionStatus<S>>,
}

impl<S: LocalStore> Clone for StatusView<S> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<S: LocalStore> StatusView<S> {
    pub(crate) fn new(rx: watch::Receiver<SessionStatus<S>>) -> Self {
        Self { rx }
    }

    /// Current status
    pub fn current(&self) -> SessionStatus<S> {
        self.rx.borrow().clone()
    }

    /// Wait for the next change
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }

    /// Wait until the status satisfies `f`
    pub async fn wait_for(
        &mut self,
        mut f: impl FnMut(&SessionStatus<S>) -> bool,
    ) -> Result<SessionStatus<S>, watch::error::RecvError> {
        let status = self.rx.wait_for(|s| f(s)).await?;
        Ok(status.clone())
    }

    /// Wait until the session is loaded or has failed
    pub async fn wait_until_settled(&mut self) -> Result<SessionStatus<S>, watch::error::RecvError> {
        self.wait_for(|s| !matches!(s, SessionStatus::Loading)).await
    }

    /// Underlying receiver
    pub fn receiver(&self) -> watch::Receiver<SessionStatus<S>> {
        self.rx.clone()
    }
}

/// Republish a session's derived status into `tx` until it is closed
pub(crate) fn spawn_deriver<S: LocalStore>(
    session: &SyncSession<S>,
    store: StoreHandle<S>,
    tx: Arc<watch::Sender<SessionStatus<S>>>,
) -> JoinHandle<()> {
    let guard = session.guard().clone();
    let mut lifecycle = session.subscribe_lifecycle();
    let mut connection = session.subscribe_connection();

    tokio::spawn(async move {
        loop {
            let current = lifecycle.borrow_and_update().clone();
            let status = derive_status(Some(&current), *connection.borrow_and_update(), &store);

            let published = guard.run(|| {
                tx.send_if_modified(|shown| {
                    if *shown == status {
                        return false;
                    }
                    *shown = status;
                    true
                })
            });
            if published.is_none() {
                break;
            }

            tokio::select! {
                _ = guard.cancelled() => break,
                Ok(()) = lifecycle.changed() => {}
                Ok(()) = connection.changed() => {}
                else => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LoadError, SyncError, SyncErrorReason};
    use crate::store::testing::RecordingStore;

    fn store() -> StoreHandle<RecordingStore> {
        StoreHandle::new(RecordingStore::new())
    }

    #[test]
    fn test_no_session_is_loading() {
        let store = store();
        let status = derive_status(None, ConnectionStatus::Online, &store);
        assert_eq!(status, SessionStatus::Loading);
        assert_eq!(status.name(), "loading");
    }

    #[test]
    fn test_not_loaded_is_loading() {
        let store = store();
        for connection in [
            ConnectionStatus::Connecting,
            ConnectionStatus::Online,
            ConnectionStatus::Error,
        ] {
            let status = derive_status(Some(&SessionLifecycle::Connecting), connection, &store);
            assert_eq!(status, SessionStatus::Loading);
        }
    }

    #[test]
    fn test_errors_win_over_connection() {
        let store = store();
        let error: SessionError = SyncError::new(SyncErrorReason::InvalidOperation, "bad op").into();
        let lifecycle = SessionLifecycle::Failed(error.clone());

        let status = derive_status(Some(&lifecycle), ConnectionStatus::Online, &store);
        assert_eq!(status.name(), "error");
        assert_eq!(status.error(), Some(&error));

        let load = SessionLifecycle::Failed(
            LoadError::Server {
                message: "down".to_string(),
            }
            .into(),
        );
        let status = derive_status(Some(&load), ConnectionStatus::Error, &store);
        assert!(status.error().is_some_and(|e| e.is_load_error()));
    }

    #[test]
    fn test_transport_error_is_offline() {
        let store = store();
        let status = derive_status(Some(&SessionLifecycle::Loaded), ConnectionStatus::Error, &store);
        assert_eq!(status.name(), "synced-remote");
        assert_eq!(status.connection(), Some(ConnectionQuality::Offline));
        assert!(status.store().is_some_and(|s| s.ptr_eq(&store)));
    }

    #[test]
    fn test_quality_mirrors_transport() {
        let store = store();
        let cases = [
            (ConnectionStatus::Online, ConnectionQuality::Online),
            (ConnectionStatus::Degraded, ConnectionQuality::Degraded),
            (ConnectionStatus::Connecting, ConnectionQuality::Connecting),
            (ConnectionStatus::Closed, ConnectionQuality::Closed),
        ];
        for (transport, quality) in cases {
            let status = derive_status(Some(&SessionLifecycle::Loaded), transport, &store);
            assert_eq!(status.connection(), Some(quality));
        }
    }

    #[test]
    fn test_synced_equality_uses_store_identity() {
        let a = store();
        let b = store();
        let loaded = SessionLifecycle::Loaded;
        assert_eq!(
            derive_status(Some(&loaded), ConnectionStatus::Online, &a),
            derive_status(Some(&loaded), ConnectionStatus::Online, &a.clone())
        );
        assert_ne!(
            derive_status(Some(&loaded), ConnectionStatus::Online, &a),
            derive_status(Some(&loaded), ConnectionStatus::Online, &b)
        );
    }

    #[test]
    fn test_quality_serialization() {
        let json = serde_json::to_string(&ConnectionQuality::Offline).unwrap();
        assert_eq!(json, "\"offline\"");
    }
}
