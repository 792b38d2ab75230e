//! Remote sync API
//!
//! [`RemoteSync`] is what applications hold. Give it connection parameters
//! and it keeps exactly one [`SyncSession`] running for them, replacing the
//! session whenever the parameters change and exposing the derived
//! [`StatusView`].

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use url::Url;

use crate::chat::ChatState;
use crate::error::{LoadError, SyncError};
use crate::presence::UserPreferences;
use crate::status::{spawn_deriver, SessionStatus, StatusView};
use crate::store::{LocalStore, StoreError, StoreHandle};
use crate::sync::{SessionConfig, SessionContext, SessionHandler, SyncSession};
use crate::transport::{AccessTokenProvider, Connector, WebSocketConnector};

/// Room used when none is given
pub const DEFAULT_ROOM_ID: &str = "default";

/// Tracing target for session lifecycle events
pub const MULTIPLAYER_EVENT_TARGET: &str = "multiplayer.client";

/// Everything that identifies a session
///
/// Two parameter sets are equal when the endpoint and room match by value
/// and the preference source and token provider are the same instances.
#[derive(Clone)]
pub struct ConnectionParameters {
    pub uri: Url,
    pub room_id: String,
    pub preferences: Option<watch::Receiver<UserPreferences>>,
    pub access_token: Option<Arc<dyn AccessTokenProvider>>,
}

impl ConnectionParameters {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            room_id: DEFAULT_ROOM_ID.to_string(),
            preferences: None,
            access_token: None,
        }
    }

    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = room_id.into();
        self
    }

    pub fn with_preferences(mut self, preferences: watch::Receiver<UserPreferences>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub fn with_access_token(mut self, provider: Arc<dyn AccessTokenProvider>) -> Self {
        self.access_token = Some(provider);
        self
    }
}

impl PartialEq for ConnectionParameters {
    fn eq(&self, other: &Self) -> bool {
        let same_preferences = match (&self.preferences, &other.preferences) {
            (Some(a), Some(b)) => a.same_channel(b),
            (None, None) => true,
            _ => false,
        };
        let same_token = match (&self.access_token, &other.access_token) {
            (Some(a), Some(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            (None, None) => true,
            _ => false,
        };
        self.uri == other.uri && self.room_id == other.room_id && same_preferences && same_token
    }
}

impl std::fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("uri", &self.uri.as_str())
            .field("room_id", &self.room_id)
            .field("preferences", &self.preferences.is_some())
            .field("access_token", &self.access_token.is_some())
            .finish()
    }
}

/// Logs lifecycle events and runs the store usability check on connect
struct RemoteHandler {
    room_id: String,
}

impl<S: LocalStore> SessionHandler<S> for RemoteHandler {
    fn on_load(&self, _store: &StoreHandle<S>) {
        info!(target: MULTIPLAYER_EVENT_TARGET, event = "load", room_id = %self.room_id, "Room loaded");
    }

    fn on_load_error(&self, e: &LoadError) {
        error!(
            target: MULTIPLAYER_EVENT_TARGET,
            event = "load-error",
            room_id = %self.room_id,
            "Failed to load room: {}",
            e
        );
    }

    fn on_sync_error(&self, e: &SyncError) {
        error!(
            target: MULTIPLAYER_EVENT_TARGET,
            event = "sync-error",
            room_id = %self.room_id,
            reason = %e.reason,
            "Sync failed: {}",
            e.detail
        );
    }

    fn on_after_connect(&self, store: &StoreHandle<S>) {
        if !store.ensure_usable() {
            warn!(room_id = %self.room_id, "Store was unusable after connecting; restored its structure");
        }
    }
}

struct ActiveSession<S: LocalStore> {
    params: ConnectionParameters,
    session: SyncSession<S>,
    deriver: JoinHandle<()>,
}

/// Keeps one sync session running for the current parameters
pub struct RemoteSync<S: LocalStore> {
    ctx: SessionContext<S>,
    status: Arc<watch::Sender<SessionStatus<S>>>,
    active: Option<ActiveSession<S>>,
}

impl<S: LocalStore> RemoteSync<S> {
    pub fn new(store: StoreHandle<S>, connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        let (status, _) = watch::channel(SessionStatus::Loading);
        Self {
            ctx: SessionContext {
                connector,
                store,
                config,
                chat: None,
            },
            status: Arc::new(status),
            active: None,
        }
    }

    /// Sync over WebSocket
    pub fn websocket(store: StoreHandle<S>, config: SessionConfig) -> Self {
        Self::new(store, Arc::new(WebSocketConnector), config)
    }

    /// Include cursor chat messages in presence
    ///
    /// Applies to sessions opened after this call.
    pub fn with_cursor_chat(mut self, chat: watch::Receiver<ChatState>) -> Self {
        self.ctx.chat = Some(chat);
        self
    }

    /// Run a session for `params`
    ///
    /// Equal parameters keep the current session. Different parameters
    /// close it before the new one opens. Must be called inside a tokio
    /// runtime.
    pub fn connect(&mut self, params: ConnectionParameters) -> Result<StatusView<S>, StoreError> {
        if self.active.as_ref().is_some_and(|a| a.params == params) {
            return Ok(self.status());
        }

        self.disconnect();

        let handler: Arc<dyn SessionHandler<S>> = Arc::new(RemoteHandler {
            room_id: params.room_id.clone(),
        });
        let session = SyncSession::open(&params, &self.ctx, handler)?;
        let deriver = spawn_deriver(&session, self.ctx.store.clone(), Arc::clone(&self.status));

        info!(room_id = %params.room_id, "Connecting to {}", params.uri);
        self.active = Some(ActiveSession {
            params,
            session,
            deriver,
        });
        Ok(self.status())
    }

    /// Close the current session, if any
    pub fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            active.session.close();
            active.deriver.abort();
            self.status.send_replace(SessionStatus::Loading);
            info!(room_id = %active.params.room_id, "Disconnected");
        }
    }

    /// Status of the current session
    pub fn status(&self) -> StatusView<S> {
        StatusView::new(self.status.subscribe())
    }

    pub fn store(&self) -> &StoreHandle<S> {
        &self.ctx.store
    }

    /// Parameters of the current session
    pub fn parameters(&self) -> Option<&ConnectionParameters> {
        self.active.as_ref().map(|a| &a.params)
    }

    /// Id of the current session
    pub fn session_id(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.session.id())
    }
}

impl<S: LocalStore> Drop for RemoteSync<S> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ConnectionQuality;
    use crate::store::testing::RecordingStore;
    use crate::sync::{ClientMessage, ServerMessage};
    use crate::transport::memory::{MemoryConnector, ServerEnd};
    use crate::{SessionError, SyncErrorReason};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config() -> SessionConfig {
        SessionConfig {
            initial_reconnect_delay: Duration::from_secs(30),
            max_reconnect_delay: Duration::from_secs(30),
            max_load_attempts: 3,
            handshake_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(60),
            degraded_after: Duration::from_secs(120),
        }
    }

    fn remote() -> (
        RemoteSync<RecordingStore>,
        MemoryConnector,
        mpsc::UnboundedReceiver<ServerEnd>,
    ) {
        let (connector, accepted) = MemoryConnector::new();
        let store = StoreHandle::new(RecordingStore::new());
        let remote = RemoteSync::new(store, Arc::new(connector.clone()), config());
        (remote, connector, accepted)
    }

    fn params(room: &str) -> ConnectionParameters {
        let uri = Url::parse(&format!("ws://memory/{}", room)).unwrap();
        ConnectionParameters::new(uri).with_room_id(room)
    }

    async fn handshake(server: &mut ServerEnd, snapshot: Vec<Vec<u8>>) {
        assert!(matches!(
            server.recv().await,
            Some(ClientMessage::Connect { .. })
        ));
        server.send(&ServerMessage::connect(snapshot));
    }

    #[tokio::test]
    async fn test_loading_then_synced() {
        let (mut remote, _connector, mut accepted) = remote();
        let mut status = remote.connect(params("room-1")).unwrap();
        assert_eq!(status.current(), SessionStatus::Loading);

        let mut server = accepted.recv().await.unwrap();
        assert_eq!(server.url().path(), "/room-1");
        handshake(&mut server, vec![vec![1]]).await;

        let settled = status.wait_until_settled().await.unwrap();
        assert_eq!(settled.name(), "synced-remote");
        assert_eq!(settled.connection(), Some(ConnectionQuality::Online));
        assert!(settled.store().is_some_and(|s| s.ptr_eq(remote.store())));
        assert_eq!(remote.store().read(|s| s.applied.clone()), vec![vec![1]]);
    }

    #[tokio::test]
    async fn test_equal_parameters_keep_session() {
        let (mut remote, connector, mut accepted) = remote();
        remote.connect(params("room-1")).unwrap();
        let id = remote.session_id();
        let _server = accepted.recv().await.unwrap();

        remote.connect(params("room-1")).unwrap();
        assert_eq!(remote.session_id(), id);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_preference_source_identity_matters() {
        let (_tx_a, rx_a) = watch::channel(UserPreferences::new("u"));
        let (_tx_b, rx_b) = watch::channel(UserPreferences::new("u"));

        let a = params("r").with_preferences(rx_a.clone());
        assert_eq!(a, params("r").with_preferences(rx_a));
        assert_ne!(a, params("r").with_preferences(rx_b));
        assert_ne!(a, params("r"));
        assert_ne!(params("r"), params("s"));
    }

    #[tokio::test]
    async fn test_rapid_parameter_changes() {
        let (mut remote, _connector, mut accepted) = remote();
        remote.connect(params("room-1")).unwrap();
        let first = remote.session_id();
        remote.connect(params("room-2")).unwrap();
        remote.connect(params("room-3")).unwrap();
        let mut status = remote.status();

        // Only the latest session owns the store
        assert_ne!(remote.session_id(), first);
        assert_eq!(remote.store().owner(), remote.session_id());

        let mut stale = Vec::new();
        let mut server = loop {
            let server = accepted.recv().await.unwrap();
            if server.url().path() == "/room-3" {
                break server;
            }
            stale.push(server);
        };

        // Superseded sessions never write, even if their server answers
        for old in &stale {
            old.send(&ServerMessage::connect(vec![vec![0xaa]]));
            old.send(&ServerMessage::patch(vec![vec![0xab]]));
        }
        handshake(&mut server, vec![vec![3]]).await;

        let settled = status.wait_until_settled().await.unwrap();
        assert!(settled.is_synced());
        assert_eq!(remote.store().read(|s| s.applied.clone()), vec![vec![3]]);
        assert_eq!(remote.parameters().map(|p| p.room_id.as_str()), Some("room-3"));
    }

    #[tokio::test]
    async fn test_disconnect_resets_status() {
        let (mut remote, _connector, mut accepted) = remote();
        let mut status = remote.connect(params("room-1")).unwrap();
        let mut server = accepted.recv().await.unwrap();
        handshake(&mut server, vec![]).await;
        status.wait_until_settled().await.unwrap();

        remote.disconnect();
        assert_eq!(status.current(), SessionStatus::Loading);
        assert_eq!(remote.store().owner(), None);
        assert_eq!(remote.session_id(), None);

        // The closed session hangs up
        while server.recv_frame().await.is_some() {}
    }

    #[tokio::test]
    async fn test_dropped_connection_is_offline() {
        let (mut remote, _connector, mut accepted) = remote();
        let mut status = remote.connect(params("room-1")).unwrap();
        let mut server = accepted.recv().await.unwrap();
        handshake(&mut server, vec![]).await;
        status.wait_until_settled().await.unwrap();

        server.close();
        let offline = status
            .wait_for(|s| s.connection() == Some(ConnectionQuality::Offline))
            .await
            .unwrap();
        // A transport error is never a session error
        assert_eq!(offline.name(), "synced-remote");
    }

    #[tokio::test]
    async fn test_load_error_status() {
        let (mut remote, _connector, mut accepted) = remote();
        let mut status = remote.connect(params("room-1")).unwrap();
        let mut server = accepted.recv().await.unwrap();
        assert!(matches!(
            server.recv().await,
            Some(ClientMessage::Connect { .. })
        ));
        server.send(&ServerMessage::Error {
            message: "room is archived".to_string(),
        });

        let settled = status.wait_until_settled().await.unwrap();
        assert_eq!(
            settled.error(),
            Some(&SessionError::Load(LoadError::Server {
                message: "room is archived".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_sync_error_status() {
        let (mut remote, _connector, mut accepted) = remote();
        let mut status = remote.connect(params("room-1")).unwrap();
        let mut server = accepted.recv().await.unwrap();
        handshake(&mut server, vec![]).await;
        status.wait_until_settled().await.unwrap();

        server.send(&ServerMessage::Incompatible {
            reason: SyncErrorReason::ServerTooOld,
        });
        let failed = status.wait_for(|s| s.error().is_some()).await.unwrap();
        assert_eq!(
            failed.error().and_then(|e| e.sync_reason()),
            Some(SyncErrorReason::ServerTooOld)
        );
    }

    #[tokio::test]
    async fn test_unusable_store_checked_on_connect() {
        let (mut remote, _connector, mut accepted) = remote();
        remote.store().update(|s| s.usable = false);

        remote.connect(params("room-1")).unwrap();
        let mut server = accepted.recv().await.unwrap();
        handshake(&mut server, vec![]).await;

        // Presence goes out after the connect hook has run
        loop {
            match server.recv().await {
                Some(ClientMessage::Presence { .. }) => break,
                Some(_) => continue,
                None => panic!("Channel closed before presence"),
            }
        }
        assert_eq!(remote.store().read(|s| s.ensure_calls), 1);
        assert!(remote.store().read(|s| s.usable));
    }
}
