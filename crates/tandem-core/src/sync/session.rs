//! Session lifecycle
//!
//! A session moves through `connecting -> loaded -> (sync error)` or
//! `connecting -> load error`; both errors are terminal. Transport trouble
//! is never terminal once loaded: the session reconnects with exponential
//! backoff for as long as it stays open.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::cancel::CancelGuard;
use super::message::{into_ops, ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::chat::ChatState;
use crate::error::{LoadError, SessionError, SyncError, SyncErrorReason};
use crate::presence::{PresenceDeriver, PresenceRecord};
use crate::remote::ConnectionParameters;
use crate::store::{LocalStore, StoreError, StoreHandle};
use crate::transport::{
    ConnectOutcome, ConnectionStatus, Connector, Endpoint, TransportAdapter, TransportError,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Tuning for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delay before the first reconnect attempt
    pub initial_reconnect_delay: Duration,
    /// Upper bound for the reconnect delay
    pub max_reconnect_delay: Duration,
    /// Consecutive failed attempts before loading gives up
    pub max_load_attempts: u32,
    /// How long to wait for the server's handshake reply
    pub handshake_timeout: Duration,
    /// Keepalive interval
    pub ping_interval: Duration,
    /// Silence after which the connection is reported degraded
    pub degraded_after: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_load_attempts: 5,
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(5),
            degraded_after: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Replace zero settings with their defaults
    ///
    /// A zero ping interval or timeout cannot drive a timer, and a zero
    /// attempt budget would fail before trying.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        let pick = |name: &str, value: Duration, default: Duration| {
            if value.is_zero() {
                warn!("Session setting {} is zero; using {:?}", name, default);
                default
            } else {
                value
            }
        };

        Self {
            initial_reconnect_delay: pick(
                "initial_reconnect_delay",
                self.initial_reconnect_delay,
                defaults.initial_reconnect_delay,
            ),
            max_reconnect_delay: pick(
                "max_reconnect_delay",
                self.max_reconnect_delay,
                defaults.max_reconnect_delay,
            ),
            max_load_attempts: if self.max_load_attempts == 0 {
                warn!(
                    "Session setting max_load_attempts is zero; using {}",
                    defaults.max_load_attempts
                );
                defaults.max_load_attempts
            } else {
                self.max_load_attempts
            },
            handshake_timeout: pick(
                "handshake_timeout",
                self.handshake_timeout,
                defaults.handshake_timeout,
            ),
            ping_interval: pick("ping_interval", self.ping_interval, defaults.ping_interval),
            degraded_after: pick("degraded_after", self.degraded_after, defaults.degraded_after),
        }
    }
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLifecycle {
    /// Not loaded yet
    Connecting,
    /// Initial sync completed; later reconnects keep this state
    Loaded,
    /// Terminal load or sync error
    Failed(SessionError),
}

impl SessionLifecycle {
    pub fn is_loaded(&self) -> bool {
        matches!(self, SessionLifecycle::Loaded)
    }
}

/// Lifecycle callbacks
///
/// Each callback runs under the session's cancel guard: none of them fire
/// once the session has been closed. Callbacks must not close the session
/// that invoked them.
pub trait SessionHandler<S: LocalStore>: Send + Sync + 'static {
    /// First successful load; never called again for this session
    fn on_load(&self, _store: &StoreHandle<S>) {}

    /// Loading failed for good
    fn on_load_error(&self, _error: &LoadError) {}

    /// A loaded session hit a protocol inconsistency
    fn on_sync_error(&self, _error: &SyncError) {}

    /// Every connect event once loaded, before traffic resumes
    fn on_after_connect(&self, _store: &StoreHandle<S>) {}
}

/// Shared inputs every session of a [`RemoteSync`](crate::RemoteSync) needs
pub struct SessionContext<S: LocalStore> {
    pub connector: Arc<dyn Connector>,
    pub store: StoreHandle<S>,
    pub config: SessionConfig,
    /// Cursor chat state to fold into presence
    pub chat: Option<watch::Receiver<ChatState>>,
}

impl<S: LocalStore> Clone for SessionContext<S> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            store: self.store.clone(),
            config: self.config.clone(),
            chat: self.chat.clone(),
        }
    }
}

/// One logical connection to the server
pub struct SyncSession<S: LocalStore> {
    id: u64,
    store: StoreHandle<S>,
    guard: CancelGuard,
    lifecycle: watch::Receiver<SessionLifecycle>,
    connection: watch::Receiver<ConnectionStatus>,
    task: Option<JoinHandle<()>>,
    _presence: PresenceDeriver,
}

impl<S: LocalStore> std::fmt::Debug for SyncSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("id", &self.id)
            .field("store", &self.store.id())
            .field("cancelled", &self.guard.is_cancelled())
            .finish()
    }
}

impl<S: LocalStore> SyncSession<S> {
    /// Open a session and start connecting
    ///
    /// Fails if another session still owns the store.
    pub fn open(
        params: &ConnectionParameters,
        ctx: &SessionContext<S>,
        handler: Arc<dyn SessionHandler<S>>,
    ) -> Result<Self, StoreError> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        ctx.store.claim(id)?;

        let guard = CancelGuard::new();
        let endpoint = Endpoint::new(params.uri.clone(), ctx.store.id())
            .with_access_token(params.access_token.clone());
        let transport = TransportAdapter::new(Arc::clone(&ctx.connector), endpoint);
        let connection = transport.subscribe_status();

        let presence =
            PresenceDeriver::spawn(params.preferences.clone(), ctx.chat.clone(), guard.token());
        let (lifecycle_tx, lifecycle) = watch::channel(SessionLifecycle::Connecting);

        let worker = Worker {
            session: id,
            room_id: params.room_id.clone(),
            transport,
            store: ctx.store.clone(),
            local_changes: ctx.store.subscribe_local_changes(),
            handler,
            config: ctx.config.clone().normalized(),
            guard: guard.clone(),
            lifecycle: lifecycle_tx,
            presence: presence.subscribe(),
            loaded: false,
            established: false,
        };

        debug!(session = id, room_id = %params.room_id, "Opening sync session");
        let task = tokio::spawn(worker.run());

        Ok(Self {
            id,
            store: ctx.store.clone(),
            guard,
            lifecycle,
            connection,
            task: Some(task),
            _presence: presence,
        })
    }

    /// Session id, unique within the process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel guard shared with everything acting for this session
    pub fn guard(&self) -> &CancelGuard {
        &self.guard
    }

    /// Subscribe to lifecycle changes
    pub fn subscribe_lifecycle(&self) -> watch::Receiver<SessionLifecycle> {
        self.lifecycle.clone()
    }

    /// Subscribe to transport status changes
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.clone()
    }

    /// Close the session
    ///
    /// Idempotent. Once this returns the session applies nothing to the
    /// store, fires no callback, and no longer owns the store.
    pub fn close(&self) {
        if !self.guard.is_cancelled() {
            debug!(session = self.id, "Closing sync session");
        }
        self.guard.cancel();
        self.store.release(self.id);
    }

    /// Close and wait for the worker to finish
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl<S: LocalStore> Drop for SyncSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Why a connection ended
enum Disconnect {
    /// Session closed; stop quietly
    Cancelled,
    /// Transport trouble; try again
    Lost(TransportError),
    /// Terminal
    Failed(SessionError),
}

struct Worker<S: LocalStore> {
    session: u64,
    room_id: String,
    transport: TransportAdapter,
    store: StoreHandle<S>,
    local_changes: watch::Receiver<u64>,
    handler: Arc<dyn SessionHandler<S>>,
    config: SessionConfig,
    guard: CancelGuard,
    lifecycle: watch::Sender<SessionLifecycle>,
    presence: watch::Receiver<PresenceRecord>,
    loaded: bool,
    /// Set once the current connection completed its handshake
    established: bool,
}

impl<S: LocalStore> Worker<S> {
    async fn run(mut self) {
        let mut delay = self.config.initial_reconnect_delay;
        let mut failures: u32 = 0;

        loop {
            self.established = false;
            let error = match self.connection().await {
                Disconnect::Cancelled => break,
                Disconnect::Failed(error) => {
                    self.fail(error);
                    break;
                }
                Disconnect::Lost(error) => error,
            };

            self.transport.disconnect(&self.guard).await;

            if self.established {
                // A connection that got through the handshake resets backoff
                failures = 0;
                delay = self.config.initial_reconnect_delay;
            }

            if !self.loaded {
                failures += 1;
                if failures >= self.config.max_load_attempts || !error.is_retryable() {
                    self.fail(
                        LoadError::Unreachable {
                            attempts: failures,
                            last_error: error.to_string(),
                        }
                        .into(),
                    );
                    break;
                }
            }

            warn!(
                session = self.session,
                room_id = %self.room_id,
                "Sync connection lost: {}. Reconnecting in {:?}",
                error,
                delay
            );

            tokio::select! {
                _ = self.guard.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    delay = (delay * 2).min(self.config.max_reconnect_delay);
                }
            }
        }

        self.transport.close(&self.guard).await;
        debug!(session = self.session, "Sync session worker stopped");
    }

    /// Run one connection until it ends
    async fn connection(&mut self) -> Disconnect {
        if let Err(disconnect) = self.establish().await {
            return disconnect;
        }
        self.pump().await
    }

    /// Connect, handshake, and load
    async fn establish(&mut self) -> Result<(), Disconnect> {
        match self.transport.connect(&self.guard).await {
            Ok(ConnectOutcome::Connected) => {}
            Ok(ConnectOutcome::Cancelled) => return Err(Disconnect::Cancelled),
            Err(e) => return Err(Disconnect::Lost(e)),
        }

        self.send(&ClientMessage::connect()).await?;
        let ops = self.handshake().await?;

        match self.store.apply_remote(&self.guard, &ops) {
            None => return Err(Disconnect::Cancelled),
            Some(Err(e)) => return Err(Disconnect::Failed(self.apply_failure(e))),
            Some(Ok(count)) => debug!(session = self.session, "Applied {} snapshot ops", count),
        }

        self.established = true;
        self.transport
            .set_status(&self.guard, ConnectionStatus::Online);

        if !self.loaded {
            let store = &self.store;
            let handler = &self.handler;
            let lifecycle = &self.lifecycle;
            let fired = self.guard.run(|| {
                lifecycle.send_replace(SessionLifecycle::Loaded);
                handler.on_load(store);
            });
            if fired.is_none() {
                return Err(Disconnect::Cancelled);
            }
            self.loaded = true;
            info!(session = self.session, room_id = %self.room_id, "Document loaded");
        }

        let store = &self.store;
        let handler = &self.handler;
        if self.guard.run(|| handler.on_after_connect(store)).is_none() {
            return Err(Disconnect::Cancelled);
        }

        // Everything pending is pushed below, including repairs made above
        self.local_changes.borrow_and_update();
        self.push_local().await?;

        let record = self.presence.borrow_and_update().clone();
        self.send(&ClientMessage::Presence { record }).await
    }

    /// Wait for the server's handshake reply
    async fn handshake(&mut self) -> Result<Vec<Vec<u8>>, Disconnect> {
        let deadline = Instant::now() + self.config.handshake_timeout;

        loop {
            let frame = tokio::select! {
                _ = self.guard.cancelled() => return Err(Disconnect::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(Disconnect::Lost(TransportError::Timeout("handshake")));
                }
                frame = self.transport.recv() => frame,
            };

            let bytes = match frame {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return Err(Disconnect::Lost(e)),
                None => return Err(Disconnect::Lost(TransportError::Closed)),
            };

            match ServerMessage::decode(&bytes) {
                Ok(ServerMessage::Connect {
                    protocol_version,
                    ops,
                }) => {
                    if protocol_version != PROTOCOL_VERSION {
                        let reason = if protocol_version < PROTOCOL_VERSION {
                            SyncErrorReason::ServerTooOld
                        } else {
                            SyncErrorReason::ClientTooOld
                        };
                        return Err(Disconnect::Failed(self.rejected(reason)));
                    }
                    return Ok(into_ops(ops));
                }
                Ok(ServerMessage::Incompatible { reason }) => {
                    return Err(Disconnect::Failed(self.rejected(reason)));
                }
                Ok(ServerMessage::Error { message }) => {
                    return Err(Disconnect::Failed(self.server_error(message)));
                }
                Ok(other) => debug!("Ignoring {:?} before handshake", other),
                Err(e) => return Err(Disconnect::Failed(self.protocol_failure(e.to_string()))),
            }
        }
    }

    /// Exchange traffic until the connection ends
    async fn pump(&mut self) -> Disconnect {
        let start = Instant::now() + self.config.ping_interval;
        let mut ping = tokio::time::interval_at(start, self.config.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            let step = tokio::select! {
                _ = self.guard.cancelled() => Err(Disconnect::Cancelled),
                frame = self.transport.recv() => match frame {
                    Some(Ok(bytes)) => {
                        last_seen = Instant::now();
                        self.transport.set_status(&self.guard, ConnectionStatus::Online);
                        self.handle_frame(&bytes)
                    }
                    Some(Err(e)) => Err(Disconnect::Lost(e)),
                    None => Err(Disconnect::Lost(TransportError::Closed)),
                },
                Ok(()) = self.local_changes.changed() => self.push_local().await,
                Ok(()) = self.presence.changed() => {
                    let record = self.presence.borrow_and_update().clone();
                    self.send(&ClientMessage::Presence { record }).await
                }
                _ = ping.tick() => {
                    if last_seen.elapsed() >= self.config.degraded_after {
                        self.transport.set_status(&self.guard, ConnectionStatus::Degraded);
                    }
                    self.send(&ClientMessage::Ping).await
                }
            };

            if let Err(disconnect) = step {
                return disconnect;
            }
        }
    }

    fn handle_frame(&mut self, bytes: &[u8]) -> Result<(), Disconnect> {
        let message = ServerMessage::decode(bytes)
            .map_err(|e| Disconnect::Failed(self.protocol_failure(e.to_string())))?;

        match message {
            ServerMessage::Patch { ops } => {
                let ops = into_ops(ops);
                match self.store.apply_remote(&self.guard, &ops) {
                    None => Err(Disconnect::Cancelled),
                    Some(Err(e)) => Err(Disconnect::Failed(self.apply_failure(e))),
                    Some(Ok(_)) => Ok(()),
                }
            }
            ServerMessage::Incompatible { reason } => {
                Err(Disconnect::Failed(self.rejected(reason)))
            }
            ServerMessage::Error { message } => Err(Disconnect::Failed(self.server_error(message))),
            ServerMessage::Pong => Ok(()),
            ServerMessage::Connect { .. } => {
                debug!(session = self.session, "Ignoring repeated handshake reply");
                Ok(())
            }
        }
    }

    async fn push_local(&mut self) -> Result<(), Disconnect> {
        let ops = self
            .store
            .collect_local(&self.guard)
            .ok_or(Disconnect::Cancelled)?;
        if ops.is_empty() {
            return Ok(());
        }
        debug!(session = self.session, "Pushing {} local ops", ops.len());
        self.send(&ClientMessage::push(ops)).await
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), Disconnect> {
        if self.guard.is_cancelled() {
            return Err(Disconnect::Cancelled);
        }
        let frame = message
            .encode()
            .map_err(|e| Disconnect::Lost(TransportError::Protocol(e)))?;
        self.transport.send(frame).await.map_err(Disconnect::Lost)
    }

    /// Publish a terminal error and fire its callback
    fn fail(&self, error: SessionError) {
        let handler = &self.handler;
        let lifecycle = &self.lifecycle;
        self.guard.run(|| {
            lifecycle.send_replace(SessionLifecycle::Failed(error.clone()));
            match &error {
                SessionError::Load(e) => handler.on_load_error(e),
                SessionError::Sync(e) => handler.on_sync_error(e),
            }
        });
    }

    fn rejected(&self, reason: SyncErrorReason) -> SessionError {
        if self.loaded {
            SyncError::new(reason, "server rejected the session").into()
        } else {
            LoadError::Rejected { reason }.into()
        }
    }

    fn server_error(&self, message: String) -> SessionError {
        if self.loaded {
            SyncError::new(SyncErrorReason::ServerError, message).into()
        } else {
            LoadError::Server { message }.into()
        }
    }

    fn protocol_failure(&self, detail: String) -> SessionError {
        if self.loaded {
            SyncError::new(SyncErrorReason::InvalidOperation, detail).into()
        } else {
            LoadError::Protocol(detail).into()
        }
    }

    fn apply_failure(&self, error: StoreError) -> SessionError {
        if !self.loaded {
            return LoadError::Snapshot(error.to_string()).into();
        }
        let reason = match error {
            StoreError::InvalidRecord { .. } => SyncErrorReason::InvalidRecord,
            _ => SyncErrorReason::InvalidOperation,
        };
        SyncError::new(reason, error.to_string()).into()
    }
}
