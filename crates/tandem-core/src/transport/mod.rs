//! Transport adapter
//!
//! Wraps a duplex binary message channel to one endpoint. The adapter owns
//! connection establishment (URL construction, token injection), reports a
//! coarse [`ConnectionStatus`], and exposes send/receive/close.
//!
//! ## Channels
//!
//! - [`WebSocketConnector`]: `tokio-tungstenite` client
//! - [`memory::MemoryConnector`]: in-process channel pairs for tests

mod endpoint;
mod error;
pub mod memory;
mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

pub use endpoint::{session_key, AccessTokenProvider, Endpoint, StaticToken};
pub use error::TransportError;
pub use websocket::WebSocketConnector;

use crate::sync::CancelGuard;

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Attempting to connect
    Connecting,
    /// Connected and responsive
    Online,
    /// Connected but the server has gone quiet
    Degraded,
    /// Connection failed or dropped; a retry may follow
    Error,
    /// Closed for good
    Closed,
}

/// Opens channels to an endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Channel>, TransportError>;
}

/// An open duplex channel carrying binary frames
///
/// `recv` must be cancel-safe; the session polls it inside `select!`.
#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Next frame, or `None` once the peer has closed the channel
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>>;

    async fn close(&mut self);
}

/// Result of a connection attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// The session was cancelled first; nothing was connected
    Cancelled,
}

/// Owns the channel for one session
pub struct TransportAdapter {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    status: watch::Sender<ConnectionStatus>,
    channel: Option<Box<dyn Channel>>,
}

impl TransportAdapter {
    pub fn new(connector: Arc<dyn Connector>, endpoint: Endpoint) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Self {
            connector,
            endpoint,
            status,
            channel: None,
        }
    }

    /// Get the current status
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Whether a channel is open
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Publish a status, unless the session was cancelled
    pub fn set_status(&self, guard: &CancelGuard, status: ConnectionStatus) {
        guard.run(|| {
            self.status.send_if_modified(|current| {
                if *current == status {
                    return false;
                }
                debug!("Connection status {:?} -> {:?}", current, status);
                *current = status;
                true
            })
        });
    }

    /// Build the URL and open a channel
    ///
    /// The token provider and the connect call both race the guard; a
    /// cancelled attempt leaves no channel and publishes nothing.
    pub async fn connect(&mut self, guard: &CancelGuard) -> Result<ConnectOutcome, TransportError> {
        self.drop_channel().await;
        self.set_status(guard, ConnectionStatus::Connecting);

        let url = tokio::select! {
            _ = guard.cancelled() => return Ok(ConnectOutcome::Cancelled),
            url = self.endpoint.build() => url?,
        };

        // A token that resolved after cancellation must not start a connection
        if guard.is_cancelled() {
            return Ok(ConnectOutcome::Cancelled);
        }

        debug!("Connecting to {}", self.endpoint.base());
        let channel = tokio::select! {
            _ = guard.cancelled() => return Ok(ConnectOutcome::Cancelled),
            channel = self.connector.connect(&url) => channel?,
        };

        if guard.is_cancelled() {
            let mut channel = channel;
            channel.close().await;
            return Ok(ConnectOutcome::Cancelled);
        }

        self.channel = Some(channel);
        Ok(ConnectOutcome::Connected)
    }

    /// Send one frame
    pub async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        match self.channel.as_mut() {
            Some(channel) => channel.send(frame).await,
            None => Err(TransportError::NotConnected),
        }
    }

    /// Receive one frame; `None` when closed or never connected
    pub async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        match self.channel.as_mut() {
            Some(channel) => channel.recv().await,
            None => None,
        }
    }

    /// Drop the current channel after a failure; the adapter can reconnect
    pub async fn disconnect(&mut self, guard: &CancelGuard) {
        self.drop_channel().await;
        self.set_status(guard, ConnectionStatus::Error);
    }

    /// Close for good
    ///
    /// `Closed` is only published while the guard is live; a cancelled
    /// session's observers keep the last status they saw.
    pub async fn close(&mut self, guard: &CancelGuard) {
        self.drop_channel().await;
        self.set_status(guard, ConnectionStatus::Closed);
    }

    async fn drop_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryConnector;
    use super::*;

    fn adapter(connector: MemoryConnector) -> TransportAdapter {
        let endpoint = Endpoint::new(Url::parse("ws://memory/room").unwrap(), "store-1");
        TransportAdapter::new(Arc::new(connector), endpoint)
    }

    #[tokio::test]
    async fn test_connect_send_recv() {
        let (connector, mut accepted) = MemoryConnector::new();
        let mut transport = adapter(connector);
        let guard = CancelGuard::new();

        assert_eq!(transport.status(), ConnectionStatus::Connecting);
        let outcome = transport.connect(&guard).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Connected);
        assert!(transport.is_connected());

        let mut server = accepted.recv().await.unwrap();
        assert_eq!(server.query("storeId").as_deref(), Some("store-1"));

        transport.send(vec![1, 2, 3]).await.unwrap();
        assert_eq!(server.recv_frame().await, Some(vec![1, 2, 3]));

        server.send_frame(vec![9]);
        assert_eq!(transport.recv().await.unwrap().unwrap(), vec![9]);

        transport.close(&guard).await;
        assert_eq!(transport.status(), ConnectionStatus::Closed);
        assert_eq!(server.recv_frame().await, None);
    }

    #[tokio::test]
    async fn test_close_after_cancel_publishes_nothing() {
        let (connector, mut accepted) = MemoryConnector::new();
        let mut transport = adapter(connector);
        let guard = CancelGuard::new();

        transport.connect(&guard).await.unwrap();
        transport.set_status(&guard, ConnectionStatus::Online);
        let mut server = accepted.recv().await.unwrap();
        let mut status = transport.subscribe_status();
        status.borrow_and_update();

        guard.cancel();
        transport.close(&guard).await;

        // The channel is still torn down
        assert_eq!(server.recv_frame().await, None);
        assert!(!status.has_changed().unwrap());
        assert_eq!(transport.status(), ConnectionStatus::Online);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let (connector, _accepted) = MemoryConnector::new();
        connector.refuse_next(1);
        let mut transport = adapter(connector);
        let guard = CancelGuard::new();

        let err = transport.connect(&guard).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_cancelled_before_connect() {
        let (connector, mut accepted) = MemoryConnector::new();
        let mut transport = adapter(connector);
        let guard = CancelGuard::new();
        guard.cancel();

        let outcome = transport.connect(&guard).await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Cancelled);
        assert!(accepted.try_recv().is_err());
        // Cancelled sessions publish nothing
        assert_eq!(transport.status(), ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_send_without_channel() {
        let (connector, _accepted) = MemoryConnector::new();
        let mut transport = adapter(connector);
        assert!(matches!(
            transport.send(vec![1]).await,
            Err(TransportError::NotConnected)
        ));
        assert!(transport.recv().await.is_none());
    }
}
