//! In-memory transport
//!
//! Every successful `connect` creates a channel pair and hands the server
//! end to whoever holds the acceptor, so tests can play the sync server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use super::{Channel, Connector, TransportError};
use crate::sync::{ClientMessage, ServerMessage};

/// Connector producing in-memory channels
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    refuse: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of accepted connections
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            refuse: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, rx)
    }

    /// Refuse the next `n` connection attempts
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Number of connection attempts so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Channel>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect(format!("{} refused", url)));
        }

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();

        let server = ServerEnd {
            url: url.clone(),
            tx: Some(server_tx),
            rx: server_rx,
        };
        self.accepted
            .send(server)
            .map_err(|_| TransportError::Connect("no acceptor".to_string()))?;

        Ok(Box::new(MemoryChannel {
            tx: Some(client_tx),
            rx: client_rx,
        }))
    }
}

struct MemoryChannel {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        match self.tx.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

/// Server side of an in-memory connection
#[derive(Debug)]
pub struct ServerEnd {
    url: Url,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ServerEnd {
    /// URL the client connected with
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Value of a query parameter on the connect URL
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Send a raw frame; dropped silently if the client is gone
    pub fn send_frame(&self, frame: Vec<u8>) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(frame);
        }
    }

    /// Send a protocol message
    pub fn send(&self, message: &ServerMessage) {
        if let Ok(frame) = message.encode() {
            self.send_frame(frame);
        }
    }

    /// Next raw frame, `None` once the client closed
    pub async fn recv_frame(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Next protocol message, skipping frames that do not decode
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        while let Some(frame) = self.rx.recv().await {
            if let Ok(message) = ClientMessage::decode(&frame) {
                return Some(message);
            }
        }
        None
    }

    /// Close the server side; the client sees end of stream
    pub fn close(&mut self) {
        self.tx = None;
    }
}
