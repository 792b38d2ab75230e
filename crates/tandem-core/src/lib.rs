//! tandem Core Library
//!
//! This crate keeps a local document replica synchronized with a remote
//! collaboration server, and carries a small ephemeral presence feature
//! (cursor chat bubbles) over the same session.
//!
//! # Architecture
//!
//! - **Transport**: duplex binary channel to one endpoint (WebSocket)
//! - **SyncSession**: one logical connection attempt with a strict lifecycle
//! - **SessionStatus**: derived `loading | error | synced-remote` view
//! - **Presence**: user preferences plus cursor chat, broadcast best-effort
//!
//! # Quick Start
//!
//! ```text
//! let store = StoreHandle::new(DocumentStore::new());
//! let mut remote = RemoteSync::websocket(store, SessionConfig::default());
//!
//! let params = ConnectionParameters::new(Url::parse("wss://sync.example.com/room")?);
//! let mut status = remote.connect(params)?;
//!
//! while status.changed().await.is_ok() {
//!     println!("{}", status.current().name());
//! }
//! ```
//!
//! # Modules
//!
//! - `remote`: Caller-facing API (main entry point)
//! - `sync`: Sync session lifecycle and wire protocol
//! - `status`: Derived session status
//! - `transport`: Connection establishment and channels
//! - `store`: Local document replica
//! - `presence`: Presence records derived from user preferences
//! - `chat`: Ephemeral cursor chat state machine
//! - `config`: Application configuration

pub mod chat;
pub mod config;
pub mod error;
pub mod presence;
pub mod remote;
pub mod status;
pub mod store;
pub mod sync;
pub mod transport;

pub use chat::{ChatInput, ChatKey, ChatPhase, ChatState, CursorChat, CursorChatHandle};
pub use config::Config;
pub use error::{LoadError, SessionError, SyncError, SyncErrorReason};
pub use presence::{PresenceRecord, UserPreferences};
pub use remote::{ConnectionParameters, RemoteSync};
pub use status::{ConnectionQuality, SessionStatus, StatusView};
pub use store::{DocumentStore, LocalStore, StoreError, StoreHandle, StoreId};
pub use sync::{SessionConfig, SessionHandler, SessionLifecycle, SyncSession};
pub use transport::{AccessTokenProvider, ConnectionStatus, TransportError};
