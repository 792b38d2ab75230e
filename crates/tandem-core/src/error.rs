//! Session error taxonomy
//!
//! Only load and sync errors are surfaced to callers as hard errors.
//! Transport trouble is normalized into a connection quality downgrade by
//! the status view and never appears here.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason codes reported by the server (or detected locally) when a session
/// can no longer be kept in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncErrorReason {
    /// The client speaks an older protocol than the server accepts
    ClientTooOld,
    /// The server speaks an older protocol than the client
    ServerTooOld,
    /// A record failed validation
    InvalidRecord,
    /// An operation could not be applied
    InvalidOperation,
    /// The server reported a failure without a specific code
    ServerError,
    /// A reason code this client does not know
    #[serde(other)]
    Unknown,
}

impl SyncErrorReason {
    /// Stable string form, used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorReason::ClientTooOld => "clientTooOld",
            SyncErrorReason::ServerTooOld => "serverTooOld",
            SyncErrorReason::InvalidRecord => "invalidRecord",
            SyncErrorReason::InvalidOperation => "invalidOperation",
            SyncErrorReason::ServerError => "serverError",
            SyncErrorReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SyncErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Initial synchronization with the server never completed
///
/// Terminal for the session. No automatic retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The server refused the connection handshake
    #[error("Server rejected the connection: {reason}")]
    Rejected { reason: SyncErrorReason },

    /// The server reported an error before the document loaded
    #[error("Server error while loading: {message}")]
    Server { message: String },

    /// Every connection attempt failed before the document loaded
    #[error("Could not reach sync server after {attempts} attempts: {last_error}")]
    Unreachable { attempts: u32, last_error: String },

    /// The server snapshot could not be applied to the local store
    #[error("Could not apply server snapshot: {0}")]
    Snapshot(String),

    /// The server sent something that is not part of the protocol
    #[error("Protocol error while loading: {0}")]
    Protocol(String),
}

/// A loaded session detected a protocol inconsistency
///
/// Terminal for the session. No automatic retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Sync error ({reason}): {detail}")]
pub struct SyncError {
    /// Reason code
    pub reason: SyncErrorReason,
    /// Human-readable detail
    pub detail: String,
}

impl SyncError {
    pub fn new(reason: SyncErrorReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Hard error carried by a failed session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl SessionError {
    /// Whether the session failed before loading
    pub fn is_load_error(&self) -> bool {
        matches!(self, SessionError::Load(_))
    }

    /// Reason code for sync errors
    pub fn sync_reason(&self) -> Option<SyncErrorReason> {
        match self {
            SessionError::Sync(e) => Some(e.reason),
            SessionError::Load(_) => None,
        }
    }
}
