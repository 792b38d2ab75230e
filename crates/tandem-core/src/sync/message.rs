//! Sync protocol message types
//!
//! Messages exchanged with the collaboration server using CBOR encoding,
//! one message per binary frame.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use thiserror::Error;

use crate::error::SyncErrorReason;
use crate::presence::PresenceRecord;

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Errors encoding or decoding protocol messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to encode message: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("Failed to decode message: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}

/// Messages sent to the sync server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Handshake, sent once per connection
    #[serde(rename = "connect")]
    Connect {
        #[serde(rename = "protocolVersion")]
        protocol_version: u32,
    },

    /// Local operations for the server to apply and rebroadcast
    #[serde(rename = "push")]
    Push { ops: Vec<ByteBuf> },

    /// Latest presence record for this user
    #[serde(rename = "presence")]
    Presence { record: PresenceRecord },

    /// Keepalive
    #[serde(rename = "ping")]
    Ping,
}

/// Messages received from the sync server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Handshake accepted; carries every op the client needs to catch up
    #[serde(rename = "connect")]
    Connect {
        #[serde(rename = "protocolVersion")]
        protocol_version: u32,
        ops: Vec<ByteBuf>,
    },

    /// Operations from other clients
    #[serde(rename = "patch")]
    Patch { ops: Vec<ByteBuf> },

    /// The server cannot continue with this client
    #[serde(rename = "incompatible")]
    Incompatible { reason: SyncErrorReason },

    /// Error from server
    #[serde(rename = "error")]
    Error { message: String },

    /// Keepalive reply
    #[serde(rename = "pong")]
    Pong,
}

impl ClientMessage {
    /// Create a handshake message
    pub fn connect() -> Self {
        ClientMessage::Connect {
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Create a push message
    pub fn push(ops: Vec<Vec<u8>>) -> Self {
        ClientMessage::Push {
            ops: ops.into_iter().map(ByteBuf::from).collect(),
        }
    }

    /// Encode message to CBOR bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(ciborium::from_reader(bytes)?)
    }
}

impl ServerMessage {
    /// Create a handshake reply
    pub fn connect(ops: Vec<Vec<u8>>) -> Self {
        ServerMessage::Connect {
            protocol_version: PROTOCOL_VERSION,
            ops: ops.into_iter().map(ByteBuf::from).collect(),
        }
    }

    /// Create a patch message
    pub fn patch(ops: Vec<Vec<u8>>) -> Self {
        ServerMessage::Patch {
            ops: ops.into_iter().map(ByteBuf::from).collect(),
        }
    }

    /// Encode message to CBOR bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(ciborium::from_reader(bytes)?)
    }
}

/// Unwrap a list of byte buffers
pub(crate) fn into_ops(ops: Vec<ByteBuf>) -> Vec<Vec<u8>> {
    ops.into_iter().map(ByteBuf::into_vec).collect()
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(message, &mut bytes)?;
    Ok(bytes)
}
