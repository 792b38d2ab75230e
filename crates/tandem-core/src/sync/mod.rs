//! Sync session
//!
//! One [`SyncSession`] is one logical connection to the collaboration
//! server for one store. It owns a transport, applies inbound operations to
//! the store in arrival order, pushes local edits and presence outward, and
//! reports its lifecycle through a [`SessionHandler`].
//!
//! ## Protocol
//!
//! 1. Connect via the transport (URL carries session key, store id, token)
//! 2. Send `connect { protocolVersion }`
//! 3. Apply the ops from the server's `connect` reply; the session is loaded
//! 4. Exchange `push`/`patch`/`presence` until the channel drops
//! 5. Reconnect with exponential backoff
//!
//! ## Usage
//!
//! ```ignore
//! let session = SyncSession::open(&params, &ctx, handler)?;
//! let mut lifecycle = session.subscribe_lifecycle();
//! lifecycle.wait_for(|l| l.is_loaded()).await?;
//! session.close();
//! ```

mod cancel;
mod message;
mod session;

pub use cancel::CancelGuard;
pub use message::{ClientMessage, ProtocolError, ServerMessage, PROTOCOL_VERSION};
pub use session::{SessionConfig, SessionContext, SessionHandler, SessionLifecycle, SyncSession};
