//! Local document replica
//!
//! The session only ever talks to the store through [`LocalStore`]:
//! remote operations in, local operations out, and a usability check
//! after every connect. [`DocumentStore`] is the bundled Automerge-backed
//! implementation.

mod document;
mod error;
mod handle;
mod id;

pub use document::DocumentStore;
pub use error::StoreError;
pub use handle::{LocalStore, StoreHandle};
pub use id::StoreId;

#[cfg(test)]
pub(crate) use handle::testing;
