//! Shared store handle
//!
//! A [`StoreHandle`] is shared between the application (local edits) and
//! the active sync session (remote operations). It serializes access,
//! tells the session when local edits are waiting to be pushed, and records
//! which session currently owns the store for writing.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::StoreError;
use crate::sync::CancelGuard;

/// Local document store consumed by a sync session
pub trait LocalStore: Send + 'static {
    /// Identity used to disambiguate replicas of the same document
    fn id(&self) -> &str;

    /// Apply one operation received from the server
    fn apply_remote_op(&mut self, op: &[u8]) -> Result<(), StoreError>;

    /// Take every local operation not yet handed to the session
    fn collect_local_ops(&mut self) -> Vec<Vec<u8>>;

    /// Check the store is usable, restoring required structure if not
    ///
    /// Returns `true` when the store was already usable.
    fn ensure_store_is_usable(&mut self) -> bool;
}

/// Shared, lockable handle to a local store
pub struct StoreHandle<S: LocalStore> {
    id: Arc<str>,
    inner: Arc<Mutex<S>>,
    owner: Arc<Mutex<Option<u64>>>,
    local_changes: Arc<watch::Sender<u64>>,
}

impl<S: LocalStore> Clone for StoreHandle<S> {
    fn clone(&self) -> Self {
        Self {
            id: Arc::clone(&self.id),
            inner: Arc::clone(&self.inner),
            owner: Arc::clone(&self.owner),
            local_changes: Arc::clone(&self.local_changes),
        }
    }
}

impl<S: LocalStore> std::fmt::Debug for StoreHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("id", &self.id)
            .field("owner", &*self.owner.lock())
            .finish()
    }
}

impl<S: LocalStore> StoreHandle<S> {
    /// Wrap a store
    pub fn new(store: S) -> Self {
        let id: Arc<str> = Arc::from(store.id());
        let (local_changes, _) = watch::channel(0);
        Self {
            id,
            inner: Arc::new(Mutex::new(store)),
            owner: Arc::new(Mutex::new(None)),
            local_changes: Arc::new(local_changes),
        }
    }

    /// Store identity
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether two handles point at the same store
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read from the store
    pub fn read<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&*self.inner.lock())
    }

    /// Make a local edit
    ///
    /// The active session is notified and pushes the resulting operations.
    pub fn update<T>(&self, f: impl FnOnce(&mut S) -> T) -> T {
        let result = f(&mut *self.inner.lock());
        self.local_changes.send_modify(|n| *n = n.wrapping_add(1));
        result
    }

    /// Run the usability check, notifying the session if it repaired anything
    pub fn ensure_usable(&self) -> bool {
        let usable = self.inner.lock().ensure_store_is_usable();
        if !usable {
            self.local_changes.send_modify(|n| *n = n.wrapping_add(1));
        }
        usable
    }

    /// Subscribe to local edit notifications
    pub fn subscribe_local_changes(&self) -> watch::Receiver<u64> {
        self.local_changes.subscribe()
    }

    /// Session currently owning the store for writing
    pub fn owner(&self) -> Option<u64> {
        *self.owner.lock()
    }

    /// Take write ownership for a session
    pub(crate) fn claim(&self, session: u64) -> Result<(), StoreError> {
        let mut owner = self.owner.lock();
        match *owner {
            Some(current) if current != session => Err(StoreError::Busy { owner: current }),
            _ => {
                *owner = Some(session);
                Ok(())
            }
        }
    }

    /// Give up write ownership
    pub(crate) fn release(&self, session: u64) {
        let mut owner = self.owner.lock();
        if *owner == Some(session) {
            *owner = None;
        }
    }

    /// Apply remote operations in order, unless the session was cancelled
    ///
    /// Returns `None` when cancelled; nothing is applied in that case.
    pub(crate) fn apply_remote(
        &self,
        guard: &CancelGuard,
        ops: &[Vec<u8>],
    ) -> Option<Result<usize, StoreError>> {
        guard.run(|| {
            let mut store = self.inner.lock();
            for op in ops {
                store.apply_remote_op(op)?;
            }
            Ok(ops.len())
        })
    }

    /// Collect pending local operations, unless the session was cancelled
    pub(crate) fn collect_local(&self, guard: &CancelGuard) -> Option<Vec<Vec<u8>>> {
        guard.run(|| self.inner.lock().collect_local_ops())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory store recording every call, for session tests
    #[derive(Debug, Default)]
    pub struct RecordingStore {
        pub applied: Vec<Vec<u8>>,
        pub pending: Vec<Vec<u8>>,
        pub ensure_calls: usize,
        pub usable: bool,
        pub reject: Option<Vec<u8>>,
    }

    impl RecordingStore {
        pub fn new() -> Self {
            Self {
                usable: true,
                ..Default::default()
            }
        }
    }

    impl LocalStore for RecordingStore {
        fn id(&self) -> &str {
            "recording-store"
        }

        fn apply_remote_op(&mut self, op: &[u8]) -> Result<(), StoreError> {
            if self.reject.as_deref() == Some(op) {
                return Err(StoreError::InvalidRecord {
                    id: "rejected".to_string(),
                    details: "rejected by test".to_string(),
                });
            }
            self.applied.push(op.to_vec());
            Ok(())
        }

        fn collect_local_ops(&mut self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.pending)
        }

        fn ensure_store_is_usable(&mut self) -> bool {
            self.ensure_calls += 1;
            let was_usable = self.usable;
            self.usable = true;
            was_usable
        }
    }
}
