//! Automerge-backed document store
//!
//! Records live in a single `records` map at the document root, keyed by
//! record id, each holding a JSON-encoded value. Operations exchanged with
//! the server are incremental Automerge change chunks, so merging is
//! Automerge's job and never the session's.

use automerge::transaction::{CommitOptions, Transactable};
use automerge::{ActorId, AutoCommit, ObjType, ReadDoc, Value, ROOT};
use tracing::{debug, warn};

use super::{LocalStore, StoreError, StoreId};

/// Keys used in the Automerge document structure
mod keys {
    pub const RECORDS: &str = "records";
    pub const SCHEMA_VERSION: &str = "schema_version";
}

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: u64 = 1;

/// Actor that authors the root structure on every replica
const GENESIS_ACTOR: [u8; 16] = *b"tandem-genesis-0";

/// A document holding only the root structure
///
/// Every replica starts from the same change (fixed actor, fixed time), so
/// independently created stores share one `records` map instead of racing
/// to create their own. Edits after this use a fresh random actor.
fn genesis() -> AutoCommit {
    let mut doc = AutoCommit::new().with_actor(ActorId::from(GENESIS_ACTOR.as_slice()));
    if let Err(e) = doc.put(ROOT, keys::SCHEMA_VERSION, CURRENT_SCHEMA_VERSION) {
        warn!("Failed to write schema version: {}", e);
    }
    if let Err(e) = doc.put_object(ROOT, keys::RECORDS, ObjType::Map) {
        warn!("Failed to create records map: {}", e);
    }
    doc.commit_with(CommitOptions::default().with_time(0));
    doc.set_actor(ActorId::random());
    doc
}

/// A record store backed by an Automerge document
pub struct DocumentStore {
    /// Replica identity
    id: StoreId,
    /// The Automerge document
    doc: AutoCommit,
    /// Local change chunks saved aside while remote ops were applied
    pending: Vec<Vec<u8>>,
}

impl DocumentStore {
    /// Create a new empty store with a random id
    pub fn new() -> Self {
        Self::with_id(StoreId::new())
    }

    /// Create a new empty store with a specific id
    ///
    /// The root structure is a local op until the first collect; pushing it
    /// is harmless because every replica's copy is the same change.
    pub fn with_id(id: StoreId) -> Self {
        Self {
            id,
            doc: genesis(),
            pending: Vec::new(),
        }
    }

    /// Load a store from saved Automerge bytes
    ///
    /// Everything loaded counts as already synced.
    pub fn load(id: StoreId, bytes: &[u8]) -> Result<Self, StoreError> {
        let mut doc = AutoCommit::load(bytes)?;
        doc.save_incremental();
        Ok(Self {
            id,
            doc,
            pending: Vec::new(),
        })
    }

    /// Store identity
    pub fn store_id(&self) -> &StoreId {
        &self.id
    }

    /// Save the whole document to bytes
    pub fn save(&mut self) -> Vec<u8> {
        self.doc.save()
    }

    /// Insert or replace a record
    pub fn put_record(&mut self, id: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let records = self.records_id()?;
        let encoded = serde_json::to_string(value).map_err(|e| StoreError::InvalidRecord {
            id: id.to_string(),
            details: e.to_string(),
        })?;
        self.doc.put(&records, id, encoded)?;
        Ok(())
    }

    /// Get a record by id
    pub fn get_record(&self, id: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let records = self.records_id()?;
        match self.doc.get(&records, id)? {
            Some((value, _)) => {
                let text = value
                    .to_str()
                    .ok_or_else(|| StoreError::InvalidType(format!("record {}", id)))?;
                let parsed =
                    serde_json::from_str(text).map_err(|e| StoreError::InvalidRecord {
                        id: id.to_string(),
                        details: e.to_string(),
                    })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Remove a record
    pub fn remove_record(&mut self, id: &str) -> Result<(), StoreError> {
        let records = self.records_id()?;
        self.doc.delete(&records, id)?;
        Ok(())
    }

    /// Ids of every record, sorted
    pub fn record_ids(&self) -> Result<Vec<String>, StoreError> {
        let records = self.records_id()?;
        let mut ids: Vec<String> = self.doc.keys(&records).collect();
        ids.sort();
        Ok(ids)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        match self.records_id() {
            Ok(records) => self.doc.keys(&records).count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records_id(&self) -> Result<automerge::ObjId, StoreError> {
        match self.doc.get(ROOT, keys::RECORDS)? {
            Some((Value::Object(ObjType::Map), id)) => Ok(id),
            Some(_) => Err(StoreError::InvalidType(keys::RECORDS.to_string())),
            None => Err(StoreError::MissingField(keys::RECORDS.to_string())),
        }
    }

    fn has_schema_version(&self) -> bool {
        matches!(self.doc.get(ROOT, keys::SCHEMA_VERSION), Ok(Some(_)))
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for DocumentStore {
    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn apply_remote_op(&mut self, op: &[u8]) -> Result<(), StoreError> {
        // Set local edits aside so the remote chunk is not echoed back
        let local = self.doc.save_incremental();
        if !local.is_empty() {
            self.pending.push(local);
        }

        let applied = self.doc.load_incremental(op)?;
        self.doc.save_incremental();
        debug!("Applied remote op ({} changes)", applied);
        Ok(())
    }

    fn collect_local_ops(&mut self) -> Vec<Vec<u8>> {
        let mut ops = std::mem::take(&mut self.pending);
        let latest = self.doc.save_incremental();
        if !latest.is_empty() {
            ops.push(latest);
        }
        ops
    }

    fn ensure_store_is_usable(&mut self) -> bool {
        let mut usable = true;

        if !self.has_schema_version() {
            usable = false;
            if let Err(e) = self
                .doc
                .put(ROOT, keys::SCHEMA_VERSION, CURRENT_SCHEMA_VERSION)
            {
                warn!("Failed to restore schema version: {}", e);
            }
        }

        if self.records_id().is_err() {
            usable = false;
            if let Err(e) = self.doc.put_object(ROOT, keys::RECORDS, ObjType::Map) {
                warn!("Failed to restore records map: {}", e);
            }
        }

        usable
    }
}
