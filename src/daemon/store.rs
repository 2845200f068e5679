//! Persistence contract and the in-memory store.
//!
//! The coordinator consumes storage through [`ModelStore`]: load a model,
//! stream its operation log, append operations, write snapshots, and
//! cascade-delete. Append must be atomic and dense-version checked; snapshot
//! writes are idempotent on `(model, version)`.
//!
//! [`MemoryModelStore`] is the in-process implementation used by tests and
//! embedders. It keeps log entries and snapshots in their binary wire forms
//! (encode on append, decode on read), so the codec is exercised by every
//! path through the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use bytes::Bytes;
use thiserror::Error;

use crate::core::{AppliedOperation, CollectionId, ModelId, ObjectValue, SessionId};
use crate::daemon::codec::{self, CodecError};

/// Model metadata as stored, without the document itself.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelMetaData {
    pub id: ModelId,
    pub collection_id: CollectionId,
    pub version: u64,
    pub created_at: i64,
    pub modified_at: i64,
}

/// Result of loading a model: metadata plus the newest snapshot.
#[derive(Clone, Debug)]
pub struct LoadedModel {
    pub meta: ModelMetaData,
    pub snapshot_version: u64,
    pub root: ObjectValue,
}

/// One operation log entry, keyed by `(model_id, version)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelOperation {
    pub model_id: ModelId,
    pub version: u64,
    pub timestamp: i64,
    pub session_id: SessionId,
    pub op: AppliedOperation,
}

/// A materialized document at a specific version.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub model_id: ModelId,
    pub version: u64,
    pub timestamp: i64,
    pub root: ObjectValue,
}

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum StoreError {
    #[error("model {model_id} not found")]
    NotFound { model_id: ModelId },
    #[error("model {model_id} already exists")]
    AlreadyExists { model_id: ModelId },
    #[error("operation log gap for {model_id}: expected version {expected}, got {got}")]
    VersionGap {
        model_id: ModelId,
        expected: u64,
        got: u64,
    },
    #[error("stored data corrupt: {0}")]
    Corrupt(#[from] CodecError),
    #[error("storage failure: {reason}")]
    Io { reason: String },
}

pub type OperationStream = Box<dyn Iterator<Item = Result<ModelOperation, StoreError>> + Send>;

/// The storage contract the coordinator drives.
///
/// All methods are fallible. The coordinator treats any append failure as
/// model-fatal and any read failure during loading as fatal for that open
/// cycle; snapshot write failures are transient.
pub trait ModelStore: Send + Sync {
    fn load_model(&self, id: &ModelId) -> Result<Option<LoadedModel>, StoreError>;

    /// Ordered stream of operations with `version > from_version_excl`.
    fn load_operations(
        &self,
        id: &ModelId,
        from_version_excl: u64,
    ) -> Result<OperationStream, StoreError>;

    fn create_model(
        &self,
        id: &ModelId,
        collection_id: &CollectionId,
        root: &ObjectValue,
        created_at: i64,
    ) -> Result<(), StoreError>;

    fn append_operation(&self, op: &ModelOperation) -> Result<(), StoreError>;

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    fn delete_model(&self, id: &ModelId) -> Result<(), StoreError>;
}

#[derive(Debug)]
struct StoredModel {
    collection_id: CollectionId,
    version: u64,
    created_at: i64,
    modified_at: i64,
    /// Encoded log entries; index `i` holds version `i + 1`.
    ops: Vec<Bytes>,
    /// Encoded snapshots by version.
    snapshots: BTreeMap<u64, Bytes>,
}

/// In-memory [`ModelStore`].
#[derive(Default)]
pub struct MemoryModelStore {
    models: Mutex<HashMap<ModelId, StoredModel>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ModelId, StoredModel>>, StoreError> {
        self.models.lock().map_err(|_| StoreError::Io {
            reason: "store lock poisoned".to_string(),
        })
    }
}

impl ModelStore for MemoryModelStore {
    fn load_model(&self, id: &ModelId) -> Result<Option<LoadedModel>, StoreError> {
        let models = self.lock()?;
        let Some(stored) = models.get(id) else {
            return Ok(None);
        };
        let (snapshot_version, encoded) = stored
            .snapshots
            .iter()
            .next_back()
            .map(|(v, bytes)| (*v, bytes.clone()))
            .ok_or_else(|| StoreError::Io {
                reason: format!("model {id} has no reachable snapshot"),
            })?;
        let snapshot = codec::decode_snapshot(&encoded)?;
        Ok(Some(LoadedModel {
            meta: ModelMetaData {
                id: id.clone(),
                collection_id: stored.collection_id.clone(),
                version: stored.version,
                created_at: stored.created_at,
                modified_at: stored.modified_at,
            },
            snapshot_version,
            root: snapshot.root,
        }))
    }

    fn load_operations(
        &self,
        id: &ModelId,
        from_version_excl: u64,
    ) -> Result<OperationStream, StoreError> {
        let models = self.lock()?;
        let Some(stored) = models.get(id) else {
            return Err(StoreError::NotFound {
                model_id: id.clone(),
            });
        };
        let skip = usize::try_from(from_version_excl).unwrap_or(usize::MAX);
        let encoded: Vec<Bytes> = stored.ops.iter().skip(skip).cloned().collect();
        let model_id = id.clone();
        Ok(Box::new(encoded.into_iter().map(move |bytes| {
            codec::decode_operation(&model_id, &bytes).map_err(StoreError::from)
        })))
    }

    fn create_model(
        &self,
        id: &ModelId,
        collection_id: &CollectionId,
        root: &ObjectValue,
        created_at: i64,
    ) -> Result<(), StoreError> {
        let mut models = self.lock()?;
        if models.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                model_id: id.clone(),
            });
        }
        // The creation snapshot at version 0 keeps the "at least one
        // snapshot reachable" invariant from the first instant.
        let initial = Snapshot {
            model_id: id.clone(),
            version: 0,
            timestamp: created_at,
            root: root.clone(),
        };
        let mut snapshots = BTreeMap::new();
        snapshots.insert(0, Bytes::from(codec::encode_snapshot(&initial)));
        models.insert(
            id.clone(),
            StoredModel {
                collection_id: collection_id.clone(),
                version: 0,
                created_at,
                modified_at: created_at,
                ops: Vec::new(),
                snapshots,
            },
        );
        Ok(())
    }

    fn append_operation(&self, op: &ModelOperation) -> Result<(), StoreError> {
        let mut models = self.lock()?;
        let Some(stored) = models.get_mut(&op.model_id) else {
            return Err(StoreError::NotFound {
                model_id: op.model_id.clone(),
            });
        };
        let expected = stored.version + 1;
        if op.version != expected {
            return Err(StoreError::VersionGap {
                model_id: op.model_id.clone(),
                expected,
                got: op.version,
            });
        }
        stored.ops.push(Bytes::from(codec::encode_operation(op)));
        stored.version = op.version;
        stored.modified_at = op.timestamp;
        Ok(())
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut models = self.lock()?;
        let Some(stored) = models.get_mut(&snapshot.model_id) else {
            return Err(StoreError::NotFound {
                model_id: snapshot.model_id.clone(),
            });
        };
        stored.snapshots.insert(
            snapshot.version,
            Bytes::from(codec::encode_snapshot(snapshot)),
        );
        Ok(())
    }

    fn delete_model(&self, id: &ModelId) -> Result<(), StoreError> {
        let mut models = self.lock()?;
        if models.remove(id).is_none() {
            return Err(StoreError::NotFound {
                model_id: id.clone(),
            });
        }
        Ok(())
    }
}
