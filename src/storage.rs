//!
//! Identity record storage
//! -----------------------
//! A document store holding one JSON record per identity, keyed by unique id.
//! The session flows read it on every login/rehydration and write to it when a
//! record is missing or lacks a role; admin operations write role changes.
//!
//! Two backends are provided: [`MemoryRecordStore`] for tests and ephemeral runs,
//! and [`FileRecordStore`] which keeps `<root>/users/<uid>.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

/// A stored identity record. Field names used by the session flows:
/// `email`, `name`, `photo_url`, `role`, `status`, `created_at`, `updated_at`.
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordStoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("invalid record key '{0}'")]
    InvalidKey(String),
}

impl From<RecordStoreError> for crate::error::AuthError {
    fn from(err: RecordStoreError) -> Self {
        crate::error::AuthError::RecordLookup(err.to_string())
    }
}

#[async_trait]
pub trait IdentityRecordStore: Send + Sync {
    /// Returns `Ok(None)` only when the record is confirmed absent.
    async fn get(&self, unique_id: &str) -> Result<Option<Document>, RecordStoreError>;

    /// Writes `record` under `unique_id`. With `merge`, only the supplied keys
    /// are overwritten and the rest of an existing record is kept; without it the
    /// record is replaced wholesale.
    async fn put(&self, unique_id: &str, record: Document, merge: bool) -> Result<(), RecordStoreError>;
}

fn merge_into(existing: Option<Document>, record: Document, merge: bool) -> Document {
    match existing {
        Some(mut cur) if merge => {
            for (k, v) in record {
                cur.insert(k, v);
            }
            cur
        }
        _ => record,
    }
}

fn check_key(unique_id: &str) -> Result<(), RecordStoreError> {
    let bad = unique_id.is_empty()
        || unique_id == "."
        || unique_id == ".."
        || unique_id.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if bad { Err(RecordStoreError::InvalidKey(unique_id.to_string())) } else { Ok(()) }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    docs: Arc<RwLock<HashMap<String, Document>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self { Self::default() }

    /// Synchronous snapshot of a record, for inspection outside the async contract.
    pub fn peek(&self, unique_id: &str) -> Option<Document> {
        self.docs.read().get(unique_id).cloned()
    }

    pub fn len(&self) -> usize { self.docs.read().len() }

    pub fn is_empty(&self) -> bool { self.docs.read().is_empty() }
}

#[async_trait]
impl IdentityRecordStore for MemoryRecordStore {
    async fn get(&self, unique_id: &str) -> Result<Option<Document>, RecordStoreError> {
        check_key(unique_id)?;
        Ok(self.docs.read().get(unique_id).cloned())
    }

    async fn put(&self, unique_id: &str, record: Document, merge: bool) -> Result<(), RecordStoreError> {
        check_key(unique_id)?;
        let mut docs = self.docs.write();
        let next = merge_into(docs.remove(unique_id), record, merge);
        docs.insert(unique_id.to_string(), next);
        Ok(())
    }
}

/// JSON files under `<root>/users`, one per record, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
    // Serializes read-modify-write merges within this process.
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl FileRecordStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { dir: root.as_ref().join("users"), write_lock: Arc::new(tokio::sync::Mutex::new(())) }
    }

    fn path_for(&self, unique_id: &str) -> PathBuf { self.dir.join(format!("{unique_id}.json")) }

    async fn read_doc(&self, unique_id: &str) -> Result<Option<Document>, RecordStoreError> {
        let path = self.path_for(unique_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RecordStoreError::Unavailable(format!("{}: {e}", path.display()))),
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(doc)) => Ok(Some(doc)),
            Ok(_) => Err(RecordStoreError::Corrupt { key: unique_id.to_string(), reason: "not a JSON object".into() }),
            Err(e) => Err(RecordStoreError::Corrupt { key: unique_id.to_string(), reason: e.to_string() }),
        }
    }
}

#[async_trait]
impl IdentityRecordStore for FileRecordStore {
    async fn get(&self, unique_id: &str) -> Result<Option<Document>, RecordStoreError> {
        check_key(unique_id)?;
        self.read_doc(unique_id).await
    }

    async fn put(&self, unique_id: &str, record: Document, merge: bool) -> Result<(), RecordStoreError> {
        check_key(unique_id)?;
        let _guard = self.write_lock.lock().await;
        let existing = if merge { self.read_doc(unique_id).await? } else { None };
        let next = merge_into(existing, record, merge);
        let body = serde_json::to_vec_pretty(&Value::Object(next))
            .map_err(|e| RecordStoreError::Unavailable(e.to_string()))?;
        let unavailable = |e: std::io::Error| RecordStoreError::Unavailable(format!("{}: {e}", self.dir.display()));
        tokio::fs::create_dir_all(&self.dir).await.map_err(unavailable)?;
        let path = self.path_for(unique_id);
        let tmp = self.dir.join(format!(".{unique_id}.json.tmp"));
        tokio::fs::write(&tmp, body).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, &path).await.map_err(unavailable)?;
        debug!(target: "storage", uid = unique_id, merge, "record written");
        Ok(())
    }
}
