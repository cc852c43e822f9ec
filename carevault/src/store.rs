//! Document storage abstraction.
//!
//! The vault only needs a small slice of a document database: keyed reads,
//! writes, atomic batches and a compare-and-set used when publishing a new
//! DEK. Paths are opaque slash-separated strings.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::FieldMap;

/// Errors raised by storage adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The document does not exist
    #[error("document not found: {0}")]
    NotFound(String),

    /// The backend rejected or failed the operation
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// One write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or overwrite a document (or merge into it when `merge` is set)
    Set {
        /// Document path
        path: String,
        /// Document fields
        fields: FieldMap,
        /// Merge into an existing document instead of replacing it
        merge: bool,
    },
    /// Merge fields into an existing document
    Update {
        /// Document path
        path: String,
        /// Fields to overwrite
        fields: FieldMap,
    },
    /// Remove a document
    Delete {
        /// Document path
        path: String,
    },
}

/// An ordered group of writes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a set.
    pub fn set(&mut self, path: impl Into<String>, fields: FieldMap, merge: bool) -> &mut Self {
        self.ops.push(WriteOp::Set { path: path.into(), fields, merge });
        self
    }

    /// Adds an update.
    pub fn update(&mut self, path: impl Into<String>, fields: FieldMap) -> &mut Self {
        self.ops.push(WriteOp::Update { path: path.into(), fields });
        self
    }

    /// Adds a delete.
    pub fn delete(&mut self, path: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete { path: path.into() });
        self
    }

    /// Queued writes in order.
    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Number of queued writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Async document store used by [`ResidentVault`](crate::service::ResidentVault).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document.
    async fn get(&self, path: &str) -> Result<Option<FieldMap>, StoreError>;

    /// Writes a document, replacing it unless `merge` is set.
    async fn set(&self, path: &str, fields: FieldMap, merge: bool) -> Result<(), StoreError>;

    /// Merges fields into an existing document.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the document does not exist.
    async fn update(&self, path: &str, fields: FieldMap) -> Result<(), StoreError>;

    /// Writes a new document unless one already exists at `path`.
    ///
    /// Returns `true` if this call created the document, `false` if the
    /// path was taken and nothing was written.
    async fn create(&self, path: &str, fields: FieldMap) -> Result<bool, StoreError>;

    /// Applies every write in the batch, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Writes `field` on an existing document only if it is not already set.
    ///
    /// Returns `true` if this call wrote the value, `false` if another value
    /// was already present.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the document does not exist.
    async fn set_field_if_absent(
        &self,
        path: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, StoreError>;

    /// Lists the direct children of a collection as `(id, fields)` pairs.
    async fn list(&self, collection: &str) -> Result<Vec<(String, FieldMap)>, StoreError>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    async fn get(&self, path: &str) -> Result<Option<FieldMap>, StoreError> {
        (**self).get(path).await
    }

    async fn set(&self, path: &str, fields: FieldMap, merge: bool) -> Result<(), StoreError> {
        (**self).set(path, fields, merge).await
    }

    async fn update(&self, path: &str, fields: FieldMap) -> Result<(), StoreError> {
        (**self).update(path, fields).await
    }

    async fn create(&self, path: &str, fields: FieldMap) -> Result<bool, StoreError> {
        (**self).create(path, fields).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        (**self).commit(batch).await
    }

    async fn set_field_if_absent(
        &self,
        path: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, StoreError> {
        (**self).set_field_if_absent(path, field, value).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, FieldMap)>, StoreError> {
        (**self).list(collection).await
    }
}

/// In-process [`DocumentStore`] backed by a sorted map.
///
/// Batches are applied to a staged copy and swapped in only when every write
/// succeeds. [`MemoryStore::fail_next_commit_after`] injects a failure part
/// way through the next batch.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, FieldMap>>,
    fault: Mutex<Option<usize>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail after `ops` writes have been staged.
    pub async fn fail_next_commit_after(&self, ops: usize) {
        *self.fault.lock().await = Some(ops);
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    /// True if no documents are stored.
    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Copy of every stored document, keyed by path.
    pub async fn snapshot(&self) -> BTreeMap<String, FieldMap> {
        self.docs.read().await.clone()
    }

    fn apply(docs: &mut BTreeMap<String, FieldMap>, op: WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::Set { path, fields, merge: false } => {
                docs.insert(path, fields);
            }
            WriteOp::Set { path, fields, merge: true } => {
                docs.entry(path).or_default().extend(fields);
            }
            WriteOp::Update { path, fields } => {
                let doc = docs.get_mut(&path).ok_or(StoreError::NotFound(path))?;
                doc.extend(fields);
            }
            WriteOp::Delete { path } => {
                docs.remove(&path);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<FieldMap>, StoreError> {
        Ok(self.docs.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, fields: FieldMap, merge: bool) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        Self::apply(&mut docs, WriteOp::Set { path: path.to_string(), fields, merge })
    }

    async fn update(&self, path: &str, fields: FieldMap) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        Self::apply(&mut docs, WriteOp::Update { path: path.to_string(), fields })
    }

    async fn create(&self, path: &str, fields: FieldMap) -> Result<bool, StoreError> {
        match self.docs.write().await.entry(path.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(fields);
                Ok(true)
            }
        }
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let fail_after = self.fault.lock().await.take();
        let mut docs = self.docs.write().await;
        let mut staged = docs.clone();

        let total = batch.len();
        for (applied, op) in batch.ops.into_iter().enumerate() {
            if fail_after == Some(applied) {
                return Err(StoreError::Backend(format!(
                    "injected failure after {applied} of {total} writes"
                )));
            }
            Self::apply(&mut staged, op)?;
        }

        *docs = staged;
        debug!(writes = total, "committed batch");
        Ok(())
    }

    async fn set_field_if_absent(
        &self,
        path: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, StoreError> {
        let mut docs = self.docs.write().await;
        let doc = docs.get_mut(path).ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if doc.get(field).is_some_and(|existing| !existing.is_null()) {
            return Ok(false);
        }
        doc.insert(field.to_string(), value);
        Ok(true)
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, FieldMap)>, StoreError> {
        let prefix = format!("{}/", collection.trim_end_matches('/'));
        let docs = self.docs.read().await;
        Ok(docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, fields)| {
                let id = &path[prefix.len()..];
                (!id.contains('/')).then(|| (id.to_string(), fields.clone()))
            })
            .collect())
    }
}
