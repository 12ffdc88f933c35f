//! Document storage abstractions for the registrar
//!
//! The store is the system of record. Every document carries a revision
//! token; updates and deletes must present the revision they read, and a
//! mismatch is reported as a conflict instead of being retried here.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Per-position result of a bulk create
pub type BulkOutcome = StoreResult<Revision>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document {key} in {collection} conflicts with the stored revision")]
    Conflict { collection: String, key: String },

    #[error("Document {key} not found in {collection}")]
    NotFound { collection: String, key: String },

    #[error("Malformed document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn conflict(collection: &str, key: &str) -> Self {
        StoreError::Conflict {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }

    pub fn not_found(collection: &str, key: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Opaque version marker, `<generation>-<random>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision(pub String);

impl Revision {
    /// Revision of a freshly created document
    pub fn first() -> Self {
        Self::with_generation(1)
    }

    /// Revision that replaces this one on update
    pub fn next(&self) -> Self {
        Self::with_generation(self.generation() + 1)
    }

    pub fn generation(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(gen, _)| gen.parse().ok())
            .unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn with_generation(generation: u64) -> Self {
        Revision(format!("{}-{}", generation, Uuid::new_v4().simple()))
    }
}

/// A document together with the key and revision it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument<T = Value> {
    pub key: String,
    pub revision: Revision,
    pub body: T,
}

impl StoredDocument<Value> {
    fn decode<T: DeserializeOwned>(self) -> StoreResult<StoredDocument<T>> {
        Ok(StoredDocument {
            key: self.key,
            revision: self.revision,
            body: serde_json::from_value(self.body)?,
        })
    }
}

/// Top-level field equality selector
#[derive(Debug, Clone, Default)]
pub struct Selector {
    fields: Vec<(String, Value)>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.push((field.to_string(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

/// Trait for revisioned document storage
pub trait DocumentStore: Send + Sync {
    /// Create a document; an existing key is a conflict
    fn create(&self, collection: &str, key: &str, doc: Value) -> StoreResult<Revision>;

    /// Create many documents in one call. Outcomes line up with the input.
    fn create_bulk(&self, collection: &str, docs: Vec<(String, Value)>)
        -> StoreResult<Vec<BulkOutcome>>;

    /// Read a document, `None` when absent
    fn read_safe(&self, collection: &str, key: &str) -> StoreResult<Option<StoredDocument>>;

    /// Replace a document if `revision` is still current
    fn update(
        &self,
        collection: &str,
        key: &str,
        revision: &Revision,
        doc: Value,
    ) -> StoreResult<Revision>;

    /// Delete a document if `revision` is still current
    fn delete(&self, collection: &str, key: &str, revision: &Revision) -> StoreResult<()>;

    /// Documents matching `selector`, ordered by key, at most `limit`
    fn query(
        &self,
        collection: &str,
        selector: &Selector,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>>;
}

/// Typed helpers over any [`DocumentStore`]
pub trait DocumentStoreExt: DocumentStore {
    fn create_typed<T: Serialize>(&self, collection: &str, key: &str, doc: &T) -> StoreResult<Revision> {
        self.create(collection, key, serde_json::to_value(doc)?)
    }

    fn read_typed<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> StoreResult<Option<StoredDocument<T>>> {
        self.read_safe(collection, key)?
            .map(StoredDocument::decode)
            .transpose()
    }

    fn update_typed<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        revision: &Revision,
        doc: &T,
    ) -> StoreResult<Revision> {
        self.update(collection, key, revision, serde_json::to_value(doc)?)
    }

    fn query_typed<T: DeserializeOwned>(
        &self,
        collection: &str,
        selector: &Selector,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument<T>>> {
        self.query(collection, selector, limit)?
            .into_iter()
            .map(StoredDocument::decode)
            .collect()
    }

    /// Read then delete at the revision just read. Returns whether a document was removed.
    fn remove(&self, collection: &str, key: &str) -> StoreResult<bool> {
        match self.read_safe(collection, key)? {
            Some(stored) => match self.delete(collection, key, &stored.revision) {
                Ok(()) => Ok(true),
                Err(StoreError::NotFound { .. }) => Ok(false),
                Err(e) => Err(e),
            },
            None => Ok(false),
        }
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}

/// Collection names. Every organization owns its own set.
pub mod collections {
    pub fn registration(entity: &str) -> String {
        format!("{}-registration-codes", entity)
    }

    pub fn verification(entity: &str) -> String {
        format!("{}-verification-codes", entity)
    }

    pub fn upload_queue(entity: &str) -> String {
        format!("{}-upload-queue", entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_revision_generations() {
        let first = Revision::first();
        assert_eq!(first.generation(), 1);
        let second = first.next();
        assert_eq!(second.generation(), 2);
        assert_ne!(first, Revision::first());
    }

    #[test]
    fn test_selector_matches_top_level_fields() {
        let doc = json!({ "registerCode": "ABCDE", "verificationStatus": "new" });
        assert!(Selector::new().matches(&doc));
        assert!(Selector::new().eq("registerCode", "ABCDE").matches(&doc));
        assert!(!Selector::new()
            .eq("registerCode", "ABCDE")
            .eq("verificationStatus", "used")
            .matches(&doc));
    }
}
