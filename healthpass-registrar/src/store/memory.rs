//! In-memory document store

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

use super::{BulkOutcome, DocumentStore, Revision, Selector, StoreError, StoreResult, StoredDocument};

type Collection = BTreeMap<String, StoredDocument>;

/// In-memory document store. Each call holds the lock only for its own duration.
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Internal("document store lock poisoned".to_string())
}

fn insert_new(coll: &mut Collection, collection: &str, key: &str, doc: Value) -> BulkOutcome {
    if coll.contains_key(key) {
        return Err(StoreError::conflict(collection, key));
    }
    let revision = Revision::first();
    coll.insert(
        key.to_string(),
        StoredDocument {
            key: key.to_string(),
            revision: revision.clone(),
            body: doc,
        },
    );
    Ok(revision)
}

impl DocumentStore for InMemoryDocumentStore {
    fn create(&self, collection: &str, key: &str, doc: Value) -> StoreResult<Revision> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let coll = collections.entry(collection.to_string()).or_default();
        insert_new(coll, collection, key, doc)
    }

    fn create_bulk(
        &self,
        collection: &str,
        docs: Vec<(String, Value)>,
    ) -> StoreResult<Vec<BulkOutcome>> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let coll = collections.entry(collection.to_string()).or_default();
        Ok(docs
            .into_iter()
            .map(|(key, doc)| insert_new(coll, collection, &key, doc))
            .collect())
    }

    fn read_safe(&self, collection: &str, key: &str) -> StoreResult<Option<StoredDocument>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections
            .get(collection)
            .and_then(|coll| coll.get(key))
            .cloned())
    }

    fn update(
        &self,
        collection: &str,
        key: &str,
        revision: &Revision,
        doc: Value,
    ) -> StoreResult<Revision> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let stored = collections
            .get_mut(collection)
            .and_then(|coll| coll.get_mut(key))
            .ok_or_else(|| StoreError::not_found(collection, key))?;

        if &stored.revision != revision {
            return Err(StoreError::conflict(collection, key));
        }

        let next = stored.revision.next();
        stored.revision = next.clone();
        stored.body = doc;
        Ok(next)
    }

    fn delete(&self, collection: &str, key: &str, revision: &Revision) -> StoreResult<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::not_found(collection, key))?;

        match coll.get(key) {
            None => Err(StoreError::not_found(collection, key)),
            Some(stored) if &stored.revision != revision => {
                Err(StoreError::conflict(collection, key))
            }
            Some(_) => {
                coll.remove(key);
                Ok(())
            }
        }
    }

    fn query(
        &self,
        collection: &str,
        selector: &Selector,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections
            .get(collection)
            .map(|coll| {
                coll.values()
                    .filter(|stored| selector.matches(&stored.body))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_conflicts_on_existing_key() {
        let store = InMemoryDocumentStore::new();
        store.create("c", "k", json!({ "a": 1 })).unwrap();

        let err = store.create("c", "k", json!({ "a": 2 })).unwrap_err();
        assert!(err.is_conflict());

        let stored = store.read_safe("c", "k").unwrap().unwrap();
        assert_eq!(stored.body["a"], 1);
    }

    #[test]
    fn test_update_requires_current_revision() {
        let store = InMemoryDocumentStore::new();
        let first = store.create("c", "k", json!({ "n": 1 })).unwrap();
        let second = store.update("c", "k", &first, json!({ "n": 2 })).unwrap();
        assert_eq!(second.generation(), 2);

        let stale = store.update("c", "k", &first, json!({ "n": 3 })).unwrap_err();
        assert!(stale.is_conflict());

        let missing = store.update("c", "nope", &first, json!({})).unwrap_err();
        assert!(matches!(missing, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_delete_requires_current_revision() {
        let store = InMemoryDocumentStore::new();
        let first = store.create("c", "k", json!({})).unwrap();
        let second = store.update("c", "k", &first, json!({ "x": true })).unwrap();

        assert!(store.delete("c", "k", &first).unwrap_err().is_conflict());
        store.delete("c", "k", &second).unwrap();
        assert!(store.read_safe("c", "k").unwrap().is_none());
    }

    #[test]
    fn test_bulk_outcomes_are_positional() {
        let store = InMemoryDocumentStore::new();
        store.create("c", "b", json!({})).unwrap();

        let outcomes = store
            .create_bulk(
                "c",
                vec![
                    ("a".into(), json!({})),
                    ("b".into(), json!({})),
                    ("a".into(), json!({})),
                    ("d".into(), json!({})),
                ],
            )
            .unwrap();

        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].as_ref().unwrap_err().is_conflict());
        assert!(outcomes[2].as_ref().unwrap_err().is_conflict());
        assert!(outcomes[3].is_ok());
        assert_eq!(store.len("c"), 3);
    }

    #[test]
    fn test_query_filters_and_limits() {
        let store = InMemoryDocumentStore::new();
        for (key, kind) in [("1", "x"), ("2", "y"), ("3", "x"), ("4", "x")] {
            store.create("c", key, json!({ "kind": kind })).unwrap();
        }

        let found = store
            .query("c", &Selector::new().eq("kind", "x"), 2)
            .unwrap();
        let keys: Vec<_> = found.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "3"]);
    }
}
