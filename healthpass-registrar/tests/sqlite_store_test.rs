//! Tests for the SQLite document store

mod common;

use std::sync::Arc;

use chrono::Utc;
use healthpass_core::{CodeLengthBounds, CodeStatus, ErrorKind};
use healthpass_registrar::{
    DocumentStore, DocumentStoreExt, RegistrationCodes, Selector, SqliteDocumentStore, StoreError,
};
use serde_json::json;
use tempfile::TempDir;

use common::{holder, ENTITY};

fn create_test_store() -> (SqliteDocumentStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let store = SqliteDocumentStore::open(path.to_str().unwrap()).unwrap();
    (store, dir) // Return dir to keep it alive
}

/// Test: create then read returns the body at the first revision
#[test]
fn test_create_and_read() {
    let (store, _dir) = create_test_store();

    let revision = store.create("c", "k", json!({ "a": 1 })).unwrap();
    assert_eq!(revision.generation(), 1);

    let stored = store.read_safe("c", "k").unwrap().expect("document should exist");
    assert_eq!(stored.key, "k");
    assert_eq!(stored.revision, revision);
    assert_eq!(stored.body["a"], 1);

    assert!(store.read_safe("c", "missing").unwrap().is_none());
    assert!(store.read_safe("other", "k").unwrap().is_none());
}

/// Test: creating an existing key is a conflict and keeps the original
#[test]
fn test_create_conflict() {
    let (store, _dir) = create_test_store();

    store.create("c", "k", json!({ "a": 1 })).unwrap();
    let err = store.create("c", "k", json!({ "a": 2 })).unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(store.read_safe("c", "k").unwrap().unwrap().body["a"], 1);

    // Same key in another collection is independent
    store.create("d", "k", json!({ "a": 3 })).unwrap();
}

/// Test: update and delete need the current revision
#[test]
fn test_revision_checks() {
    let (store, _dir) = create_test_store();

    let first = store.create("c", "k", json!({ "a": 1 })).unwrap();
    let second = store.update("c", "k", &first, json!({ "a": 2 })).unwrap();
    assert_eq!(second.generation(), 2);
    assert_ne!(first, second);

    assert!(store.update("c", "k", &first, json!({ "a": 3 })).unwrap_err().is_conflict());
    assert!(store.delete("c", "k", &first).unwrap_err().is_conflict());

    let missing = store.update("c", "nope", &first, json!({})).unwrap_err();
    assert!(matches!(missing, StoreError::NotFound { .. }));

    store.delete("c", "k", &second).unwrap();
    assert!(store.read_safe("c", "k").unwrap().is_none());
    assert!(matches!(
        store.delete("c", "k", &second).unwrap_err(),
        StoreError::NotFound { .. }
    ));
}

/// Test: bulk create reports one outcome per input, in order
#[test]
fn test_bulk_outcomes_are_positional() {
    let (store, _dir) = create_test_store();
    store.create("c", "taken", json!({})).unwrap();

    let outcomes = store
        .create_bulk(
            "c",
            vec![
                ("a".to_string(), json!({ "n": 1 })),
                ("taken".to_string(), json!({ "n": 2 })),
                ("a".to_string(), json!({ "n": 3 })),
                ("b".to_string(), json!({ "n": 4 })),
            ],
        )
        .unwrap();

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes[0].is_ok());
    assert!(outcomes[1].as_ref().unwrap_err().is_conflict());
    assert!(outcomes[2].as_ref().unwrap_err().is_conflict());
    assert!(outcomes[3].is_ok());
    assert_eq!(store.read_safe("c", "a").unwrap().unwrap().body["n"], 1);
}

/// Test: query filters on top-level fields and honours the limit
#[test]
fn test_query() {
    let (store, _dir) = create_test_store();
    for (key, owner) in [("1", "x"), ("2", "y"), ("3", "x"), ("4", "x")] {
        store.create("c", key, json!({ "owner": owner })).unwrap();
    }

    let selector = Selector::new().eq("owner", "x");
    let all: Vec<String> = store
        .query("c", &selector, 10)
        .unwrap()
        .into_iter()
        .map(|d| d.key)
        .collect();
    assert_eq!(all, vec!["1", "3", "4"]);

    assert_eq!(store.query("c", &selector, 2).unwrap().len(), 2);
}

/// Test: documents survive reopening the database
#[test]
fn test_reopen_keeps_documents() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let path = path.to_str().unwrap();

    let revision = {
        let store = SqliteDocumentStore::open(path).unwrap();
        store.create("c", "k", json!({ "a": 1 })).unwrap()
    };

    let store = SqliteDocumentStore::open(path).unwrap();
    let stored = store.read_safe("c", "k").unwrap().unwrap();
    assert_eq!(stored.revision, revision);
}

/// Test: the registration lifecycle runs unchanged on SQLite
#[test]
fn test_registration_lifecycle() {
    let store = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
    let codes = RegistrationCodes::new(Arc::clone(&store));

    let doc = codes
        .build(
            "SQLITE0001",
            &holder("h-1", "+15550001"),
            Utc::now().timestamp() + 3600,
            false,
            &CodeLengthBounds::default(),
        )
        .unwrap();
    store
        .create_typed(
            &healthpass_registrar::store::collections::registration(ENTITY),
            "SQLITE0001",
            &doc,
        )
        .unwrap();

    let stored = codes
        .validate(ENTITY, "SQLITE0001")
        .unwrap()
        .into_result("Registration code", "SQLITE0001")
        .unwrap();
    let consumed = codes.consume(ENTITY, &stored).unwrap();
    assert_eq!(consumed.body.status, CodeStatus::Used);
    assert_eq!(consumed.body.holder["mobile"], "+15550001");

    let err = codes.consume(ENTITY, &stored).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}
