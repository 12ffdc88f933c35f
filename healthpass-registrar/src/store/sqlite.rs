//! SQLite-based document store

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{BulkOutcome, DocumentStore, Revision, Selector, StoreError, StoreResult, StoredDocument};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed document store. Bodies are stored as JSON text.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

fn internal(e: rusqlite::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl SqliteDocumentStore {
    /// Open or create a SQLite database at the given path
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(internal)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly useful in tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(internal)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Internal("sqlite connection lock poisoned".to_string()))
    }

    /// Run database migrations
    fn migrate(conn: &Connection) -> StoreResult<()> {
        let current_version = Self::get_schema_version(conn)?;

        if current_version < SCHEMA_VERSION {
            tracing::info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );

            if current_version < 1 {
                Self::migrate_v1(conn)?;
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )
            .map_err(internal)?;

            tracing::info!("Database migrations complete");
        }

        Ok(())
    }

    /// Get current schema version (0 if no schema exists)
    fn get_schema_version(conn: &Connection) -> StoreResult<i32> {
        let table_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
                [],
                |row| row.get(0),
            )
            .map_err(internal)?;

        if !table_exists {
            return Ok(0);
        }

        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0).map(|v| v.unwrap_or(0))
        })
        .map_err(internal)
    }

    /// Migration to version 1: initial schema
    fn migrate_v1(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                revision TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            );
            "#,
        )
        .map_err(internal)?;

        Ok(())
    }

    fn insert(conn: &Connection, collection: &str, key: &str, doc: &Value) -> BulkOutcome {
        let revision = Revision::first();
        let body = serde_json::to_string(doc)?;

        conn.execute(
            "INSERT INTO documents (collection, key, revision, body) VALUES (?1, ?2, ?3, ?4)",
            params![collection, key, revision.as_str(), body],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                return StoreError::conflict(collection, key);
            }
            internal(e)
        })?;

        Ok(revision)
    }

    fn current_revision(conn: &Connection, collection: &str, key: &str) -> StoreResult<Option<Revision>> {
        conn.query_row(
            "SELECT revision FROM documents WHERE collection = ?1 AND key = ?2",
            params![collection, key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map(|rev| rev.map(Revision))
        .map_err(internal)
    }

    /// Explain why a guarded write touched no rows
    fn missed_write(conn: &Connection, collection: &str, key: &str) -> StoreError {
        match Self::current_revision(conn, collection, key) {
            Ok(Some(_)) => StoreError::conflict(collection, key),
            Ok(None) => StoreError::not_found(collection, key),
            Err(e) => e,
        }
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn create(&self, collection: &str, key: &str, doc: Value) -> StoreResult<Revision> {
        let conn = self.lock()?;
        Self::insert(&conn, collection, key, &doc)
    }

    fn create_bulk(
        &self,
        collection: &str,
        docs: Vec<(String, Value)>,
    ) -> StoreResult<Vec<BulkOutcome>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(internal)?;

        let outcomes = docs
            .iter()
            .map(|(key, doc)| Self::insert(&tx, collection, key, doc))
            .collect();

        tx.commit().map_err(internal)?;
        Ok(outcomes)
    }

    fn read_safe(&self, collection: &str, key: &str) -> StoreResult<Option<StoredDocument>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                "SELECT revision, body FROM documents WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(internal)?;

        match row {
            Some((revision, body)) => Ok(Some(StoredDocument {
                key: key.to_string(),
                revision: Revision(revision),
                body: serde_json::from_str(&body)?,
            })),
            None => Ok(None),
        }
    }

    fn update(
        &self,
        collection: &str,
        key: &str,
        revision: &Revision,
        doc: Value,
    ) -> StoreResult<Revision> {
        let conn = self.lock()?;
        let next = revision.next();
        let body = serde_json::to_string(&doc)?;

        let rows_affected = conn
            .execute(
                "UPDATE documents SET revision = ?1, body = ?2
                 WHERE collection = ?3 AND key = ?4 AND revision = ?5",
                params![next.as_str(), body, collection, key, revision.as_str()],
            )
            .map_err(internal)?;

        if rows_affected == 0 {
            return Err(Self::missed_write(&conn, collection, key));
        }

        Ok(next)
    }

    fn delete(&self, collection: &str, key: &str, revision: &Revision) -> StoreResult<()> {
        let conn = self.lock()?;

        let rows_affected = conn
            .execute(
                "DELETE FROM documents WHERE collection = ?1 AND key = ?2 AND revision = ?3",
                params![collection, key, revision.as_str()],
            )
            .map_err(internal)?;

        if rows_affected == 0 {
            return Err(Self::missed_write(&conn, collection, key));
        }

        Ok(())
    }

    fn query(
        &self,
        collection: &str,
        selector: &Selector,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT key, revision, body FROM documents WHERE collection = ?1 ORDER BY key")
            .map_err(internal)?;

        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(internal)?;

        let mut found = Vec::new();
        for row in rows {
            if found.len() >= limit {
                break;
            }
            let (key, revision, body) = row.map_err(internal)?;
            let body: Value = serde_json::from_str(&body)?;
            if selector.matches(&body) {
                found.push(StoredDocument {
                    key,
                    revision: Revision(revision),
                    body,
                });
            }
        }

        Ok(found)
    }
}
