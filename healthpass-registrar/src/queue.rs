//! Upload queue of holder records awaiting batch processing

use std::sync::Arc;

use chrono::Utc;
use healthpass_core::{BatchItem, HolderRecord};
use uuid::Uuid;

use crate::error::{RegistrarError, RegistrarResult};
use crate::store::{collections, DocumentStore, DocumentStoreExt, Selector, StoreError};

/// Upload queue kept in the organization's queue collection
pub struct StoreBatchQueue<S> {
    store: Arc<S>,
    query_limit: usize,
}

impl<S: DocumentStore> StoreBatchQueue<S> {
    pub fn new(store: Arc<S>, query_limit: usize) -> Self {
        Self { store, query_limit }
    }

    /// Queue source records; returned items keep the input order
    pub fn enqueue(&self, entity: &str, records: Vec<HolderRecord>) -> RegistrarResult<Vec<BatchItem>> {
        let enqueued_at = Utc::now().timestamp_micros();
        let items: Vec<BatchItem> = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| BatchItem {
                id: item_key(enqueued_at, index),
                record,
                error_message: None,
                issued_code: None,
            })
            .collect();

        let docs = items
            .iter()
            .map(|item| serde_json::to_value(item).map(|v| (item.id.clone(), v)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        let outcomes = self.store.create_bulk(&collections::upload_queue(entity), docs)?;
        if let Some(Err(e)) = outcomes.into_iter().find(Result::is_err) {
            return Err(RegistrarError::Internal(format!("could not queue upload: {}", e)));
        }

        tracing::debug!(entity, count = items.len(), "Queued holder records");
        Ok(items)
    }

    pub fn get(&self, entity: &str, id: &str) -> RegistrarResult<Option<BatchItem>> {
        Ok(self
            .store
            .read_typed::<BatchItem>(&collections::upload_queue(entity), id)?
            .map(|stored| stored.body))
    }

    /// Items still in the queue, including ones that previously failed,
    /// in the order they were queued
    pub fn pending(&self, entity: &str) -> RegistrarResult<Vec<BatchItem>> {
        Ok(self
            .store
            .query_typed::<BatchItem>(
                &collections::upload_queue(entity),
                &Selector::new(),
                self.query_limit,
            )?
            .into_iter()
            .map(|stored| stored.body)
            .collect())
    }

    /// Drop a processed item
    pub fn remove(&self, entity: &str, id: &str) -> RegistrarResult<()> {
        self.store.remove(&collections::upload_queue(entity), id)?;
        Ok(())
    }

    /// Write the failure reason onto an item so it can be inspected later
    pub fn mark_failed(&self, entity: &str, id: &str, reason: &str) -> RegistrarResult<()> {
        let collection = collections::upload_queue(entity);
        let Some(stored) = self.store.read_typed::<BatchItem>(&collection, id)? else {
            return Err(RegistrarError::NotFound(format!("Queue item {} not found", id)));
        };

        let mut item = stored.body;
        item.error_message = Some(reason.to_string());
        item.issued_code = None;
        self.store
            .update_typed(&collection, id, &stored.revision, &item)?;
        Ok(())
    }

    /// Record a code that was stored and delivered for an item that could
    /// not be dropped, so the next pass does not issue another one
    pub fn mark_issued(&self, entity: &str, id: &str, code: &str) -> RegistrarResult<()> {
        let collection = collections::upload_queue(entity);
        let Some(stored) = self.store.read_typed::<BatchItem>(&collection, id)? else {
            return Err(RegistrarError::NotFound(format!("Queue item {} not found", id)));
        };

        let mut item = stored.body;
        item.issued_code = Some(code.to_string());
        item.error_message = None;
        self.store
            .update_typed(&collection, id, &stored.revision, &item)?;
        Ok(())
    }
}

/// Queue keys sort by enqueue time, then position within the upload
fn item_key(enqueued_at: i64, index: usize) -> String {
    format!("{:020}-{:08}-{}", enqueued_at.max(0), index, Uuid::new_v4().simple())
}
