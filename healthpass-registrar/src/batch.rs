//! Bulk pre-registration of holders
//!
//! Items are handled one after another in source order. Each failure is
//! written back onto its queue item and counted; when the count reaches the
//! organization's threshold the rest of the batch is left untouched.
//! A code that was stored but never delivered is deleted again, so a retry
//! starts clean.

use std::sync::Arc;

use healthpass_core::{BatchItem, CodeGenerator, RegistrationCodeDocument};
use serde::Serialize;

use crate::audit::{AuditAction, AuditLog};
use crate::config::MessageTemplate;
use crate::conflict::ConflictResolver;
use crate::error::{RegistrarError, RegistrarResult};
use crate::notify::{dispatch_code, Notifier};
use crate::orgs::Organization;
use crate::queue::StoreBatchQueue;
use crate::registration::RegistrationCodes;
use crate::response::ApiResponse;
use crate::store::{collections, BulkOutcome, DocumentStore, StoreError};

/// How holders are told about their codes during a batch
#[derive(Debug, Clone, Default)]
pub struct NotificationParams {
    pub enabled: bool,
    pub template: Option<MessageTemplate>,
}

impl NotificationParams {
    pub fn for_organization(org: &Organization) -> Self {
        Self {
            enabled: org.notify_holders,
            template: org.registration_template.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub success_count: usize,
    pub failure_messages: Vec<String>,
    pub documents: Vec<RegistrationCodeDocument>,
    pub abandoned: bool,
}

impl BatchReport {
    pub fn failure_count(&self) -> usize {
        self.failure_messages.len() - usize::from(self.abandoned)
    }

    pub fn to_response(&self) -> ApiResponse<&BatchReport> {
        let message = if self.abandoned {
            self.failure_messages
                .last()
                .cloned()
                .unwrap_or_else(|| "batch processing abandoned".to_string())
        } else {
            format!(
                "{} holders registered, {} failed",
                self.success_count,
                self.failure_count()
            )
        };
        ApiResponse::ok(message, self)
    }
}

/// Per-item state between preparation and the sequential pass
enum Slot {
    Failed(String),
    /// Delivered on an earlier pass
    Issued(String),
    Prepared(RegistrationCodeDocument),
    Persisted(RegistrationCodeDocument),
    Rejected(RegistrationCodeDocument, StoreError),
}

pub struct BatchProcessor<S> {
    store: Arc<S>,
    codes: RegistrationCodes<S>,
    resolver: ConflictResolver<S>,
    queue: StoreBatchQueue<S>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    generator: Arc<dyn CodeGenerator>,
}

impl<S: DocumentStore> BatchProcessor<S> {
    pub fn new(
        store: Arc<S>,
        queue: StoreBatchQueue<S>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        generator: Arc<dyn CodeGenerator>,
    ) -> Self {
        let codes = RegistrationCodes::new(Arc::clone(&store));
        Self {
            resolver: ConflictResolver::new(codes.clone()),
            codes,
            store,
            queue,
            notifier,
            audit,
            generator,
        }
    }

    pub fn queue(&self) -> &StoreBatchQueue<S> {
        &self.queue
    }

    /// Create registration codes for queued holder records
    pub fn process_batch(
        &self,
        org: &Organization,
        items: &[BatchItem],
        expiration_timestamp: i64,
        params: &NotificationParams,
    ) -> RegistrarResult<BatchReport> {
        let entity = org.id.as_str();
        let template = match (params.enabled, &params.template) {
            (false, _) => None,
            (true, Some(template)) => Some(template),
            (true, None) => {
                return Err(RegistrarError::Validation(format!(
                    "organization {} notifies holders but has no registration template",
                    entity
                )))
            }
        };

        tracing::info!(entity, items = items.len(), "Processing batch");

        let mut slots = self.prepare(org, items, expiration_timestamp);
        self.persist(entity, &mut slots)?;

        let threshold = org.batch_max_error_threshold.max(1);
        let mut report = BatchReport::default();
        let mut failures = 0;

        let mut pending = items.iter().zip(slots);
        for (item, slot) in pending.by_ref() {
            let holder = org
                .identity
                .holder_id(&item.record)
                .unwrap_or_else(|_| item.id.clone());

            let outcome = match slot {
                Slot::Failed(reason) => Err(reason),
                Slot::Issued(code) => match self.codes.read(entity, &code) {
                    Ok(Some(stored)) => Ok((stored.body, false)),
                    Ok(None) => Err(format!("issued registration code {} is no longer stored", code)),
                    Err(e) => Err(e.to_string()),
                },
                Slot::Rejected(doc, e) if e.is_conflict() => {
                    Err(self.resolver.classify(entity, &doc.id).to_string())
                }
                Slot::Rejected(_, e) => Err(e.to_string()),
                Slot::Prepared(_) => Err("registration code was not stored".to_string()),
                Slot::Persisted(doc) => match template {
                    Some(template) => match dispatch_code(
                        self.notifier.as_ref(),
                        template,
                        item.mobile(),
                        item.email(),
                        &doc.register_code,
                    ) {
                        Ok(channel) => {
                            tracing::debug!(entity, holder_id = %holder, ?channel, "Holder notified");
                            Ok((doc, true))
                        }
                        Err(reason) => {
                            self.withdraw(entity, &doc.register_code);
                            Err(reason)
                        }
                    },
                    None => Ok((doc, true)),
                },
            };

            match outcome {
                Ok((doc, fresh)) => {
                    if let Err(e) = self.queue.remove(entity, &item.id) {
                        tracing::error!(entity, item = %item.id, error = %e, "Could not remove processed queue item");
                        if let Err(e) = self.queue.mark_issued(entity, &item.id, &doc.register_code) {
                            tracing::error!(entity, item = %item.id, error = %e, "Could not record issued code on queue item");
                        }
                    }
                    if fresh {
                        self.audit
                            .record(entity, &holder, AuditAction::CodeIssued, &doc.register_code);
                    }
                    report.success_count += 1;
                    report.documents.push(doc);
                }
                Err(reason) => {
                    failures += 1;
                    tracing::warn!(entity, holder_id = %holder, reason = %reason, "Batch item failed");
                    if let Err(e) = self.queue.mark_failed(entity, &item.id, &reason) {
                        tracing::error!(entity, item = %item.id, error = %e, "Could not record failure on queue item");
                    }
                    report.failure_messages.push(format!("{}: {}", holder, reason));

                    if failures >= threshold {
                        tracing::warn!(entity, failures, "Batch abandoned at error threshold");
                        report.abandoned = true;
                        report
                            .failure_messages
                            .push(format!("batch processing abandoned after {} failures", failures));
                        break;
                    }
                }
            }
        }

        // Untouched items stay queued; their stored codes go with them
        for (_, slot) in pending {
            if let Slot::Persisted(doc) = slot {
                self.withdraw(entity, &doc.register_code);
            }
        }

        tracing::info!(
            entity,
            succeeded = report.success_count,
            failed = failures,
            abandoned = report.abandoned,
            "Batch finished"
        );
        Ok(report)
    }

    /// Check each record and build its document; nothing is written here
    fn prepare(&self, org: &Organization, items: &[BatchItem], expiration_timestamp: i64) -> Vec<Slot> {
        let missing = items
            .iter()
            .filter(|i| i.issued_code.is_none() && i.supplied_code().is_none())
            .count();
        let mut generated = self
            .generator
            .registration_codes(missing, org.code_length)
            .into_iter();

        items
            .iter()
            .map(|item| {
                if let Some(code) = &item.issued_code {
                    return Slot::Issued(code.clone());
                }

                let code = match item.supplied_code() {
                    Some(code) => code.to_string(),
                    None => match generated.next() {
                        Some(code) => code,
                        None => return Slot::Failed("no registration code available".to_string()),
                    },
                };

                let checked = org
                    .identity
                    .check_required(&item.record)
                    .and_then(|()| org.identity.holder_id(&item.record));
                if let Err(e) = checked {
                    return Slot::Failed(e.to_string());
                }

                match self.codes.build(
                    &code,
                    &item.record,
                    expiration_timestamp,
                    false,
                    &org.code_bounds,
                ) {
                    Ok(doc) => Slot::Prepared(doc),
                    Err(e) => Slot::Failed(e.to_string()),
                }
            })
            .collect()
    }

    /// Delete a stored code whose holder could not be told about it
    fn withdraw(&self, entity: &str, code: &str) {
        if let Err(e) = self.codes.rollback(entity, code) {
            tracing::error!(entity, code, error = %e, "Could not remove undelivered registration code");
        }
    }

    /// Write every prepared document in a single bulk call
    fn persist(&self, entity: &str, slots: &mut [Slot]) -> RegistrarResult<()> {
        let docs = slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Prepared(doc) => Some(serde_json::to_value(doc).map(|v| (doc.id.clone(), v))),
                _ => None,
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        if docs.is_empty() {
            return Ok(());
        }

        let outcomes = self
            .store
            .create_bulk(&collections::registration(entity), docs)?;
        let mut outcomes = outcomes.into_iter();

        for slot in slots.iter_mut() {
            if !matches!(slot, Slot::Prepared(_)) {
                continue;
            }
            let outcome: Option<BulkOutcome> = outcomes.next();
            let Slot::Prepared(doc) = std::mem::replace(slot, Slot::Failed(String::new())) else {
                continue;
            };
            *slot = match outcome {
                Some(Ok(_)) => Slot::Persisted(doc),
                Some(Err(e)) => Slot::Rejected(doc, e),
                None => Slot::Failed("store returned no outcome for this item".to_string()),
            };
        }

        Ok(())
    }
}
