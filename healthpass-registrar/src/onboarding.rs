//! Holder onboarding operations
//!
//! [`Registrar`] bundles the store, the organization directory and the
//! outbound collaborators, and exposes the operations an API layer calls.

use std::sync::Arc;

use chrono::Utc;
use healthpass_core::{
    BatchItem, CodeGenerator, CodeStatus, HolderRecord, Rejection, RegistrationCodeDocument,
};
use serde::Serialize;

use crate::audit::{AuditAction, AuditLog};
use crate::batch::{BatchProcessor, BatchReport, NotificationParams};
use crate::config::RegistrarConfig;
use crate::conflict::ConflictResolver;
use crate::error::{RegistrarError, RegistrarResult};
use crate::notify::{dispatch_code, Channel, Notifier};
use crate::orgs::{Organization, OrganizationDirectory};
use crate::queue::StoreBatchQueue;
use crate::registration::{RegistrationCodes, LABEL as REGISTRATION_LABEL};
use crate::store::{collections, DocumentStore, DocumentStoreExt, StoreError};
use crate::verification::{VerificationCodes, LABEL as VERIFICATION_LABEL};

/// First step of registration
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum RegistrationStart {
    /// No second factor needed, the code can be completed right away
    Ready {
        registration: RegistrationCodeDocument,
    },
    /// A verification code was sent to the holder
    VerificationSent {
        channel: Channel,
        #[serde(rename = "expirationTimestamp")]
        expiration_timestamp: i64,
    },
}

pub struct Registrar<S> {
    config: RegistrarConfig,
    orgs: Arc<dyn OrganizationDirectory>,
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    generator: Arc<dyn CodeGenerator>,
    registration: RegistrationCodes<S>,
    verification: VerificationCodes<S>,
    resolver: ConflictResolver<S>,
    batch: BatchProcessor<S>,
}

impl<S: DocumentStore> Registrar<S> {
    pub fn new(
        config: RegistrarConfig,
        store: Arc<S>,
        orgs: Arc<dyn OrganizationDirectory>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        generator: Arc<dyn CodeGenerator>,
    ) -> Self {
        let registration = RegistrationCodes::new(Arc::clone(&store));
        let verification = VerificationCodes::new(Arc::clone(&store), Arc::clone(&generator), &config);
        let batch = BatchProcessor::new(
            Arc::clone(&store),
            StoreBatchQueue::new(Arc::clone(&store), config.query_limit),
            Arc::clone(&notifier),
            Arc::clone(&audit),
            Arc::clone(&generator),
        );

        Self {
            resolver: ConflictResolver::new(registration.clone()),
            registration,
            verification,
            batch,
            config,
            orgs,
            store,
            notifier,
            audit,
            generator,
        }
    }

    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    pub fn registration_codes(&self) -> &RegistrationCodes<S> {
        &self.registration
    }

    pub fn verification_codes(&self) -> &VerificationCodes<S> {
        &self.verification
    }

    pub fn queue(&self) -> &StoreBatchQueue<S> {
        self.batch.queue()
    }

    /// Look up an organization; a missing one fails the whole operation
    pub fn organization(&self, entity: &str) -> RegistrarResult<Organization> {
        self.orgs
            .organization(entity)?
            .ok_or_else(|| RegistrarError::OrganizationNotFound(entity.to_string()))
    }

    fn registration_expiry(&self) -> i64 {
        Utc::now().timestamp() + self.config.registration_ttl_seconds()
    }

    fn holder_label(org: &Organization, record: &HolderRecord, fallback: &str) -> String {
        org.identity
            .holder_id(record)
            .unwrap_or_else(|_| fallback.to_string())
    }

    /// Queue source records and pre-register them in one batch
    pub fn upload(&self, entity: &str, records: Vec<HolderRecord>) -> RegistrarResult<BatchReport> {
        let org = self.organization(entity)?;
        let items = self.batch.queue().enqueue(entity, records)?;
        self.run_batch(&org, &items)
    }

    /// Run the batch again over whatever is still queued
    pub fn process_pending(&self, entity: &str) -> RegistrarResult<BatchReport> {
        let org = self.organization(entity)?;
        let items = self.batch.queue().pending(entity)?;
        self.run_batch(&org, &items)
    }

    fn run_batch(&self, org: &Organization, items: &[BatchItem]) -> RegistrarResult<BatchReport> {
        self.batch.process_batch(
            org,
            items,
            self.registration_expiry(),
            &NotificationParams::for_organization(org),
        )
    }

    /// Issue a registration code for a single holder.
    ///
    /// When the holder cannot be notified the new code is deleted again.
    pub fn issue_code(&self, entity: &str, record: HolderRecord) -> RegistrarResult<RegistrationCodeDocument> {
        let org = self.organization(entity)?;
        org.identity.check_required(&record)?;
        let holder_id = org.identity.holder_id(&record)?;

        let item = BatchItem {
            id: holder_id.clone(),
            record,
            error_message: None,
            issued_code: None,
        };
        let code = match item.supplied_code() {
            Some(code) => code.to_string(),
            None => self
                .generator
                .registration_codes(1, org.code_length)
                .pop()
                .ok_or_else(|| RegistrarError::Internal("code generator returned no code".to_string()))?,
        };

        let doc = self.registration.build(
            &code,
            &item.record,
            self.registration_expiry(),
            false,
            &org.code_bounds,
        )?;
        self.create_registration(entity, &doc)?;

        if org.notify_holders {
            if let Some(template) = &org.registration_template {
                if let Err(reason) =
                    dispatch_code(self.notifier.as_ref(), template, item.mobile(), item.email(), &code)
                {
                    if let Err(e) = self.registration.rollback(entity, &code) {
                        tracing::error!(entity, code = %code, error = %e, "Could not remove undelivered registration code");
                    }
                    return Err(RegistrarError::Notification(format!("{}: {}", holder_id, reason)));
                }
            }
        }

        self.audit
            .record(entity, &holder_id, AuditAction::CodeIssued, &code);
        tracing::info!(entity, holder_id = %holder_id, "Registration code issued");
        Ok(doc)
    }

    /// Pre-generate codes with no holder attached. Codes that collide with
    /// existing ones are skipped, so fewer than `count` may come back.
    pub fn generate_codes(&self, entity: &str, count: usize) -> RegistrarResult<Vec<String>> {
        let org = self.organization(entity)?;
        let expiration = self.registration_expiry();
        let holder = HolderRecord::new();

        let mut codes = Vec::with_capacity(count);
        let mut docs = Vec::with_capacity(count);
        for code in self.generator.registration_codes(count, org.code_length) {
            let doc = self
                .registration
                .build(&code, &holder, expiration, false, &org.code_bounds)?;
            docs.push((code.clone(), serde_json::to_value(&doc).map_err(StoreError::from)?));
            codes.push(code);
        }

        let outcomes = self
            .store
            .create_bulk(&collections::registration(entity), docs)?;

        let mut created = Vec::with_capacity(codes.len());
        for (code, outcome) in codes.into_iter().zip(outcomes) {
            match outcome {
                Ok(_) => created.push(code),
                Err(e) if e.is_conflict() => {
                    tracing::warn!(entity, code = %code, "Generated code already exists, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(entity, requested = count, created = created.len(), "Generated registration codes");
        Ok(created)
    }

    /// Create a shared code that never expires and is never consumed
    pub fn create_global_code(&self, entity: &str, code: &str) -> RegistrarResult<RegistrationCodeDocument> {
        let org = self.organization(entity)?;
        let doc = self.registration.build(
            code,
            &HolderRecord::new(),
            self.registration_expiry(),
            true,
            &org.code_bounds,
        )?;
        self.create_registration(entity, &doc)?;
        tracing::info!(entity, code, "Global registration code created");
        Ok(doc)
    }

    fn create_registration(&self, entity: &str, doc: &RegistrationCodeDocument) -> RegistrarResult<()> {
        match self
            .store
            .create_typed(&collections::registration(entity), &doc.id, doc)
        {
            Ok(_) => Ok(()),
            Err(StoreError::Conflict { .. }) => Err(self.resolver.classify(entity, &doc.id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate a registration code and, for MFA organizations, send the
    /// holder a verification code
    pub fn begin_registration(&self, entity: &str, code: &str) -> RegistrarResult<RegistrationStart> {
        let org = self.organization(entity)?;
        let stored = self
            .registration
            .validate(entity, code)?
            .into_result(REGISTRATION_LABEL, code)?;

        if !org.mfa_enabled {
            return Ok(RegistrationStart::Ready {
                registration: stored.body,
            });
        }

        let template = org.verification_template.as_ref().ok_or_else(|| {
            RegistrarError::Validation(format!(
                "organization {} enables MFA but has no verification template",
                entity
            ))
        })?;

        let issued = self.verification.issue(entity, &stored)?;
        let registration = &issued.registration.body;
        let channel = dispatch_code(
            self.notifier.as_ref(),
            template,
            registration.mobile(),
            registration.email(),
            &issued.verification_code,
        )
        .map_err(RegistrarError::Notification)?;

        let holder_id = Self::holder_label(&org, &registration.holder, code);
        self.audit
            .record(entity, &holder_id, AuditAction::VerificationIssued, code);

        Ok(RegistrationStart::VerificationSent {
            channel,
            expiration_timestamp: issued.expiration_timestamp,
        })
    }

    /// Spend the registration code, and the verification code when MFA is on
    pub fn complete_registration(
        &self,
        entity: &str,
        code: &str,
        verification: Option<&str>,
    ) -> RegistrarResult<RegistrationCodeDocument> {
        let org = self.organization(entity)?;
        let stored = self
            .registration
            .validate(entity, code)?
            .into_result(REGISTRATION_LABEL, code)?;

        let mut verified = None;
        if org.mfa_enabled {
            let Some(input) = verification else {
                return Err(RegistrarError::Validation(format!(
                    "{} is required for organization {}",
                    VERIFICATION_LABEL, entity
                )));
            };
            let checked = self
                .verification
                .validate(entity, input)?
                .into_result(VERIFICATION_LABEL, input)?;

            if checked.body.register_code != code
                || stored.body.verification_code.as_deref() != Some(checked.key.as_str())
            {
                return Err(RegistrarError::Validation(format!(
                    "{} {} does not belong to {} {}",
                    VERIFICATION_LABEL, input, REGISTRATION_LABEL, code
                )));
            }
            verified = Some(checked);
        }

        // The registration code decides the race; a loser keeps its verification code
        let consumed = self.registration.consume(entity, &stored)?;

        if let Some(verified) = verified {
            // Spent either way once the registration code is used
            if let Err(e) = self.verification.consume(entity, &verified) {
                tracing::warn!(entity, code, error = %e, "Could not mark verification code used");
            }
        }

        let holder_id = Self::holder_label(&org, &consumed.body.holder, code);
        self.audit
            .record(entity, &holder_id, AuditAction::CodeConsumed, code);
        Ok(consumed.body)
    }

    /// Remove a spent code once the credential has been issued.
    ///
    /// Returns `false` for GLOBAL codes, which are kept.
    pub fn retire(&self, entity: &str, code: &str) -> RegistrarResult<bool> {
        let org = self.organization(entity)?;
        let current = self
            .registration
            .read(entity, code)?
            .ok_or_else(|| RegistrarError::rejected(Rejection::NotFound, REGISTRATION_LABEL, code))?;

        match current.body.status {
            CodeStatus::Global => return Ok(false),
            CodeStatus::New => {
                return Err(RegistrarError::InvalidState(format!(
                    "{} {} has not been used yet",
                    REGISTRATION_LABEL, code
                )))
            }
            CodeStatus::Used => {}
        }

        let body = self.registration.delete_with_verification(entity, current)?;
        let holder_id = Self::holder_label(&org, &body.holder, code);
        self.audit
            .record(entity, &holder_id, AuditAction::CodeRetired, code);
        Ok(true)
    }

    /// Withdraw a code that was never used
    pub fn rollback(&self, entity: &str, code: &str) -> RegistrarResult<RegistrationCodeDocument> {
        let org = self.organization(entity)?;
        let body = self.registration.rollback(entity, code)?;
        let holder_id = Self::holder_label(&org, &body.holder, code);
        self.audit
            .record(entity, &holder_id, AuditAction::CodeRolledBack, code);
        Ok(body)
    }
}
